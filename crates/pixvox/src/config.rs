use pixvox_calib::{CalibrationStore, SessionParams};
use pixvox_capture::OrchestratorOptions;
use pixvox_carve::{GridSpec, MotionParams, WorldFrame};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}: invalid config: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Everything needed to calibrate and run one camera rig.
///
/// Every field has a default, so a config file only lists what it changes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    /// Directory holding one calibration file per camera.
    pub data_dir: PathBuf,
    pub session: SessionParams,
    pub capture: OrchestratorOptions,
    pub motion: MotionParams,
    pub grid: GridSpec,
    pub world: WorldFrame,
    /// Delay between reconstruction cycles.
    pub cycle_interval_ms: u64,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("calibration_data"),
            session: SessionParams::default(),
            capture: OrchestratorOptions::default(),
            motion: MotionParams::default(),
            grid: GridSpec::default(),
            world: WorldFrame::default(),
            cycle_interval_ms: 33,
        }
    }
}

impl RigConfig {
    pub fn load_json(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn write_json(&self, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, json).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn store(&self) -> CalibrationStore {
        CalibrationStore::new(&self.data_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let cfg: RigConfig = serde_json::from_str(
            r#"{
                "data_dir": "rig/data",
                "session": { "photo_count": 8, "pattern": { "cols": 9, "rows": 6, "square_size": 25.0 } },
                "motion": { "threshold": 40 },
                "world": { "kind": "board_view", "sequence": 3 }
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.data_dir, PathBuf::from("rig/data"));
        assert_eq!(cfg.session.photo_count, 8);
        assert_eq!(cfg.session.pattern.cols, 9);
        assert_eq!(cfg.session.countdown, 5);
        assert_eq!(cfg.motion.threshold, 40);
        assert_eq!(cfg.world, WorldFrame::BoardView { sequence: 3 });
        assert_eq!(cfg.capture, OrchestratorOptions::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rig.json");
        let mut cfg = RigConfig::default();
        cfg.grid.voxel_size = 2.5;
        cfg.write_json(&path).unwrap();
        assert_eq!(RigConfig::load_json(&path).unwrap(), cfg);
        assert!(matches!(
            RigConfig::load_json(&dir.path().join("missing.json")),
            Err(ConfigError::Io { .. })
        ));
    }
}
