use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stable identifier of one physical camera for the whole run.
///
/// The value is the capture device index at discovery time, so a camera keeps
/// the same id between the calibration phase and the reconstruction phase.
/// Displayed and parsed as `cam<N>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CameraId(pub u32);

impl CameraId {
    /// Device index this camera was discovered at.
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cam{}", self.0)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid camera id `{0}` (expected `cam<N>`)")]
pub struct ParseCameraIdError(pub String);

impl CameraId {
    /// Parse the bare numeric part of an id (`"3"`, not `"cam3"`).
    ///
    /// Only canonical decimal is accepted: no sign, no leading zeros.
    pub fn parse_index(digits: &str) -> Result<Self, ParseCameraIdError> {
        let canonical = !digits.is_empty()
            && digits.bytes().all(|b| b.is_ascii_digit())
            && (digits == "0" || !digits.starts_with('0'));
        if !canonical {
            return Err(ParseCameraIdError(digits.to_string()));
        }
        digits
            .parse::<u32>()
            .map(CameraId)
            .map_err(|_| ParseCameraIdError(digits.to_string()))
    }
}

impl FromStr for CameraId {
    type Err = ParseCameraIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("cam")
            .ok_or_else(|| ParseCameraIdError(s.to_string()))?;
        CameraId::parse_index(digits).map_err(|_| ParseCameraIdError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_parse_agree() {
        for id in [CameraId(0), CameraId(7), CameraId(12)] {
            let text = id.to_string();
            assert_eq!(id, text.parse().unwrap());
        }
    }

    #[test]
    fn rejects_non_canonical_ids() {
        for bad in ["", "cam", "cam-1", "cam+1", "cam01", "camera1", "1", "cam1x"] {
            assert!(bad.parse::<CameraId>().is_err(), "accepted {bad:?}");
        }
    }
}
