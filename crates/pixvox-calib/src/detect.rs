use crate::grid::{assemble_grid, GridParams};
use crate::pattern::{ChessboardObservation, PatternSize};
use crate::subpix::{refine_corners, SubPixParams};
use chess_corners::{find_chess_corners_image, ChessConfig, CornerDescriptor, ThresholdMode};
use image::{DynamicImage, GrayImage};
use nalgebra::Point2;
use pixvox_core::{gray_view, CameraId};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DetectError {
    #[error("image is empty")]
    EmptyImage,
    #[error("pattern needs at least 2x2 inner corners, got {cols}x{rows}")]
    InvalidPattern { cols: u32, rows: u32 },
    #[error("chessboard not found ({candidates} candidate corners, {expected} expected)")]
    NotFound { candidates: usize, expected: usize },
    #[error("corner detection failed: {0}")]
    Corners(String),
}

/// A raw saddle-point corner from the ChESS detector.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Corner {
    pub position: Point2<f32>,
    /// Direction of the first grid axis through the corner, radians.
    pub orientation: f32,
    pub strength: f32,
}

fn adapt_chess_corner(c: &CornerDescriptor) -> Corner {
    Corner {
        position: Point2::new(c.x, c.y),
        orientation: c.axes[0].angle,
        strength: c.response,
    }
}

/// Locates the inner corners of a chessboard in a grayscale image.
///
/// Implementations return exactly `cols * rows` corners in row-major board
/// order, or [`DetectError::NotFound`].
pub trait ChessboardFinder: Send + Sync {
    fn find(
        &self,
        image: &GrayImage,
        pattern: &PatternSize,
    ) -> Result<Vec<Point2<f32>>, DetectError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FinderParams {
    /// ChESS response threshold relative to the strongest response.
    pub threshold_rel: f32,
    pub nms_radius: u32,
    pub grid: GridParams,
}

impl Default for FinderParams {
    fn default() -> Self {
        Self {
            threshold_rel: 0.2,
            nms_radius: 2,
            grid: GridParams::default(),
        }
    }
}

/// ChESS corners from `chess-corners` followed by grid assembly.
#[derive(Clone, Debug, Default)]
pub struct ChessCornersFinder {
    pub params: FinderParams,
}

impl ChessCornersFinder {
    pub fn new(params: FinderParams) -> Self {
        Self { params }
    }

    fn chess_config(&self) -> ChessConfig {
        let mut cfg = ChessConfig::single_scale();
        cfg.threshold_mode = ThresholdMode::Relative;
        cfg.threshold_value = self.params.threshold_rel;
        cfg.nms_radius = self.params.nms_radius;
        cfg
    }

    /// Raw corners, strongest first.
    pub fn detect_corners(&self, image: &GrayImage) -> Result<Vec<Corner>, DetectError> {
        let raw = find_chess_corners_image(image, &self.chess_config())
            .map_err(|e| DetectError::Corners(e.to_string()))?;
        let mut corners: Vec<Corner> = raw.iter().map(adapt_chess_corner).collect();
        corners.sort_by(|a, b| b.strength.total_cmp(&a.strength));
        Ok(corners)
    }
}

impl ChessboardFinder for ChessCornersFinder {
    #[cfg_attr(
        feature = "tracing",
        instrument(
            level = "debug",
            skip(self, image, pattern),
            fields(width = image.width(), height = image.height())
        )
    )]
    fn find(
        &self,
        image: &GrayImage,
        pattern: &PatternSize,
    ) -> Result<Vec<Point2<f32>>, DetectError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(DetectError::EmptyImage);
        }
        if pattern.cols < 2 || pattern.rows < 2 {
            return Err(DetectError::InvalidPattern {
                cols: pattern.cols,
                rows: pattern.rows,
            });
        }

        let corners = self.detect_corners(image)?;
        let positions: Vec<Point2<f32>> = corners.iter().map(|c| c.position).collect();
        log::debug!("{} ChESS candidates", positions.len());

        assemble_grid(
            &positions,
            pattern.cols as usize,
            pattern.rows as usize,
            &self.params.grid,
        )
        .ok_or(DetectError::NotFound {
            candidates: positions.len(),
            expected: pattern.corner_count(),
        })
    }
}

/// Find the board in one photograph and refine its corners.
pub fn detect_observation(
    finder: &dyn ChessboardFinder,
    camera: CameraId,
    sequence: u32,
    image: &DynamicImage,
    pattern: &PatternSize,
    subpix: &SubPixParams,
) -> Result<ChessboardObservation, DetectError> {
    let gray = image.to_luma8();
    let corners = finder.find(&gray, pattern)?;
    let refined = refine_corners(&gray_view(&gray), &corners, subpix);
    Ok(ChessboardObservation::new(camera, sequence, pattern, &refined))
}
