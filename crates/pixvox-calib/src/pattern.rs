use nalgebra::{Point2, Point3};
use pixvox_core::CameraId;
use serde::{Deserialize, Serialize};

/// Chessboard geometry: number of *inner* corners and square edge length.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PatternSize {
    /// Inner corners per row.
    pub cols: u32,
    /// Inner corners per column.
    pub rows: u32,
    /// Square edge length in world units (millimetres by convention).
    pub square_size: f64,
}

impl Default for PatternSize {
    fn default() -> Self {
        Self {
            cols: 7,
            rows: 6,
            square_size: 15.0,
        }
    }
}

impl PatternSize {
    pub fn new(cols: u32, rows: u32, square_size: f64) -> Self {
        Self {
            cols,
            rows,
            square_size,
        }
    }

    pub fn corner_count(&self) -> usize {
        self.cols as usize * self.rows as usize
    }

    /// Board-frame corner positions, row-major, on the `Z = 0` plane.
    ///
    /// Index `j * cols + i` is the corner at column `i`, row `j`, matching the
    /// ordering produced by the chessboard finder.
    pub fn object_points(&self) -> Vec<Point3<f64>> {
        let s = self.square_size;
        (0..self.rows)
            .flat_map(|j| (0..self.cols).map(move |i| Point3::new(i as f64 * s, j as f64 * s, 0.0)))
            .collect()
    }
}

/// One accepted chessboard detection in one photograph.
#[derive(Clone, Debug, PartialEq)]
pub struct ChessboardObservation {
    pub camera: CameraId,
    /// Capture sequence number of the photograph.
    pub sequence: u32,
    pub object_points: Vec<Point3<f64>>,
    /// Sub-pixel refined corners, parallel to `object_points`.
    pub image_points: Vec<Point2<f64>>,
}

impl ChessboardObservation {
    /// Pair refined corners with the board grid of `pattern`.
    pub fn new(
        camera: CameraId,
        sequence: u32,
        pattern: &PatternSize,
        corners: &[Point2<f32>],
    ) -> Self {
        Self {
            camera,
            sequence,
            object_points: pattern.object_points(),
            image_points: corners
                .iter()
                .map(|p| Point2::new(p.x as f64, p.y as f64))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_points_are_row_major() {
        let pattern = PatternSize::new(3, 2, 10.0);
        let pts = pattern.object_points();
        assert_eq!(6, pts.len());
        assert_eq!(Point3::new(0.0, 0.0, 0.0), pts[0]);
        assert_eq!(Point3::new(20.0, 0.0, 0.0), pts[2]);
        assert_eq!(Point3::new(0.0, 10.0, 0.0), pts[3]);
        assert!(pts.iter().all(|p| p.z == 0.0));
    }
}
