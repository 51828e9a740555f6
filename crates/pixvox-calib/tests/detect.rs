use image::{DynamicImage, GrayImage, Luma};
use pixvox_calib::{
    detect_observation, ChessCornersFinder, ChessboardFinder, DetectError, FinderParams,
    PatternSize, SubPixParams,
};
use pixvox_core::CameraId;

const SQUARE: f32 = 30.0;
const MARGIN: f32 = 40.0;

/// Antialiased board of `squares_x * squares_y` squares, dark square at the
/// top-left, on a white background.
fn render_board(squares_x: u32, squares_y: u32) -> GrayImage {
    let width = (2.0 * MARGIN + squares_x as f32 * SQUARE) as u32;
    let height = (2.0 * MARGIN + squares_y as f32 * SQUARE) as u32;
    let ss = 4;
    GrayImage::from_fn(width, height, |x, y| {
        let mut acc = 0.0f32;
        for sy in 0..ss {
            for sx in 0..ss {
                let px = x as f32 + (sx as f32 + 0.5) / ss as f32 - 0.5;
                let py = y as f32 + (sy as f32 + 0.5) / ss as f32 - 0.5;
                let u = (px - MARGIN) / SQUARE;
                let v = (py - MARGIN) / SQUARE;
                let inside = u >= 0.0 && v >= 0.0 && u < squares_x as f32 && v < squares_y as f32;
                let dark = inside && (u.floor() as i32 + v.floor() as i32) % 2 == 0;
                acc += if dark { 30.0 } else { 225.0 };
            }
        }
        Luma([(acc / (ss * ss) as f32).round() as u8])
    })
}

fn assert_on_lattice(points: &[nalgebra::Point2<f64>], cols: usize, tolerance: f64) {
    for (idx, p) in points.iter().enumerate() {
        let (i, j) = ((idx % cols) as f64, (idx / cols) as f64);
        let ex = (MARGIN + SQUARE) as f64 + i * SQUARE as f64;
        let ey = (MARGIN + SQUARE) as f64 + j * SQUARE as f64;
        assert!(
            (p.x - ex).abs() < tolerance && (p.y - ey).abs() < tolerance,
            "corner {idx} at ({:.2}, {:.2}), expected ({ex}, {ey})",
            p.x,
            p.y
        );
    }
}

#[test]
fn finds_inner_corners_of_rendered_board() {
    let img = render_board(8, 7);
    let pattern = PatternSize::new(7, 6, 15.0);
    let finder = ChessCornersFinder::new(FinderParams::default());

    let corners = finder.find(&img, &pattern).expect("board found");
    assert_eq!(corners.len(), 42);

    let obs = detect_observation(
        &finder,
        CameraId(2),
        7,
        &DynamicImage::ImageLuma8(img),
        &pattern,
        &SubPixParams::default(),
    )
    .expect("observation");
    assert_eq!(obs.camera, CameraId(2));
    assert_eq!(obs.sequence, 7);
    assert_on_lattice(&obs.image_points, 7, 0.5);
}

#[test]
fn finds_boards_of_several_sizes() {
    let finder = ChessCornersFinder::default();
    for (cols, rows) in [(3, 3), (5, 4), (8, 5), (9, 6)] {
        let img = render_board(cols + 1, rows + 1);
        let pattern = PatternSize::new(cols, rows, 15.0);

        let corners = finder
            .find(&img, &pattern)
            .unwrap_or_else(|e| panic!("{cols}x{rows}: {e}"));
        assert_eq!(corners.len(), (cols * rows) as usize, "{cols}x{rows}");
        let points: Vec<nalgebra::Point2<f64>> = corners
            .iter()
            .map(|p| nalgebra::Point2::new(p.x as f64, p.y as f64))
            .collect();
        assert_on_lattice(&points, cols as usize, 1.0);
    }
}

#[test]
fn wrong_pattern_size_is_not_found() {
    let img = render_board(8, 7);
    let finder = ChessCornersFinder::default();
    let err = finder
        .find(&img, &PatternSize::new(9, 6, 15.0))
        .unwrap_err();
    assert!(matches!(err, DetectError::NotFound { expected: 54, .. }));
}

#[test]
fn blank_image_has_no_board() {
    let img = GrayImage::from_pixel(320, 240, Luma([128]));
    let finder = ChessCornersFinder::default();
    assert!(matches!(
        finder.find(&img, &PatternSize::default()),
        Err(DetectError::NotFound { .. })
    ));
    assert_eq!(
        finder.find(&GrayImage::new(0, 0), &PatternSize::default()),
        Err(DetectError::EmptyImage)
    );
}
