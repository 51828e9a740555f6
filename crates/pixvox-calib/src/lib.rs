//! Per-camera intrinsic and extrinsic calibration from chessboard photos.
//!
//! The pipeline is:
//! 1. [`ChessboardFinder`] locates the inner corners of the board
//!    ([`ChessCornersFinder`] runs the ChESS detector and assembles the
//!    lattice with a k-d tree neighbour graph),
//! 2. corners are refined to sub-pixel accuracy ([`refine_corners`]),
//! 3. [`CalibrationSolver`] estimates intrinsics, distortion and one board
//!    pose per view,
//! 4. [`CalibrationStore`] persists one JSON document per camera.
//!
//! [`CalibrationSession`] drives the whole thing against live cameras.
//!
//! ```no_run
//! use pixvox_calib::{CalibrationSession, CalibrationStore, NoopObserver, SessionParams};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let session = CalibrationSession::new(SessionParams::default(), CalibrationStore::new("."));
//! let report = session.calibrate_directory(&mut NoopObserver)?;
//! println!("calibrated {} cameras", report.calibrated.len());
//! # Ok(())
//! # }
//! ```

mod detect;
mod grid;
mod naming;
mod pattern;
mod refine;
mod session;
mod solver;
mod store;
mod subpix;
mod zhang;

pub use detect::{
    detect_observation, ChessCornersFinder, ChessboardFinder, Corner, DetectError, FinderParams,
};
pub use grid::{
    assemble_grid, assign_grid_coordinates, connected_components, GridGraph, GridParams,
    NeighborDirection, NodeNeighbor,
};
pub use naming::{
    calibration_file_name, image_file_name, parse_calibration_file_name, parse_image_file_name,
    IMAGE_EXTENSIONS,
};
pub use pattern::{ChessboardObservation, PatternSize};
pub use session::{
    CalibrationImage, CalibrationSession, CaptureOutcome, NoopObserver, SessionError,
    SessionObserver, SessionParams, SessionReport,
};
pub use solver::{
    BackendSolution, CalibrationBackend, CalibrationError, CalibrationSolver, SolverParams,
    ZhangBackend, ZhangOptions,
};
pub use store::{CalibrationStore, LoadAll, StoreError};
pub use subpix::{refine_corner, refine_corners, SubPixParams};
