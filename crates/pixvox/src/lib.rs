//! High-level facade crate for the `pixvox-*` workspace.
//!
//! This crate provides:
//! - re-exports of the underlying crates,
//! - [`RigConfig`], one JSON document configuring a whole rig,
//! - [`Pipeline`], one capture -> silhouette -> carve cycle at a time,
//! - the `pixvox` command line tool (feature `cli`).
//!
//! ## Quickstart
//!
//! ```no_run
//! use pixvox::{Pipeline, RigConfig};
//! use pixvox::capture::ReplayProvider;
//! use pixvox::core::CameraId;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RigConfig::default();
//! let provider = Arc::new(ReplayProvider::new("recordings"));
//! let cameras = [CameraId(0), CameraId(1)];
//! let mut pipeline = Pipeline::start(&cameras, provider, &config.store(), &config)?;
//! let report = pipeline.cycle();
//! println!("confidence {:.2}", report.reconstruction.confidence());
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `pixvox::core`: camera ids, camera model, calibration record, logger.
//! - `pixvox::calib`: chessboard detection, calibration solver, store, session.
//! - `pixvox::capture`: camera providers, frame sources, orchestrator.
//! - `pixvox::carve`: motion masks and voxel carving.

pub use pixvox_calib as calib;
pub use pixvox_capture as capture;
pub use pixvox_carve as carve;
pub use pixvox_core as core;

pub use pixvox_calib::{CalibrationSession, CalibrationStore, PatternSize};
pub use pixvox_carve::{Occupancy, Reconstruction, VoxelGrid};
pub use pixvox_core::{CameraCalibration, CameraId};

mod config;
mod pipeline;

pub use config::{ConfigError, RigConfig};
pub use pipeline::{CycleReport, Pipeline, PipelineError};
