use clap::{Args, Parser, Subcommand};
use pixvox::calib::{
    parse_image_file_name, CalibrationError, CalibrationSession, SessionError, SessionObserver,
    SessionReport, StoreError,
};
use pixvox::capture::{discover, CameraProvider, ReplayProvider};
use pixvox::core::{CameraCalibration, CameraId};
use pixvox::{ConfigError, Occupancy, Pipeline, PipelineError, RigConfig};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "tracing")]
use tracing_log::LogTracer;

#[derive(Parser, Debug)]
#[command(
    name = "pixvox",
    version,
    about = "Calibrate a multi-camera rig and carve voxels from live silhouettes"
)]
struct Cli {
    /// Rig configuration (JSON); built-in defaults when omitted.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    /// More log output (-v debug, -vv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Emit JSON trace events.
    #[cfg(feature = "tracing")]
    #[arg(long, global = true)]
    json_logs: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone)]
struct Source {
    /// Replay recorded frames from `<DIR>/cam-<id>/` instead of opening devices.
    #[arg(long, value_name = "DIR")]
    replay: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the cameras that can be opened.
    Probe {
        #[command(flatten)]
        source: Source,
    },
    /// Capture chessboard photos (unless some exist) and calibrate every camera.
    Calibrate {
        /// Capture new photos even if the images directory already has some.
        #[arg(long)]
        recapture: bool,
        /// Delete stored calibrations and photos first.
        #[arg(long)]
        clean: bool,
        #[command(flatten)]
        source: Source,
    },
    /// Calibrate from the photos already in the images directory.
    Solve,
    /// Delete stored calibrations and captured photos.
    Clean,
    /// Run the capture -> silhouette -> carve loop.
    Run {
        /// Stop after this many cycles; 0 runs until interrupted.
        #[arg(long, default_value_t = 0)]
        cycles: u64,
        #[command(flatten)]
        source: Source,
    },
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("need at least {required} cameras, found {found}")]
    InsufficientCameras { required: usize, found: usize },
    #[error("no camera backend: pass --replay <DIR> or build with the `nokhwa` feature")]
    NoBackend,
    #[error("no camera could be calibrated")]
    NothingCalibrated,
}

struct Terminal;

impl SessionObserver for Terminal {
    fn countdown(&mut self, remaining: u32) {
        println!("capturing in {remaining}...");
    }

    fn captured(&mut self, round: u32, total: u32) {
        println!("captured {round}/{total}");
    }

    fn detection(&mut self, camera: CameraId, sequence: u32, found: bool) {
        if !found {
            log::info!("{camera}: no chessboard in photo #{sequence}");
        }
    }

    fn calibrated(&mut self, camera: CameraId, result: &Result<CameraCalibration, CalibrationError>) {
        match result {
            Ok(calib) => println!(
                "{camera}: calibrated from {} views, rms {:.3} px",
                calib.view_count(),
                calib.rms_reprojection_error
            ),
            Err(err) => println!("{camera}: {err}"),
        }
    }
}

fn init_logging(cli: &Cli) {
    #[cfg(feature = "tracing")]
    {
        let _ = LogTracer::init();
        pixvox::core::init_tracing(cli.json_logs);
    }
    #[cfg(not(feature = "tracing"))]
    {
        let level = match cli.verbose {
            0 => log::LevelFilter::Info,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        };
        if let Err(err) = pixvox::core::init_with_level(level) {
            eprintln!("logger: {err}");
        }
    }
}

fn provider(source: &Source) -> Result<Arc<dyn CameraProvider>, CliError> {
    match &source.replay {
        Some(dir) => Ok(Arc::new(ReplayProvider::new(dir))),
        None => native_provider(),
    }
}

#[cfg(feature = "nokhwa")]
fn native_provider() -> Result<Arc<dyn CameraProvider>, CliError> {
    Ok(Arc::new(pixvox::capture::NokhwaProvider::new()))
}

#[cfg(not(feature = "nokhwa"))]
fn native_provider() -> Result<Arc<dyn CameraProvider>, CliError> {
    Err(CliError::NoBackend)
}

fn has_images(dir: &Path) -> bool {
    std::fs::read_dir(dir).is_ok_and(|entries| {
        entries.filter_map(Result::ok).any(|e| {
            e.file_name()
                .to_str()
                .and_then(parse_image_file_name)
                .is_some()
        })
    })
}

fn summarize(report: &SessionReport) -> Result<(), CliError> {
    for path in &report.skipped_files {
        log::warn!("ignored {}", path.display());
    }
    for (camera, err) in &report.capture_failed {
        println!("{camera}: dropped during capture: {err}");
    }
    for (camera, err) in &report.unsaved {
        println!("{camera}: solved but not saved: {err}");
    }
    println!(
        "{} cameras calibrated, {} failed",
        report.calibrated.len(),
        report.failed.len()
    );
    if report.calibrated.is_empty() {
        return Err(CliError::NothingCalibrated);
    }
    Ok(())
}

fn clean(session: &CalibrationSession) -> Result<(), CliError> {
    let calibrations = session.store().clear()?;
    let photos = session.clear_images()?;
    println!("removed {calibrations} calibrations and {photos} photos");
    Ok(())
}

fn cmd_probe(config: &RigConfig, source: &Source) -> Result<(), CliError> {
    let provider = provider(source)?;
    let cameras = discover(provider.as_ref(), config.session.max_probe_index);
    println!("found {} cameras", cameras.len());
    for camera in cameras {
        println!("  {camera}");
    }
    Ok(())
}

fn cmd_calibrate(
    config: &RigConfig,
    recapture: bool,
    wipe: bool,
    source: &Source,
) -> Result<(), CliError> {
    let session = CalibrationSession::new(config.session.clone(), config.store());
    if wipe {
        clean(&session)?;
    }

    let report = if recapture || !has_images(&config.session.images_dir) {
        let provider = provider(source)?;
        session.clear_images()?;
        session.run(provider.as_ref(), &mut Terminal)?
    } else {
        println!(
            "calibrating from existing photos in {}",
            config.session.images_dir.display()
        );
        session.calibrate_directory(&mut Terminal)?
    };
    summarize(&report)
}

fn cmd_solve(config: &RigConfig) -> Result<(), CliError> {
    let session = CalibrationSession::new(config.session.clone(), config.store());
    let report = session.calibrate_directory(&mut Terminal)?;
    summarize(&report)
}

fn cmd_run(config: &RigConfig, cycles: u64, source: &Source) -> Result<(), CliError> {
    let provider = provider(source)?;
    let cameras = discover(provider.as_ref(), config.session.max_probe_index);
    let required = config.session.min_cameras;
    if cameras.len() < required {
        return Err(CliError::InsufficientCameras {
            required,
            found: cameras.len(),
        });
    }

    let mut pipeline = Pipeline::start(&cameras, provider, &config.store(), config)?;
    let uncalibrated: Vec<String> = pipeline
        .uncalibrated()
        .iter()
        .map(ToString::to_string)
        .collect();
    if !uncalibrated.is_empty() {
        println!("not calibrated: {}", uncalibrated.join(", "));
    }

    let interval = Duration::from_millis(config.cycle_interval_ms);
    let mut done = 0u64;
    while cycles == 0 || done < cycles {
        let report = pipeline.cycle();
        let rec = &report.reconstruction;
        println!(
            "cycle {}: {}/{} voxels occupied, {} cameras carving, confidence {:.2}",
            report.cycle,
            rec.grid.count(Occupancy::Occupied),
            rec.grid.len(),
            rec.contributing.len(),
            rec.confidence()
        );
        for camera in &report.stale {
            log::warn!("{camera}: stale, skipped this cycle");
        }
        for (camera, reason) in &rec.skipped {
            log::debug!("{camera}: skipped ({reason:?})");
        }
        done += 1;
        std::thread::sleep(interval);
    }
    pipeline.stop();
    Ok(())
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config = match &cli.config {
        Some(path) => RigConfig::load_json(path)?,
        None => RigConfig::default(),
    };
    match cli.command {
        Command::Probe { source } => cmd_probe(&config, &source),
        Command::Calibrate {
            recapture,
            clean,
            source,
        } => cmd_calibrate(&config, recapture, clean, &source),
        Command::Solve => cmd_solve(&config),
        Command::Clean => {
            let session = CalibrationSession::new(config.session.clone(), config.store());
            clean(&session)
        }
        Command::Run { cycles, source } => cmd_run(&config, cycles, &source),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
