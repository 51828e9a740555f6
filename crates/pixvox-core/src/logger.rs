//! Stderr logger for rig processes.
//!
//! Lines read `[elapsed LEVEL thread] message`. Every camera runs its own
//! acquisition thread (`capture-cam<N>`), so the thread tag tells the cameras apart.
//! Records from outside the `pixvox` crates are held to `Warn` at most, to
//! keep webcam backends and decoders from flooding a capture session.

use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

use log::{Level, LevelFilter, Log, Metadata, Record};

#[cfg(feature = "tracing")]
use tracing_subscriber::fmt::format::FmtSpan;
#[cfg(feature = "tracing")]
use tracing_subscriber::util::SubscriberInitExt;
#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt, EnvFilter};

const OWN_TARGET: &str = "pixvox";
const FOREIGN_CAP: LevelFilter = LevelFilter::Warn;

fn passes(level: LevelFilter, record_level: Level, target: &str) -> bool {
    let cap = if target.starts_with(OWN_TARGET) {
        level
    } else {
        level.min(FOREIGN_CAP)
    };
    record_level <= cap
}

struct RigLogger {
    level: LevelFilter,
    started: Instant,
}

impl Log for RigLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        passes(self.level, metadata.level(), metadata.target())
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let thread = std::thread::current();
        let line = format!(
            "[{:8.3}s {:>5} {}] {}\n",
            self.started.elapsed().as_secs_f64(),
            record.level(),
            thread.name().unwrap_or("main"),
            record.args()
        );
        // One write per record so lines from camera threads never interleave.
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: OnceLock<RigLogger> = OnceLock::new();

/// Install the stderr logger; later calls keep the first level.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    if LOGGER.get().is_some() {
        return Ok(());
    }
    let logger = LOGGER.get_or_init(|| RigLogger {
        level,
        started: Instant::now(),
    });
    log::set_logger(logger)?;
    log::set_max_level(level);
    Ok(())
}

/// Install a `tracing` subscriber; `RUST_LOG` overrides `pixvox=info,warn`.
#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{OWN_TARGET}=info,warn")));
    let builder = fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_thread_names(true);
    let _ = if json {
        builder.json().flatten_event(true).finish().try_init()
    } else {
        builder
            .with_timer(fmt::time::Uptime::default())
            .finish()
            .try_init()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_records_follow_the_level() {
        assert!(passes(LevelFilter::Debug, Level::Debug, "pixvox_capture::source"));
        assert!(!passes(LevelFilter::Info, Level::Debug, "pixvox_calib"));
    }

    #[test]
    fn foreign_records_are_capped_at_warn() {
        assert!(!passes(LevelFilter::Trace, Level::Info, "nokhwa::backends"));
        assert!(passes(LevelFilter::Trace, Level::Warn, "nokhwa::backends"));
        assert!(!passes(LevelFilter::Error, Level::Warn, "image"));
    }
}
