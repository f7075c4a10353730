//! Process-wide logger setup, mapping `-logpath`/`-loglevel` onto a single
//! `tracing` subscriber installed once at startup.

use std::fs::{File, OpenOptions};
use std::io;

use tracing::Level;

/// Parses `-loglevel`. `CRIT` folds onto `tracing`'s `ERROR`, since tracing
/// has no level above it; call sites that are genuinely critical should use
/// the [`critical!`] macro so they're still distinguishable in the stream.
pub fn parse_log_level(level: &str) -> Result<Level, String> {
    match level {
        "DEBUG" => Ok(Level::DEBUG),
        "INFO" => Ok(Level::INFO),
        "WARN" => Ok(Level::WARN),
        "ERROR" | "CRIT" => Ok(Level::ERROR),
        other => Err(format!("unknown log level: {other}")),
    }
}

/// Opens `logpath` in append mode and installs a process-wide `tracing`
/// subscriber writing to it at `level`.
pub fn init(logpath: &str, level: Level) -> io::Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(logpath)?;
    install(file, level)
}

fn install(file: File, level: Level) -> io::Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_ansi(false)
        .with_writer(move || file.try_clone().expect("failed to clone log file handle"))
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
}

/// Logs at the highest severity the original five-level scheme recognized
/// (`CRIT`), tagged so it remains distinguishable from an ordinary `ERROR`.
#[macro_export]
macro_rules! critical {
    ($($arg:tt)+) => {
        tracing::error!(severity = "CRIT", $($arg)+)
    };
}
