//! Logging configuration
//!
//! Records go to stderr unless `--quiet` is given, and are appended to
//! `--logfile` when one is given. Both use the `[LEVEL] message` layout.

use log::LevelFilter;
use simplelog::{
    ColorChoice, CombinedLogger, Config, ConfigBuilder, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};
use std::fs::{self, OpenOptions};
use std::path::Path;

/// Initialize the logging system
///
/// Failing to open the log file is reported and logging continues on the
/// terminal alone.
pub fn init_logging(quiet: bool, logfile: Option<&Path>) {
    let config = log_config();
    let mut loggers: Vec<Box<dyn SharedLogger>> = Vec::new();

    if !quiet {
        loggers.push(TermLogger::new(
            LevelFilter::Info,
            config.clone(),
            TerminalMode::Stderr,
            ColorChoice::Auto,
        ));
    }

    if let Some(path) = logfile {
        match open_log_file(path) {
            Ok(file) => loggers.push(WriteLogger::new(LevelFilter::Debug, config, file)),
            Err(e) => eprintln!("Warning: Could not open log file '{}': {}", path.display(), e),
        }
    }

    if loggers.is_empty() {
        return;
    }
    if CombinedLogger::init(loggers).is_err() {
        eprintln!("Warning: Logger already initialized");
    }
}

fn log_config() -> Config {
    ConfigBuilder::new()
        .set_time_level(LevelFilter::Off)
        .set_thread_level(LevelFilter::Off) // Don't show thread IDs
        .set_target_level(LevelFilter::Off) // Don't show module targets
        .set_location_level(LevelFilter::Off)
        .build()
}

fn open_log_file(path: &Path) -> std::io::Result<fs::File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    OpenOptions::new().create(true).append(true).open(path)
}
