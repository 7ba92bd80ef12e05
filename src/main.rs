//! flac2mp3
//!
//! Transcodes FLAC files to MP3 by piping the `flac` decoder into the `lame`
//! encoder, several files at a time, carrying tags across and optionally
//! mirroring the input tree into an output directory.

mod audio;
mod cli;
mod conversion;
mod core;
mod error;
mod logging;

#[cfg(all(test, unix))]
mod test_fixtures;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use crate::audio::{LoftyTagReader, ProbeDetector};
use crate::cli::Cli;
use crate::conversion::{
    default_worker_count, BatchConfig, BatchCoordinator, EncoderSettings, LogSink, Tools,
};
use crate::core::{enumerate_files, BatchResult, Settings};
use crate::error::SetupError;

fn main() {
    let cli = Cli::parse();
    logging::init_logging(cli.quiet, cli.logfile.as_deref());

    let code = match run(cli) {
        Ok(result) => result.status.exit_code(),
        Err(e) => {
            log::error!("{}", e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<BatchResult, SetupError> {
    let settings = Settings::load(cli.config.as_deref())?;
    let tools = Tools::locate(&settings)?;

    let output_dir = match &cli.output_dir {
        Some(dir) => Some(prepare_output_dir(dir)?),
        None => None,
    };

    let num_threads = cli
        .num_threads
        .map(usize::from)
        .or(settings.num_threads)
        .unwrap_or_else(default_worker_count);

    let config = BatchConfig {
        output_dir,
        skip_existing: cli.skip_existing,
        num_threads,
        bad_chars: settings.bad_chars.clone(),
        copy_pattern: cli.copy_pattern,
        encoder: EncoderSettings {
            vbr_quality: cli.vbr_quality.unwrap_or(settings.vbr_quality),
        },
    };

    log::info!("Enumerating files...");
    let files: Vec<PathBuf> = enumerate_files(&cli.files, cli.follow_links)
        .into_iter()
        .collect();
    log::info!("Found {} files", files.len());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(SetupError::Runtime)?;

    let coordinator = BatchCoordinator::new(
        config,
        tools,
        Arc::new(ProbeDetector),
        Arc::new(LoftyTagReader),
        Arc::new(LogSink),
    );

    let result = runtime.block_on(async {
        let interrupt = CancellationToken::new();
        tokio::spawn(watch_interrupts(interrupt.clone()));
        coordinator.run(&files, interrupt).await
    });

    log::info!(
        "{} transcoded, {} copied, {} skipped, {} failed, {} not processed",
        result.transcoded(),
        result.copied(),
        result.skipped(),
        result.failed(),
        result.not_processed()
    );
    Ok(result)
}

fn prepare_output_dir(dir: &std::path::Path) -> Result<PathBuf, SetupError> {
    let dir = std::path::absolute(dir).map_err(|e| SetupError::OutputDir {
        path: dir.to_path_buf(),
        source: e,
    })?;
    std::fs::create_dir_all(&dir).map_err(|e| SetupError::OutputDir {
        path: dir.clone(),
        source: e,
    })?;
    Ok(dir)
}

/// First Ctrl+C cancels the batch; a second one exits on the spot
async fn watch_interrupts(interrupt: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to install Ctrl+C handler: {}", e);
        return;
    }
    interrupt.cancel();

    if tokio::signal::ctrl_c().await.is_ok() {
        log::warn!("Second Ctrl+C, exiting without cleanup");
        std::process::exit(3);
    }
}
