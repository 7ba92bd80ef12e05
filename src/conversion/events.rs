//! Batch events and reporting sinks
//!
//! The coordinator and workers report progress as [`BatchEvent`]s through an
//! [`EventSink`] handed to them, rather than writing to a global logger
//! directly. [`LogSink`] renders events through the `log` facade.

use std::path::PathBuf;
use std::time::Duration;

use crate::core::{short_name, BatchStatus, OutcomeKind, TranscodeOutcome};

/// Something that happened during a batch
#[derive(Debug, Clone, PartialEq)]
pub enum BatchEvent {
    /// Planning finished and dispatch is about to begin
    Started { total_files: usize, workers: usize },
    /// A worker picked up a file that needs conversion
    ItemStarted(PathBuf),
    /// Two sources resolved to the same destination; the later one is skipped
    DestinationCollision {
        source: PathBuf,
        destination: PathBuf,
    },
    /// An item produced its outcome
    ItemFinished(TranscodeOutcome),
    /// The user asked to stop
    Interrupted,
    Finished { status: BatchStatus, elapsed: Duration },
}

/// Receives batch events; shared by the coordinator and every worker
pub trait EventSink: Send + Sync {
    fn emit(&self, event: BatchEvent);
}

/// Writes one log record per event
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: BatchEvent) {
        match event {
            BatchEvent::Started {
                total_files,
                workers,
            } => {
                log::info!(
                    "Beginning transcode of {} files with {} workers...",
                    total_files,
                    workers
                );
            }
            BatchEvent::ItemStarted(source) => {
                log::info!("Transcoding '{}'...", short_name(&source));
            }
            BatchEvent::DestinationCollision {
                source,
                destination,
            } => {
                log::warn!(
                    "Skipping '{}': '{}' is already the destination of another file",
                    short_name(&source),
                    destination.display()
                );
            }
            BatchEvent::ItemFinished(outcome) => log_outcome(&outcome),
            BatchEvent::Interrupted => {
                log::warn!("Interrupted, waiting for running transcodes to stop...");
            }
            BatchEvent::Finished { status, elapsed } => {
                let secs = elapsed.as_secs_f64();
                match status {
                    BatchStatus::Completed => log::info!("Completed transcode in {:.2} seconds", secs),
                    BatchStatus::Terminated => {
                        log::warn!("User terminated transcode after {:.2} seconds", secs)
                    }
                    BatchStatus::Failed => log::error!("Transcode failed after {:.2} seconds", secs),
                }
            }
        }
    }
}

fn log_outcome(outcome: &TranscodeOutcome) {
    let name = outcome.short_name();
    let secs = outcome.elapsed.as_secs_f64();
    match &outcome.kind {
        OutcomeKind::Transcoded => log::info!("Transcoded '{}' in {:.2} seconds", name, secs),
        OutcomeKind::Copied => log::info!("Copied '{}'", name),
        OutcomeKind::Skipped(reason) => {
            log::info!("Skipped '{}'", name);
            log::debug!("'{}' skipped: {:?}", name, reason);
        }
        OutcomeKind::Failed(detail) => {
            log::error!("Failed to transcode '{}' after {:.2} seconds: {}", name, secs, detail)
        }
        OutcomeKind::NotProcessed => log::info!("Did not transcode '{}'", name),
    }
}
