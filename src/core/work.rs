//! Work items and outcomes
//!
//! A batch is a list of [`WorkItem`]s, each consumed exactly once by a worker
//! and answered by exactly one [`TranscodeOutcome`]. [`BatchResult`] is the
//! aggregate the coordinator builds from those outcomes.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Why an item was not converted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Not a FLAC file and not matched by the copy pattern
    NotSource,
    /// Destination exists and skip-existing is enabled
    AlreadyExists,
    /// Another item already claimed the same destination
    DuplicateDestination,
}

/// What a worker should do with an item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Transcode,
    Copy,
    Skip(SkipReason),
}

/// One unit of batch work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub source: PathBuf,
    /// Final destination; `None` means "next to the source"
    pub destination: Option<PathBuf>,
    pub action: ActionKind,
}

impl WorkItem {
    pub fn transcode(source: PathBuf, destination: Option<PathBuf>) -> Self {
        Self {
            source,
            destination,
            action: ActionKind::Transcode,
        }
    }

    pub fn copy(source: PathBuf, destination: PathBuf) -> Self {
        Self {
            source,
            destination: Some(destination),
            action: ActionKind::Copy,
        }
    }

    pub fn skip(source: PathBuf, reason: SkipReason) -> Self {
        Self {
            source,
            destination: None,
            action: ActionKind::Skip(reason),
        }
    }
}

/// How an item ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeKind {
    Transcoded,
    Copied,
    Skipped(SkipReason),
    Failed(String),
    /// Cancellation stopped the item before it produced a file
    NotProcessed,
}

/// Result of processing one work item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeOutcome {
    pub source: PathBuf,
    pub kind: OutcomeKind,
    pub elapsed: Duration,
}

impl TranscodeOutcome {
    pub fn new(source: PathBuf, kind: OutcomeKind, elapsed: Duration) -> Self {
        Self {
            source,
            kind,
            elapsed,
        }
    }

    pub fn not_processed(source: PathBuf) -> Self {
        Self::new(source, OutcomeKind::NotProcessed, Duration::ZERO)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.kind, OutcomeKind::Failed(_))
    }

    /// File name of the source, for log lines
    pub fn short_name(&self) -> String {
        short_name(&self.source)
    }
}

/// Overall condition of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    /// Every item was dispatched and reported
    Completed,
    /// The user interrupted the batch
    Terminated,
    /// The pool broke down
    Failed,
}

impl BatchStatus {
    /// Process exit code; per-file failures never show up here
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Completed => 0,
            Self::Terminated => 3,
            Self::Failed => 4,
        }
    }
}

/// Aggregate of a finished (or interrupted) batch
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub total_files: usize,
    pub outcomes: Vec<TranscodeOutcome>,
    pub status: BatchStatus,
    pub elapsed: Duration,
}

impl BatchResult {
    pub fn count(&self, pred: impl Fn(&OutcomeKind) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.kind)).count()
    }

    pub fn transcoded(&self) -> usize {
        self.count(|k| *k == OutcomeKind::Transcoded)
    }

    pub fn copied(&self) -> usize {
        self.count(|k| *k == OutcomeKind::Copied)
    }

    pub fn skipped(&self) -> usize {
        self.count(|k| matches!(k, OutcomeKind::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|k| matches!(k, OutcomeKind::Failed(_)))
    }

    pub fn not_processed(&self) -> usize {
        self.count(|k| *k == OutcomeKind::NotProcessed)
    }

    /// Outcome recorded for `source`, if any
    pub fn outcome_for(&self, source: &Path) -> Option<&TranscodeOutcome> {
        self.outcomes.iter().find(|o| o.source == source)
    }
}

pub fn short_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
