//! Error types
//!
//! Errors are split by blast radius:
//! - [`SetupError`] aborts the run before any file is dispatched
//! - [`TaskError`] is confined to one work item and becomes a failed outcome
//! - [`PoolError`] means the batch machinery itself broke

use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// Fatal errors raised before the batch starts
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("the following programs are required: {}", .0.join(","))]
    MissingTools(Vec<String>),

    #[error("couldn't create directory '{}': {source}", path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to load settings from '{}': {reason}", path.display())]
    Settings { path: PathBuf, reason: String },

    #[error("failed to start async runtime: {0}")]
    Runtime(#[source] io::Error),
}

impl SetupError {
    /// Process exit code for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::MissingTools(_) => 1,
            Self::OutputDir { .. } => 2,
            Self::Settings { .. } | Self::Runtime(_) => 4,
        }
    }
}

/// Failure of a single work item
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("directory '{}' is unavailable: {source}", path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to read tags: {0}")]
    Tags(String),

    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("encoder exited with {status}: {detail}")]
    Encoder { status: ExitStatus, detail: String },
}

impl TaskError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Breakage of the worker pool itself
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("dispatcher stopped unexpectedly: {0}")]
    Dispatcher(String),

    #[error("{missing} of {total} outcomes were never reported")]
    LostOutcomes { missing: usize, total: usize },
}
