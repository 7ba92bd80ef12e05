//! Core data and input handling
//!
//! This module contains:
//! - Work items, outcomes and batch results
//! - Input enumeration and output path layout
//! - Persistent settings

mod scanning;
mod settings;
mod work;

pub use scanning::{change_extension, common_prefix, enumerate_files, reroot, OUTPUT_EXTENSION};
pub use settings::Settings;
pub use work::{
    short_name, ActionKind, BatchResult, BatchStatus, OutcomeKind, SkipReason, TranscodeOutcome,
    WorkItem,
};
