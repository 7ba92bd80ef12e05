//! Batch transcoding
//!
//! Leaves first: [`atomic_output`] publishes finished files, [`transcode`]
//! runs the decoder/encoder pipeline for one item, [`parallel`] is the worker
//! pool and [`coordinator`] plans and supervises a whole batch.

pub mod atomic_output;
pub mod coordinator;
pub mod events;
pub mod parallel;
pub mod tools;
pub mod transcode;

pub use coordinator::{BatchConfig, BatchCoordinator};
pub use events::{BatchEvent, EventSink, LogSink};
pub use parallel::default_worker_count;
pub use tools::Tools;
pub use transcode::EncoderSettings;
