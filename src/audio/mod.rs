// Audio module - source format detection and tag extraction

pub mod detection;
pub mod metadata;

pub use detection::{FormatDetector, ProbeDetector};
pub use metadata::{LoftyTagReader, TagReader, TagSet};
