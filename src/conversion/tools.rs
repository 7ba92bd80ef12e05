//! External program lookup
//!
//! The decoder and encoder are resolved once, before any work is dispatched,
//! so a missing program aborts the run without touching any files.

use std::path::PathBuf;

use crate::core::Settings;
use crate::error::SetupError;

/// Resolved paths of the external decoder and encoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tools {
    pub decoder: PathBuf,
    pub encoder: PathBuf,
}

impl Tools {
    /// Resolve both programs from settings
    ///
    /// Every missing program is listed in the error, not just the first.
    pub fn locate(settings: &Settings) -> Result<Self, SetupError> {
        let decoder = which::which(&settings.decoder);
        let encoder = which::which(&settings.encoder);

        match (decoder, encoder) {
            (Ok(decoder), Ok(encoder)) => {
                log::debug!("Decoder: {}", decoder.display());
                log::debug!("Encoder: {}", encoder.display());
                Ok(Self { decoder, encoder })
            }
            (decoder, encoder) => {
                let mut missing = Vec::new();
                if decoder.is_err() {
                    missing.push(settings.decoder.clone());
                }
                if encoder.is_err() {
                    missing.push(settings.encoder.clone());
                }
                Err(SetupError::MissingTools(missing))
            }
        }
    }
}
