//! Persistent settings
//!
//! Optional JSON file at `<config dir>/flac2mp3/settings.json`. Every field
//! has a default, so a partial file (or none at all) is fine. Command-line
//! flags override whatever is loaded here.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::SetupError;

/// User-tunable defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Decoder program (name on PATH or absolute path)
    pub decoder: String,
    /// Encoder program (name on PATH or absolute path)
    pub encoder: String,
    /// lame VBR quality, 0 (best) to 9
    pub vbr_quality: u8,
    /// Characters stripped from output file names
    pub bad_chars: String,
    /// Worker count; `None` means available parallelism
    pub num_threads: Option<usize>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            decoder: "flac".to_string(),
            encoder: "lame".to_string(),
            vbr_quality: 2, // ~190 kbps
            bad_chars: ":".to_string(),
            num_threads: None,
        }
    }
}

impl Settings {
    const SETTINGS_FILE: &'static str = "settings.json";

    /// Default location of the settings file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("flac2mp3").join(Self::SETTINGS_FILE))
    }

    /// Load settings
    ///
    /// An explicit path must exist. Without one, the default location is used
    /// if present, otherwise built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, SetupError> {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) if p.exists() => p,
                _ => {
                    log::debug!("Using default settings");
                    return Ok(Self::default());
                }
            },
        };

        let contents = fs::read_to_string(&path).map_err(|e| SetupError::Settings {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        let settings = Self::from_json(&contents).map_err(|reason| SetupError::Settings {
            path: path.clone(),
            reason,
        })?;

        log::debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn from_json(contents: &str) -> Result<Self, String> {
        let settings: Settings = serde_json::from_str(contents).map_err(|e| e.to_string())?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), String> {
        if self.vbr_quality > 9 {
            return Err(format!("vbr_quality must be 0-9, got {}", self.vbr_quality));
        }
        if self.num_threads == Some(0) {
            return Err("num_threads must be at least 1".to_string());
        }
        if self.decoder.is_empty() || self.encoder.is_empty() {
            return Err("decoder and encoder must not be empty".to_string());
        }
        Ok(())
    }
}
