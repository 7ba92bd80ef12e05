//! Tag extraction
//!
//! Reads the Vorbis comments of a FLAC file into a [`TagSet`], the fixed set
//! of fields the encoder knows how to carry over. Absent fields keep their
//! defaults so the encoder always receives a value for every flag.

use std::path::Path;

use lofty::{ItemKey, Probe, TagType, TaggedFileExt};

use crate::error::TaskError;

/// Metadata carried from source to destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagSet {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub date: String,
    pub comment: String,
    pub track_number: String,
    pub track_total: String,
    pub genre: String,
}

impl Default for TagSet {
    fn default() -> Self {
        Self {
            title: "NONE".to_string(),
            artist: "NONE".to_string(),
            album: "NONE".to_string(),
            date: "1".to_string(),
            comment: String::new(),
            track_number: "00".to_string(),
            track_total: "00".to_string(),
            genre: "NONE".to_string(),
        }
    }
}

impl TagSet {
    /// Set a field by its Vorbis comment name (case-insensitive)
    ///
    /// Returns false for names outside the carried set.
    pub fn set(&mut self, name: &str, value: impl Into<String>) -> bool {
        let slot = match name.to_ascii_uppercase().as_str() {
            "TITLE" => &mut self.title,
            "ARTIST" => &mut self.artist,
            "ALBUM" => &mut self.album,
            "DATE" => &mut self.date,
            "COMMENT" => &mut self.comment,
            "TRACKNUMBER" => &mut self.track_number,
            "TRACKTOTAL" => &mut self.track_total,
            "GENRE" => &mut self.genre,
            _ => return false,
        };
        *slot = value.into();
        true
    }

    /// Combined "N/M" track designation
    pub fn track(&self) -> String {
        format!("{}/{}", self.track_number, self.track_total)
    }
}

/// Source of tags for a file
pub trait TagReader: Send + Sync {
    fn read_tags(&self, path: &Path) -> Result<TagSet, TaskError>;
}

/// Reads Vorbis comments with lofty
#[derive(Debug, Default, Clone, Copy)]
pub struct LoftyTagReader;

impl TagReader for LoftyTagReader {
    fn read_tags(&self, path: &Path) -> Result<TagSet, TaskError> {
        let tagged_file = Probe::open(path)
            .map_err(|e| TaskError::Tags(format!("failed to open file: {}", e)))?
            .read()
            .map_err(|e| TaskError::Tags(format!("failed to read file: {}", e)))?;

        let mut tags = TagSet::default();

        let tag = tagged_file
            .tag(TagType::VorbisComments)
            .or_else(|| tagged_file.primary_tag());
        let Some(tag) = tag else {
            log::debug!("No tags in {:?}, using defaults", path.file_name());
            return Ok(tags);
        };

        let fields = [
            (ItemKey::TrackTitle, "TITLE"),
            (ItemKey::TrackArtist, "ARTIST"),
            (ItemKey::AlbumTitle, "ALBUM"),
            (ItemKey::RecordingDate, "DATE"),
            (ItemKey::Comment, "COMMENT"),
            (ItemKey::TrackNumber, "TRACKNUMBER"),
            (ItemKey::TrackTotal, "TRACKTOTAL"),
            (ItemKey::Genre, "GENRE"),
        ];
        for (key, name) in fields {
            if let Some(value) = tag.get_string(&key) {
                tags.set(name, value);
            }
        }

        Ok(tags)
    }
}
