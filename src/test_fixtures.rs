//! Test fixtures for pipeline tests
//!
//! Small shell scripts stand in for the real decoder and encoder so the
//! transcode pipeline, pool and coordinator can run end-to-end without any
//! codecs installed:
//! - the fake decoder cats its last argument (the source path) to stdout
//! - the fake encoder prints its arguments, a `--` line, then copies stdin,
//!   and sleeps instead when any argument contains `slow`
//! - the failing encoder drains stdin, complains on stderr and exits 1
//!
//! [`write_flac`] builds a tiny but well-formed FLAC file (header blocks, no
//! audio frames) for exercising the real detector and tag reader.

#![cfg(test)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use crate::audio::{FormatDetector, TagReader, TagSet};
use crate::conversion::{BatchEvent, EventSink};
use crate::error::TaskError;

static FIXTURES_DIR: OnceLock<PathBuf> = OnceLock::new();

const FAKE_DECODER: &str = r#"#!/bin/sh
for last; do :; done
exec cat "$last"
"#;

const FAKE_ENCODER: &str = r#"#!/bin/sh
case "$*" in
  *slow*) exec sleep 30 ;;
esac
printf '%s\n' "$@"
echo "--"
exec cat
"#;

const FAILING_ENCODER: &str = r#"#!/bin/sh
cat > /dev/null
echo "lame: unsupported input" >&2
exit 1
"#;

/// Get the fixtures directory, writing the scripts on first use
///
/// Scripts are written once per test binary; rewriting an executable while
/// another test is spawning it fails with ETXTBSY.
pub fn fixtures_dir() -> &'static Path {
    FIXTURES_DIR.get_or_init(|| {
        let dir = std::env::temp_dir().join(format!("flac2mp3_test_fixtures_{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("Failed to create fixtures directory");

        for (name, body) in [
            ("fake-flac", FAKE_DECODER),
            ("fake-lame", FAKE_ENCODER),
            ("failing-lame", FAILING_ENCODER),
        ] {
            write_script(&dir.join(name), body);
        }
        dir
    })
}

fn write_script(path: &Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;

    std::fs::write(path, body).expect("Failed to write fixture script");
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .expect("Failed to make fixture script executable");
}

pub fn fake_decoder() -> PathBuf {
    fixtures_dir().join("fake-flac")
}

pub fn fake_encoder() -> PathBuf {
    fixtures_dir().join("fake-lame")
}

pub fn failing_encoder() -> PathBuf {
    fixtures_dir().join("failing-lame")
}

/// Treats `.flac` files as FLAC without looking inside
#[derive(Debug, Default)]
pub struct ExtensionDetector;

impl FormatDetector for ExtensionDetector {
    fn is_flac(&self, path: &Path) -> bool {
        path.extension().is_some_and(|e| e == "flac")
    }
}

/// An [`ExtensionDetector`] that takes its time and counts overlapping calls
#[derive(Debug)]
pub struct SlowDetector {
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl SlowDetector {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most calls seen running at the same time
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl FormatDetector for SlowDetector {
    fn is_flac(&self, path: &Path) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        std::thread::sleep(self.delay);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        ExtensionDetector.is_flac(path)
    }
}

/// Write a FLAC file holding only STREAMINFO and, when `comments` is not
/// empty, a VORBIS_COMMENT block
///
/// The stream info describes 16-bit stereo at 44.1 kHz with an unknown
/// sample count.
pub fn write_flac(path: &Path, comments: &[(&str, &str)]) {
    let mut bytes = b"fLaC".to_vec();

    let last = if comments.is_empty() { 0x80 } else { 0x00 };
    bytes.extend_from_slice(&[last, 0x00, 0x00, 34]);
    bytes.extend_from_slice(&4096u16.to_be_bytes()); // min block size
    bytes.extend_from_slice(&4096u16.to_be_bytes()); // max block size
    bytes.extend_from_slice(&[0; 6]); // min and max frame size, unknown
    let packed: u64 = (44_100u64 << 44) | (1 << 41) | (15 << 36);
    bytes.extend_from_slice(&packed.to_be_bytes());
    bytes.extend_from_slice(&[0; 16]); // MD5

    if !comments.is_empty() {
        let vendor = b"flac2mp3 tests";
        let mut body = Vec::new();
        body.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
        body.extend_from_slice(vendor);
        body.extend_from_slice(&(comments.len() as u32).to_le_bytes());
        for (key, value) in comments {
            let field = format!("{}={}", key, value);
            body.extend_from_slice(&(field.len() as u32).to_le_bytes());
            body.extend_from_slice(field.as_bytes());
        }

        let len = (body.len() as u32).to_be_bytes();
        bytes.extend_from_slice(&[0x84, len[1], len[2], len[3]]);
        bytes.extend_from_slice(&body);
    }

    std::fs::write(path, bytes).expect("Failed to write FLAC fixture");
}

/// Defaults everywhere except the title, which is the file stem
#[derive(Debug, Default)]
pub struct StemTags;

impl TagReader for StemTags {
    fn read_tags(&self, path: &Path) -> Result<TagSet, TaskError> {
        let mut tags = TagSet::default();
        if let Some(stem) = path.file_stem() {
            tags.set("TITLE", stem.to_string_lossy());
        }
        Ok(tags)
    }
}

/// Same tags for every file
#[derive(Debug)]
pub struct StaticTags(pub TagSet);

impl TagReader for StaticTags {
    fn read_tags(&self, _path: &Path) -> Result<TagSet, TaskError> {
        Ok(self.0.clone())
    }
}

/// Keeps every event for later inspection
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<BatchEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<BatchEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: BatchEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_scripts_exist_and_are_executable() {
        use std::os::unix::fs::PermissionsExt;

        for script in [fake_decoder(), fake_encoder(), failing_encoder()] {
            let mode = std::fs::metadata(&script).unwrap().permissions().mode();
            assert!(mode & 0o111 != 0, "{:?} should be executable", script);
        }
    }

    #[test]
    fn test_write_flac_layout() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("t.flac");

        write_flac(&path, &[]);
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..4], b"fLaC");
        assert_eq!(bytes[4], 0x80);
        assert_eq!(bytes.len(), 4 + 4 + 34);

        write_flac(&path, &[("TITLE", "Misery")]);
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes[4], 0x00);
        assert_eq!(bytes[42], 0x84);
    }

    #[test]
    fn test_extension_detector() {
        assert!(ExtensionDetector.is_flac(Path::new("/m/a.flac")));
        assert!(!ExtensionDetector.is_flac(Path::new("/m/a.txt")));
    }
}
