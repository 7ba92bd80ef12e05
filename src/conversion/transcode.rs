//! Per-item work
//!
//! A transcode pipes the external decoder into the external encoder, writing
//! the encoder's output into a [`TempOutput`] that is only published when the
//! encoder exits cleanly. Copies go through the same temp-then-rename path.

use std::ffi::{OsStr, OsString};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use super::atomic_output::TempOutput;
use super::tools::Tools;
use crate::audio::{TagReader, TagSet};
use crate::core::{
    change_extension, ActionKind, OutcomeKind, SkipReason, TranscodeOutcome, WorkItem,
    OUTPUT_EXTENSION,
};
use crate::error::TaskError;

/// Encoder tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderSettings {
    /// lame `-V` level, 0 (best) to 9
    pub vbr_quality: u8,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self { vbr_quality: 2 }
    }
}

/// Arguments for decoding `source` to raw audio on stdout
pub fn decoder_args(source: &Path) -> Vec<OsString> {
    vec![
        "--silent".into(),
        "--stdout".into(),
        "--decode".into(),
        source.as_os_str().to_os_string(),
    ]
}

/// Arguments for encoding stdin to MP3 on stdout, carrying `tags` as ID3v2
pub fn encoder_args(settings: &EncoderSettings, tags: &TagSet) -> Vec<String> {
    vec![
        "-m".to_string(),
        "s".to_string(),
        "--vbr-new".to_string(),
        format!("-V{}", settings.vbr_quality),
        "--add-id3v2".to_string(),
        "--silent".to_string(),
        "--tt".to_string(),
        tags.title.clone(),
        "--ta".to_string(),
        tags.artist.clone(),
        "--tl".to_string(),
        tags.album.clone(),
        "--ty".to_string(),
        tags.date.clone(),
        "--tc".to_string(),
        tags.comment.clone(),
        "--tn".to_string(),
        tags.track(),
        "--tg".to_string(),
        tags.genre.clone(),
        "-".to_string(),
        "-".to_string(),
    ]
}

/// Remove every character in `bad_chars` from the file name of `path`
///
/// Directory components are left alone.
pub fn sanitize_file_name(path: &Path, bad_chars: &str) -> PathBuf {
    match path.file_name().and_then(|name| strip_bad_chars(name, bad_chars)) {
        Some(cleaned) => path.with_file_name(cleaned),
        None => path.to_path_buf(),
    }
}

/// Remove every character in `bad_chars` from each component of `relative`
///
/// Used for the part of a mirrored destination below the output directory,
/// so directories created there are as safe as the file names.
pub fn sanitize_components(relative: &Path, bad_chars: &str) -> PathBuf {
    relative
        .components()
        .map(|component| match component {
            Component::Normal(name) => match strip_bad_chars(name, bad_chars) {
                Some(cleaned) => PathBuf::from(cleaned),
                None => PathBuf::from(name),
            },
            other => PathBuf::from(other.as_os_str()),
        })
        .collect()
}

/// Cleaned name, or `None` when nothing needs removing or nothing would be left
fn strip_bad_chars(name: &OsStr, bad_chars: &str) -> Option<String> {
    let name = name.to_string_lossy();
    if !name.contains(|c: char| bad_chars.contains(c)) {
        return None;
    }
    let cleaned: String = name.chars().filter(|c| !bad_chars.contains(*c)).collect();
    (!cleaned.is_empty()).then_some(cleaned)
}

/// Final destination of a transcode
///
/// Defaults to the source with an `.mp3` extension.
pub fn resolve_destination(source: &Path, destination: Option<&Path>, bad_chars: &str) -> PathBuf {
    let destination = match destination {
        Some(d) => d.to_path_buf(),
        None => change_extension(source, OUTPUT_EXTENSION),
    };
    sanitize_file_name(&destination, bad_chars)
}

/// Create the parent directory of `destination` if needed
///
/// Losing a creation race to another worker is fine.
pub async fn ensure_parent_dir(destination: &Path) -> Result<(), TaskError> {
    let Some(parent) = destination.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    match tokio::fs::create_dir_all(parent).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists && parent.is_dir() => Ok(()),
        Err(e) => Err(TaskError::Directory {
            path: parent.to_path_buf(),
            source: e,
        }),
    }
}

/// Everything a worker needs to process items
#[derive(Clone)]
pub struct TranscodeContext {
    pub tools: Tools,
    pub encoder: EncoderSettings,
    pub skip_existing: bool,
    pub bad_chars: String,
    /// Create destination directories on demand (output tree mode)
    pub create_dirs: bool,
    pub tags: Arc<dyn TagReader>,
}

impl TranscodeContext {
    /// Process one item, turning every error into a failed outcome
    pub async fn process(&self, item: WorkItem, cancel: CancellationToken) -> TranscodeOutcome {
        let started = Instant::now();
        let source = item.source.clone();

        let kind = if cancel.is_cancelled() {
            OutcomeKind::NotProcessed
        } else {
            match self.execute(&item, &cancel).await {
                Ok(kind) => kind,
                Err(e) => {
                    log::debug!("{}: {}", source.display(), e);
                    OutcomeKind::Failed(e.to_string())
                }
            }
        };

        TranscodeOutcome::new(source, kind, started.elapsed())
    }

    async fn execute(&self, item: &WorkItem, cancel: &CancellationToken) -> Result<OutcomeKind, TaskError> {
        match item.action {
            ActionKind::Skip(reason) => Ok(OutcomeKind::Skipped(reason)),
            ActionKind::Transcode => {
                let destination =
                    resolve_destination(&item.source, item.destination.as_deref(), &self.bad_chars);
                if let Some(skipped) = self.prepare(&destination).await? {
                    return Ok(skipped);
                }
                self.transcode(&item.source, &destination, cancel).await
            }
            ActionKind::Copy => {
                let destination = match &item.destination {
                    Some(d) => d.clone(),
                    None => item.source.clone(),
                };
                if let Some(skipped) = self.prepare(&destination).await? {
                    return Ok(skipped);
                }
                self.copy(&item.source, &destination).await
            }
        }
    }

    /// Apply skip-existing and make sure the destination directory exists
    async fn prepare(&self, destination: &Path) -> Result<Option<OutcomeKind>, TaskError> {
        if self.skip_existing && destination.exists() {
            return Ok(Some(OutcomeKind::Skipped(SkipReason::AlreadyExists)));
        }
        if self.create_dirs {
            ensure_parent_dir(destination).await?;
        }
        Ok(None)
    }

    async fn transcode(
        &self,
        source: &Path,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<OutcomeKind, TaskError> {
        let output = TempOutput::acquire(destination)?;

        let reader = Arc::clone(&self.tags);
        let tag_source = source.to_path_buf();
        let tags = tokio::task::spawn_blocking(move || reader.read_tags(&tag_source))
            .await
            .map_err(|e| TaskError::Tags(e.to_string()))??;

        let mut decoder = isolated(Command::new(&self.tools.decoder))
            .args(decoder_args(source))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TaskError::Spawn {
                program: self.tools.decoder.display().to_string(),
                source: e,
            })?;

        let pipe: Stdio = decoder
            .stdout
            .take()
            .ok_or_else(|| TaskError::io("decoder output", io::Error::other("not captured")))?
            .try_into()
            .map_err(|e| TaskError::io("failed to wire decoder output", e))?;

        let mut cmd = isolated(Command::new(&self.tools.encoder));
        cmd.args(encoder_args(&self.encoder, &tags))
            .stdin(pipe)
            .stdout(output.stdio()?)
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let spawned = cmd.spawn();
        // The command still holds our end of the pipe; the decoder only sees
        // SIGPIPE once every handle other than the encoder's is gone.
        drop(cmd);

        let mut encoder = spawned.map_err(|e| TaskError::Spawn {
            program: self.tools.encoder.display().to_string(),
            source: e,
        })?;

        let stderr = encoder.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_end(&mut buf).await;
            }
            String::from_utf8_lossy(&buf).to_string()
        });

        let status = tokio::select! {
            status = encoder.wait() => {
                status.map_err(|e| TaskError::io("failed to wait for encoder", e))?
            }
            _ = cancel.cancelled() => {
                log::debug!("Cancelling transcode of {}", source.display());
                stop(&mut encoder).await;
                stop(&mut decoder).await;
                output.release();
                return Ok(OutcomeKind::NotProcessed);
            }
        };

        match decoder.wait().await {
            Ok(decoder_status) => log::debug!("Decoder for {} exited with {}", source.display(), decoder_status),
            Err(e) => log::debug!("Failed to reap decoder for {}: {}", source.display(), e),
        }

        if !status.success() {
            let stderr = stderr_task.await.unwrap_or_default();
            let detail = stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("no error output")
                .to_string();
            output.release();
            return Err(TaskError::Encoder { status, detail });
        }

        output.commit()?;
        Ok(OutcomeKind::Transcoded)
    }

    async fn copy(&self, source: &Path, destination: &Path) -> Result<OutcomeKind, TaskError> {
        let output = TempOutput::acquire(destination)?;
        tokio::fs::copy(source, output.path())
            .await
            .map_err(|e| TaskError::io(format!("failed to copy '{}'", source.display()), e))?;
        output.commit()?;
        Ok(OutcomeKind::Copied)
    }
}

/// Put the child in its own process group
///
/// A terminal Ctrl+C then reaches only us; children are stopped through
/// cancellation instead of dying mid-write on their own.
fn isolated(mut cmd: Command) -> Command {
    #[cfg(unix)]
    cmd.process_group(0);
    cmd
}

/// Kill a child and reap it
async fn stop(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        log::debug!("Failed to kill child process: {}", e);
    }
    let _ = child.wait().await;
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test_fixtures::{self, StaticTags, StemTags};
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn context(encoder: PathBuf) -> TranscodeContext {
        TranscodeContext {
            tools: Tools {
                decoder: test_fixtures::fake_decoder(),
                encoder,
            },
            encoder: EncoderSettings::default(),
            skip_existing: false,
            bad_chars: ":".to_string(),
            create_dirs: false,
            tags: Arc::new(StemTags),
        }
    }

    fn misery_tags() -> TagSet {
        let mut tags = TagSet::default();
        tags.set("TITLE", "Misery");
        tags.set("ARTIST", "Band");
        tags.set("ALBUM", "Album");
        tags.set("DATE", "1999");
        tags.set("TRACKNUMBER", "3");
        tags.set("TRACKTOTAL", "10");
        tags.set("GENRE", "Rock");
        tags.set("COMMENT", "");
        tags
    }

    fn leftover_temps(dir: &Path) -> usize {
        fs::read_dir(dir)
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .path()
                    .extension()
                    .is_some_and(|x| x == "tmp")
            })
            .count()
    }

    #[test]
    fn test_encoder_args_carry_tags() {
        let args = encoder_args(&EncoderSettings::default(), &misery_tags());
        let expected: Vec<String> = [
            "-m", "s", "--vbr-new", "-V2", "--add-id3v2", "--silent", "--tt", "Misery", "--ta",
            "Band", "--tl", "Album", "--ty", "1999", "--tc", "", "--tn", "3/10", "--tg", "Rock",
            "-", "-",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(args, expected);
    }

    #[test]
    fn test_encoder_args_quality() {
        let args = encoder_args(&EncoderSettings { vbr_quality: 0 }, &TagSet::default());
        assert!(args.contains(&"-V0".to_string()));
        assert!(args.contains(&"00/00".to_string()));
    }

    #[test]
    fn test_decoder_args() {
        let args = decoder_args(Path::new("/m/a b.flac"));
        assert_eq!(args.last().unwrap(), "/m/a b.flac");
        assert_eq!(args[..3], ["--silent", "--stdout", "--decode"]);
    }

    #[test]
    fn test_sanitize_only_touches_file_name() {
        let path = sanitize_file_name(Path::new("/m/a:b/Live: 1999.mp3"), ":");
        assert_eq!(path, PathBuf::from("/m/a:b/Live 1999.mp3"));

        let path = sanitize_file_name(Path::new("/m/plain.mp3"), ":?");
        assert_eq!(path, PathBuf::from("/m/plain.mp3"));
    }

    #[test]
    fn test_sanitize_components_cleans_every_directory() {
        let path = sanitize_components(Path::new("Live: 1999/Disc: 1/01: Intro.mp3"), ":");
        assert_eq!(path, PathBuf::from("Live 1999/Disc 1/01 Intro.mp3"));

        // A name made only of bad characters is kept rather than emptied
        let path = sanitize_components(Path::new(":/a.mp3"), ":");
        assert_eq!(path, PathBuf::from(":/a.mp3"));
    }

    #[test]
    fn test_resolve_destination_defaults_next_to_source() {
        let dest = resolve_destination(Path::new("/m/Misery.flac"), None, ":");
        assert_eq!(dest, PathBuf::from("/m/Misery.mp3"));

        let dest = resolve_destination(
            Path::new("/m/x.flac"),
            Some(Path::new("/out/Re: x.mp3")),
            ":",
        );
        assert_eq!(dest, PathBuf::from("/out/Re x.mp3"));
    }

    #[tokio::test]
    async fn test_ensure_parent_dir_tolerates_existing() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("a").join("b").join("x.mp3");
        ensure_parent_dir(&dest).await.unwrap();
        ensure_parent_dir(&dest).await.unwrap();
        assert!(temp_dir.path().join("a").join("b").is_dir());
    }

    #[tokio::test]
    async fn test_ensure_parent_dir_under_a_file_fails() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("blocker"), "x").unwrap();
        let dest = temp_dir.path().join("blocker").join("x.mp3");
        let result = ensure_parent_dir(&dest).await;
        assert!(matches!(result, Err(TaskError::Directory { .. })));
    }

    #[tokio::test]
    async fn test_transcode_next_to_source_with_tags() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("Misery.flac");
        fs::write(&source, "PCMDATA").unwrap();

        let mut ctx = context(test_fixtures::fake_encoder());
        ctx.tags = Arc::new(StaticTags(misery_tags()));

        let outcome = ctx
            .process(WorkItem::transcode(source.clone(), None), CancellationToken::new())
            .await;
        assert_eq!(outcome.kind, OutcomeKind::Transcoded);

        let written = fs::read_to_string(temp_dir.path().join("Misery.mp3")).unwrap();
        let args: Vec<&str> = written.lines().collect();
        assert!(args.windows(2).any(|w| w == ["--tn", "3/10"]));
        assert!(args.windows(2).any(|w| w == ["--tt", "Misery"]));
        assert!(args.windows(2).any(|w| w == ["--ty", "1999"]));
        assert!(args.windows(2).any(|w| w == ["--tg", "Rock"]));
        assert!(written.ends_with("PCMDATA"));
        assert_eq!(leftover_temps(temp_dir.path()), 0);
    }

    #[tokio::test]
    async fn test_skip_existing_leaves_destination_untouched() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("song.flac");
        let dest = temp_dir.path().join("song.mp3");
        fs::write(&source, "PCM").unwrap();
        fs::write(&dest, "already here").unwrap();

        let mut ctx = context(test_fixtures::fake_encoder());
        ctx.skip_existing = true;

        let outcome = ctx
            .process(WorkItem::transcode(source, None), CancellationToken::new())
            .await;
        assert_eq!(outcome.kind, OutcomeKind::Skipped(SkipReason::AlreadyExists));
        assert_eq!(fs::read_to_string(&dest).unwrap(), "already here");
        assert_eq!(leftover_temps(temp_dir.path()), 0);
    }

    #[tokio::test]
    async fn test_failing_encoder_publishes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("song.flac");
        fs::write(&source, "PCM").unwrap();

        let ctx = context(test_fixtures::failing_encoder());
        let outcome = ctx
            .process(WorkItem::transcode(source, None), CancellationToken::new())
            .await;

        match &outcome.kind {
            OutcomeKind::Failed(detail) => assert!(detail.contains("unsupported input")),
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(!temp_dir.path().join("song.mp3").exists());
        assert_eq!(leftover_temps(temp_dir.path()), 0);
    }

    #[tokio::test]
    async fn test_failing_encoder_keeps_previous_destination() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("song.flac");
        let dest = temp_dir.path().join("song.mp3");
        fs::write(&source, "PCM").unwrap();
        fs::write(&dest, "previous").unwrap();

        let ctx = context(test_fixtures::failing_encoder());
        let outcome = ctx
            .process(WorkItem::transcode(source, None), CancellationToken::new())
            .await;

        assert!(outcome.is_failure());
        assert_eq!(fs::read_to_string(&dest).unwrap(), "previous");
    }

    #[tokio::test]
    async fn test_missing_output_directory_fails_item() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("song.flac");
        fs::write(&source, "PCM").unwrap();

        let ctx = context(test_fixtures::fake_encoder());
        let item = WorkItem::transcode(source, Some(temp_dir.path().join("nope").join("song.mp3")));
        let outcome = ctx.process(item, CancellationToken::new()).await;

        assert!(outcome.is_failure());
    }

    #[tokio::test]
    async fn test_cancel_kills_running_encoder() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("slow.flac");
        fs::write(&source, "PCM").unwrap();

        let ctx = context(test_fixtures::fake_encoder());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let outcome = ctx.process(WorkItem::transcode(source, None), cancel).await;

        assert_eq!(outcome.kind, OutcomeKind::NotProcessed);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(!temp_dir.path().join("slow.mp3").exists());
        assert_eq!(leftover_temps(temp_dir.path()), 0);
    }

    #[tokio::test]
    async fn test_already_cancelled_does_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("song.flac");
        fs::write(&source, "PCM").unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = context(test_fixtures::fake_encoder())
            .process(WorkItem::transcode(source, None), cancel)
            .await;

        assert_eq!(outcome.kind, OutcomeKind::NotProcessed);
        assert!(!temp_dir.path().join("song.mp3").exists());
    }

    #[tokio::test]
    async fn test_copy_creates_directories_and_copies_bytes() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("cover.txt");
        fs::write(&source, "liner notes").unwrap();
        let dest = temp_dir.path().join("out").join("Album").join("cover.txt");

        let mut ctx = context(test_fixtures::fake_encoder());
        ctx.create_dirs = true;

        let outcome = ctx
            .process(WorkItem::copy(source, dest.clone()), CancellationToken::new())
            .await;
        assert_eq!(outcome.kind, OutcomeKind::Copied);
        assert_eq!(fs::read_to_string(&dest).unwrap(), "liner notes");
        assert_eq!(leftover_temps(dest.parent().unwrap()), 0);
    }

    #[tokio::test]
    async fn test_skip_item_touches_nothing() {
        let outcome = context(test_fixtures::fake_encoder())
            .process(
                WorkItem::skip(PathBuf::from("/m/readme.txt"), SkipReason::NotSource),
                CancellationToken::new(),
            )
            .await;
        assert_eq!(outcome.kind, OutcomeKind::Skipped(SkipReason::NotSource));
    }
}
