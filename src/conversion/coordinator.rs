//! Batch planning and supervision
//!
//! The coordinator sniffs the enumerated files for FLAC content, turns them
//! into work items, hands those to the [`WorkerPool`], forwards each outcome
//! to the [`EventSink`] as it arrives and decides the overall [`BatchStatus`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use regex::Regex;
use tokio_util::sync::CancellationToken;

use super::events::{BatchEvent, EventSink};
use super::parallel::WorkerPool;
use super::tools::Tools;
use super::transcode::{resolve_destination, sanitize_components, EncoderSettings, TranscodeContext};
use crate::audio::{FormatDetector, TagReader};
use crate::core::{
    change_extension, common_prefix, reroot, ActionKind, BatchResult, BatchStatus, SkipReason,
    TranscodeOutcome, WorkItem, OUTPUT_EXTENSION,
};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Options that shape a batch
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Mirror the input tree here instead of writing next to each source
    pub output_dir: Option<PathBuf>,
    pub skip_existing: bool,
    pub num_threads: usize,
    /// Characters removed from output file names
    pub bad_chars: String,
    /// Non-FLAC files matching this are copied into the output tree
    pub copy_pattern: Option<Regex>,
    pub encoder: EncoderSettings,
}

#[derive(Clone)]
pub struct BatchCoordinator {
    config: BatchConfig,
    tools: Tools,
    detector: Arc<dyn FormatDetector>,
    tags: Arc<dyn TagReader>,
    sink: Arc<dyn EventSink>,
    grace_period: Duration,
}

impl BatchCoordinator {
    pub fn new(
        config: BatchConfig,
        tools: Tools,
        detector: Arc<dyn FormatDetector>,
        tags: Arc<dyn TagReader>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            tools,
            detector,
            tags,
            sink,
            grace_period: GRACE_PERIOD,
        }
    }

    /// How long running items get to stop after an interrupt
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Sniff every file for FLAC content, several at a time
    ///
    /// Runs on the blocking pool with as many files in flight as there are
    /// workers. Returns `None` as soon as `interrupt` is cancelled; sniffs
    /// already running finish in the background and are discarded.
    pub async fn detect(&self, files: &[PathBuf], interrupt: &CancellationToken) -> Option<Vec<bool>> {
        let detections = stream::iter(files.iter().cloned())
            .map(|path| {
                let detector = Arc::clone(&self.detector);
                async move {
                    let shown = path.clone();
                    tokio::task::spawn_blocking(move || detector.is_flac(&path))
                        .await
                        .unwrap_or_else(|e| {
                            log::warn!("Format detection failed for '{}': {}", shown.display(), e);
                            false
                        })
                }
            })
            .buffered(self.config.num_threads.max(1))
            .collect::<Vec<bool>>();

        tokio::select! {
            biased;
            _ = interrupt.cancelled() => None,
            flags = detections => Some(flags),
        }
    }

    /// Resolve every file's action and destination
    ///
    /// `is_flac` holds the detection result for each file, in the same order.
    /// Items come back in input order. When two items resolve to the same
    /// destination the later one is turned into a skip.
    pub fn plan(&self, files: &[PathBuf], is_flac: &[bool]) -> Vec<WorkItem> {
        let prefix = common_prefix(files);
        log::debug!("Common prefix: {}", prefix.display());

        let mut claimed: HashSet<PathBuf> = HashSet::new();
        let mut items = Vec::with_capacity(files.len());

        for (source, &flac) in files.iter().zip(is_flac) {
            let item = self.classify(source, flac, &prefix);

            let destination = match item.action {
                ActionKind::Transcode => Some(resolve_destination(
                    &item.source,
                    item.destination.as_deref(),
                    &self.config.bad_chars,
                )),
                ActionKind::Copy => item.destination.clone(),
                ActionKind::Skip(_) => None,
            };

            match destination {
                Some(destination) if !claimed.insert(destination.clone()) => {
                    self.sink.emit(BatchEvent::DestinationCollision {
                        source: source.clone(),
                        destination,
                    });
                    items.push(WorkItem::skip(source.clone(), SkipReason::DuplicateDestination));
                }
                _ => items.push(item),
            }
        }

        items
    }

    fn classify(&self, source: &Path, flac: bool, prefix: &Path) -> WorkItem {
        if flac {
            let destination = self.config.output_dir.as_ref().map(|output_dir| {
                self.mirror(&change_extension(source, OUTPUT_EXTENSION), prefix, output_dir)
            });
            return WorkItem::transcode(source.to_path_buf(), destination);
        }

        if let (Some(output_dir), Some(pattern)) = (&self.config.output_dir, &self.config.copy_pattern) {
            if let Some(found) = pattern.find(&source.to_string_lossy()) {
                log::debug!("'{}' matched copy pattern ('{}')", source.display(), found.as_str());
                return WorkItem::copy(source.to_path_buf(), self.mirror(source, prefix, output_dir));
            }
        }

        WorkItem::skip(source.to_path_buf(), SkipReason::NotSource)
    }

    /// Re-root `path` under `output_dir` with bad characters stripped below it
    fn mirror(&self, path: &Path, prefix: &Path, output_dir: &Path) -> PathBuf {
        let rerooted = reroot(path, prefix, output_dir);
        match rerooted.strip_prefix(output_dir) {
            Ok(relative) => output_dir.join(sanitize_components(relative, &self.config.bad_chars)),
            Err(_) => rerooted,
        }
    }

    /// Process every file, returning once all are reported or the batch stops
    ///
    /// Cancelling `interrupt` stops detection or dispatch; items already
    /// running get the grace period to wind down. Anything left unreported is
    /// recorded as not processed, so the result always holds one outcome per
    /// file.
    pub async fn run(&self, files: &[PathBuf], interrupt: CancellationToken) -> BatchResult {
        let started = Instant::now();

        let Some(is_flac) = self.detect(files, &interrupt).await else {
            self.sink.emit(BatchEvent::Interrupted);
            return self.finish(files, Vec::new(), BatchStatus::Terminated, started);
        };
        let items = self.plan(files, &is_flac);

        let pool = WorkerPool::new(self.config.num_threads);
        self.sink.emit(BatchEvent::Started {
            total_files: files.len(),
            workers: pool.workers(),
        });

        let context = TranscodeContext {
            tools: self.tools.clone(),
            encoder: self.config.encoder,
            skip_existing: self.config.skip_existing,
            bad_chars: self.config.bad_chars.clone(),
            create_dirs: self.config.output_dir.is_some(),
            tags: Arc::clone(&self.tags),
        };
        let sink = Arc::clone(&self.sink);
        let mut handle = pool.submit_all(items, move |item, token| {
            let context = context.clone();
            let sink = Arc::clone(&sink);
            async move {
                if item.action == ActionKind::Transcode && !token.is_cancelled() {
                    sink.emit(BatchEvent::ItemStarted(item.source.clone()));
                }
                context.process(item, token).await
            }
        });

        let mut outcomes = Vec::with_capacity(files.len());
        let mut deadline: Option<Instant> = None;
        let mut pool_failed = false;

        loop {
            if deadline.is_none() && interrupt.is_cancelled() {
                self.sink.emit(BatchEvent::Interrupted);
                handle.cancel();
                deadline = Some(Instant::now() + self.grace_period);
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    log::warn!("Running transcodes did not stop in time");
                    break;
                }
            }

            match handle.poll(POLL_INTERVAL).await {
                Ok(progress) => {
                    for outcome in progress.outcomes {
                        self.sink.emit(BatchEvent::ItemFinished(outcome.clone()));
                        outcomes.push(outcome);
                    }
                    if progress.finished {
                        break;
                    }
                }
                Err(e) => {
                    log::error!("{}", e);
                    pool_failed = true;
                    break;
                }
            }
        }
        drop(handle);

        let status = if pool_failed {
            BatchStatus::Failed
        } else if deadline.is_some() {
            BatchStatus::Terminated
        } else {
            BatchStatus::Completed
        };

        self.finish(files, outcomes, status, started)
    }

    fn finish(
        &self,
        files: &[PathBuf],
        mut outcomes: Vec<TranscodeOutcome>,
        status: BatchStatus,
        started: Instant,
    ) -> BatchResult {
        let reported: HashSet<PathBuf> = outcomes.iter().map(|o| o.source.clone()).collect();
        for source in files {
            if !reported.contains(source) {
                let outcome = TranscodeOutcome::not_processed(source.clone());
                self.sink.emit(BatchEvent::ItemFinished(outcome.clone()));
                outcomes.push(outcome);
            }
        }

        let elapsed = started.elapsed();
        self.sink.emit(BatchEvent::Finished { status, elapsed });

        BatchResult {
            total_files: files.len(),
            outcomes,
            status,
            elapsed,
        }
    }
}
