//! Download session: the one-run state machine tying planner, cache, worker
//! pool, progress and merger together.
//!
//! Phases: plan, resume-check, fetch, merge decision, cleanup. The cache is
//! purged only after a verified successful merge; every other outcome keeps
//! it on disk so a later session with the same manifest URL resumes.

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use url::Url;

use crate::cache::CacheStore;
use crate::client::build_client;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::fetcher::SegmentFetcher;
use crate::merger::{FfmpegMerger, Merge};
use crate::playlist::{SegmentDescriptor, SegmentPlanner, StreamDescriptor};
use crate::progress::{DownloadStatus, ProgressAggregator, ProgressSink, ProgressSnapshot};
use crate::queue::WorkQueue;
use crate::worker::FetchWorker;

/// Outcome of one run: overall success plus the terminal snapshot.
///
/// `snapshot.errors` lets a caller distinguish "nothing failed" from "some
/// segments unrecoverable"; on success `snapshot.file_size` carries the
/// output size.
#[derive(Debug)]
pub struct RunReport {
    pub success: bool,
    pub snapshot: ProgressSnapshot,
}

pub struct DownloadSession {
    descriptor: StreamDescriptor,
    config: Arc<EngineConfig>,
    client: reqwest::Client,
    merger: Arc<dyn Merge>,
    sink: Option<ProgressSink>,
    token: CancellationToken,
}

impl DownloadSession {
    pub fn new(manifest_url: Url, config: EngineConfig) -> Result<Self, EngineError> {
        let client = build_client(&config)?;
        let descriptor = StreamDescriptor::new(manifest_url)?;
        Ok(Self {
            descriptor,
            merger: Arc::new(FfmpegMerger::new(config.merger.clone())),
            config: Arc::new(config),
            client,
            sink: None,
            token: CancellationToken::new(),
        })
    }

    /// Substitute the muxer (e.g. a mock in tests).
    pub fn with_merger(mut self, merger: Arc<dyn Merge>) -> Self {
        self.merger = merger;
        self
    }

    /// Install the progress sink.
    ///
    /// It runs synchronously on worker task context while the counters lock
    /// is held, possibly from several workers; see [`ProgressSink`].
    pub fn on_progress(
        mut self,
        sink: impl Fn(&ProgressSnapshot) + Send + Sync + 'static,
    ) -> Self {
        self.sink = Some(Arc::new(sink));
        self
    }

    /// Handle for requesting cooperative cancellation.
    ///
    /// Workers check it before starting a segment and before each retry
    /// sleep; an in-flight HTTP call is never aborted, its result is simply
    /// discarded at the next checkpoint. A signal handler should cancel
    /// this token rather than mutate any process-wide state.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn descriptor(&self) -> &StreamDescriptor {
        &self.descriptor
    }

    /// Run the session to a terminal state, producing `dest` on success.
    ///
    /// Pre-fetch fatal conditions (manifest, cache directory) return `Err`;
    /// every post-plan outcome, merge failures included, returns `Ok` with
    /// `success = false` and the reasons in the snapshot's error list.
    pub async fn run(self, dest: &Path) -> Result<RunReport, EngineError> {
        // Planning
        let planner = SegmentPlanner::new(self.client.clone(), Arc::clone(&self.config));
        let segments = planner.plan(&self.descriptor.manifest_url).await?;
        let total = segments.len();

        // Resuming
        let cache = Arc::new(CacheStore::for_manifest(
            &self.config.cache_root,
            &self.descriptor.manifest_url,
        ));
        cache.open().await?;
        let scan = cache.scan(total).await;
        let cached_at_start = scan.complete.len();
        if cached_at_start > 0 {
            info!(
                cached = cached_at_start,
                total, "found cached segments, resuming download"
            );
        }

        let progress = Arc::new(ProgressAggregator::new(
            total,
            cached_at_start,
            scan.bytes,
            self.sink.clone(),
        ));

        let pending: Vec<SegmentDescriptor> = segments
            .iter()
            .filter(|s| !scan.complete.contains(&s.index))
            .cloned()
            .collect();

        if pending.is_empty() {
            // Fully cached: zero fetches, straight to the merge decision.
            info!(total, "all segments already cached");
            progress.publish(DownloadStatus::Downloading, None);
        } else {
            self.download(pending, Arc::clone(&cache), Arc::clone(&progress))
                .await?;
        }

        // Merge decision
        if self.token.is_cancelled() {
            let snapshot = progress.publish(DownloadStatus::Cancelled, None);
            warn!("download cancelled, cache preserved for resume");
            return Ok(RunReport {
                success: false,
                snapshot,
            });
        }

        let (downloaded, failed) = progress.counts();
        if failed > 0 {
            let snapshot = progress.publish(DownloadStatus::Failed, None);
            warn!(
                failed,
                downloaded, total, "segment failures, cache preserved so a retry will resume"
            );
            return Ok(RunReport {
                success: false,
                snapshot,
            });
        }
        if downloaded != total {
            progress.record_error(format!("download incomplete: {downloaded}/{total} segments"));
            let snapshot = progress.publish(DownloadStatus::Failed, None);
            warn!(downloaded, total, "download incomplete, cache preserved");
            return Ok(RunReport {
                success: false,
                snapshot,
            });
        }

        self.merge(&cache, total, dest, &progress).await
    }

    async fn download(
        &self,
        pending: Vec<SegmentDescriptor>,
        cache: Arc<CacheStore>,
        progress: Arc<ProgressAggregator>,
    ) -> Result<(), EngineError> {
        let queue = Arc::new(WorkQueue::new(pending));
        let fetcher = Arc::new(SegmentFetcher::new(
            self.client.clone(),
            self.config.fetcher.clone(),
        ));
        let worker_count = self.config.effective_worker_count();
        info!(
            workers = worker_count,
            pending = queue.len(),
            "dispatching fetch workers"
        );

        let handles: Vec<_> = (0..worker_count)
            .map(|id| {
                let worker = FetchWorker {
                    id,
                    queue: Arc::clone(&queue),
                    fetcher: Arc::clone(&fetcher),
                    cache: Arc::clone(&cache),
                    progress: Arc::clone(&progress),
                    token: self.token.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        let mut fatal: Option<EngineError> = None;
        for result in futures::future::join_all(handles).await {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if fatal.is_none() {
                        fatal = Some(e);
                    }
                }
                Err(e) => {
                    if fatal.is_none() {
                        fatal = Some(EngineError::internal(format!("worker task failed: {e}")));
                    }
                }
            }
        }

        match fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn merge(
        &self,
        cache: &Arc<CacheStore>,
        total: usize,
        dest: &Path,
        progress: &Arc<ProgressAggregator>,
    ) -> Result<RunReport, EngineError> {
        progress.publish(DownloadStatus::Merging, None);
        info!(total, dest = %dest.display(), "merging segments");

        if let Some(parent) = dest.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let concat_list = cache.write_concat_list(total).await?;

        let verified = match self.merger.merge(&concat_list, dest).await {
            Ok(()) => verify_output(dest).await,
            Err(e) => Err(e),
        };

        match verified {
            Ok(file_size) => {
                if let Err(e) = cache.purge().await {
                    // Output is already in place; a stale cache directory
                    // only gets logged.
                    warn!(error = %e, "cache purge failed after successful merge");
                }
                let snapshot = progress.publish(DownloadStatus::Completed, Some(file_size));
                info!(file_size, dest = %dest.display(), "download completed");
                Ok(RunReport {
                    success: true,
                    snapshot,
                })
            }
            Err(e) => {
                progress.record_error(e.to_string());
                let snapshot = progress.publish(DownloadStatus::Failed, None);
                error!(error = %e, "merge failed, cache preserved so a retry will resume");
                Ok(RunReport {
                    success: false,
                    snapshot,
                })
            }
        }
    }
}

/// Exit status alone is not trusted: the destination must exist and be
/// non-empty for the merge to count as successful.
async fn verify_output(dest: &Path) -> Result<u64, EngineError> {
    match tokio::fs::metadata(dest).await {
        Ok(meta) if meta.len() > 0 => Ok(meta.len()),
        Ok(_) => Err(EngineError::merge(format!(
            "output file {} is empty",
            dest.display()
        ))),
        Err(e) => Err(EngineError::merge(format!(
            "output file {} missing: {e}",
            dest.display()
        ))),
    }
}
