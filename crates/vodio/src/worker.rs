// Fetch worker: one member of the fixed-size pool draining the work queue.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::cache::CacheStore;
use crate::error::EngineError;
use crate::fetcher::SegmentFetcher;
use crate::progress::ProgressAggregator;
use crate::queue::WorkQueue;

pub(crate) struct FetchWorker {
    pub(crate) id: usize,
    pub(crate) queue: Arc<WorkQueue>,
    pub(crate) fetcher: Arc<SegmentFetcher>,
    pub(crate) cache: Arc<CacheStore>,
    pub(crate) progress: Arc<ProgressAggregator>,
    pub(crate) token: CancellationToken,
}

impl FetchWorker {
    /// Loop: pop, fetch, persist, account, until the queue drains or the
    /// run is cancelled.
    ///
    /// A segment that exhausts its retry budget is recorded as failed and
    /// the loop continues; peers are never stopped by one bad segment.
    /// Returns `Err` only for conditions fatal to the whole run (cache
    /// writes failing), after cancelling the shared token.
    pub(crate) async fn run(self) -> Result<(), EngineError> {
        loop {
            if self.token.is_cancelled() {
                break;
            }
            let Some(segment) = self.queue.pop() else {
                break;
            };
            if self.token.is_cancelled() {
                break;
            }

            // A prior interrupted run (or a race with planning) may already
            // have completed this index.
            if self.cache.is_complete(segment.index).await {
                continue;
            }

            match self.fetcher.fetch(&segment, &self.token).await {
                Ok(bytes) => {
                    // The fetch is never aborted mid-flight; a result that
                    // arrives after cancellation is discarded, not recorded.
                    if self.token.is_cancelled() {
                        break;
                    }
                    if let Err(e) = self.cache.write(segment.index, &bytes).await {
                        error!(index = segment.index, error = %e, "cache write failed, aborting run");
                        self.token.cancel();
                        return Err(e);
                    }
                    self.progress.record_success(bytes.len() as u64);
                }
                Err(EngineError::Cancelled) => break,
                Err(EngineError::SegmentFetch { index, reason }) => {
                    self.progress.record_failure(index, &reason);
                }
                Err(e) => {
                    self.progress.record_failure(segment.index, &e.to_string());
                }
            }
        }

        debug!(worker = self.id, "fetch worker finished");
        Ok(())
    }
}
