// Segment fetcher: the raw download of one media segment with retry logic.

use bytes::Bytes;
use reqwest::{Client, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::FetcherConfig;
use crate::error::EngineError;
use crate::playlist::SegmentDescriptor;

pub struct SegmentFetcher {
    client: Client,
    config: FetcherConfig,
}

impl SegmentFetcher {
    pub fn new(client: Client, config: FetcherConfig) -> Self {
        Self { client, config }
    }

    /// Fetch a segment, retrying up to the configured attempt budget with
    /// the fixed backoff between attempts.
    ///
    /// Only HTTP 200 is success. Any other status and any transport error
    /// count as a failed attempt and are retried uniformly until the budget
    /// is exhausted, at which point a `SegmentFetch` error naming the index
    /// and last cause is returned. The backoff sleep is raced against the
    /// cancellation token.
    pub async fn fetch(
        &self,
        segment: &SegmentDescriptor,
        token: &CancellationToken,
    ) -> Result<Bytes, EngineError> {
        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            if token.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            match self.attempt(segment).await {
                Ok(bytes) => {
                    debug!(
                        index = segment.index,
                        attempt,
                        size = bytes.len(),
                        "segment fetched"
                    );
                    return Ok(bytes);
                }
                Err(e) => {
                    warn!(
                        index = segment.index,
                        attempt,
                        max_attempts,
                        error = %e,
                        "segment fetch attempt failed"
                    );
                    last_error = e.to_string();
                }
            }

            if attempt < max_attempts {
                self.config.retry.sleep_backoff(token).await?;
            }
        }

        Err(EngineError::segment_fetch(segment.index, last_error))
    }

    async fn attempt(&self, segment: &SegmentDescriptor) -> Result<Bytes, EngineError> {
        let response = self
            .client
            .get(segment.resolved_url.clone())
            .timeout(self.config.segment_timeout)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(EngineError::http_status(
                status,
                segment.resolved_url.as_str(),
                "segment fetch",
            ));
        }

        Ok(response.bytes().await?)
    }
}
