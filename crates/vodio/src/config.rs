use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

use crate::retry::RetryPolicy;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/127.0.0.0 Safari/537.36";

/// Hard bounds on the fetch worker pool size.
pub const MIN_WORKERS: usize = 1;
pub const MAX_WORKERS: usize = 32;

/// Per-segment fetch behavior.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Timeout applied to each individual fetch attempt.
    pub segment_timeout: Duration,
    /// Retry budget and backoff between attempts.
    pub retry: RetryPolicy,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            segment_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

/// External muxer invocation.
#[derive(Debug, Clone)]
pub struct MergerConfig {
    /// Path to the ffmpeg binary.
    pub binary_path: String,
}

impl Default for MergerConfig {
    fn default() -> Self {
        Self {
            binary_path: "ffmpeg".to_string(),
        }
    }
}

/// Configurable options for the download engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root directory for per-stream segment caches.
    pub cache_root: PathBuf,

    /// Requested fetch worker count; clamped to `MIN_WORKERS..=MAX_WORKERS`
    /// when the pool is spawned.
    pub worker_count: usize,

    /// Connection timeout for the shared HTTP client.
    pub connect_timeout: Duration,

    /// Timeout for fetching the manifest itself.
    pub manifest_timeout: Duration,

    /// User agent string.
    pub user_agent: String,

    /// Custom HTTP headers merged over the defaults.
    pub headers: HeaderMap,

    pub fetcher: FetcherConfig,

    pub merger: MergerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_root: default_cache_root(),
            worker_count: 16,
            connect_timeout: Duration::from_secs(30),
            manifest_timeout: Duration::from_secs(15),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: HeaderMap::new(),
            fetcher: FetcherConfig::default(),
            merger: MergerConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Worker count bounded to the supported pool size.
    pub fn effective_worker_count(&self) -> usize {
        self.worker_count.clamp(MIN_WORKERS, MAX_WORKERS)
    }

    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();

        default_headers.insert(
            reqwest::header::ACCEPT_ENCODING,
            HeaderValue::from_static("gzip, deflate"),
        );

        default_headers.insert(
            reqwest::header::CONNECTION,
            HeaderValue::from_static("keep-alive"),
        );

        default_headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );

        default_headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.9"),
        );
        default_headers
    }
}

fn default_cache_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("vodio")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_count_is_clamped() {
        let mut config = EngineConfig::default();

        config.worker_count = 0;
        assert_eq!(config.effective_worker_count(), MIN_WORKERS);

        config.worker_count = 4;
        assert_eq!(config.effective_worker_count(), 4);

        config.worker_count = 500;
        assert_eq!(config.effective_worker_count(), MAX_WORKERS);
    }

    #[test]
    fn defaults_carry_the_fixed_retry_policy() {
        let config = EngineConfig::default();
        assert_eq!(config.fetcher.retry.max_attempts, 3);
        assert_eq!(config.fetcher.retry.backoff, Duration::from_secs(1));
        assert_eq!(config.fetcher.segment_timeout, Duration::from_secs(30));
    }
}
