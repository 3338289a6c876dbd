//! Segmented VOD download engine.
//!
//! Fetches the segments of an HLS media playlist over a fixed-size worker
//! pool into a content-addressed on-disk cache, then concatenates them into
//! one output file through an external muxer. Interrupted or failed runs
//! keep the cache, so re-running with the same manifest URL resumes instead
//! of restarting.

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
mod fetcher;
pub mod merger;
pub mod playlist;
pub mod progress;
mod queue;
mod retry;
pub mod session;
mod worker;

// Re-exports for easier access
pub use cache::{CacheScan, CacheStore, cache_key};
pub use client::build_client;
pub use config::{
    DEFAULT_USER_AGENT, EngineConfig, FetcherConfig, MAX_WORKERS, MIN_WORKERS, MergerConfig,
};
pub use error::EngineError;
pub use fetcher::SegmentFetcher;
pub use merger::{FfmpegMerger, Merge};
pub use playlist::{
    SegmentDescriptor, SegmentPlanner, StreamDescriptor, StreamVariant, plan_from_manifest,
    resolve_segment_url, variants_from_manifest,
};
pub use progress::{DownloadStatus, ProgressAggregator, ProgressSink, ProgressSnapshot};
pub use queue::WorkQueue;
pub use retry::RetryPolicy;
pub use session::{DownloadSession, RunReport};
