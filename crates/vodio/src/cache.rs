// Content-addressed on-disk segment cache.
//
// A stream's cache directory is derived from its manifest URL, so repeat
// runs on the same stream resume from the same directory. A segment file
// present with size > 0 is complete and is never re-fetched, regardless of
// which run produced it.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use tokio::fs;
use tracing::{debug, warn};
use url::Url;

use crate::error::EngineError;

/// Length of the truncated hex digest naming a cache directory.
const CACHE_KEY_LEN: usize = 16;

const CONCAT_LIST_NAME: &str = "concat.txt";

/// Deterministic cache key for a manifest URL: the first 16 hex characters
/// of its MD5 digest. Collision resistance at this width is ample for a
/// per-user cache directory namespace.
pub fn cache_key(manifest_url: &Url) -> String {
    let digest = Md5::digest(manifest_url.as_str().as_bytes());
    let mut key = hex::encode(digest);
    key.truncate(CACHE_KEY_LEN);
    key
}

/// Result of scanning a cache directory against a planned segment list.
#[derive(Debug, Default)]
pub struct CacheScan {
    /// Indices with a complete segment file on disk.
    pub complete: BTreeSet<usize>,
    /// Total bytes of the complete segment files.
    pub bytes: u64,
}

pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    /// Address the cache directory for a manifest URL under `root`.
    ///
    /// Purely computational; nothing touches the filesystem until `open`.
    pub fn for_manifest(root: &Path, manifest_url: &Url) -> Self {
        Self {
            dir: root.join(cache_key(manifest_url)),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the cache directory if absent. Idempotent.
    pub async fn open(&self) -> Result<(), EngineError> {
        fs::create_dir_all(&self.dir).await.map_err(|e| {
            EngineError::cache_io(format!(
                "cannot create cache directory {}: {e}",
                self.dir.display()
            ))
        })
    }

    pub fn segment_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("segment_{index:05}.ts"))
    }

    /// A segment is complete once its file exists with size > 0.
    pub async fn is_complete(&self, index: usize) -> bool {
        match fs::metadata(self.segment_path(index)).await {
            Ok(meta) => meta.len() > 0,
            Err(_) => false,
        }
    }

    /// Enumerate complete segments for a planned list of `count` segments.
    pub async fn scan(&self, count: usize) -> CacheScan {
        let mut scan = CacheScan::default();
        for index in 0..count {
            if let Ok(meta) = fs::metadata(self.segment_path(index)).await
                && meta.len() > 0
            {
                scan.complete.insert(index);
                scan.bytes += meta.len();
            }
        }
        debug!(
            complete = scan.complete.len(),
            bytes = scan.bytes,
            dir = %self.dir.display(),
            "scanned segment cache"
        );
        scan
    }

    /// Persist a segment atomically: write to a temp name, then rename.
    ///
    /// A concurrent `scan` therefore never observes a partially written
    /// file under the segment's final name.
    pub async fn write(&self, index: usize, bytes: &[u8]) -> Result<(), EngineError> {
        let path = self.segment_path(index);
        let tmp = path.with_extension("ts.tmp");

        fs::write(&tmp, bytes).await.map_err(|e| {
            EngineError::cache_io(format!("cannot write segment {index} to cache: {e}"))
        })?;
        fs::rename(&tmp, &path).await.map_err(|e| {
            EngineError::cache_io(format!("cannot finalize segment {index} in cache: {e}"))
        })
    }

    /// Write the ordered concat list (ffmpeg concat-demuxer format), one
    /// line per segment by ascending index, referencing absolute paths.
    pub async fn write_concat_list(&self, count: usize) -> Result<PathBuf, EngineError> {
        let abs_dir = std::path::absolute(&self.dir).map_err(|e| {
            EngineError::cache_io(format!("cannot resolve cache directory path: {e}"))
        })?;

        let mut list = String::new();
        for index in 0..count {
            let path = abs_dir.join(format!("segment_{index:05}.ts"));
            list.push_str(&format!("file '{}'\n", path.display()));
        }

        let list_path = self.dir.join(CONCAT_LIST_NAME);
        fs::write(&list_path, list)
            .await
            .map_err(|e| EngineError::cache_io(format!("cannot write concat list: {e}")))?;
        Ok(list_path)
    }

    /// Remove the whole cache directory. Called only after a verified
    /// successful merge; a directory that is already gone is not an error.
    pub async fn purge(&self) -> Result<(), EngineError> {
        match fs::remove_dir_all(&self.dir).await {
            Ok(()) => {
                debug!(dir = %self.dir.display(), "purged segment cache");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "failed to purge segment cache");
                Err(EngineError::cache_io(format!(
                    "cannot purge cache directory {}: {e}",
                    self.dir.display()
                )))
            }
        }
    }

    pub async fn exists(&self) -> bool {
        fs::metadata(&self.dir).await.is_ok()
    }
}
