//! Merge stage: stream-copy concatenation of cached segments through an
//! external muxer.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error};

use crate::config::MergerConfig;
use crate::error::EngineError;

/// Narrow seam around the concatenation tool so the orchestrator never
/// cares which muxer runs (or whether tests substitute one).
#[async_trait]
pub trait Merge: Send + Sync {
    /// Concatenate the segment files listed in `concat_list` (ascending
    /// index order) into the container at `dest`, without re-encoding.
    async fn merge(&self, concat_list: &Path, dest: &Path) -> Result<(), EngineError>;
}

/// Production muxer: ffmpeg's concat demuxer in stream-copy mode.
pub struct FfmpegMerger {
    config: MergerConfig,
}

impl FfmpegMerger {
    pub fn new(config: MergerConfig) -> Self {
        Self { config }
    }

    fn build_args(concat_list: &Path, dest: &Path) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "warning".to_string(),
            "-f".to_string(),
            "concat".to_string(),
            "-safe".to_string(),
            "0".to_string(),
            "-i".to_string(),
            concat_list.to_string_lossy().to_string(),
            "-c".to_string(),
            "copy".to_string(),
            "-bsf:a".to_string(),
            "aac_adtstoasc".to_string(),
            "-y".to_string(),
            dest.to_string_lossy().to_string(),
        ]
    }
}

#[async_trait]
impl Merge for FfmpegMerger {
    async fn merge(&self, concat_list: &Path, dest: &Path) -> Result<(), EngineError> {
        let args = Self::build_args(concat_list, dest);
        debug!(binary = %self.config.binary_path, "invoking muxer");

        let output = Command::new(&self.config.binary_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                EngineError::merge(format!("failed to run {}: {e}", self.config.binary_path))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(
                code = output.status.code(),
                stderr = %stderr.trim(),
                "muxer exited with an error"
            );
            return Err(EngineError::merge(format!(
                "muxer exited with code {:?}: {}",
                output.status.code(),
                stderr.trim()
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn args_carry_the_fixed_concat_flags_in_order() {
        let args = FfmpegMerger::build_args(
            &PathBuf::from("/cache/abc/concat.txt"),
            &PathBuf::from("/out/movie.mp4"),
        );
        assert_eq!(
            args,
            vec![
                "-hide_banner",
                "-loglevel",
                "warning",
                "-f",
                "concat",
                "-safe",
                "0",
                "-i",
                "/cache/abc/concat.txt",
                "-c",
                "copy",
                "-bsf:a",
                "aac_adtstoasc",
                "-y",
                "/out/movie.mp4",
            ]
        );
    }

    #[tokio::test]
    async fn missing_binary_maps_to_merge_error() {
        let merger = FfmpegMerger::new(MergerConfig {
            binary_path: "definitely-not-a-muxer-binary".to_string(),
        });
        let err = merger
            .merge(Path::new("/tmp/concat.txt"), Path::new("/tmp/out.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Merge { .. }));
    }
}
