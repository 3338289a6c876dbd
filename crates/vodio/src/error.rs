use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("download cancelled")]
    Cancelled,

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("manifest error: {reason}")]
    Manifest { reason: String },

    #[error("segment {index} failed: {reason}")]
    SegmentFetch { index: usize, reason: String },

    #[error("cache error: {reason}")]
    CacheIo { reason: String },

    #[error("merge failed: {reason}")]
    Merge { reason: String },

    #[error("request failed with HTTP {status} during {operation} for {url}")]
    HttpStatus {
        status: StatusCode,
        url: String,
        operation: &'static str,
    },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl EngineError {
    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn manifest(reason: impl Into<String>) -> Self {
        Self::Manifest {
            reason: reason.into(),
        }
    }

    pub fn segment_fetch(index: usize, reason: impl Into<String>) -> Self {
        Self::SegmentFetch {
            index,
            reason: reason.into(),
        }
    }

    pub fn cache_io(reason: impl Into<String>) -> Self {
        Self::CacheIo {
            reason: reason.into(),
        }
    }

    pub fn merge(reason: impl Into<String>) -> Self {
        Self::Merge {
            reason: reason.into(),
        }
    }

    pub fn http_status(
        status: StatusCode,
        url: impl Into<String>,
        operation: &'static str,
    ) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
            operation,
        }
    }

    /// Whether the error aborts the whole run rather than a single segment.
    ///
    /// Per-segment failures are aggregated into the run's error list; fatal
    /// errors stop the session and surface as its sole failure reason.
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Manifest { .. } | Self::CacheIo { .. } | Self::Merge { .. } => true,
            Self::InvalidUrl { .. } | Self::Internal { .. } => true,
            Self::Cancelled
            | Self::SegmentFetch { .. }
            | Self::HttpStatus { .. }
            | Self::Network { .. }
            | Self::Io { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_fetch_message_names_the_index() {
        let err = EngineError::segment_fetch(5, "HTTP 404 Not Found");
        let msg = err.to_string();
        assert!(msg.contains('5'), "message should name the index: {msg}");
        assert!(msg.contains("404"), "message should carry the cause: {msg}");
    }

    #[test]
    fn fatal_classification() {
        assert!(EngineError::manifest("no segments").is_fatal());
        assert!(EngineError::cache_io("permission denied").is_fatal());
        assert!(EngineError::merge("exit code 1").is_fatal());
        assert!(!EngineError::segment_fetch(0, "timeout").is_fatal());
        assert!(!EngineError::Cancelled.is_fatal());
    }
}
