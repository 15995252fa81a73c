//! Error types for the download module.
//!
//! Every terminal failure of a transfer is one of these variants. Construction
//! errors (`InvalidUrl`, `InvalidDestination`) are returned synchronously; all
//! others are attached to a [`Response`](super::Response) when it completes.

use std::path::PathBuf;

use thiserror::Error;

use super::transport::TransportError;

/// Boxed error used at plug-in seams (hooks, rate limiters, transports).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while preparing or running a download.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The provided URL is malformed or not an absolute http(s) URL.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// The batch destination is missing or is not a directory.
    #[error("invalid destination {path}: {reason}")]
    InvalidDestination {
        /// The rejected destination path.
        path: PathBuf,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// No usable filename could be derived from the headers or the URL.
    #[error("no filename could be determined for {url}")]
    NoFilename {
        /// The URL being downloaded.
        url: String,
    },

    /// Transport-level failure (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed to download.
        url: String,
        /// The underlying transport error.
        #[source]
        source: TransportError,
    },

    /// Request timed out before completion.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Non-2xx status on the content request.
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The server resumed from a different offset than the local partial file.
    #[error(
        "resume mismatch for {url}: requested offset {expected_offset}, server started at {actual_offset}"
    )]
    ResumeMismatch {
        /// The URL being resumed.
        url: String,
        /// Size of the local partial file.
        expected_offset: u64,
        /// Start offset declared by `Content-Range`.
        actual_offset: u64,
    },

    /// `Content-Range` was present on a resumed transfer but could not be parsed.
    #[error("invalid Content-Range {value:?} downloading {url}")]
    InvalidContentRange {
        /// The URL being resumed.
        url: String,
        /// The raw header value.
        value: String,
    },

    /// Content length does not match the expected size.
    #[error(
        "integrity check failed for {target}: expected {expected_bytes} bytes, got {actual_bytes}"
    )]
    Integrity {
        /// Destination path or URL that failed verification.
        target: String,
        /// Expected size in bytes.
        expected_bytes: u64,
        /// Actual size in bytes.
        actual_bytes: u64,
    },

    /// Digest of the destination does not match the expected checksum.
    #[error("{algorithm} checksum mismatch for {target}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Destination path or URL that failed verification.
        target: String,
        /// Name of the hash algorithm.
        algorithm: &'static str,
        /// Expected digest (hex).
        expected: String,
        /// Computed digest (hex).
        actual: String,
    },

    /// File system error (stat, create, write, remove, etc.)
    #[error("IO error on {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Reading the response body failed mid-transfer.
    #[error("error reading body of {url}: {source}")]
    Read {
        /// The URL being streamed.
        url: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The destination accepted fewer bytes than were offered.
    #[error("short write to {target}: wrote {written} of {expected} bytes")]
    ShortWrite {
        /// Destination path, or `<memory>`.
        target: String,
        /// Bytes the destination accepted.
        written: usize,
        /// Bytes that were offered.
        expected: usize,
    },

    /// The configured rate limiter failed.
    #[error("rate limiter failed downloading {url}: {source}")]
    RateLimit {
        /// The URL being streamed.
        url: String,
        /// Error reported by the limiter.
        #[source]
        source: BoxError,
    },

    /// A `before_copy` / `after_copy` hook rejected the transfer.
    #[error("{stage} hook failed for {url}: {source}")]
    Hook {
        /// `before_copy` or `after_copy`.
        stage: &'static str,
        /// The URL being downloaded.
        url: String,
        /// Error returned by the hook.
        #[source]
        source: BoxError,
    },

    /// The transfer was canceled through its cancellation scope.
    #[error("download of {url} canceled")]
    Canceled {
        /// The URL that was canceled.
        url: String,
    },

    /// The engine task stopped without producing a result (panic or runtime shutdown).
    #[error("download of {url} aborted before completion")]
    Aborted {
        /// The URL that was being downloaded.
        url: String,
    },
}

impl DownloadError {
    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates an invalid destination error.
    pub fn invalid_destination(path: impl Into<PathBuf>, reason: &'static str) -> Self {
        Self::InvalidDestination {
            path: path.into(),
            reason,
        }
    }

    /// Creates a no-filename error.
    pub fn no_filename(url: impl Into<String>) -> Self {
        Self::NoFilename { url: url.into() }
    }

    /// Creates a network error, promoting transport timeouts to [`DownloadError::Timeout`].
    pub fn network(url: impl Into<String>, source: TransportError) -> Self {
        if source.is_timeout() {
            Self::Timeout { url: url.into() }
        } else {
            Self::Network {
                url: url.into(),
                source,
            }
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a resume-consistency error.
    pub fn resume_mismatch(url: impl Into<String>, expected_offset: u64, actual_offset: u64) -> Self {
        Self::ResumeMismatch {
            url: url.into(),
            expected_offset,
            actual_offset,
        }
    }

    /// Creates an unparsable Content-Range error.
    pub fn invalid_content_range(url: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidContentRange {
            url: url.into(),
            value: value.into(),
        }
    }

    /// Creates an integrity (size) mismatch error.
    pub fn integrity(target: impl Into<String>, expected_bytes: u64, actual_bytes: u64) -> Self {
        Self::Integrity {
            target: target.into(),
            expected_bytes,
            actual_bytes,
        }
    }

    /// Creates a checksum mismatch error from raw digests.
    pub fn checksum_mismatch(
        target: impl Into<String>,
        algorithm: &'static str,
        expected: &[u8],
        actual: &[u8],
    ) -> Self {
        Self::ChecksumMismatch {
            target: target.into(),
            algorithm,
            expected: hex::encode(expected),
            actual: hex::encode(actual),
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a body read error.
    pub fn read(url: impl Into<String>, source: std::io::Error) -> Self {
        Self::Read {
            url: url.into(),
            source,
        }
    }

    /// Creates a short write error.
    pub fn short_write(target: impl Into<String>, written: usize, expected: usize) -> Self {
        Self::ShortWrite {
            target: target.into(),
            written,
            expected,
        }
    }

    /// Creates a rate limiter error.
    pub fn rate_limit(url: impl Into<String>, source: BoxError) -> Self {
        Self::RateLimit {
            url: url.into(),
            source,
        }
    }

    /// Creates a hook error.
    pub fn hook(stage: &'static str, url: impl Into<String>, source: BoxError) -> Self {
        Self::Hook {
            stage,
            url: url.into(),
            source,
        }
    }

    /// Creates a cancellation error.
    pub fn canceled(url: impl Into<String>) -> Self {
        Self::Canceled { url: url.into() }
    }

    /// Creates an aborted error.
    pub fn aborted(url: impl Into<String>) -> Self {
        Self::Aborted { url: url.into() }
    }

    /// Returns true if the transfer stopped because its scope was canceled.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled { .. })
    }

    /// Returns true for non-2xx status failures.
    #[must_use]
    pub fn is_status_code(&self) -> bool {
        matches!(self, Self::HttpStatus { .. })
    }

    /// Returns the HTTP status for [`DownloadError::HttpStatus`].
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

// No `From<reqwest::Error>` / `From<std::io::Error>`: every variant needs a url or
// path the source error does not carry, so the helper constructors are used instead.
