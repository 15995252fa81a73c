//! Download requests.

use std::any::Any;
use std::fmt;
use std::path::{MAIN_SEPARATOR, MAIN_SEPARATOR_STR, Path, PathBuf};
use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::checksum::{Checksum, HashAlgorithm};
use super::error::{BoxError, DownloadError};
use super::rate_limiter::RateLimiter;
use super::response::Response;

/// Callback invoked around the streaming phase of a download.
///
/// Returning an error aborts the transfer with [`DownloadError::Hook`].
pub type Hook = Arc<dyn Fn(&Response) -> Result<(), BoxError> + Send + Sync>;

/// Opaque caller data attached to a request.
pub type Tag = Arc<dyn Any + Send + Sync>;

/// Returns `dir` with a trailing path separator.
///
/// A [`Request`] built with the result resolves its file name from the server
/// response even when `dir` does not exist yet. An empty path stays empty.
#[must_use]
pub fn directory_destination(dir: impl AsRef<Path>) -> PathBuf {
    let dir = dir.as_ref();
    let raw = dir.as_os_str().to_string_lossy();
    if raw.is_empty() || raw.ends_with('/') || raw.ends_with(MAIN_SEPARATOR) {
        return dir.to_path_buf();
    }
    let mut owned = dir.as_os_str().to_owned();
    owned.push(MAIN_SEPARATOR_STR);
    PathBuf::from(owned)
}

/// A single file to download.
///
/// URL and destination are fixed at construction. Everything else is plain
/// configuration the caller may set before handing the request to a
/// [`Client`](super::Client).
#[derive(Clone)]
pub struct Request {
    url: Url,
    destination: PathBuf,
    cancel: CancellationToken,
    headers: HeaderMap,
    checksum: Option<Checksum>,

    /// Caller label, carried through untouched.
    pub label: Option<String>,

    /// Caller data, carried through untouched.
    pub tag: Option<Tag>,

    /// Complete successfully without transferring if the destination exists.
    pub skip_existing: bool,

    /// Always download from byte zero, truncating any partial file.
    pub no_resume: bool,

    /// Keep the content in memory instead of writing it to disk.
    pub no_store: bool,

    /// Fail instead of creating missing parent directories.
    pub no_create_directories: bool,

    /// Stream the body even when the status code is not 2xx.
    pub ignore_bad_status_codes: bool,

    /// Do not apply the server's `Last-Modified` time to the destination.
    pub ignore_remote_time: bool,

    /// Expected size in bytes; 0 if unknown.
    pub size: u64,

    /// Copy buffer size; 0 uses the client default.
    pub buffer_size: usize,

    /// Optional throughput limiter.
    pub rate_limiter: Option<Arc<dyn RateLimiter>>,

    /// Called once the destination is open, before any body bytes are copied.
    pub before_copy: Option<Hook>,

    /// Called after the body has been copied, before verification.
    pub after_copy: Option<Hook>,
}

impl Request {
    /// Creates a request downloading `url` to `destination`.
    ///
    /// `destination` may be an explicit file path, an existing directory, a
    /// path ending in a separator (treated as a directory), or empty for the
    /// current working directory. In the directory cases the file name is
    /// resolved from the server response.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidUrl`] if `url` is not an absolute
    /// `http` or `https` URL.
    pub fn new(destination: impl Into<PathBuf>, url: &str) -> Result<Self, DownloadError> {
        let parsed = Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;
        if !matches!(parsed.scheme(), "http" | "https") || !parsed.has_host() {
            return Err(DownloadError::invalid_url(url));
        }

        Ok(Self {
            url: parsed,
            destination: destination.into(),
            cancel: CancellationToken::new(),
            headers: HeaderMap::new(),
            checksum: None,
            label: None,
            tag: None,
            skip_existing: false,
            no_resume: false,
            no_store: false,
            no_create_directories: false,
            ignore_bad_status_codes: false,
            ignore_remote_time: false,
            size: 0,
            buffer_size: 0,
            rate_limiter: None,
            before_copy: None,
            after_copy: None,
        })
    }

    /// The URL to download.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The destination as given at construction.
    #[must_use]
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Returns true when the destination names a directory without touching
    /// the filesystem (empty, or ending in a path separator).
    #[must_use]
    pub fn is_directory_destination(&self) -> bool {
        let raw = self.destination.as_os_str().to_string_lossy();
        raw.is_empty() || raw.ends_with('/') || raw.ends_with(MAIN_SEPARATOR)
    }

    /// The cancellation scope for this request.
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns a copy of this request bound to a different cancellation scope.
    #[must_use]
    pub fn with_cancel(&self, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..self.clone()
        }
    }

    /// Extra headers sent with every request for this download.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Sets an extra request header, replacing any previous value.
    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    /// The configured checksum, if any.
    #[must_use]
    pub fn checksum(&self) -> Option<&Checksum> {
        self.checksum.as_ref()
    }

    /// Configures checksum verification. Passing `None` clears it.
    pub fn set_checksum(
        &mut self,
        algorithm: Option<HashAlgorithm>,
        expected: impl Into<Vec<u8>>,
        delete_on_error: bool,
    ) {
        self.checksum = algorithm.map(|algorithm| Checksum {
            algorithm,
            expected: expected.into(),
            delete_on_error,
        });
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("url", &self.url.as_str())
            .field("destination", &self.destination)
            .field("label", &self.label)
            .field("skip_existing", &self.skip_existing)
            .field("no_resume", &self.no_resume)
            .field("no_store", &self.no_store)
            .field("size", &self.size)
            .field("checksum", &self.checksum.as_ref().map(|c| c.algorithm))
            .finish_non_exhaustive()
    }
}
