//! Responses: live handles on a running download and their terminal outcome.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant, SystemTime};

use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::error::DownloadError;
use super::request::Request;
use super::transfer::Progress;

/// Handle on one download attempt.
///
/// Cheap to clone. Progress accessors are lock-free and may be polled while
/// the transfer runs; everything else about the result lives in the
/// [`Outcome`] published once the attempt finishes.
#[derive(Clone)]
pub struct Response {
    inner: Arc<Shared>,
}

struct Shared {
    request: Request,
    start: SystemTime,
    started: Instant,
    progress: Progress,
    filename: OnceLock<PathBuf>,
    cancel: CancellationToken,
    done: watch::Receiver<Option<Arc<Outcome>>>,
}

/// Terminal state of a download, immutable once published.
#[derive(Debug)]
pub struct Outcome {
    pub(crate) filename: Option<PathBuf>,
    pub(crate) error: Option<Arc<DownloadError>>,
    pub(crate) did_resume: bool,
    pub(crate) bytes_resumed: u64,
    pub(crate) size: u64,
    pub(crate) end: SystemTime,
    pub(crate) status: Option<StatusCode>,
    pub(crate) headers: Option<HeaderMap>,
    pub(crate) body: Option<Bytes>,
}

impl Outcome {
    pub(crate) fn aborted(url: &str) -> Self {
        Self {
            filename: None,
            error: Some(Arc::new(DownloadError::aborted(url))),
            did_resume: false,
            bytes_resumed: 0,
            size: 0,
            end: SystemTime::now(),
            status: None,
            headers: None,
            body: None,
        }
    }

    /// Local path of the destination, when one was resolved.
    #[must_use]
    pub fn filename(&self) -> Option<&Path> {
        self.filename.as_deref()
    }

    /// The terminal error, `None` on success.
    #[must_use]
    pub fn error(&self) -> Option<&DownloadError> {
        self.error.as_deref()
    }

    /// The terminal error as a shareable handle.
    #[must_use]
    pub fn error_arc(&self) -> Option<Arc<DownloadError>> {
        self.error.clone()
    }

    /// Returns true if the download completed without error.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Whether the transfer continued an existing partial file.
    #[must_use]
    pub fn did_resume(&self) -> bool {
        self.did_resume
    }

    /// Size of the local prefix that was kept.
    #[must_use]
    pub fn bytes_resumed(&self) -> u64 {
        self.bytes_resumed
    }

    /// Expected total size, 0 if it never became known.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// When the attempt finished.
    #[must_use]
    pub fn end(&self) -> SystemTime {
        self.end
    }

    /// Status code of the last HTTP exchange, if any happened.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Headers of the last HTTP exchange, if any happened.
    #[must_use]
    pub fn headers(&self) -> Option<&HeaderMap> {
        self.headers.as_ref()
    }

    /// Downloaded content for in-memory (`no_store`) requests.
    #[must_use]
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }
}

/// Sole writer of a [`Response`]'s completion gate.
///
/// Not cloneable, and [`finish`](Self::finish) consumes it, so the outcome is
/// published at most once. Dropping it unfinished publishes an
/// [`DownloadError::Aborted`] outcome so waiters never hang.
pub(crate) struct Finisher {
    tx: Option<watch::Sender<Option<Arc<Outcome>>>>,
    url: String,
}

impl Finisher {
    pub(crate) fn finish(mut self, outcome: Outcome) {
        if let Some(tx) = self.tx.take() {
            tx.send_replace(Some(Arc::new(outcome)));
        }
    }
}

impl Drop for Finisher {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            tx.send_replace(Some(Arc::new(Outcome::aborted(&self.url))));
        }
    }
}

impl Response {
    /// Creates the handle for a new attempt of `request` and the finisher that completes it.
    pub(crate) fn new(request: Request) -> (Self, Finisher) {
        let (tx, rx) = watch::channel(None);
        let cancel = request.cancel_token().child_token();
        let finisher = Finisher {
            tx: Some(tx),
            url: request.url().to_string(),
        };
        let response = Self {
            inner: Arc::new(Shared {
                request,
                start: SystemTime::now(),
                started: Instant::now(),
                progress: Progress::default(),
                filename: OnceLock::new(),
                cancel,
                done: rx,
            }),
        };
        (response, finisher)
    }

    /// The request this response answers.
    #[must_use]
    pub fn request(&self) -> &Request {
        &self.inner.request
    }

    /// When the attempt started.
    #[must_use]
    pub fn start(&self) -> SystemTime {
        self.inner.start
    }

    /// Resolved destination path; `None` until it is known.
    #[must_use]
    pub fn filename(&self) -> Option<&Path> {
        self.inner.filename.get().map(PathBuf::as_path)
    }

    pub(crate) fn set_filename(&self, path: PathBuf) {
        let _ = self.inner.filename.set(path);
    }

    pub(crate) fn progress_counters(&self) -> &Progress {
        &self.inner.progress
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    /// Cancels this attempt only. The request's own scope is not affected.
    pub fn cancel(&self) {
        self.inner.cancel.cancel();
    }

    /// Returns true once the outcome has been published.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.inner.done.borrow().is_some()
    }

    /// The outcome, if the attempt has finished.
    #[must_use]
    pub fn outcome(&self) -> Option<Arc<Outcome>> {
        self.inner.done.borrow().clone()
    }

    /// Waits for the attempt to finish.
    pub async fn wait(&self) -> Arc<Outcome> {
        let mut rx = self.inner.done.clone();
        // The finisher always publishes before its sender drops.
        let _ = rx.wait_for(Option::is_some).await;
        self.outcome()
            .unwrap_or_else(|| Arc::new(Outcome::aborted(self.inner.request.url().as_str())))
    }

    /// Waits for the attempt and returns the terminal error, if any.
    pub async fn err(&self) -> Option<Arc<DownloadError>> {
        self.wait().await.error_arc()
    }

    /// Waits for the attempt and returns the downloaded content.
    ///
    /// In-memory downloads return the buffered body; otherwise the destination
    /// file is read back.
    ///
    /// # Errors
    ///
    /// Returns the terminal error of a failed download, or an IO error if the
    /// destination cannot be read.
    pub async fn bytes(&self) -> Result<Bytes, Arc<DownloadError>> {
        let outcome = self.wait().await;
        if let Some(error) = outcome.error_arc() {
            return Err(error);
        }
        if let Some(body) = outcome.body() {
            return Ok(body.clone());
        }
        let path = outcome
            .filename()
            .ok_or_else(|| Arc::new(DownloadError::no_filename(self.request().url().as_str())))?;
        tokio::fs::read(path)
            .await
            .map(Bytes::from)
            .map_err(|e| Arc::new(DownloadError::io(path, e)))
    }

    /// Bytes of the destination that are complete: resumed prefix plus bytes transferred.
    #[must_use]
    pub fn bytes_complete(&self) -> u64 {
        let progress = &self.inner.progress;
        progress.resumed().saturating_add(progress.transferred())
    }

    /// Expected total size, 0 while unknown.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.inner.progress.size()
    }

    /// Fraction complete in `0.0..=1.0`; 0 while the size is unknown.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn progress(&self) -> f64 {
        let size = self.size();
        if size == 0 {
            return 0.0;
        }
        (self.bytes_complete() as f64 / size as f64).min(1.0)
    }

    /// Average transfer rate of this attempt since it started.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn bytes_per_second(&self) -> f64 {
        let secs = self.duration().as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.inner.progress.transferred() as f64 / secs
    }

    /// Estimated time remaining; `None` while size or rate is unknown.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn eta(&self) -> Option<Duration> {
        let size = self.size();
        let bps = self.bytes_per_second();
        if size == 0 || bps <= 0.0 {
            return None;
        }
        let remaining = size.saturating_sub(self.bytes_complete());
        Some(Duration::from_secs_f64(remaining as f64 / bps))
    }

    /// Time spent so far, or the total time once complete.
    #[must_use]
    pub fn duration(&self) -> Duration {
        match self.outcome() {
            Some(outcome) => outcome
                .end
                .duration_since(self.inner.start)
                .unwrap_or_default(),
            None => self.inner.started.elapsed(),
        }
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("url", &self.inner.request.url().as_str())
            .field("filename", &self.filename())
            .field("bytes_complete", &self.bytes_complete())
            .field("size", &self.size())
            .field("complete", &self.is_complete())
            .finish_non_exhaustive()
    }
}
