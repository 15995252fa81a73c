//! Per-download state machine.
//!
//! One [`Attempt`] drives one [`Response`] from creation to its published
//! [`Outcome`]. Steps run strictly in sequence; before each one the driver
//! checks the attempt's cancellation scope, and any step error jumps straight
//! to [`Step::Close`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use reqwest::header::{
    ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, HeaderMap, HeaderValue, RANGE, USER_AGENT,
};
use reqwest::{Method, StatusCode};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use super::checksum::hash_file;
use super::constants::{DEFAULT_BUFFER_SIZE, MEMORY_TARGET};
use super::error::DownloadError;
use super::filename::resolve_filename;
use super::local::{create_parent_dirs, parse_last_modified, set_modified};
use super::request::{Hook, Request};
use super::response::{Finisher, Outcome, Response};
use super::transfer::{self, TransferError};
use super::transport::{Body, IncomingResponse, OutgoingRequest, Transport};

/// States of a download attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// Find out what, if anything, already exists at the destination.
    StatDestination,
    /// Decide between skipping, resuming and restarting given the local file.
    ValidateLocal,
    /// `HEAD` the URL for size, range support and a file name.
    Probe,
    /// Issue the content `GET`, with a `Range` header when resuming.
    Fetch,
    /// Take size, modification time and file name from the `GET` response.
    ReadHeaders,
    /// Open the destination file or memory buffer.
    OpenWriter,
    /// Stream the body into the destination.
    Copy,
    /// Check the destination against the expected checksum.
    Verify,
    /// Release resources and publish the outcome.
    Close,
}

enum Sink {
    File(File),
    Memory(Vec<u8>),
}

/// Mutable state of one download attempt, owned by the task running it.
pub(crate) struct Attempt {
    transport: Arc<dyn Transport>,
    user_agent: String,
    default_buffer_size: usize,
    request: Request,
    response: Response,
    finisher: Finisher,
    cancel: CancellationToken,
    url: String,

    filename: Option<PathBuf>,
    local_size: Option<u64>,
    probed: bool,
    can_resume: bool,
    remote_size: u64,
    did_resume: bool,
    bytes_resumed: u64,
    size: u64,

    status: Option<StatusCode>,
    headers: Option<HeaderMap>,
    final_url: Option<Url>,
    last_modified: Option<SystemTime>,
    body: Option<Body>,
    sink: Option<Sink>,
}

impl Attempt {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        user_agent: String,
        default_buffer_size: usize,
        response: Response,
        finisher: Finisher,
    ) -> Self {
        let request = response.request().clone();
        let cancel = response.cancel_token().clone();
        let url = request.url().to_string();
        Self {
            transport,
            user_agent,
            default_buffer_size,
            request,
            response,
            finisher,
            cancel,
            url,
            filename: None,
            local_size: None,
            probed: false,
            can_resume: true,
            remote_size: 0,
            did_resume: false,
            bytes_resumed: 0,
            size: 0,
            status: None,
            headers: None,
            final_url: None,
            last_modified: None,
            body: None,
            sink: None,
        }
    }

    /// Runs the attempt to completion and publishes its outcome.
    pub(crate) async fn run(mut self) {
        let mut step = Step::StatDestination;
        let error = loop {
            if self.cancel.is_cancelled() {
                break Some(DownloadError::canceled(&self.url));
            }
            if step == Step::Close {
                break None;
            }
            trace!(?step, "entering step");
            match self.dispatch(step).await {
                Ok(next) => step = next,
                Err(e) => break Some(e),
            }
        };
        self.close(error).await;
    }

    async fn dispatch(&mut self, step: Step) -> Result<Step, DownloadError> {
        match step {
            Step::StatDestination => self.stat_destination().await,
            Step::ValidateLocal => self.validate_local(),
            Step::Probe => self.probe().await,
            Step::Fetch => self.fetch().await,
            Step::ReadHeaders => self.read_headers().await,
            Step::OpenWriter => self.open_writer().await,
            Step::Copy => self.copy().await,
            Step::Verify => self.verify().await,
            Step::Close => Ok(Step::Close),
        }
    }

    async fn stat_destination(&mut self) -> Result<Step, DownloadError> {
        if self.request.no_store {
            if !self.request.is_directory_destination() {
                self.set_filename(self.request.destination().to_path_buf());
            }
            return Ok(Step::Probe);
        }

        let path = match &self.filename {
            Some(path) => path.clone(),
            None if self.request.is_directory_destination() => return Ok(Step::Probe),
            None => self.request.destination().to_path_buf(),
        };

        match tokio::fs::metadata(&path).await {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.set_filename(path);
                Ok(Step::Probe)
            }
            Err(e) => Err(DownloadError::io(path, e)),
            Ok(meta) if meta.is_dir() => {
                if self.filename.is_some() {
                    return Err(DownloadError::io(
                        path,
                        std::io::ErrorKind::IsADirectory.into(),
                    ));
                }
                debug!(path = %path.display(), "destination is a directory");
                Ok(Step::Probe)
            }
            Ok(meta) => {
                self.set_filename(path);
                if self.request.skip_existing {
                    debug!("destination exists; skipping");
                    self.size = meta.len();
                    return Ok(Step::Close);
                }
                self.local_size = Some(meta.len());
                Ok(Step::ValidateLocal)
            }
        }
    }

    fn validate_local(&mut self) -> Result<Step, DownloadError> {
        let local = self.local_size.unwrap_or(0);
        if self.request.no_resume || local == 0 {
            return Ok(Step::Fetch);
        }

        let expected = if self.request.size > 0 {
            self.request.size
        } else {
            self.remote_size
        };
        if expected > 0 {
            if local == expected {
                debug!(bytes = local, "destination already complete");
                self.mark_resumed(local);
                self.size = local;
                self.response.progress_counters().set_size(local);
                return Ok(self.after_transfer());
            }
            if local > expected {
                return Err(DownloadError::integrity(self.target(), expected, local));
            }
        }

        if !self.probed {
            return Ok(Step::Probe);
        }
        if !self.can_resume {
            debug!("server does not accept byte ranges; restarting from zero");
            return Ok(Step::Fetch);
        }

        self.mark_resumed(local);
        Ok(Step::Fetch)
    }

    async fn probe(&mut self) -> Result<Step, DownloadError> {
        if self.probed {
            return Ok(Step::Fetch);
        }
        if self.filename.is_some()
            && (self.request.no_resume || (self.local_size.is_none() && self.request.size == 0))
        {
            return Ok(Step::Fetch);
        }

        self.probed = true;
        let outgoing = self.outgoing(Method::HEAD);
        let response = execute(self.transport.as_ref(), &self.cancel, &self.url, outgoing).await?;
        let IncomingResponse {
            status,
            url,
            headers,
            ..
        } = response;
        self.record(status, &headers, &url);

        if status != StatusCode::OK {
            debug!(status = status.as_u16(), "probe unusable; continuing with GET");
            return Ok(if self.local_size.is_some() {
                Step::ValidateLocal
            } else {
                Step::Fetch
            });
        }

        self.can_resume = headers
            .get(ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .is_none_or(|v| !v.trim().eq_ignore_ascii_case("none"));

        if let Some(len) = content_length(&headers) {
            if self.request.size > 0 && len != self.request.size {
                return Err(DownloadError::integrity(&self.url, self.request.size, len));
            }
            self.remote_size = len;
            self.size = len;
            self.response.progress_counters().set_size(len);
        }

        if self.filename.is_none() {
            match resolve_filename(&headers, &url) {
                Ok(name) => {
                    self.set_filename(self.request.destination().join(name));
                    if !self.request.no_store {
                        return Ok(Step::StatDestination);
                    }
                }
                Err(e) if self.request.no_store => debug!(error = %e, "no filename for in-memory download"),
                Err(e) => return Err(e),
            }
        }

        Ok(if self.local_size.is_some() {
            Step::ValidateLocal
        } else {
            Step::Fetch
        })
    }

    async fn fetch(&mut self) -> Result<Step, DownloadError> {
        let mut outgoing = self.outgoing(Method::GET);
        if self.did_resume
            && let Ok(range) = HeaderValue::from_str(&format!("bytes={}-", self.bytes_resumed))
        {
            outgoing.headers.insert(RANGE, range);
        }

        let IncomingResponse {
            status,
            url,
            headers,
            body,
        } = execute(self.transport.as_ref(), &self.cancel, &self.url, outgoing).await?;
        self.record(status, &headers, &url);

        if !status.is_success() && !self.request.ignore_bad_status_codes {
            return Err(DownloadError::http_status(&self.url, status.as_u16()));
        }

        if self.did_resume {
            if status == StatusCode::PARTIAL_CONTENT {
                if let Some(value) = headers.get(CONTENT_RANGE) {
                    let raw = value.to_str().unwrap_or_default();
                    let start = parse_content_range_start(raw)
                        .ok_or_else(|| DownloadError::invalid_content_range(&self.url, raw))?;
                    if start != self.bytes_resumed {
                        return Err(DownloadError::resume_mismatch(
                            &self.url,
                            self.bytes_resumed,
                            start,
                        ));
                    }
                }
            } else {
                debug!(
                    status = status.as_u16(),
                    "range request not honored; restarting from zero"
                );
                self.did_resume = false;
                self.bytes_resumed = 0;
                self.response.progress_counters().set_resumed(0);
            }
        }

        self.body = Some(body);
        Ok(Step::ReadHeaders)
    }

    async fn read_headers(&mut self) -> Result<Step, DownloadError> {
        let headers = self.headers.clone().unwrap_or_default();

        if let Some(len) = content_length(&headers) {
            let total = len
                .checked_add(self.bytes_resumed)
                .ok_or_else(|| DownloadError::integrity(self.target(), self.request.size, len))?;
            if self.request.size > 0 && total != self.request.size {
                return Err(DownloadError::integrity(&self.url, self.request.size, total));
            }
            self.size = total;
        } else if self.request.size > 0 {
            self.size = self.request.size;
        }
        self.response.progress_counters().set_size(self.size);
        self.last_modified = parse_last_modified(&headers);

        if self.filename.is_none() {
            let url = self
                .final_url
                .clone()
                .unwrap_or_else(|| self.request.url().clone());
            match resolve_filename(&headers, &url) {
                Ok(name) => {
                    let path = self.request.destination().join(name);
                    self.set_filename(path.clone());
                    if !self.request.no_store
                        && self.request.skip_existing
                        && tokio::fs::try_exists(&path).await.unwrap_or(false)
                    {
                        debug!(path = %path.display(), "destination exists; skipping");
                        self.body = None;
                        return Ok(Step::Close);
                    }
                }
                Err(e) if self.request.no_store => debug!(error = %e, "no filename for in-memory download"),
                Err(e) => return Err(e),
            }
        }

        Ok(Step::OpenWriter)
    }

    async fn open_writer(&mut self) -> Result<Step, DownloadError> {
        if self.request.no_store {
            self.sink = Some(Sink::Memory(Vec::new()));
        } else {
            let path = self
                .filename
                .clone()
                .ok_or_else(|| DownloadError::no_filename(&self.url))?;
            if !self.request.no_create_directories {
                create_parent_dirs(&path).await?;
            }

            let mut options = OpenOptions::new();
            if self.did_resume {
                options.append(true);
            } else {
                options.write(true).create(true).truncate(true);
            }
            let file = options
                .open(&path)
                .await
                .map_err(|e| DownloadError::io(&path, e))?;
            debug!(path = %path.display(), append = self.did_resume, "opened destination");
            self.sink = Some(Sink::File(file));
        }

        self.run_hook("before_copy", self.request.before_copy.as_ref())?;
        Ok(Step::Copy)
    }

    async fn copy(&mut self) -> Result<Step, DownloadError> {
        let mut body = self
            .body
            .take()
            .ok_or_else(|| DownloadError::aborted(&self.url))?;
        let buffer_size = [self.request.buffer_size, self.default_buffer_size]
            .into_iter()
            .find(|&size| size > 0)
            .unwrap_or(DEFAULT_BUFFER_SIZE);
        let mut buf = vec![0u8; buffer_size];
        let limiter = self.request.rate_limiter.clone();
        let counter = self.response.progress_counters().counter();

        let (written, result) = match self.sink.as_mut() {
            Some(Sink::File(file)) => {
                let (written, result) = transfer::copy(
                    &self.cancel,
                    limiter.as_deref(),
                    file,
                    &mut body,
                    &mut buf,
                    counter,
                )
                .await;
                let result = match result {
                    Ok(()) => transfer::flush(file).await,
                    Err(e) => Err(e),
                };
                (written, result)
            }
            Some(Sink::Memory(data)) => {
                transfer::copy(
                    &self.cancel,
                    limiter.as_deref(),
                    data,
                    &mut body,
                    &mut buf,
                    counter,
                )
                .await
            }
            None => return Err(DownloadError::aborted(&self.url)),
        };
        drop(body);
        result.map_err(|e| self.transfer_error(e))?;
        debug!(bytes = written, "body copied");

        self.run_hook("after_copy", self.request.after_copy.as_ref())?;

        let total = self
            .bytes_resumed
            .checked_add(written)
            .ok_or_else(|| DownloadError::integrity(self.target(), self.size, written))?;
        if self.size > 0 && total != self.size {
            return Err(DownloadError::integrity(self.target(), self.size, total));
        }
        Ok(self.after_transfer())
    }

    async fn verify(&mut self) -> Result<Step, DownloadError> {
        let Some(checksum) = self.request.checksum().cloned() else {
            return Ok(Step::Close);
        };

        let actual = if let Some(Sink::Memory(data)) = &self.sink {
            checksum.algorithm.digest(data)
        } else {
            self.sink = None;
            let path = self
                .filename
                .clone()
                .ok_or_else(|| DownloadError::no_filename(&self.url))?;
            hash_file(&path, checksum.algorithm).await?
        };

        if checksum.matches(&actual) {
            debug!(algorithm = checksum.algorithm.name(), "checksum verified");
            return Ok(Step::Close);
        }

        if checksum.delete_on_error {
            if self.request.no_store {
                self.sink = None;
            } else if let Some(path) = &self.filename {
                match tokio::fs::remove_file(path).await {
                    Ok(()) => debug!(path = %path.display(), "removed destination after checksum mismatch"),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => warn!(path = %path.display(), error = %e, "failed to remove corrupt destination"),
                }
            }
        }

        Err(DownloadError::checksum_mismatch(
            self.target(),
            checksum.algorithm.name(),
            &checksum.expected,
            &actual,
        ))
    }

    async fn close(mut self, error: Option<DownloadError>) {
        let body = match self.sink.take() {
            Some(Sink::File(mut file)) => {
                if let Err(e) = file.flush().await {
                    warn!(error = %e, "failed to flush destination");
                }
                None
            }
            Some(Sink::Memory(data)) => Some(Bytes::from(data)),
            None => None,
        };
        self.body = None;

        if error.is_none()
            && !self.request.no_store
            && !self.request.ignore_remote_time
            && let (Some(path), Some(modified)) = (&self.filename, self.last_modified)
        {
            set_modified(path, modified).await;
        }

        let counters = self.response.progress_counters();
        if error.is_none() && self.size == 0 {
            self.size = counters.resumed().saturating_add(counters.transferred());
            counters.set_size(self.size);
        }

        match &error {
            None => info!(
                url = %self.url,
                filename = ?self.filename,
                bytes = self.size,
                resumed = self.did_resume,
                "download complete"
            ),
            Some(e) if e.is_canceled() => info!(url = %self.url, "download canceled"),
            Some(e) => warn!(url = %self.url, error = %e, "download failed"),
        }

        let outcome = Outcome {
            filename: self.filename.take(),
            error: error.map(Arc::new),
            did_resume: self.did_resume,
            bytes_resumed: self.bytes_resumed,
            size: self.size,
            end: SystemTime::now(),
            status: self.status,
            headers: self.headers.take(),
            body,
        };
        self.finisher.finish(outcome);
    }

    fn outgoing(&self, method: Method) -> OutgoingRequest {
        let mut headers = self.request.headers().clone();
        if !headers.contains_key(USER_AGENT)
            && let Ok(agent) = HeaderValue::from_str(&self.user_agent)
        {
            headers.insert(USER_AGENT, agent);
        }
        OutgoingRequest {
            method,
            url: self.request.url().clone(),
            headers,
        }
    }

    fn record(&mut self, status: StatusCode, headers: &HeaderMap, url: &Url) {
        self.status = Some(status);
        self.headers = Some(headers.clone());
        self.final_url = Some(url.clone());
    }

    fn set_filename(&mut self, path: PathBuf) {
        if self.filename.is_none() {
            self.response.set_filename(path.clone());
            self.filename = Some(path);
        }
    }

    fn mark_resumed(&mut self, bytes: u64) {
        self.did_resume = true;
        self.bytes_resumed = bytes;
        self.response.progress_counters().set_resumed(bytes);
    }

    fn after_transfer(&self) -> Step {
        if self.request.checksum().is_some() {
            Step::Verify
        } else {
            Step::Close
        }
    }

    fn run_hook(&self, stage: &'static str, hook: Option<&Hook>) -> Result<(), DownloadError> {
        if let Some(hook) = hook {
            hook(&self.response).map_err(|e| DownloadError::hook(stage, &self.url, e))?;
        }
        Ok(())
    }

    fn target(&self) -> String {
        self.filename.as_ref().map_or_else(
            || {
                if self.request.no_store {
                    MEMORY_TARGET.to_string()
                } else {
                    self.url.clone()
                }
            },
            |path| path.display().to_string(),
        )
    }

    fn transfer_error(&self, error: TransferError) -> DownloadError {
        match error {
            TransferError::Read(e) => DownloadError::read(&self.url, e),
            TransferError::Write(e) => match (&self.filename, self.request.no_store) {
                (Some(path), false) => DownloadError::io(path, e),
                _ => DownloadError::io(MEMORY_TARGET, e),
            },
            TransferError::ShortWrite { written, expected } => {
                DownloadError::short_write(self.target(), written, expected)
            }
            TransferError::RateLimit(e) => DownloadError::rate_limit(&self.url, e),
            TransferError::Canceled => DownloadError::canceled(&self.url),
        }
    }
}

/// Sends `request`, giving up as soon as `cancel` fires.
///
/// Borrows only the pieces it needs so the attempt future stays `Send` while
/// the body stream (which is not `Sync`) lives in the attempt.
async fn execute(
    transport: &dyn Transport,
    cancel: &CancellationToken,
    url: &str,
    request: OutgoingRequest,
) -> Result<IncomingResponse, DownloadError> {
    debug!(method = %request.method, "issuing request");
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(DownloadError::canceled(url)),
        result = transport.execute(request) => result.map_err(|e| DownloadError::network(url, e)),
    }
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Parses the first byte position of a `Content-Range: bytes <start>-<end>/<total>` value.
fn parse_content_range_start(value: &str) -> Option<u64> {
    let range = value.trim().strip_prefix("bytes")?.trim_start();
    let (span, _total) = range.split_once('/')?;
    let (start, end) = span.split_once('-')?;
    let start: u64 = start.trim().parse().ok()?;
    let end: u64 = end.trim().parse().ok()?;
    (start <= end).then_some(start)
}
