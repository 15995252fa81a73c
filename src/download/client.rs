//! Download client: single, channel-driven and batch entry points.
//!
//! [`Client`] holds the configuration shared by every download (transport,
//! User-Agent, default buffer size). It is read-only after construction and
//! cheap to clone into worker tasks.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, instrument, warn};

use super::constants::DEFAULT_BUFFER_SIZE;
use super::error::DownloadError;
use super::request::Request;
use super::response::Response;
use super::state::Attempt;
use super::transport::{ReqwestTransport, Transport};
use crate::user_agent;

/// Executes download requests.
///
/// # Example
///
/// ```no_run
/// use grab_core::download::Client;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = Client::new();
/// let response = client.get("./downloads/", "https://example.com/file.pdf").await?;
/// match response.wait().await.error() {
///     None => println!("saved to {:?}", response.filename()),
///     Some(e) => eprintln!("failed: {e}"),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    user_agent: String,
    buffer_size: usize,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    /// Creates a client backed by [`ReqwestTransport`] with default timeouts.
    ///
    /// # Panics
    ///
    /// Panics if the TLS backend cannot be initialized.
    #[must_use]
    pub fn new() -> Self {
        Self::with_transport(Arc::new(ReqwestTransport::new()))
    }

    /// Creates a client using a caller-supplied transport.
    #[must_use]
    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            user_agent: user_agent::default_download_user_agent(),
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Replaces the User-Agent sent with every request.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Replaces the copy buffer size used when a request does not set one.
    #[must_use]
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// The User-Agent sent with every request.
    #[must_use]
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// The default copy buffer size.
    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Starts `request` in the background and returns its response immediately.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn do_request(&self, request: Request) -> Response {
        let (response, finisher) = Response::new(request);
        let span = info_span!("download", url = %response.request().url());
        let attempt = Attempt::new(
            Arc::clone(&self.transport),
            self.user_agent.clone(),
            self.buffer_size,
            response.clone(),
            finisher,
        );
        tokio::spawn(attempt.run().instrument(span));
        response
    }

    /// Downloads `url` into `destination` and waits for completion.
    ///
    /// Transfer failures are reported on the returned response's outcome.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidUrl`] if the request cannot be built.
    #[instrument(skip(self, destination))]
    pub async fn get(
        &self,
        destination: impl Into<PathBuf>,
        url: &str,
    ) -> Result<Response, DownloadError> {
        let request = Request::new(destination, url)?;
        let response = self.do_request(request);
        response.wait().await;
        Ok(response)
    }

    /// Runs requests from `requests` one at a time, forwarding each completed
    /// response to `responses`.
    ///
    /// Returns when the feed is exhausted, `cancel` fires, or the response
    /// receiver is dropped. `responses` is not closed explicitly; it closes
    /// when the caller drops its remaining senders.
    pub async fn do_channel(
        &self,
        cancel: &CancellationToken,
        requests: RequestFeed,
        responses: mpsc::Sender<Response>,
    ) {
        loop {
            let request = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                next = requests.recv() => match next {
                    Some(request) => request,
                    None => break,
                },
            };

            let response = self.do_request(request);
            tokio::select! {
                biased;
                _ = response.wait() => {}
                () = cancel.cancelled() => {
                    response.cancel();
                    response.wait().await;
                }
            }

            if responses.send(response).await.is_err() {
                debug!("response receiver dropped; worker stopping");
                break;
            }
        }
    }

    /// Runs `requests` across a pool of workers and streams back completed responses.
    ///
    /// `workers == 0` starts one worker per request. Responses arrive in
    /// completion order; the channel closes once every worker has finished.
    /// Canceling `cancel` stops workers from picking up further requests and
    /// cancels attempts in flight.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn do_batch(
        &self,
        cancel: &CancellationToken,
        workers: usize,
        requests: Vec<Request>,
    ) -> mpsc::Receiver<Response> {
        let count = requests.len();
        let workers = if workers == 0 { count } else { workers };

        let (request_tx, request_rx) = mpsc::channel(count.max(1));
        for request in requests {
            if let Err(e) = request_tx.try_send(request) {
                warn!(error = %e, "failed to queue batch request");
            }
        }
        drop(request_tx);

        let (response_tx, response_rx) = mpsc::channel(count.max(1));
        let feed = RequestFeed::from(request_rx);
        let mut pool = JoinSet::new();
        for worker in 0..workers {
            let client = self.clone();
            let cancel = cancel.clone();
            let feed = feed.clone();
            let responses = response_tx.clone();
            pool.spawn(
                async move { client.do_channel(&cancel, feed, responses).await }
                    .instrument(info_span!("batch_worker", worker)),
            );
        }
        drop(response_tx);
        debug!(requests = count, workers, "batch started");

        tokio::spawn(async move {
            while let Some(result) = pool.join_next().await {
                if let Err(e) = result {
                    warn!(error = %e, "batch worker panicked");
                }
            }
        });

        response_rx
    }
}

/// Shared source of requests for [`Client::do_channel`].
///
/// Clones drain the same underlying channel, so several workers can pull from
/// one queue.
#[derive(Debug, Clone)]
pub struct RequestFeed {
    inner: Arc<Mutex<mpsc::Receiver<Request>>>,
}

impl RequestFeed {
    /// Receives the next request, or `None` once the channel is closed and empty.
    pub async fn recv(&self) -> Option<Request> {
        self.inner.lock().await.recv().await
    }
}

impl From<mpsc::Receiver<Request>> for RequestFeed {
    fn from(receiver: mpsc::Receiver<Request>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(receiver)),
        }
    }
}
