//! In-process transport used by unit tests that exercise orchestration.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_LENGTH, HeaderMap, HeaderValue};

use super::transport::{IncomingResponse, OutgoingRequest, Transport, TransportError};

/// Serves fixed bodies by URL path; unknown paths get 404.
#[derive(Debug, Default)]
pub(crate) struct RouteTransport {
    routes: Mutex<HashMap<String, (u16, Vec<u8>)>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl RouteTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub(crate) fn route(self, path: &str, status: u16, body: &[u8]) -> Self {
        if let Ok(mut routes) = self.routes.lock() {
            routes.insert(path.to_string(), (status, body.to_vec()));
        }
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for RouteTransport {
    async fn execute(&self, request: OutgoingRequest) -> Result<IncomingResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let (status, body) = self
            .routes
            .lock()
            .map_err(|_| TransportError::new("route table poisoned"))?
            .get(request.url.path())
            .cloned()
            .unwrap_or((404, b"not found".to_vec()));

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        let body = if request.method == reqwest::Method::HEAD {
            Vec::new()
        } else {
            body
        };

        Ok(IncomingResponse {
            status: StatusCode::from_u16(status).map_err(TransportError::new)?,
            url: request.url,
            headers,
            body: Box::new(std::io::Cursor::new(body)),
        })
    }
}
