//! Resumable HTTP download engine.
//!
//! Every download runs as its own Tokio task driving a small state machine:
//! resolve the destination, probe the server, fetch (resuming from a partial
//! file when the server supports ranges), stream to disk or memory, verify,
//! and finalize. Callers observe it through a [`Response`] whose live
//! progress counters can be polled at any time and whose [`Outcome`] is
//! published exactly once.
//!
//! # Features
//!
//! - Resume of partial files via `Range` requests, with `Content-Range` validation
//! - Filename resolution from `Content-Disposition` or the URL path
//! - Optional checksum verification (MD5, SHA-1, SHA-256)
//! - Per-request throughput limiting and cancellation
//! - Worker-pool batches streaming responses in completion order
//!
//! # Example
//!
//! ```no_run
//! use grab_core::download::{Client, get_batch};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::new();
//! let cancel = CancellationToken::new();
//! let mut responses = get_batch(
//!     &client,
//!     &cancel,
//!     4,
//!     "./downloads",
//!     &["https://example.com/a.pdf", "https://example.com/b.pdf"],
//! )
//! .await?;
//! while let Some(response) = responses.recv().await {
//!     if let Some(err) = response.wait().await.error() {
//!         eprintln!("{}: {err}", response.request().url());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod batch;
mod checksum;
mod client;
pub mod constants;
mod error;
mod filename;
mod local;
pub mod rate_limiter;
mod request;
mod response;
mod state;
mod transfer;
mod transport;

#[cfg(test)]
mod testing;

pub use batch::{DownloadResponse, download_batch, get_batch};
pub use checksum::{Checksum, HashAlgorithm, UnknownAlgorithm, hash_file};
pub use client::{Client, RequestFeed};
pub use constants::{DEFAULT_BUFFER_SIZE, DEFAULT_CONCURRENCY};
pub use error::{BoxError, DownloadError};
pub use rate_limiter::{ByteRateLimiter, RateLimitError, RateLimiter};
pub use request::{Hook, Request, Tag, directory_destination};
pub use response::{Outcome, Response};
pub use transfer::{Progress, TransferError, copy};
pub use transport::{
    Body, IncomingResponse, OutgoingRequest, ReqwestTransport, Transport, TransportError,
};

// Per project convention there are no module-local Result aliases.
// Use `Result<T, DownloadError>` explicitly in function signatures.
