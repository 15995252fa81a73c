//! Throughput limiting for the transfer loop.
//!
//! The copy loop only knows the [`RateLimiter`] capability: after every chunk
//! it reports how many bytes were just written and waits for permission to
//! continue. Policy lives entirely in the implementation.
//!
//! [`ByteRateLimiter`] is a token bucket over bytes per second. It can be
//! shared between downloads through an `Arc`, in which case the combined
//! throughput of all of them is capped.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use grab_core::download::{ByteRateLimiter, RateLimiter};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() {
//! let limiter: Arc<dyn RateLimiter> = Arc::new(ByteRateLimiter::new(512 * 1024));
//! let cancel = CancellationToken::new();
//!
//! // First second worth of bytes passes immediately (burst).
//! limiter.wait_n(&cancel, 64 * 1024).await.unwrap();
//! # }
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::constants::CUMULATIVE_DELAY_WARNING_THRESHOLD;
use super::error::BoxError;

/// Failure reported by [`RateLimiter::wait_n`].
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// The cancellation scope fired while waiting.
    #[error("rate limiter wait canceled")]
    Canceled,

    /// Limiter-internal failure.
    #[error("rate limiter failed: {0}")]
    Failed(#[source] BoxError),
}

/// Throttle invoked by the transfer loop after each written chunk.
#[async_trait]
pub trait RateLimiter: Send + Sync + fmt::Debug {
    /// Blocks until `n` more bytes may be transferred, or `cancel` fires.
    async fn wait_n(&self, cancel: &CancellationToken, n: usize) -> Result<(), RateLimitError>;
}

/// Token bucket limiting throughput to a fixed number of bytes per second.
///
/// The bucket holds at most one second of tokens. A chunk larger than the
/// bucket is admitted by running into debt, so callers never deadlock on
/// oversized buffers.
#[derive(Debug)]
pub struct ByteRateLimiter {
    /// Refill rate; 0 means unlimited.
    bytes_per_second: u64,

    /// Bucket state. Held only for the arithmetic, never across a sleep.
    bucket: Mutex<Bucket>,

    /// Total time spent throttling (milliseconds).
    cumulative_delay_ms: AtomicU64,

    /// Set once the cumulative delay warning was emitted.
    warned: AtomicBool,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl ByteRateLimiter {
    /// Creates a limiter admitting `bytes_per_second` bytes per second.
    ///
    /// A rate of 0 yields a disabled limiter.
    #[must_use]
    #[instrument]
    pub fn new(bytes_per_second: u64) -> Self {
        debug!("creating byte rate limiter");
        #[allow(clippy::cast_precision_loss)]
        let tokens = bytes_per_second as f64;
        Self {
            bytes_per_second,
            bucket: Mutex::new(Bucket {
                tokens,
                last_refill: Instant::now(),
            }),
            cumulative_delay_ms: AtomicU64::new(0),
            warned: AtomicBool::new(false),
        }
    }

    /// Creates a limiter that never waits.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(0)
    }

    /// Returns whether throttling is disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.bytes_per_second == 0
    }

    /// Returns the configured rate.
    #[must_use]
    pub fn bytes_per_second(&self) -> u64 {
        self.bytes_per_second
    }

    /// Returns the total time callers have been throttled so far.
    #[must_use]
    pub fn cumulative_delay(&self) -> Duration {
        Duration::from_millis(self.cumulative_delay_ms.load(Ordering::Relaxed))
    }

    /// Takes `n` tokens and returns how long the caller must sleep to repay any debt.
    #[allow(clippy::cast_precision_loss)]
    async fn reserve(&self, n: usize) -> Duration {
        let rate = self.bytes_per_second as f64;
        let mut bucket = self.bucket.lock().await;

        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() * rate).min(rate);
        bucket.last_refill = now;
        bucket.tokens -= n as f64;

        if bucket.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-bucket.tokens / rate)
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn record_delay(&self, delay: Duration) {
        let delay_ms = delay.as_millis() as u64;
        let total = self
            .cumulative_delay_ms
            .fetch_add(delay_ms, Ordering::SeqCst)
            + delay_ms;
        let total = Duration::from_millis(total);

        if total >= CUMULATIVE_DELAY_WARNING_THRESHOLD && !self.warned.swap(true, Ordering::SeqCst)
        {
            warn!(
                cumulative_secs = total.as_secs(),
                bytes_per_second = self.bytes_per_second,
                "transfers heavily throttled by rate limit"
            );
        }
    }
}

#[async_trait]
impl RateLimiter for ByteRateLimiter {
    async fn wait_n(&self, cancel: &CancellationToken, n: usize) -> Result<(), RateLimitError> {
        if cancel.is_cancelled() {
            return Err(RateLimitError::Canceled);
        }
        if self.is_disabled() || n == 0 {
            return Ok(());
        }

        let delay = self.reserve(n).await;
        if delay.is_zero() {
            return Ok(());
        }

        debug!(
            bytes = n,
            delay_ms = delay.as_millis(),
            "applying rate limit delay"
        );
        self.record_delay(delay);

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(RateLimitError::Canceled),
            () = tokio::time::sleep(delay) => Ok(()),
        }
    }
}
