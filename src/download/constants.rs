//! Constants for the download module (timeouts, buffers, concurrency, rate limiting).

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes for large files).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Copy buffer size used when a request does not set one (32 KiB).
pub const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

/// Worker count used by `download_batch`.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Warning threshold for cumulative rate limiter delay (30 seconds).
pub const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Placeholder target used in errors for in-memory downloads.
pub const MEMORY_TARGET: &str = "<memory>";
