//! Grab Core Library
//!
//! Concurrent, resumable file downloads over HTTP(S).
//!
//! # Architecture
//!
//! - [`download`] - the engine: requests, responses, the per-download state
//!   machine, the streaming transfer loop, rate limiting, checksums, and the
//!   client with its batch helpers
//!
//! Most callers only need [`Client`], [`Request`] and [`Response`].

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod download;
mod user_agent;

// Re-export commonly used types
pub use download::{
    ByteRateLimiter, Client, DEFAULT_BUFFER_SIZE, DEFAULT_CONCURRENCY, DownloadError,
    DownloadResponse, HashAlgorithm, RateLimiter, Request, Response, directory_destination,
    download_batch, get_batch, hash_file,
};
