//! Streaming copy loop with progress accounting, cancellation and throttling.

use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::error::BoxError;
use super::rate_limiter::{RateLimitError, RateLimiter};

/// Counters shared between a running transfer and its observers.
///
/// Only atomics: a progress display may read these at any time without
/// coordinating with the copy loop.
#[derive(Debug, Default)]
pub struct Progress {
    transferred: AtomicU64,
    resumed: AtomicU64,
    size: AtomicU64,
}

impl Progress {
    /// Bytes written during this attempt (excludes the resumed prefix).
    #[must_use]
    pub fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::Acquire)
    }

    /// Size of the local prefix this attempt resumed from.
    #[must_use]
    pub fn resumed(&self) -> u64 {
        self.resumed.load(Ordering::Acquire)
    }

    /// Expected total size, 0 while unknown.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    pub(crate) fn counter(&self) -> &AtomicU64 {
        &self.transferred
    }

    pub(crate) fn set_resumed(&self, bytes: u64) {
        self.resumed.store(bytes, Ordering::Release);
    }

    pub(crate) fn set_size(&self, bytes: u64) {
        self.size.store(bytes, Ordering::Release);
    }
}

/// Terminal failure of [`copy`].
#[derive(Debug, Error)]
pub enum TransferError {
    /// Reading the source failed with something other than end-of-stream.
    #[error("read failed: {0}")]
    Read(#[source] std::io::Error),

    /// Writing the destination failed.
    #[error("write failed: {0}")]
    Write(#[source] std::io::Error),

    /// The destination stopped accepting bytes mid-chunk.
    #[error("short write: {written} of {expected} bytes")]
    ShortWrite {
        /// Bytes of the chunk the destination accepted.
        written: usize,
        /// Size of the chunk.
        expected: usize,
    },

    /// The rate limiter failed.
    #[error("rate limiter failed: {0}")]
    RateLimit(#[source] BoxError),

    /// The cancellation scope fired.
    #[error("transfer canceled")]
    Canceled,
}

/// Copies `src` into `dst` until end-of-stream.
///
/// Before every read the cancellation scope is checked, and the read itself is
/// raced against it. Every written chunk is added to `counter` before the
/// limiter (if any) is asked for permission to continue. Bytes written before a
/// failure stay written; the returned count includes them.
pub async fn copy<R, W>(
    cancel: &CancellationToken,
    limiter: Option<&dyn RateLimiter>,
    dst: &mut W,
    src: &mut R,
    buf: &mut [u8],
    counter: &AtomicU64,
) -> (u64, Result<(), TransferError>)
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut written: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            return (written, Err(TransferError::Canceled));
        }

        let nr = tokio::select! {
            biased;
            () = cancel.cancelled() => return (written, Err(TransferError::Canceled)),
            read = src.read(buf) => match read {
                Ok(0) => return (written, Ok(())),
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return (written, Err(TransferError::Read(e))),
            },
        };

        let mut chunk_written = 0;
        while chunk_written < nr {
            match dst.write(&buf[chunk_written..nr]).await {
                Ok(0) => {
                    return (
                        written,
                        Err(TransferError::ShortWrite {
                            written: chunk_written,
                            expected: nr,
                        }),
                    );
                }
                Ok(nw) => {
                    chunk_written += nw;
                    written += nw as u64;
                    counter.fetch_add(nw as u64, Ordering::AcqRel);
                }
                Err(e) => return (written, Err(TransferError::Write(e))),
            }
        }
        trace!(bytes = nr, total = written, "chunk written");

        if let Some(limiter) = limiter {
            match limiter.wait_n(cancel, nr).await {
                Ok(()) => {}
                Err(RateLimitError::Canceled) => return (written, Err(TransferError::Canceled)),
                Err(RateLimitError::Failed(e)) => {
                    return (written, Err(TransferError::RateLimit(e)));
                }
            }
        }
    }
}

/// Flushes a writer after [`copy`], mapping failures to [`TransferError::Write`].
pub(crate) async fn flush<W>(dst: &mut W) -> Result<(), TransferError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    dst.flush().await.map_err(TransferError::Write)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::sync::atomic::AtomicUsize;
    use std::task::{Context, Poll};

    use async_trait::async_trait;

    /// Accepts `capacity` bytes, then reports a zero-length write.
    struct FullWriter {
        data: Vec<u8>,
        capacity: usize,
    }

    impl AsyncWrite for FullWriter {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            let room = self.capacity - self.data.len();
            let n = room.min(buf.len());
            self.data.extend_from_slice(&buf[..n]);
            Poll::Ready(Ok(n))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    /// Accepts the first write whole, then fails every later one.
    #[derive(Default)]
    struct BrokenWriter {
        data: Vec<u8>,
        writes: usize,
    }

    impl AsyncWrite for BrokenWriter {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            self.writes += 1;
            if self.writes > 1 {
                return Poll::Ready(Err(std::io::Error::other("disk gone")));
            }
            self.data.extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[derive(Debug, Default)]
    struct CountingLimiter {
        calls: AtomicUsize,
        bytes: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl RateLimiter for CountingLimiter {
        async fn wait_n(&self, cancel: &CancellationToken, n: usize) -> Result<(), RateLimitError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.bytes.fetch_add(n, Ordering::SeqCst);
            if cancel.is_cancelled() {
                return Err(RateLimitError::Canceled);
            }
            if self.fail {
                return Err(RateLimitError::Failed("limiter exploded".into()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_copy_success_writes_everything() {
        let data = b"Hello, World! This is test data for transfer.";
        let cancel = CancellationToken::new();
        let counter = AtomicU64::new(0);
        let mut src: &[u8] = data;
        let mut dst = Vec::new();
        let mut buf = vec![0u8; 8];

        let (written, result) = copy(&cancel, None, &mut dst, &mut src, &mut buf, &counter).await;

        result.unwrap();
        assert_eq!(written, data.len() as u64);
        assert_eq!(counter.load(Ordering::SeqCst), data.len() as u64);
        assert_eq!(dst, data);
    }

    #[tokio::test]
    async fn test_copy_short_reads_are_written_in_full() {
        let mut src = tokio_test::io::Builder::new()
            .read(b"ab")
            .read(b"c")
            .read(b"defg")
            .build();
        let cancel = CancellationToken::new();
        let counter = AtomicU64::new(0);
        let mut dst = Vec::new();
        let mut buf = vec![0u8; 1024];

        let (written, result) = copy(&cancel, None, &mut dst, &mut src, &mut buf, &counter).await;

        result.unwrap();
        assert_eq!(written, 7);
        assert_eq!(dst, b"abcdefg");
    }

    #[tokio::test]
    async fn test_copy_precanceled_reads_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let counter = AtomicU64::new(0);
        let mut src: &[u8] = b"never read";
        let mut dst = Vec::new();
        let mut buf = vec![0u8; 16];

        let (written, result) = copy(&cancel, None, &mut dst, &mut src, &mut buf, &counter).await;

        assert!(matches!(result, Err(TransferError::Canceled)));
        assert_eq!(written, 0);
        assert!(dst.is_empty());
    }

    #[tokio::test]
    async fn test_copy_read_error_preserves_written_bytes() {
        let mut src = tokio_test::io::Builder::new()
            .read(b"partial")
            .read_error(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset",
            ))
            .build();
        let cancel = CancellationToken::new();
        let counter = AtomicU64::new(0);
        let mut dst = Vec::new();
        let mut buf = vec![0u8; 64];

        let (written, result) = copy(&cancel, None, &mut dst, &mut src, &mut buf, &counter).await;

        match result {
            Err(TransferError::Read(e)) => assert_eq!(e.kind(), std::io::ErrorKind::ConnectionReset),
            other => panic!("expected read error, got {other:?}"),
        }
        assert_eq!(written, 7);
        assert_eq!(dst, b"partial");
    }

    #[tokio::test]
    async fn test_copy_short_write_is_terminal() {
        let cancel = CancellationToken::new();
        let counter = AtomicU64::new(0);
        let mut src: &[u8] = b"0123456789";
        let mut dst = FullWriter {
            data: Vec::new(),
            capacity: 4,
        };
        let mut buf = vec![0u8; 10];

        let (written, result) = copy(&cancel, None, &mut dst, &mut src, &mut buf, &counter).await;

        match result {
            Err(TransferError::ShortWrite { written, expected }) => {
                assert_eq!(written, 4);
                assert_eq!(expected, 10);
            }
            other => panic!("expected short write, got {other:?}"),
        }
        assert_eq!(written, 4);
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_copy_write_error_is_terminal() {
        let cancel = CancellationToken::new();
        let counter = AtomicU64::new(0);
        let mut src: &[u8] = b"0123456789";
        let mut dst = BrokenWriter::default();
        let mut buf = vec![0u8; 4];

        let (written, result) = copy(&cancel, None, &mut dst, &mut src, &mut buf, &counter).await;

        match result {
            Err(TransferError::Write(e)) => assert_eq!(e.kind(), std::io::ErrorKind::Other),
            other => panic!("expected write error, got {other:?}"),
        }
        assert_eq!(written, 4);
        assert_eq!(counter.load(Ordering::SeqCst), written);
        assert_eq!(dst.data, b"0123");
    }

    #[tokio::test]
    async fn test_copy_invokes_limiter_per_chunk() {
        let limiter = CountingLimiter::default();
        let cancel = CancellationToken::new();
        let counter = AtomicU64::new(0);
        let data = vec![7u8; 100];
        let mut src: &[u8] = &data;
        let mut dst = Vec::new();
        let mut buf = vec![0u8; 30];

        let (written, result) = copy(
            &cancel,
            Some(&limiter),
            &mut dst,
            &mut src,
            &mut buf,
            &counter,
        )
        .await;

        result.unwrap();
        assert_eq!(written, 100);
        assert_eq!(limiter.calls.load(Ordering::SeqCst), 4);
        assert_eq!(limiter.bytes.load(Ordering::SeqCst), 100);
    }

    #[tokio::test]
    async fn test_copy_limiter_failure_is_terminal_after_write() {
        let limiter = CountingLimiter {
            fail: true,
            ..CountingLimiter::default()
        };
        let cancel = CancellationToken::new();
        let counter = AtomicU64::new(0);
        let mut src: &[u8] = b"abcdef";
        let mut dst = Vec::new();
        let mut buf = vec![0u8; 3];

        let (written, result) = copy(
            &cancel,
            Some(&limiter),
            &mut dst,
            &mut src,
            &mut buf,
            &counter,
        )
        .await;

        assert!(matches!(result, Err(TransferError::RateLimit(_))));
        assert_eq!(written, 3, "first chunk stays written");
        assert_eq!(dst, b"abc");
        assert_eq!(limiter.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_copy_empty_source_succeeds() {
        let cancel = CancellationToken::new();
        let counter = AtomicU64::new(0);
        let mut src: &[u8] = b"";
        let mut dst = Vec::new();
        let mut buf = vec![0u8; 16];

        let (written, result) = copy(&cancel, None, &mut dst, &mut src, &mut buf, &counter).await;

        result.unwrap();
        assert_eq!(written, 0);
    }

    #[test]
    fn test_progress_counters() {
        let progress = Progress::default();
        progress.set_size(200);
        progress.set_resumed(100);
        progress.counter().fetch_add(25, Ordering::SeqCst);
        assert_eq!(progress.size(), 200);
        assert_eq!(progress.resumed(), 100);
        assert_eq!(progress.transferred(), 25);
    }
}
