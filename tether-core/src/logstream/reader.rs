//! Cancellation-aware wrapper around a container log stream.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::sync::CancellationToken;

/// Shared record of when the reader last produced bytes.
///
/// Tracks both the async-runtime instant (comparable under a paused test
/// clock) and the wall-clock time (used as the reconnect watermark).
#[derive(Debug, Clone, Default)]
pub struct ReadClock {
    inner: Arc<Mutex<Option<(tokio::time::Instant, DateTime<Utc>)>>>,
}

impl ReadClock {
    pub fn last_read(&self) -> Option<(tokio::time::Instant, DateTime<Utc>)> {
        *self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn mark(&self) {
        let mut slot = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some((tokio::time::Instant::now(), Utc::now()));
    }
}

/// Wraps a log stream so cancellation looks like EOF.
///
/// Some network readers block indefinitely unless the underlying resource
/// is torn down, so merely ignoring their result is not enough: once the
/// token fires, this reader reports EOF immediately and discards bytes that
/// were already in flight, letting the caller drop the stream promptly.
#[derive(Debug)]
pub struct CancelSafeReader<R> {
    inner: R,
    cancel: CancellationToken,
    clock: ReadClock,
}

impl<R> CancelSafeReader<R> {
    pub fn new(inner: R, cancel: CancellationToken) -> Self {
        Self {
            inner,
            cancel,
            clock: ReadClock::default(),
        }
    }

    pub fn clock(&self) -> ReadClock {
        self.clock.clone()
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for CancelSafeReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.cancel.is_cancelled() {
            return Poll::Ready(Ok(()));
        }

        let before = buf.filled().len();
        match Pin::new(&mut self.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                if self.cancel.is_cancelled() {
                    // Bytes read after cancellation are discarded, not
                    // forwarded.
                    buf.set_filled(before);
                    return Poll::Ready(Ok(()));
                }
                if buf.filled().len() > before {
                    self.clock.mark();
                }
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;

    #[tokio::test]
    async fn forwards_bytes_and_records_read_time() {
        let cancel = CancellationToken::new();
        let mut reader = CancelSafeReader::new(&b"hello"[..], cancel);
        let clock = reader.clock();
        assert!(clock.last_read().is_none());

        let mut buf = [0u8; 16];
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
        assert!(clock.last_read().is_some());
    }

    #[tokio::test]
    async fn cancelled_reader_reports_eof() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut reader = CancelSafeReader::new(&b"pending bytes"[..], cancel);

        let mut buf = [0u8; 16];
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(n, 0, "cancelled reader must look like EOF");
        assert!(reader.clock().last_read().is_none());
    }
}
