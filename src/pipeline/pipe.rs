//! Bounded byte pipe connecting two pipeline stages
//!
//! Bytes travel through a `tokio::io::duplex` buffer, so a writer blocks
//! when its reader falls behind and a reader blocks until bytes arrive. The
//! producer's outcome travels out of band: after the buffered bytes are
//! drained the reader reports either a clean end of stream or the error the
//! producer closed with. A writer dropped without being closed reads as an
//! aborted stage, never as a clean EOF.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::sync::oneshot;

/// Producer outcome: `None` for success, otherwise the failure message
type Outcome = Option<String>;

pub fn pipe(capacity: usize) -> (PipeWriter, PipeReader) {
    let (write_half, read_half) = tokio::io::duplex(capacity.max(1));
    let (status_tx, status_rx) = oneshot::channel();
    (
        PipeWriter {
            stream: write_half,
            status: status_tx,
        },
        PipeReader {
            stream: read_half,
            status: Some(status_rx),
            terminal: None,
        },
    )
}

#[derive(Debug)]
pub struct PipeWriter {
    stream: DuplexStream,
    status: oneshot::Sender<Outcome>,
}

impl PipeWriter {
    /// Close the stream cleanly; the reader sees EOF after draining
    pub async fn finish(mut self) -> io::Result<()> {
        let flushed = self.stream.shutdown().await;
        let Self { stream, status } = self;
        drop(stream);
        let _ = status.send(None);
        flushed
    }

    /// Close the stream with an error; the reader's next read past the
    /// buffered bytes fails with `message`
    pub fn fail(self, message: impl Into<String>) {
        let Self { stream, status } = self;
        drop(stream);
        let _ = status.send(Some(message.into()));
    }
}

impl AsyncWrite for PipeWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

#[derive(Debug)]
pub struct PipeReader {
    stream: DuplexStream,
    status: Option<oneshot::Receiver<Outcome>>,
    terminal: Option<Outcome>,
}

impl PipeReader {
    fn terminal_result(outcome: &Outcome) -> io::Result<()> {
        match outcome {
            None => Ok(()),
            Some(message) => Err(io::Error::other(format!("upstream stage failed: {message}"))),
        }
    }
}

impl AsyncRead for PipeReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;

        if let Some(outcome) = &this.terminal {
            return Poll::Ready(Self::terminal_result(outcome));
        }

        let before = buf.filled().len();
        ready!(Pin::new(&mut this.stream).poll_read(cx, buf))?;
        if buf.filled().len() > before || buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        // Buffer drained and the writer is gone: consult the producer outcome
        let outcome = match this.status.as_mut() {
            Some(status) => match ready!(Pin::new(status).poll(cx)) {
                Ok(outcome) => outcome,
                Err(_) => Some("stage aborted before completing".to_string()),
            },
            None => None,
        };
        this.status = None;
        let result = Self::terminal_result(&outcome);
        this.terminal = Some(outcome);
        Poll::Ready(result)
    }
}
