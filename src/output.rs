//! Shared host output sink
//!
//! The relay and the command supervisor both write here concurrently. Every
//! write holds the lock across its flush, so a chunk or a line is never split
//! by a write from the other side.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex};
use std::task::{Context, Poll};

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Cloneable handle to the host output stream
#[derive(Clone)]
pub struct OutputSink {
    writer: Arc<Mutex<BoxedWriter>>,
}

impl OutputSink {
    /// Wrap an arbitrary writer
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// Sink writing to the process's stdout
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }

    /// In-memory sink, with a handle for reading back what was written
    pub fn capture() -> (Self, CaptureBuffer) {
        let buffer = CaptureBuffer::default();
        (Self::new(buffer.clone()), buffer)
    }

    /// Write a chunk and flush it before releasing the sink
    pub async fn write_chunk(&self, bytes: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await?;
        writer.flush().await
    }

    /// Write one line, appending the newline inside the same critical section
    pub async fn write_line(&self, line: &str) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await
    }
}

impl std::fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputSink").finish_non_exhaustive()
    }
}

/// Growable in-memory buffer implementing `AsyncWrite`
#[derive(Clone, Default)]
pub struct CaptureBuffer {
    bytes: Arc<StdMutex<Vec<u8>>>,
}

impl CaptureBuffer {
    /// Copy of everything written so far
    pub fn contents(&self) -> Vec<u8> {
        self.bytes.lock().map(|b| b.clone()).unwrap_or_default()
    }

    /// Contents decoded lossily as UTF-8
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }
}

impl AsyncWrite for CaptureBuffer {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.bytes.lock() {
            Ok(mut bytes) => {
                bytes.extend_from_slice(buf);
                Poll::Ready(Ok(buf.len()))
            }
            Err(_) => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::Other,
                "capture buffer poisoned",
            ))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
