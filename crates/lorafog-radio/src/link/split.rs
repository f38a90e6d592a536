//! Independently usable read and write halves of a link

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::{RadioError, Result};
use crate::link::framing::{read_line_from, LineBuffer};

pub type ReadHalf = Box<dyn AsyncRead + Send + Unpin>;
pub type WriteHalf = Box<dyn AsyncWrite + Send + Unpin>;

/// Receiving half of a split link
pub struct LinkReader {
    name: String,
    half: ReadHalf,
    buffer: LineBuffer,
}

impl LinkReader {
    /// Wrap a read half, keeping bytes already buffered by the link
    pub fn new(name: impl Into<String>, half: ReadHalf, buffer: LineBuffer) -> Self {
        Self {
            name: name.into(),
            half,
            buffer,
        }
    }

    /// Read one line, see [`Link::read_line`](crate::Link::read_line)
    pub async fn read_line(&mut self, timeout: Option<Duration>) -> Result<String> {
        read_line_from(&mut self.half, &mut self.buffer, timeout).await
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Sending half of a split link
pub struct LinkWriter {
    name: String,
    half: WriteHalf,
}

impl LinkWriter {
    pub fn new(name: impl Into<String>, half: WriteHalf) -> Self {
        Self {
            name: name.into(),
            half,
        }
    }

    /// Write one line; the terminator is appended here.
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        let mut framed = Vec::with_capacity(line.len() + 1);
        framed.extend_from_slice(line.as_bytes());
        framed.push(b'\n');
        self.half
            .write_all(&framed)
            .await
            .map_err(|e| RadioError::WriteError(e.to_string()))?;
        self.half
            .flush()
            .await
            .map_err(|e| RadioError::WriteError(format!("Flush failed: {}", e)))
    }

    /// Shut the write direction down; the peer sees end of stream.
    pub async fn close(mut self) {
        if let Err(e) = self.half.shutdown().await {
            debug!(link = %self.name, error = %e, "Shutdown after peer loss");
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
