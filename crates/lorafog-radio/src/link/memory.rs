//! In-process link backed by a `tokio::io::duplex` pipe
//!
//! A [`MemoryLink::pair`] behaves like two ends of a virtual serial cable:
//! whatever one end writes, the other end reads. Dropping or closing one end
//! makes the other end see EOF on read and a broken pipe on write.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tracing::debug;

use crate::error::{RadioError, Result};
use crate::link::framing::{read_line_from, LineBuffer};
use crate::link::{Link, LinkReader, LinkState, LinkWriter};

/// Pipe capacity per direction
const PIPE_CAPACITY: usize = 8 * 1024;

/// One end of an in-memory duplex link
pub struct MemoryLink {
    name: String,
    stream: Option<DuplexStream>,
    state: LinkState,
    read_buffer: LineBuffer,
}

impl MemoryLink {
    /// Create both ends of a connected pair
    pub fn pair(a: impl Into<String>, b: impl Into<String>) -> (Self, Self) {
        let (left, right) = tokio::io::duplex(PIPE_CAPACITY);
        (Self::from_stream(a, left), Self::from_stream(b, right))
    }

    fn from_stream(name: impl Into<String>, stream: DuplexStream) -> Self {
        Self {
            name: format!("memory:{}", name.into()),
            stream: Some(stream),
            state: LinkState::Open,
            read_buffer: LineBuffer::new(),
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }
}

#[async_trait]
impl Link for MemoryLink {
    async fn open(&mut self) -> Result<()> {
        if self.state == LinkState::Open {
            return Ok(());
        }
        // The pipe is gone once closed; a fresh pair is needed.
        Err(RadioError::PortOpenFailed {
            port: self.name.clone(),
            reason: "memory link cannot be reopened".into(),
        })
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
            debug!(link = %self.name, "Memory link closed");
        }
        self.state = LinkState::Closed;
        self.read_buffer.clear();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state == LinkState::Open && self.stream.is_some()
    }

    async fn read_line(&mut self, timeout: Option<Duration>) -> Result<String> {
        let stream = self.stream.as_mut().ok_or(RadioError::Disconnected)?;
        read_line_from(stream, &mut self.read_buffer, timeout).await
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(RadioError::Disconnected)?;
        let mut framed = Vec::with_capacity(line.len() + 1);
        framed.extend_from_slice(line.as_bytes());
        framed.push(b'\n');
        stream
            .write_all(&framed)
            .await
            .map_err(|e| RadioError::WriteError(e.to_string()))?;
        stream
            .flush()
            .await
            .map_err(|e| RadioError::WriteError(format!("Flush failed: {}", e)))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn into_split(mut self: Box<Self>) -> Result<(LinkReader, LinkWriter)> {
        let stream = self.stream.take().ok_or(RadioError::Disconnected)?;
        let (read, write) = tokio::io::split(stream);
        let buffer = std::mem::take(&mut self.read_buffer);
        Ok((
            LinkReader::new(self.name.clone(), Box::new(read), buffer),
            LinkWriter::new(self.name.clone(), Box::new(write)),
        ))
    }
}

impl std::fmt::Debug for MemoryLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryLink")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("buffer_len", &self.read_buffer.len())
            .finish()
    }
}
