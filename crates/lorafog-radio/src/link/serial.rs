//! Serial port link for LoRa radios, GPS receivers and actuator boards
//!
//! Uses tokio-serial. Lines are `\n` terminated; a trailing `\r` from
//! devices that emit CRLF (NMEA receivers do) is stripped on read.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, error, info};

use lorafog_core::config::DEFAULT_BAUD_RATE;

use crate::error::{RadioError, Result};
use crate::link::framing::{read_line_from, LineBuffer};
use crate::link::{Link, LinkReader, LinkState, LinkWriter};

/// Serial link to one device
pub struct SerialLink {
    /// Serial port path
    port_path: PathBuf,

    /// Baud rate
    baud_rate: u32,

    /// Serial stream (when open)
    stream: Option<SerialStream>,

    state: LinkState,

    /// Read buffer for accumulating partial lines
    read_buffer: LineBuffer,

    /// Link name for logging
    name: String,
}

impl SerialLink {
    /// Create a new serial link; the port is opened by [`Link::open`]
    pub fn new(port: impl AsRef<Path>) -> Self {
        let port_path = port.as_ref().to_path_buf();
        let name = format!("serial:{}", port_path.display());

        Self {
            port_path,
            baud_rate: DEFAULT_BAUD_RATE,
            stream: None,
            state: LinkState::Closed,
            read_buffer: LineBuffer::new(),
            name,
        }
    }

    /// Create with custom baud rate
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Get the port path
    pub fn port_path(&self) -> &Path {
        &self.port_path
    }

    pub fn state(&self) -> LinkState {
        self.state
    }
}

#[async_trait]
impl Link for SerialLink {
    async fn open(&mut self) -> Result<()> {
        if self.state == LinkState::Open {
            return Ok(());
        }

        info!(port = %self.port_path.display(), baud = self.baud_rate, "Opening serial port");

        if !self.port_path.exists() {
            return Err(RadioError::PortNotFound(
                self.port_path.display().to_string(),
            ));
        }

        let stream = tokio_serial::new(self.port_path.to_string_lossy(), self.baud_rate)
            .open_native_async()
            .map_err(|e| RadioError::PortOpenFailed {
                port: self.port_path.display().to_string(),
                reason: e.to_string(),
            })?;

        self.stream = Some(stream);
        self.state = LinkState::Open;
        self.read_buffer.clear();
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            info!(port = %self.port_path.display(), "Closed serial port");
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
        match read_line_from(stream, &mut self.read_buffer, timeout).await {
            Err(RadioError::Disconnected) => {
                self.state = LinkState::Closed;
                self.stream = None;
                Err(RadioError::Disconnected)
            }
            other => other,
        }
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(RadioError::Disconnected)?;

        let mut framed = Vec::with_capacity(line.len() + 1);
        framed.extend_from_slice(line.as_bytes());
        framed.push(b'\n');
        debug!(size = framed.len(), port = %self.port_path.display(), "Writing line");

        stream.write_all(&framed).await.map_err(|e| {
            error!(error = %e, "Serial write error");
            RadioError::WriteError(e.to_string())
        })?;

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
        debug!(port = %self.port_path.display(), "Splitting serial link");
        Ok((
            LinkReader::new(self.name.clone(), Box::new(read), buffer),
            LinkWriter::new(self.name.clone(), Box::new(write)),
        ))
    }
}

impl std::fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLink")
            .field("port", &self.port_path)
            .field("baud_rate", &self.baud_rate)
            .field("state", &self.state)
            .field("buffer_len", &self.read_buffer.len())
            .finish()
    }
}
