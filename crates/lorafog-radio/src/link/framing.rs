//! Newline framing shared by every byte-stream link

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{trace, warn};

use crate::error::{RadioError, Result};

/// Buffer size for a single read from the underlying stream
const READ_CHUNK_SIZE: usize = 256;

/// Longest line accepted before the buffer is discarded
pub const MAX_LINE_LEN: usize = 1024;

/// Accumulates bytes until a `\n` terminated line is available
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: BytesMut,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(READ_CHUNK_SIZE * 2),
        }
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Take the next complete line, without its terminator.
    ///
    /// Returns `Ok(None)` while the line is still partial. An overlong or
    /// non-UTF-8 line is consumed and reported as [`RadioError::InvalidLine`]
    /// so the stream can continue with the next one.
    pub fn next_line(&mut self) -> Result<Option<String>> {
        let Some(pos) = self.buf.iter().position(|b| *b == b'\n') else {
            if self.buf.len() > MAX_LINE_LEN {
                let discarded = self.buf.len();
                self.buf.clear();
                warn!(discarded, "Discarding unterminated oversized line");
                return Err(RadioError::InvalidLine(format!(
                    "no terminator within {MAX_LINE_LEN} bytes"
                )));
            }
            return Ok(None);
        };

        let mut line = self.buf.split_to(pos + 1);
        line.truncate(pos);
        if line.last() == Some(&b'\r') {
            line.truncate(pos - 1);
        }

        if line.len() > MAX_LINE_LEN {
            warn!(length = line.len(), "Discarding oversized line");
            return Err(RadioError::InvalidLine(format!(
                "line of {} bytes exceeds {MAX_LINE_LEN}",
                line.len()
            )));
        }

        String::from_utf8(line.to_vec())
            .map(Some)
            .map_err(|_| RadioError::InvalidLine("line is not valid UTF-8".into()))
    }
}

/// Read until one full line is buffered.
///
/// Individual stream reads are cancel-safe, so a timeout never loses bytes:
/// anything already read stays in `buffer` for the next call.
pub async fn read_line_from<R>(
    reader: &mut R,
    buffer: &mut LineBuffer,
    timeout: Option<Duration>,
) -> Result<String>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let read = read_until_line(reader, buffer);

    match timeout {
        Some(duration) if !duration.is_zero() => tokio::time::timeout(duration, read)
            .await
            .map_err(|_| RadioError::Timeout {
                duration_ms: duration.as_millis() as u64,
            })?,
        _ => read.await,
    }
}

async fn read_until_line<R>(reader: &mut R, buffer: &mut LineBuffer) -> Result<String>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    loop {
        if let Some(line) = buffer.next_line()? {
            return Ok(line);
        }
        match reader.read(&mut chunk).await {
            Ok(0) => return Err(RadioError::Disconnected),
            Ok(n) => {
                trace!(bytes = n, "Read from link");
                buffer.extend(&chunk[..n]);
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
            Err(e) => return Err(RadioError::ReadError(e.to_string())),
        }
    }
}
