//! Line-oriented links to radios and local devices
//!
//! - [`SerialLink`] - serial port (requires `serial` feature)
//! - [`MemoryLink`] - in-process duplex pair for tests and simulations
//!
//! Every link speaks whole lines: [`Link::write_line`] appends the `\n`
//! terminator and [`Link::read_line`] returns the line without it.
//!
//! Loops that read and write the same device share it as a [`SharedLink`],
//! which splits the link so a pending read never delays a write.
//!
//! # Feature Requirements
//!
//! - `serial`: Requires `libudev-dev` and `pkg-config` on Linux
//!   ```bash
//!   # Ubuntu/Debian
//!   apt install libudev-dev pkg-config
//!   ```

mod framing;
mod memory;
mod split;

#[cfg(feature = "serial")]
mod serial;

pub use framing::{read_line_from, LineBuffer, MAX_LINE_LEN};
pub use memory::MemoryLink;
pub use split::{LinkReader, LinkWriter, ReadHalf, WriteHalf};

#[cfg(feature = "serial")]
pub use serial::SerialLink;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{RadioError, Result};

/// Line-oriented duplex channel
#[async_trait]
pub trait Link: Send {
    /// Acquire the underlying resource. Opening an open link is a no-op.
    async fn open(&mut self) -> Result<()>;

    /// Release the underlying resource. Idempotent.
    async fn close(&mut self) -> Result<()>;

    /// Check if currently open
    fn is_open(&self) -> bool;

    /// Read one line.
    ///
    /// `None` (or a zero duration) waits indefinitely; otherwise a
    /// [`RadioError::Timeout`](crate::RadioError::Timeout) is returned when
    /// no complete line arrives in time.
    async fn read_line(&mut self, timeout: Option<Duration>) -> Result<String>;

    /// Write one line; the terminator is appended here.
    async fn write_line(&mut self, line: &str) -> Result<()>;

    /// Get the link name (for logging)
    fn name(&self) -> &str;

    /// Split an open link into halves usable from different tasks.
    ///
    /// A closed link yields [`RadioError::Disconnected`].
    fn into_split(self: Box<Self>) -> Result<(LinkReader, LinkWriter)>;
}

/// Link shared between a reader loop and writers.
///
/// Reads and writes lock separate halves, so a reader waiting out its poll
/// never holds up a write. Cloning shares the same device.
#[derive(Clone)]
pub struct SharedLink {
    inner: Arc<SharedHalves>,
}

struct SharedHalves {
    name: String,
    reader: Mutex<Option<LinkReader>>,
    writer: Mutex<Option<LinkWriter>>,
}

impl SharedLink {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Write one line; waits only for other writers
    pub async fn write_line(&self, line: &str) -> Result<()> {
        let mut writer = self.inner.writer.lock().await;
        writer
            .as_mut()
            .ok_or(RadioError::Disconnected)?
            .write_line(line)
            .await
    }

    /// Read one line; waits only for other readers
    pub async fn read_line(&self, timeout: Option<Duration>) -> Result<String> {
        let mut reader = self.inner.reader.lock().await;
        reader
            .as_mut()
            .ok_or(RadioError::Disconnected)?
            .read_line(timeout)
            .await
    }

    /// Release both halves. Idempotent.
    pub async fn close(&self) {
        if let Some(writer) = self.inner.writer.lock().await.take() {
            writer.close().await;
        }
        self.inner.reader.lock().await.take();
        debug!(link = %self.inner.name, "Link closed");
    }
}

impl std::fmt::Debug for SharedLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedLink")
            .field("name", &self.inner.name)
            .finish()
    }
}

/// Wrap a link for sharing between tasks.
///
/// A link that is already closed becomes a shared link whose reads and
/// writes report [`RadioError::Disconnected`].
pub fn shared<L: Link + 'static>(link: L) -> SharedLink {
    let name = link.name().to_string();
    let link: Box<dyn Link> = Box::new(link);
    let (reader, writer) = match link.into_split() {
        Ok((reader, writer)) => (Some(reader), Some(writer)),
        Err(e) => {
            debug!(link = %name, error = %e, "Sharing a closed link");
            (None, None)
        }
    };
    SharedLink {
        inner: Arc::new(SharedHalves {
            name,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
        }),
    }
}

/// Write a line through a shared link
pub async fn write_shared(link: &SharedLink, line: &str) -> Result<()> {
    link.write_line(line).await
}

/// Read a line through a shared link, waiting at most `poll`
pub async fn read_shared(link: &SharedLink, poll: Duration) -> Result<String> {
    link.read_line(Some(poll)).await
}

/// Close a shared link
pub async fn close_shared(link: &SharedLink) {
    link.close().await;
}

/// Link state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No resource held
    Closed,
    /// Resource held, reads and writes allowed
    Open,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkState::Closed => write!(f, "closed"),
            LinkState::Open => write!(f, "open"),
        }
    }
}

/// Device slot of a relay: either a real link or nothing at all
#[derive(Clone)]
pub enum DeviceAttachment {
    /// A device link is available
    Attached(SharedLink),
    /// No device; the relay runs its HTTP surface only
    Headless,
}

impl DeviceAttachment {
    pub fn attached<L: Link + 'static>(link: L) -> Self {
        DeviceAttachment::Attached(shared(link))
    }

    pub fn link(&self) -> Option<&SharedLink> {
        match self {
            DeviceAttachment::Attached(link) => Some(link),
            DeviceAttachment::Headless => None,
        }
    }

    pub fn is_headless(&self) -> bool {
        matches!(self, DeviceAttachment::Headless)
    }
}

impl std::fmt::Debug for DeviceAttachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceAttachment::Attached(_) => write!(f, "Attached"),
            DeviceAttachment::Headless => write!(f, "Headless"),
        }
    }
}

/// Open a serial device and wrap it for sharing
#[cfg(feature = "serial")]
pub async fn open_serial(path: &str, baud: u32) -> Result<SharedLink> {
    let mut link = SerialLink::new(path).with_baud_rate(baud);
    link.open().await?;
    Ok(shared(link))
}

#[cfg(not(feature = "serial"))]
pub async fn open_serial(path: &str, _baud: u32) -> Result<SharedLink> {
    Err(crate::error::RadioError::PortOpenFailed {
        port: path.to_string(),
        reason: "built without the `serial` feature".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_state_display() {
        assert_eq!(LinkState::Open.to_string(), "open");
        assert_eq!(LinkState::Closed.to_string(), "closed");
    }

    #[tokio::test]
    async fn test_shared_write_and_read() {
        let (a, b) = MemoryLink::pair("a", "b");
        let a = shared(a);
        let b = shared(b);
        write_shared(&a, "hello").await.unwrap();
        let line = read_shared(&b, Duration::from_millis(200)).await.unwrap();
        assert_eq!(line, "hello");
    }

    #[tokio::test]
    async fn test_write_does_not_wait_for_pending_read() {
        let (a, mut b) = MemoryLink::pair("a", "b");
        let a = shared(a);

        let reader = a.clone();
        let pending =
            tokio::spawn(async move { read_shared(&reader, Duration::from_secs(5)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        tokio::time::timeout(Duration::from_millis(500), write_shared(&a, "urgent"))
            .await
            .unwrap()
            .unwrap();
        let line = b.read_line(Some(Duration::from_millis(200))).await.unwrap();
        assert_eq!(line, "urgent");

        b.write_line("reply").await.unwrap();
        assert_eq!(pending.await.unwrap().unwrap(), "reply");
    }

    #[tokio::test]
    async fn test_closed_shared_link_is_disconnected() {
        let (a, _b) = MemoryLink::pair("a", "b");
        let a = shared(a);
        close_shared(&a).await;
        close_shared(&a).await;
        assert!(matches!(
            write_shared(&a, "x").await,
            Err(RadioError::Disconnected)
        ));
        assert!(matches!(
            read_shared(&a, Duration::from_millis(10)).await,
            Err(RadioError::Disconnected)
        ));

        let (mut closed, _peer) = MemoryLink::pair("c", "d");
        closed.close().await.unwrap();
        assert!(matches!(
            write_shared(&shared(closed), "x").await,
            Err(RadioError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_device_attachment() {
        let (a, _b) = MemoryLink::pair("a", "b");
        assert!(DeviceAttachment::attached(a).link().is_some());
        assert!(DeviceAttachment::Headless.is_headless());
        assert!(DeviceAttachment::Headless.link().is_none());
    }

    #[cfg(not(feature = "serial"))]
    #[tokio::test]
    async fn test_open_serial_without_feature() {
        match open_serial("/dev/ttyUSB0", 9600).await {
            Err(err) => assert_eq!(err.error_code(), "PORT_OPEN_FAILED"),
            Ok(_) => panic!("serial links need the serial feature"),
        }
    }
}
