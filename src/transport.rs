//! Radio link (HC-06 style UART bridge).
//!
//! The link is a plain byte stream. Its receive half only matters as a trigger:
//! any byte arriving means "send me the log", so [`spawn_rx_watcher`] turns
//! received chunks into [`Event::RetrievalRequested`]. The transmit half is
//! shared with the retrieval task behind an async mutex, the same way the
//! instrument drivers share a serial port.

use crate::config::LinkConfig;
use crate::error::{AppResult, NodeError};
use crate::events::{Event, EventSender};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Types usable as a bidirectional link
pub trait LinkIo: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> LinkIo for T {}

/// Receive half
pub type LinkReader = Box<dyn AsyncRead + Unpin + Send>;

/// Transmit half
pub type LinkWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// Transmit half shared between tasks
pub type SharedWriter = Arc<Mutex<LinkWriter>>;

/// Both halves of an opened link
pub struct Link {
    /// Receive half, consumed by [`spawn_rx_watcher`]
    pub reader: LinkReader,
    /// Transmit half
    pub writer: SharedWriter,
}

impl Link {
    /// Split a bidirectional stream
    pub fn from_io<T: LinkIo + 'static>(io: T) -> Self {
        let (reader, writer) = tokio::io::split(io);
        Self::from_parts(reader, writer)
    }

    /// Use separate receive and transmit streams
    pub fn from_parts(
        reader: impl AsyncRead + Unpin + Send + 'static,
        writer: impl AsyncWrite + Unpin + Send + 'static,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// Standard input triggers retrieval; records go to standard output
    pub fn stdio() -> Self {
        Self::from_parts(tokio::io::stdin(), tokio::io::stdout())
    }

    /// Open the link described by the configuration
    ///
    /// With a port configured this opens the serial device (8N1, no flow
    /// control), otherwise it falls back to stdio.
    pub fn open(config: &LinkConfig) -> AppResult<Self> {
        match config.port.as_deref() {
            Some(port) => Self::open_serial(port, config.baud_rate),
            None => {
                info!("No serial port configured, using stdio link");
                Ok(Self::stdio())
            }
        }
    }

    #[cfg(feature = "serial")]
    fn open_serial(port: &str, baud_rate: u32) -> AppResult<Self> {
        use tokio_serial::SerialPortBuilderExt;

        let stream = tokio_serial::new(port, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| NodeError::HardwareFault(format!("failed to open {port}: {e}")))?;
        info!(port, baud_rate, "Serial link open");
        Ok(Self::from_io(stream))
    }

    #[cfg(not(feature = "serial"))]
    fn open_serial(_port: &str, _baud_rate: u32) -> AppResult<Self> {
        Err(NodeError::SerialFeatureDisabled)
    }
}

/// Post a retrieval request for every chunk received on the link
///
/// The bytes themselves are discarded. The task ends at end of stream, on a
/// read error, or once the supervisor is gone.
pub fn spawn_rx_watcher<R>(mut reader: R, events: EventSender) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = [0u8; 64];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => {
                    debug!("Link receive side closed");
                    break;
                }
                Ok(n) => {
                    debug!(bytes = n, "Link activity, requesting retrieval");
                    if !events.post(Event::RetrievalRequested) {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Link receive failed");
                    break;
                }
            }
        }
    })
}
