// src/hardware/mod.rs - Serial transport to the motion controller
pub mod channel;
pub mod serial;
pub mod worker;

use async_trait::async_trait;
use serial2_tokio::SerialPort;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::SerialConfig;

pub use channel::{command_channel, ChannelClosed, CommandReceiver, CommandSender};
pub use serial::{Exchange, LineLink};
pub use worker::{TransportReport, TransportWorker};

#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("Serial port error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Connection closed by controller")]
    Closed,
    #[error("Not connected to hardware")]
    NotConnected,
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Opens the byte stream a machine talks over. Real machines use
/// [`SerialPortOpener`]; tests hand in in-memory streams.
#[async_trait]
pub trait PortOpener: Send + Sync {
    type Port: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn open(&self, settings: &SerialConfig) -> Result<Self::Port, HardwareError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SerialPortOpener;

impl SerialPortOpener {
    /// Names of the serial ports present on this host.
    pub fn available_ports(&self) -> Result<Vec<String>, HardwareError> {
        let ports = SerialPort::available_ports()?;
        Ok(ports.into_iter().map(|p| p.display().to_string()).collect())
    }
}

#[async_trait]
impl PortOpener for SerialPortOpener {
    type Port = SerialPort;

    async fn open(&self, settings: &SerialConfig) -> Result<Self::Port, HardwareError> {
        if settings.port.is_empty() {
            return Err(HardwareError::NotConnected);
        }
        tracing::info!("Opening {} at {} baud", settings.port, settings.baud);
        let port = SerialPort::open(&settings.port, settings.baud)?;
        Ok(port)
    }
}
