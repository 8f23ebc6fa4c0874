//! Serial port transport implementation

use crate::error::{DlmsError, DlmsResult};
use crate::media::{
    discard_stale, receive_into, Media, MediaKind, ReceiveParameters, SerialControl,
};
use async_trait::async_trait;
use bytes::BytesMut;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_serial::{DataBits, Parity, SerialPort, SerialStream, StopBits};

/// Wrapper for SerialStream that implements Debug
struct DebugSerialStream(SerialStream);

impl fmt::Debug for DebugSerialStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialStream").finish()
    }
}

impl Deref for DebugSerialStream {
    type Target = SerialStream;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for DebugSerialStream {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Serial port transport layer settings
#[derive(Debug, Clone)]
pub struct SerialSettings {
    pub port_name: String,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
    pub flow_control: tokio_serial::FlowControl,
    /// Write timeout
    pub timeout: Option<Duration>,
}

impl SerialSettings {
    /// Create new serial settings with 8N1 framing
    pub fn new(port_name: String, baud_rate: u32) -> Self {
        Self {
            port_name,
            baud_rate,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
            flow_control: tokio_serial::FlowControl::None,
            timeout: Some(Duration::from_secs(30)),
        }
    }

    /// Settings for an IEC 62056-21 sign-on: 300 baud, 7 data bits, even parity
    pub fn iec(port_name: String) -> Self {
        Self {
            data_bits: DataBits::Seven,
            parity: Parity::Even,
            ..Self::new(port_name, 300)
        }
    }
}

/// Serial port transport layer implementation
#[derive(Debug)]
pub struct SerialTransport {
    stream: Option<DebugSerialStream>,
    settings: SerialSettings,
    pending: BytesMut,
}

impl SerialTransport {
    /// Create a new serial transport layer
    pub fn new(settings: SerialSettings) -> Self {
        Self {
            stream: None,
            settings,
            pending: BytesMut::new(),
        }
    }

    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }

    fn stream_mut(&mut self) -> DlmsResult<&mut DebugSerialStream> {
        self.stream.as_mut().ok_or_else(|| {
            DlmsError::Connection(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "Serial stream not connected",
            ))
        })
    }
}

fn line_error(e: tokio_serial::Error) -> DlmsError {
    DlmsError::Connection(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
}

#[async_trait]
impl Media for SerialTransport {
    async fn open(&mut self) -> DlmsResult<()> {
        if self.stream.is_some() {
            return Err(DlmsError::Connection(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Connection has already been opened",
            )));
        }

        let builder = tokio_serial::new(&self.settings.port_name, self.settings.baud_rate)
            .data_bits(self.settings.data_bits)
            .stop_bits(self.settings.stop_bits)
            .parity(self.settings.parity)
            .flow_control(self.settings.flow_control);

        let stream = SerialStream::open(&builder).map_err(|e| {
            DlmsError::Connection(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Failed to open serial port {}: {}", self.settings.port_name, e),
            ))
        })?;

        log::debug!(
            "opened {} at {} baud",
            self.settings.port_name,
            self.settings.baud_rate
        );
        self.stream = Some(DebugSerialStream(stream));
        self.pending.clear();
        Ok(())
    }

    async fn close(&mut self) -> DlmsResult<()> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.flush().await;
        }
        self.pending.clear();
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> DlmsResult<()> {
        discard_stale(&mut self.pending);
        let timeout = self.settings.timeout;
        let stream = self.stream_mut()?;
        let write = async {
            stream.write_all(data).await?;
            stream.flush().await?;
            Ok::<(), std::io::Error>(())
        };
        match timeout {
            Some(timeout) => tokio::time::timeout(timeout, write)
                .await
                .map_err(|_| {
                    DlmsError::Connection(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "Serial write timed out",
                    ))
                })?
                .map_err(DlmsError::Connection),
            None => write.await.map_err(DlmsError::Connection),
        }
    }

    async fn receive(&mut self, params: &mut ReceiveParameters) -> DlmsResult<bool> {
        let stream = self.stream.as_mut().ok_or_else(|| {
            DlmsError::Connection(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "Serial stream not connected",
            ))
        })?;
        receive_into(&mut stream.0, &mut self.pending, params).await
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn kind(&self) -> MediaKind {
        MediaKind::Serial
    }

    fn serial_control(&mut self) -> Option<&mut dyn SerialControl> {
        Some(self)
    }
}

impl SerialControl for SerialTransport {
    fn set_baud_rate(&mut self, baud_rate: u32) -> DlmsResult<()> {
        self.stream_mut()?.set_baud_rate(baud_rate).map_err(line_error)?;
        self.settings.baud_rate = baud_rate;
        Ok(())
    }

    fn set_dtr(&mut self, enable: bool) -> DlmsResult<()> {
        self.stream_mut()?
            .write_data_terminal_ready(enable)
            .map_err(line_error)
    }

    fn set_rts(&mut self, enable: bool) -> DlmsResult<()> {
        self.stream_mut()?
            .write_request_to_send(enable)
            .map_err(line_error)
    }

    fn set_data_bits(&mut self, data_bits: DataBits) -> DlmsResult<()> {
        self.stream_mut()?.set_data_bits(data_bits).map_err(line_error)?;
        self.settings.data_bits = data_bits;
        Ok(())
    }

    fn set_parity(&mut self, parity: Parity) -> DlmsResult<()> {
        self.stream_mut()?.set_parity(parity).map_err(line_error)?;
        self.settings.parity = parity;
        Ok(())
    }

    fn set_stop_bits(&mut self, stop_bits: StopBits) -> DlmsResult<()> {
        self.stream_mut()?.set_stop_bits(stop_bits).map_err(line_error)?;
        self.settings.stop_bits = stop_bits;
        Ok(())
    }
}
