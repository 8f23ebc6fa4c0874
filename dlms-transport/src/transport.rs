//! Closed set of transport variants

use crate::error::DlmsResult;
use crate::media::{Media, MediaKind, ReceiveParameters, SerialControl};
use crate::serial::SerialTransport;
use crate::tcp::TcpTransport;
use async_trait::async_trait;

/// Transport selected by the client configuration
#[derive(Debug)]
pub enum Transport {
    Serial(SerialTransport),
    Tcp(TcpTransport),
}

impl From<SerialTransport> for Transport {
    fn from(transport: SerialTransport) -> Self {
        Transport::Serial(transport)
    }
}

impl From<TcpTransport> for Transport {
    fn from(transport: TcpTransport) -> Self {
        Transport::Tcp(transport)
    }
}

#[async_trait]
impl Media for Transport {
    async fn open(&mut self) -> DlmsResult<()> {
        match self {
            Transport::Serial(t) => t.open().await,
            Transport::Tcp(t) => t.open().await,
        }
    }

    async fn close(&mut self) -> DlmsResult<()> {
        match self {
            Transport::Serial(t) => t.close().await,
            Transport::Tcp(t) => t.close().await,
        }
    }

    async fn send(&mut self, data: &[u8]) -> DlmsResult<()> {
        match self {
            Transport::Serial(t) => t.send(data).await,
            Transport::Tcp(t) => t.send(data).await,
        }
    }

    async fn receive(&mut self, params: &mut ReceiveParameters) -> DlmsResult<bool> {
        match self {
            Transport::Serial(t) => t.receive(params).await,
            Transport::Tcp(t) => t.receive(params).await,
        }
    }

    fn is_open(&self) -> bool {
        match self {
            Transport::Serial(t) => t.is_open(),
            Transport::Tcp(t) => t.is_open(),
        }
    }

    fn kind(&self) -> MediaKind {
        match self {
            Transport::Serial(_) => MediaKind::Serial,
            Transport::Tcp(_) => MediaKind::Network,
        }
    }

    fn serial_control(&mut self) -> Option<&mut dyn SerialControl> {
        match self {
            Transport::Serial(t) => Some(t),
            Transport::Tcp(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::SerialSettings;
    use crate::tcp::TcpSettings;

    #[test]
    fn test_variant_kind_and_line_control() {
        let mut serial: Transport =
            SerialTransport::new(SerialSettings::iec("/dev/ttyUSB0".to_string())).into();
        assert_eq!(serial.kind(), MediaKind::Serial);
        assert!(serial.serial_control().is_some());

        let mut tcp: Transport = TcpTransport::new(TcpSettings::new("localhost", 4059)).into();
        assert_eq!(tcp.kind(), MediaKind::Network);
        assert!(tcp.serial_control().is_none());
    }
}
