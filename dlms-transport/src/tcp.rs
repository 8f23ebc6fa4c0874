//! TCP transport implementation

use crate::error::{DlmsError, DlmsResult};
use crate::media::{discard_stale, receive_into, Media, MediaKind, ReceiveParameters};
use async_trait::async_trait;
use bytes::BytesMut;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// Official DLMS/COSEM TCP port
pub const DEFAULT_DLMS_PORT: u16 = 4059;

/// Wrapper for TcpStream that implements Debug
struct DebugTcpStream(TcpStream);

impl fmt::Debug for DebugTcpStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpStream").finish()
    }
}

impl Deref for DebugTcpStream {
    type Target = TcpStream;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for DebugTcpStream {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// TCP transport layer settings
#[derive(Debug, Clone)]
pub struct TcpSettings {
    pub host: String,
    pub port: u16,
    /// Connect and write timeout
    pub timeout: Option<Duration>,
}

impl TcpSettings {
    /// Create new TCP settings
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: Some(Duration::from_secs(30)),
        }
    }

    /// Create TCP settings with timeout
    pub fn with_timeout(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Self::new(host, port)
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// TCP transport layer implementation
#[derive(Debug)]
pub struct TcpTransport {
    stream: Option<DebugTcpStream>,
    settings: TcpSettings,
    pending: BytesMut,
}

impl TcpTransport {
    /// Create a new TCP transport layer
    pub fn new(settings: TcpSettings) -> Self {
        Self {
            stream: None,
            settings,
            pending: BytesMut::new(),
        }
    }

    pub fn settings(&self) -> &TcpSettings {
        &self.settings
    }
}

#[async_trait]
impl Media for TcpTransport {
    async fn open(&mut self) -> DlmsResult<()> {
        if self.stream.is_some() {
            return Err(DlmsError::Connection(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Connection has already been opened",
            )));
        }

        let address = self.settings.address();
        // Apply timeout to connection establishment if specified
        let stream = if let Some(timeout) = self.settings.timeout {
            tokio::time::timeout(timeout, TcpStream::connect(address.as_str()))
                .await
                .map_err(|_| {
                    DlmsError::Connection(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("Connecting to {} timed out", address),
                    ))
                })?
                .map_err(DlmsError::Connection)?
        } else {
            TcpStream::connect(address.as_str())
                .await
                .map_err(DlmsError::Connection)?
        };
        stream.set_nodelay(true).map_err(DlmsError::Connection)?;

        log::debug!("connected to {}", address);
        self.stream = Some(DebugTcpStream(stream));
        self.pending.clear();
        Ok(())
    }

    async fn close(&mut self) -> DlmsResult<()> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        self.pending.clear();
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> DlmsResult<()> {
        discard_stale(&mut self.pending);
        let timeout = self.settings.timeout;
        let stream = self.stream.as_mut().ok_or_else(|| {
            DlmsError::Connection(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "TCP stream not connected",
            ))
        })?;
        match timeout {
            Some(timeout) => tokio::time::timeout(timeout, stream.write_all(data))
                .await
                .map_err(|_| {
                    DlmsError::Connection(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "TCP write timed out",
                    ))
                })?
                .map_err(DlmsError::Connection),
            None => stream.write_all(data).await.map_err(DlmsError::Connection),
        }
    }

    async fn receive(&mut self, params: &mut ReceiveParameters) -> DlmsResult<bool> {
        let stream = self.stream.as_mut().ok_or_else(|| {
            DlmsError::Connection(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "TCP stream not connected",
            ))
        })?;
        receive_into(&mut stream.0, &mut self.pending, params).await
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn kind(&self) -> MediaKind {
        MediaKind::Network
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[test]
    fn test_tcp_settings() {
        let settings = TcpSettings::new("localhost", DEFAULT_DLMS_PORT);
        assert_eq!(settings.address(), "localhost:4059");
        assert!(settings.timeout.is_some());
    }

    #[tokio::test]
    async fn test_tcp_round_trip_against_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(&[0x00, 0x01, 0x00, 0x01]).await.unwrap();
            buf
        });

        let mut transport = TcpTransport::new(TcpSettings::new("127.0.0.1", port));
        transport.open().await.unwrap();
        assert!(transport.is_open());
        transport.send(&[1, 2, 3, 4]).await.unwrap();

        let mut params = ReceiveParameters::new(None, 4, Duration::from_secs(2));
        assert!(transport.receive(&mut params).await.unwrap());
        assert_eq!(&params.reply[..], &[0x00, 0x01, 0x00, 0x01]);
        assert_eq!(server.await.unwrap(), [1, 2, 3, 4]);

        transport.close().await.unwrap();
        assert!(!transport.is_open());
        assert_eq!(transport.kind(), MediaKind::Network);
    }

    #[tokio::test]
    async fn test_send_drops_tail_of_abandoned_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let full = [0x7E, 0xA0, 0x07, 0x21, 0x03, 0x73, 0x01, 0x40, 0x7E];
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 2];
            socket.read_exact(&mut request).await.unwrap();
            socket.write_all(&full[..4]).await.unwrap();
            socket.read_exact(&mut request).await.unwrap();
            socket.write_all(&full).await.unwrap();
            socket
        });

        let mut transport = TcpTransport::new(TcpSettings::new("127.0.0.1", port));
        transport.open().await.unwrap();
        let mut params = ReceiveParameters::new(Some(0x7E), 5, Duration::from_millis(300));

        transport.send(&[1, 2]).await.unwrap();
        assert!(!transport.receive(&mut params).await.unwrap());
        transport.send(&[1, 2]).await.unwrap();
        assert!(transport.receive(&mut params).await.unwrap());
        assert_eq!(&params.reply[..], &full);

        drop(server.await.unwrap());
        transport.close().await.unwrap();
    }
}
