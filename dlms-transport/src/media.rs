//! Media port shared by every transport variant

use crate::error::{DlmsError, DlmsResult};
use async_trait::async_trait;
use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;
use tokio_serial::{DataBits, Parity, StopBits};

/// Class of a transport
///
/// Network transports deliver whole messages, so no end-of-packet byte is used
/// on them when the wrapper interface is selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Serial,
    Network,
}

/// Parameters of one receive call
///
/// Received bytes are appended to `reply`, so calling `receive` again with the
/// same parameters continues the same reply.
#[derive(Debug, Clone)]
pub struct ReceiveParameters {
    /// End-of-packet byte, `None` when the transport delimits messages itself
    pub eop: Option<u8>,
    /// Minimum number of bytes before the reply is a candidate
    pub count: usize,
    /// Wait-time budget of one receive call
    pub wait_time: Duration,
    /// Return everything that was read, not only the bytes up to `eop`
    pub all_data: bool,
    pub reply: BytesMut,
}

impl ReceiveParameters {
    pub fn new(eop: Option<u8>, count: usize, wait_time: Duration) -> Self {
        Self {
            eop,
            count,
            wait_time,
            all_data: true,
            reply: BytesMut::new(),
        }
    }

    /// Reserve room for a reply of `size` bytes
    pub fn with_capacity(mut self, size: usize) -> Self {
        self.reply.reserve(size);
        self
    }

    pub fn with_all_data(mut self, all_data: bool) -> Self {
        self.all_data = all_data;
        self
    }

    pub fn clear_reply(&mut self) {
        self.reply.clear();
    }
}

/// Line control available on serial-class transports
pub trait SerialControl: Send {
    fn set_baud_rate(&mut self, baud_rate: u32) -> DlmsResult<()>;
    fn set_dtr(&mut self, enable: bool) -> DlmsResult<()>;
    fn set_rts(&mut self, enable: bool) -> DlmsResult<()>;
    fn set_data_bits(&mut self, data_bits: DataBits) -> DlmsResult<()>;
    fn set_parity(&mut self, parity: Parity) -> DlmsResult<()>;
    fn set_stop_bits(&mut self, stop_bits: StopBits) -> DlmsResult<()>;
}

/// Byte-oriented, half-duplex medium to a meter
#[async_trait]
pub trait Media: Send {
    /// Open the physical connection
    async fn open(&mut self) -> DlmsResult<()>;

    /// Close the physical connection
    async fn close(&mut self) -> DlmsResult<()>;

    /// Write a frame to the medium as-is
    ///
    /// Input still pending from an earlier request is dropped first, so a
    /// resend never sees the tail of a reply that timed out.
    async fn send(&mut self, data: &[u8]) -> DlmsResult<()>;

    /// Wait for a reply satisfying the termination rule of `params`
    ///
    /// # Returns
    ///
    /// `Ok(false)` when nothing satisfying the rule arrived within
    /// `params.wait_time`. I/O failures are errors.
    async fn receive(&mut self, params: &mut ReceiveParameters) -> DlmsResult<bool>;

    fn is_open(&self) -> bool;

    fn kind(&self) -> MediaKind;

    /// Serial line control, `None` for network transports
    fn serial_control(&mut self) -> Option<&mut dyn SerialControl> {
        None
    }
}

/// Move a satisfied reply from `pending` into `params.reply`
///
/// A reply is satisfied once `count` bytes are pending and, when a terminator
/// is set, the terminator occurs at or after the `count`-th byte.
pub fn take_satisfied(pending: &mut BytesMut, params: &mut ReceiveParameters) -> bool {
    let needed = params.count.max(1);
    if pending.len() < needed {
        return false;
    }
    let end = match params.eop {
        None => pending.len(),
        Some(eop) => match pending[needed - 1..].iter().position(|&b| b == eop) {
            Some(pos) => needed + pos,
            None => return false,
        },
    };
    let take = if params.all_data { pending.len() } else { end };
    let chunk = pending.split_to(take);
    params.reply.extend_from_slice(&chunk);
    true
}

/// Drop input left over from an earlier request
///
/// The line is half-duplex, so bytes not consumed before a new request
/// can only belong to a reply that was given up on.
pub(crate) fn discard_stale(pending: &mut BytesMut) {
    if !pending.is_empty() {
        log::debug!("discarding {} stale bytes", pending.len());
        pending.clear();
    }
}

/// Read from `stream` until `params` is satisfied or its wait time elapses
pub(crate) async fn receive_into<R>(
    stream: &mut R,
    pending: &mut BytesMut,
    params: &mut ReceiveParameters,
) -> DlmsResult<bool>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let deadline = Instant::now() + params.wait_time;
    loop {
        if take_satisfied(pending, params) {
            return Ok(true);
        }
        pending.reserve(256);
        match tokio::time::timeout_at(deadline, stream.read_buf(pending)).await {
            Err(_) => return Ok(false),
            Ok(Ok(0)) => {
                return Err(DlmsError::Connection(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "Connection closed by the remote end",
                )))
            }
            Ok(Ok(n)) => log::trace!("read {} bytes, {} pending", n, pending.len()),
            Ok(Err(e)) => return Err(DlmsError::Connection(e)),
        }
    }
}
