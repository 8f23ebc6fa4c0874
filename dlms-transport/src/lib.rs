//! Transport layer module for the DLMS/COSEM client
//!
//! This crate provides the transport port used by the packet exchange engine:
//! a byte-oriented medium with `open`, `close`, `send` and a terminator-aware
//! `receive`, plus serial line control for the IEC 62056-21 sign-on.

pub mod error;
pub mod media;
pub mod serial;
pub mod tcp;
pub mod transport;

pub use error::{DlmsError, DlmsResult};
pub use media::{Media, MediaKind, ReceiveParameters, SerialControl};
pub use serial::{SerialSettings, SerialTransport};
pub use tcp::{TcpSettings, TcpTransport, DEFAULT_DLMS_PORT};
pub use tokio_serial::{DataBits, Parity, StopBits};
pub use transport::Transport;
