//! Link framing module for the DLMS/COSEM client
//!
//! This crate provides the byte-level codecs below the application layer:
//! HDLC frames (IEC 62056-46) used on serial lines and HDLC-over-TCP, and the
//! IEC 62056-47 wrapper used on plain TCP. Both expose a completeness check so
//! that a receiver can tell when a whole frame has arrived.

pub mod error;
pub mod hdlc;
pub mod wrapper;

pub use error::{DlmsError, DlmsResult};
pub use hdlc::*;
pub use wrapper::{WrapperHeader, WRAPPER_HEADER_LENGTH, WRAPPER_VERSION};
