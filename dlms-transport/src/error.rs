//! Error re-exports for the transport layer

pub use dlms_core::error::{DlmsError, DlmsResult};
