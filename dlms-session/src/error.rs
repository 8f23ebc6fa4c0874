//! Error re-exports for the framing layer

pub use dlms_core::error::{DlmsError, DlmsResult};
