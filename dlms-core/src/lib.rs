//! Core types and utilities for the DLMS/COSEM meter-reading client
//!
//! This crate provides the error type shared by every layer, OBIS codes,
//! the COSEM date-time octet string and a few byte helpers used for tracing.

pub mod datetime;
pub mod error;
pub mod obis_code;

pub use datetime::CosemDateTime;
pub use error::{DlmsError, DlmsResult, ACCESS_DENIED};
pub use obis_code::ObisCode;

/// Format bytes as space separated upper-case hex (`7E A0 07`)
pub fn to_hex(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 3);
    for (i, byte) in data.iter().enumerate() {
        if i != 0 {
            out.push(' ');
        }
        out.push_str(&format!("{:02X}", byte));
    }
    out
}
