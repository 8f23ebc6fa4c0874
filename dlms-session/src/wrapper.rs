//! IEC 62056-47 wrapper framing for DLMS/COSEM over TCP

use crate::error::{DlmsError, DlmsResult};

/// Wrapper header length
pub const WRAPPER_HEADER_LENGTH: usize = 8;

/// Only wrapper version defined by IEC 62056-47
pub const WRAPPER_VERSION: u16 = 0x0001;

/// Wrapper header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrapperHeader {
    /// Source wPort
    pub source: u16,
    /// Destination wPort
    pub destination: u16,
    /// Length of the APDU that follows the header
    pub length: u16,
}

impl WrapperHeader {
    pub fn new(source: u16, destination: u16, length: u16) -> Self {
        Self {
            source,
            destination,
            length,
        }
    }

    /// Encode header to bytes (big-endian)
    pub fn encode(&self) -> [u8; WRAPPER_HEADER_LENGTH] {
        let mut result = [0u8; WRAPPER_HEADER_LENGTH];
        result[0..2].copy_from_slice(&WRAPPER_VERSION.to_be_bytes());
        result[2..4].copy_from_slice(&self.source.to_be_bytes());
        result[4..6].copy_from_slice(&self.destination.to_be_bytes());
        result[6..8].copy_from_slice(&self.length.to_be_bytes());
        result
    }

    /// Decode header from bytes
    pub fn decode(data: &[u8]) -> DlmsResult<Self> {
        if data.len() < WRAPPER_HEADER_LENGTH {
            return Err(DlmsError::InvalidData(format!(
                "Wrapper header too short: expected {}, got {}",
                WRAPPER_HEADER_LENGTH,
                data.len()
            )));
        }
        let version = u16::from_be_bytes([data[0], data[1]]);
        if version != WRAPPER_VERSION {
            return Err(DlmsError::InvalidData(format!(
                "Header version was {}, this stack is only compatible to version 1",
                version
            )));
        }
        Ok(Self {
            source: u16::from_be_bytes([data[2], data[3]]),
            destination: u16::from_be_bytes([data[4], data[5]]),
            length: u16::from_be_bytes([data[6], data[7]]),
        })
    }
}

/// Prefix `apdu` with a wrapper header
pub fn wrap(source: u16, destination: u16, apdu: &[u8]) -> DlmsResult<Vec<u8>> {
    let length = u16::try_from(apdu.len()).map_err(|_| {
        DlmsError::InvalidData(format!("APDU of {} bytes does not fit a wrapper frame", apdu.len()))
    })?;
    let mut frame = Vec::with_capacity(WRAPPER_HEADER_LENGTH + apdu.len());
    frame.extend_from_slice(&WrapperHeader::new(source, destination, length).encode());
    frame.extend_from_slice(apdu);
    Ok(frame)
}

/// Split a wrapper frame into header and APDU
pub fn unwrap(frame: &[u8]) -> DlmsResult<(WrapperHeader, &[u8])> {
    let header = WrapperHeader::decode(frame)?;
    let end = WRAPPER_HEADER_LENGTH + header.length as usize;
    let apdu = frame.get(WRAPPER_HEADER_LENGTH..end).ok_or_else(|| {
        DlmsError::InvalidData(format!(
            "Wrapper frame truncated: {} of {} bytes",
            frame.len(),
            end
        ))
    })?;
    Ok((header, apdu))
}

/// Whether `data` holds a whole wrapper frame
///
/// A header with an unknown version counts as complete so that the decoder
/// reports it.
pub fn is_complete(data: &[u8]) -> bool {
    match WrapperHeader::decode(data) {
        Ok(header) => data.len() >= WRAPPER_HEADER_LENGTH + header.length as usize,
        Err(_) => data.len() >= WRAPPER_HEADER_LENGTH,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let header = WrapperHeader::new(0x0010, 0x0001, 0x001F);
        assert_eq!(
            header.encode(),
            [0x00, 0x01, 0x00, 0x10, 0x00, 0x01, 0x00, 0x1F]
        );
        assert_eq!(WrapperHeader::decode(&header.encode()).unwrap(), header);
    }

    #[test]
    fn test_wrong_version_is_rejected() {
        let data = [0x00, 0x02, 0x00, 0x10, 0x00, 0x01, 0x00, 0x00];
        assert!(WrapperHeader::decode(&data).is_err());
        assert!(is_complete(&data));
    }

    #[test]
    fn test_frame_completeness() {
        let frame = wrap(0x10, 0x01, &[0x62, 0x03, 0x80, 0x01, 0x00]).unwrap();
        assert!(!is_complete(&frame[..4]));
        assert!(!is_complete(&frame[..frame.len() - 1]));
        assert!(is_complete(&frame));

        let (header, apdu) = unwrap(&frame).unwrap();
        assert_eq!(header.source, 0x10);
        assert_eq!(apdu, &[0x62, 0x03, 0x80, 0x01, 0x00]);
    }
}
