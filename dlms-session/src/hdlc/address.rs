//! HDLC address types

use crate::error::{DlmsError, DlmsResult};
use std::fmt;

/// Reserved HDLC addresses
pub mod reserved {
    /// Client management process
    pub const CLIENT_MANAGEMENT_PROCESS: u16 = 0x01;

    /// Client public client
    pub const CLIENT_PUBLIC_CLIENT: u16 = 0x10;

    /// Server upper management logical device
    pub const SERVER_UPPER_MANAGEMENT_LOGICAL_DEVICE: u16 = 0x01;

    /// Server upper all stations (1 byte)
    pub const SERVER_UPPER_ALL_STATIONS_1BYTE: u16 = 0x7F;
}

const ONE_BYTE_UPPER_BOUND: u16 = 0x7F;
const TWO_BYTE_UPPER_BOUND: u16 = 0x3FFF;

/// HDLC address
///
/// A client address is always one byte. A server address carries an upper
/// (logical device) part and an optional lower (physical device) part and is
/// encoded on 1, 2 or 4 bytes. Every byte holds 7 address bits shifted left
/// by one; the last byte has its low bit set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HdlcAddress {
    byte_length: usize,
    logical_id: u16,
    physical_id: u16,
}

impl HdlcAddress {
    /// One byte address (clients, or servers addressed by logical device only)
    pub fn new(logical_id: u16) -> DlmsResult<Self> {
        if logical_id > ONE_BYTE_UPPER_BOUND {
            return Err(DlmsError::InvalidData(format!(
                "One byte address exceeded upper bound of 0x{:02X}",
                ONE_BYTE_UPPER_BOUND
            )));
        }
        Ok(Self {
            byte_length: 1,
            logical_id,
            physical_id: 0,
        })
    }

    /// Server address with logical and physical part
    ///
    /// Two bytes are used when both parts fit in 7 bits, four bytes otherwise.
    pub fn new_with_physical(logical_id: u16, physical_id: u16) -> DlmsResult<Self> {
        let size = Self::address_size_of(logical_id)?.max(Self::address_size_of(physical_id)?);
        Ok(Self {
            byte_length: size * 2,
            logical_id,
            physical_id,
        })
    }

    fn address_size_of(address: u16) -> DlmsResult<usize> {
        if address <= ONE_BYTE_UPPER_BOUND {
            Ok(1)
        } else if address <= TWO_BYTE_UPPER_BOUND {
            Ok(2)
        } else {
            Err(DlmsError::InvalidData(format!(
                "Address 0x{:X} is out of upper bound 0x{:X}",
                address, TWO_BYTE_UPPER_BOUND
            )))
        }
    }

    pub fn logical_id(&self) -> u16 {
        self.logical_id
    }

    pub fn physical_id(&self) -> u16 {
        self.physical_id
    }

    pub fn byte_length(&self) -> usize {
        self.byte_length
    }

    /// Encode address to bytes
    pub fn encode(&self) -> Vec<u8> {
        let part = |value: u16, len: usize| -> Vec<u8> {
            (0..len)
                .map(|i| {
                    let shift = 7 * (len - i - 1);
                    (((value >> shift) & 0x7F) << 1) as u8
                })
                .collect()
        };
        let mut result = match self.byte_length {
            1 => part(self.logical_id, 1),
            n => {
                let mut bytes = part(self.logical_id, n / 2);
                bytes.extend(part(self.physical_id, n / 2));
                bytes
            }
        };
        if let Some(last) = result.last_mut() {
            *last |= 1;
        }
        result
    }

    /// Decode an address from the start of `data`
    ///
    /// # Returns
    ///
    /// The address and the number of bytes it occupied.
    pub fn decode(data: &[u8]) -> DlmsResult<(Self, usize)> {
        let length = data
            .iter()
            .take(4)
            .position(|b| b & 0x01 != 0)
            .map(|pos| pos + 1)
            .ok_or_else(|| DlmsError::FrameInvalid("HDLC address is illegal in frame".to_string()))?;

        let value = |bytes: &[u8]| -> u16 {
            bytes
                .iter()
                .fold(0u16, |acc, b| (acc << 7) | (b >> 1) as u16)
        };
        let address = match length {
            1 => Self::new(value(&data[..1]))?,
            2 | 4 => {
                let half = length / 2;
                Self {
                    byte_length: length,
                    logical_id: value(&data[..half]),
                    physical_id: value(&data[half..length]),
                }
            }
            _ => {
                return Err(DlmsError::FrameInvalid(format!(
                    "Received HdlcAddress has an invalid byte length of {}",
                    length
                )))
            }
        };
        Ok((address, length))
    }
}

impl fmt::Display for HdlcAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:X}", self.logical_id)?;
        if self.byte_length > 1 {
            write!(f, "-0x{:X}", self.physical_id)?;
        }
        Ok(())
    }
}
