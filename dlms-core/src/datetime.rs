//! COSEM date-time octet string (12 bytes)

use crate::error::{DlmsError, DlmsResult};
use chrono::{Datelike, NaiveDateTime, Timelike};
use std::fmt;

/// Deviation value meaning "not specified"
const DEVIATION_NOT_SPECIFIED: i16 = i16::MIN;

/// COSEM date-time as carried in selective access parameters
///
/// Layout: year(2) month day day-of-week hour minute second hundredths
/// deviation(2) clock-status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CosemDateTime {
    bytes: [u8; 12],
}

impl CosemDateTime {
    pub const LENGTH: usize = 12;

    /// Build from a local date-time with unspecified deviation and status
    pub fn from_naive(value: NaiveDateTime) -> DlmsResult<Self> {
        let year = u16::try_from(value.year()).map_err(|_| {
            DlmsError::InvalidData(format!("Year {} out of COSEM range", value.year()))
        })?;
        let mut bytes = [0u8; 12];
        bytes[0..2].copy_from_slice(&year.to_be_bytes());
        bytes[2] = value.month() as u8;
        bytes[3] = value.day() as u8;
        // ISO weekday: Monday = 1
        bytes[4] = value.weekday().number_from_monday() as u8;
        bytes[5] = value.hour() as u8;
        bytes[6] = value.minute() as u8;
        bytes[7] = value.second() as u8;
        bytes[8] = 0xFF;
        bytes[9..11].copy_from_slice(&DEVIATION_NOT_SPECIFIED.to_be_bytes());
        bytes[11] = 0xFF;
        Ok(Self { bytes })
    }

    pub fn decode(octet_string: &[u8]) -> DlmsResult<Self> {
        let bytes: [u8; 12] = octet_string.try_into().map_err(|_| {
            DlmsError::InvalidData(format!(
                "COSEM date-time must be {} bytes, got {}",
                Self::LENGTH,
                octet_string.len()
            ))
        })?;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.bytes
    }

    pub fn year(&self) -> u16 {
        u16::from_be_bytes([self.bytes[0], self.bytes[1]])
    }
}

impl fmt::Display for CosemDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.bytes;
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year(),
            b[2],
            b[3],
            b[5],
            b[6],
            b[7]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_from_naive_layout() {
        let value = NaiveDate::from_ymd_opt(2024, 3, 4)
            .unwrap()
            .and_hms_opt(13, 5, 9)
            .unwrap();
        let dt = CosemDateTime::from_naive(value).unwrap();
        assert_eq!(
            dt.as_bytes(),
            &[0x07, 0xE8, 3, 4, 1, 13, 5, 9, 0xFF, 0x80, 0x00, 0xFF]
        );
        assert_eq!(dt.to_string(), "2024-03-04 13:05:09");
    }

    #[test]
    fn test_decode_length_checked() {
        assert!(CosemDateTime::decode(&[0u8; 11]).is_err());
        assert_eq!(CosemDateTime::decode(&[0x07, 0xE8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]).unwrap().year(), 2024);
    }
}
