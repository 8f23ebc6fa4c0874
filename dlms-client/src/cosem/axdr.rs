//! A-XDR data as returned by GET
//!
//! Only what the reader needs: length fields, element skipping for progress
//! counting, and a [`Value`] tree for display.

use dlms_core::{to_hex, CosemDateTime, DlmsError, DlmsResult, ObisCode};
use std::fmt;

pub mod tag {
    pub const NULL: u8 = 0;
    pub const ARRAY: u8 = 1;
    pub const STRUCTURE: u8 = 2;
    pub const BOOLEAN: u8 = 3;
    pub const BIT_STRING: u8 = 4;
    pub const INT32: u8 = 5;
    pub const UINT32: u8 = 6;
    pub const OCTET_STRING: u8 = 9;
    pub const VISIBLE_STRING: u8 = 10;
    pub const UTF8_STRING: u8 = 12;
    pub const BCD: u8 = 13;
    pub const INT8: u8 = 15;
    pub const INT16: u8 = 16;
    pub const UINT8: u8 = 17;
    pub const UINT16: u8 = 18;
    pub const INT64: u8 = 20;
    pub const UINT64: u8 = 21;
    pub const ENUM: u8 = 22;
    pub const FLOAT32: u8 = 23;
    pub const FLOAT64: u8 = 24;
    pub const DATE_TIME: u8 = 25;
    pub const DATE: u8 = 26;
    pub const TIME: u8 = 27;
    pub const DONT_CARE: u8 = 255;
}

/// Append an A-XDR length field
pub fn encode_length(len: usize, out: &mut Vec<u8>) {
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes = (len as u32).to_be_bytes();
        let skip = bytes.iter().take_while(|&&b| b == 0).count();
        out.push(0x80 | (4 - skip) as u8);
        out.extend_from_slice(&bytes[skip..]);
    }
}

/// Read an A-XDR length field
///
/// # Returns
///
/// The length and the number of bytes the field took, `None` when `data` is
/// too short.
pub fn decode_length(data: &[u8]) -> Option<(usize, usize)> {
    let first = *data.first()?;
    if first < 0x80 {
        return Some((first as usize, 1));
    }
    let count = (first & 0x7F) as usize;
    if count == 0 || count > 4 {
        return None;
    }
    let bytes = data.get(1..1 + count)?;
    let len = bytes.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize);
    Some((len, 1 + count))
}

fn fixed_size(data_type: u8) -> Option<usize> {
    match data_type {
        tag::NULL | tag::DONT_CARE => Some(0),
        tag::BOOLEAN | tag::BCD | tag::INT8 | tag::UINT8 | tag::ENUM => Some(1),
        tag::INT16 | tag::UINT16 => Some(2),
        tag::INT32 | tag::UINT32 | tag::FLOAT32 | tag::TIME => Some(4),
        tag::DATE => Some(5),
        tag::INT64 | tag::UINT64 | tag::FLOAT64 => Some(8),
        tag::DATE_TIME => Some(12),
        _ => None,
    }
}

/// Size of the complete element at the start of `data`
///
/// `None` when the element is truncated or of a type this reader does not
/// know.
pub fn element_size(data: &[u8]) -> Option<usize> {
    let data_type = *data.first()?;
    let size = match data_type {
        tag::ARRAY | tag::STRUCTURE => {
            let (count, used) = decode_length(&data[1..])?;
            let mut pos = 1 + used;
            for _ in 0..count {
                pos += element_size(data.get(pos..)?)?;
            }
            pos
        }
        tag::OCTET_STRING | tag::VISIBLE_STRING | tag::UTF8_STRING => {
            let (len, used) = decode_length(&data[1..])?;
            1 + used + len
        }
        tag::BIT_STRING => {
            let (bits, used) = decode_length(&data[1..])?;
            1 + used + bits.div_ceil(8)
        }
        other => 1 + fixed_size(other)?,
    };
    (data.len() >= size).then_some(size)
}

/// Announced and received element counts of a partial payload
///
/// For an array or structure these are its element count and the number of
/// elements fully received. Any other value counts as a single element.
pub fn progress(data: &[u8]) -> (usize, usize) {
    match data.first() {
        None => (0, 0),
        Some(&tag::ARRAY) | Some(&tag::STRUCTURE) => {
            let Some((count, used)) = decode_length(&data[1..]) else {
                return (0, 0);
            };
            let mut pos = 1 + used;
            let mut received = 0;
            while received < count {
                match data.get(pos..).and_then(element_size) {
                    Some(size) => {
                        pos += size;
                        received += 1;
                    }
                    None => break,
                }
            }
            (count, received)
        }
        Some(_) => (1, usize::from(element_size(data).is_some())),
    }
}

/// Decoded A-XDR value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Unsigned(u64),
    Enum(u8),
    Float(f64),
    OctetString(Vec<u8>),
    Text(String),
    BitString(Vec<u8>),
    DateTime(CosemDateTime),
    Array(Vec<Value>),
    Structure(Vec<Value>),
    /// Date, time, BCD and types without a dedicated variant
    Raw(u8, Vec<u8>),
}

impl Value {
    /// Decode the whole of `data` as one value
    pub fn decode(data: &[u8]) -> DlmsResult<Self> {
        let (value, used) = Self::decode_prefix(data)?;
        if used != data.len() {
            log::debug!("{} trailing bytes after A-XDR value", data.len() - used);
        }
        Ok(value)
    }

    /// Decode one value from the start of `data`
    pub fn decode_prefix(data: &[u8]) -> DlmsResult<(Self, usize)> {
        let size = element_size(data).ok_or_else(|| {
            DlmsError::InvalidData(format!(
                "Truncated or unknown A-XDR data: {}",
                to_hex(&data[..data.len().min(16)])
            ))
        })?;
        let body = &data[1..size];
        let value = match data[0] {
            tag::NULL | tag::DONT_CARE => Value::Null,
            tag::BOOLEAN => Value::Boolean(body[0] != 0),
            tag::INT8 => Value::Integer(body[0] as i8 as i64),
            tag::INT16 => Value::Integer(i16::from_be_bytes([body[0], body[1]]) as i64),
            tag::INT32 => Value::Integer(i32::from_be_bytes(array(body)) as i64),
            tag::INT64 => Value::Integer(i64::from_be_bytes(array(body))),
            tag::UINT8 => Value::Unsigned(body[0] as u64),
            tag::UINT16 => Value::Unsigned(u16::from_be_bytes([body[0], body[1]]) as u64),
            tag::UINT32 => Value::Unsigned(u32::from_be_bytes(array(body)) as u64),
            tag::UINT64 => Value::Unsigned(u64::from_be_bytes(array(body))),
            tag::ENUM => Value::Enum(body[0]),
            tag::FLOAT32 => Value::Float(f32::from_be_bytes(array(body)) as f64),
            tag::FLOAT64 => Value::Float(f64::from_be_bytes(array(body))),
            tag::DATE_TIME => Value::DateTime(CosemDateTime::decode(body)?),
            tag::OCTET_STRING => Value::OctetString(strip_length(body).to_vec()),
            tag::VISIBLE_STRING | tag::UTF8_STRING => {
                Value::Text(String::from_utf8_lossy(strip_length(body)).into_owned())
            }
            tag::BIT_STRING => Value::BitString(strip_length(body).to_vec()),
            tag::ARRAY | tag::STRUCTURE => {
                let (count, used) = decode_length(body).unwrap_or((0, 0));
                let mut items = Vec::with_capacity(count);
                let mut pos = used;
                for _ in 0..count {
                    let (item, item_size) = Self::decode_prefix(&body[pos..])?;
                    items.push(item);
                    pos += item_size;
                }
                if data[0] == tag::ARRAY {
                    Value::Array(items)
                } else {
                    Value::Structure(items)
                }
            }
            other => Value::Raw(other, body.to_vec()),
        };
        Ok((value, size))
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Unsigned(v) => Some(*v),
            Value::Integer(v) => u64::try_from(*v).ok(),
            Value::Enum(v) => Some(*v as u64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            Value::Unsigned(v) => i64::try_from(*v).ok(),
            Value::Enum(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_obis(&self) -> Option<ObisCode> {
        match self {
            Value::OctetString(bytes) => {
                let bytes: [u8; 6] = bytes.as_slice().try_into().ok()?;
                Some(ObisCode::from(bytes))
            }
            _ => None,
        }
    }

    pub fn items(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) | Value::Structure(items) => Some(items),
            _ => None,
        }
    }
}

fn array<const N: usize>(body: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&body[..N]);
    out
}

fn strip_length(body: &[u8]) -> &[u8] {
    match decode_length(body) {
        Some((_, used)) => &body[used..],
        None => body,
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Boolean(v) => write!(f, "{}", v),
            Value::Integer(v) => write!(f, "{}", v),
            Value::Unsigned(v) => write!(f, "{}", v),
            Value::Enum(v) => write!(f, "enum({})", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(v) => f.write_str(v),
            Value::DateTime(v) => write!(f, "{}", v),
            Value::OctetString(bytes) => match self.as_obis() {
                Some(obis) if bytes.len() == 6 => write!(f, "{}", obis),
                _ => f.write_str(&to_hex(bytes)),
            },
            Value::BitString(bytes) | Value::Raw(_, bytes) => f.write_str(&to_hex(bytes)),
            Value::Array(items) | Value::Structure(items) => {
                f.write_str("{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_forms() {
        let mut out = Vec::new();
        encode_length(0x7F, &mut out);
        encode_length(0x80, &mut out);
        encode_length(0x1234, &mut out);
        assert_eq!(out, vec![0x7F, 0x81, 0x80, 0x82, 0x12, 0x34]);
        assert_eq!(decode_length(&[0x82, 0x12, 0x34]), Some((0x1234, 3)));
        assert_eq!(decode_length(&[0x82, 0x12]), None);
    }

    #[test]
    fn test_progress_counts_complete_elements() {
        // array of 3 structures {uint16, octet-string(2)}
        let full = [
            0x01, 0x03, 0x02, 0x02, 0x12, 0x00, 0x01, 0x09, 0x02, 0xAA, 0xBB, 0x02, 0x02, 0x12,
            0x00, 0x02, 0x09, 0x02, 0xCC, 0xDD, 0x02, 0x02, 0x12, 0x00, 0x03, 0x09, 0x02, 0xEE,
            0xFF,
        ];
        assert_eq!(progress(&full[..2]), (3, 0));
        assert_eq!(progress(&full[..12]), (3, 1));
        assert_eq!(progress(&full[..full.len() - 1]), (3, 2));
        assert_eq!(progress(&full), (3, 3));
        assert_eq!(progress(&[0x11, 0x05]), (1, 1));
        assert_eq!(progress(&[]), (0, 0));
    }

    #[test]
    fn test_decode_values() {
        let data = [
            0x02, 0x04, 0x12, 0x00, 0x03, 0x09, 0x06, 0x01, 0x00, 0x01, 0x08, 0x00, 0xFF, 0x0F,
            0xFE, 0x0A, 0x02, b'o', b'k',
        ];
        let value = Value::decode(&data).unwrap();
        let items = value.items().unwrap();
        assert_eq!(items[0].as_u64(), Some(3));
        assert_eq!(items[1].as_obis(), Some(ObisCode::new(1, 0, 1, 8, 0, 255)));
        assert_eq!(items[2].as_i64(), Some(-2));
        assert_eq!(value.to_string(), "{3, 1.0.1.8.0.255, -2, ok}");
    }

    #[test]
    fn test_truncated_value_is_error() {
        assert!(Value::decode(&[0x06, 0x00, 0x01]).is_err());
        assert!(Value::decode(&[0x13, 0x00]).is_err());
    }
}
