//! Association view and profile generic helpers

use crate::cosem::axdr::Value;
use crate::engine::AttributeDescriptor;
use dlms_core::{DlmsError, DlmsResult, ObisCode};
use std::fmt;

pub const DATA_CLASS: u16 = 1;
pub const REGISTER_CLASS: u16 = 3;
pub const EXTENDED_REGISTER_CLASS: u16 = 4;
pub const DEMAND_REGISTER_CLASS: u16 = 5;
pub const PROFILE_GENERIC_CLASS: u16 = 7;
pub const CLOCK_CLASS: u16 = 8;
pub const ASSOCIATION_LN_CLASS: u16 = 15;

/// Object list of the current association
pub const ASSOCIATION_VIEW: AttributeDescriptor =
    AttributeDescriptor::new(ASSOCIATION_LN_CLASS, ObisCode::CURRENT_ASSOCIATION, 2);

pub const PROFILE_BUFFER: i8 = 2;
pub const PROFILE_CAPTURE_OBJECTS: i8 = 3;
pub const PROFILE_SORT_OBJECT: i8 = 6;

/// Entry of the association object list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectEntry {
    pub class_id: u16,
    pub version: u8,
    pub obis: ObisCode,
}

impl ObjectEntry {
    pub fn attribute(&self, index: i8) -> AttributeDescriptor {
        AttributeDescriptor::new(self.class_id, self.obis, index)
    }

    pub fn class_name(&self) -> &'static str {
        match self.class_id {
            DATA_CLASS => "Data",
            REGISTER_CLASS => "Register",
            EXTENDED_REGISTER_CLASS => "ExtendedRegister",
            DEMAND_REGISTER_CLASS => "DemandRegister",
            PROFILE_GENERIC_CLASS => "ProfileGeneric",
            CLOCK_CLASS => "Clock",
            ASSOCIATION_LN_CLASS => "AssociationLogicalName",
            _ => "Unknown",
        }
    }

    /// Attributes worth reading for this interface class, scalers first
    ///
    /// Empty for classes this reader does not interpret and for the
    /// association and profile objects, which are read separately.
    pub fn attributes_to_read(&self) -> &'static [i8] {
        match self.class_id {
            DATA_CLASS => &[2],
            REGISTER_CLASS => &[3, 2],
            EXTENDED_REGISTER_CLASS => &[3, 2, 4, 5],
            DEMAND_REGISTER_CLASS => &[4, 2, 3, 5, 6, 7, 8, 9],
            CLOCK_CLASS => &[2, 3, 4, 5, 6, 7, 8, 9],
            _ => &[],
        }
    }
}

impl fmt::Display for ObjectEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.class_name(), self.obis)
    }
}

fn invalid(what: &str) -> DlmsError {
    DlmsError::InvalidData(format!("Malformed {}", what))
}

/// Parse attribute 2 of the association object
pub fn parse_object_list(data: &[u8]) -> DlmsResult<Vec<ObjectEntry>> {
    let value = Value::decode(data)?;
    let items = value.items().ok_or_else(|| invalid("object list"))?;
    items
        .iter()
        .map(|item| {
            let fields = item.items().ok_or_else(|| invalid("object list entry"))?;
            match fields {
                [class_id, version, obis, ..] => Ok(ObjectEntry {
                    class_id: class_id
                        .as_u64()
                        .and_then(|v| u16::try_from(v).ok())
                        .ok_or_else(|| invalid("class id"))?,
                    version: version
                        .as_u64()
                        .and_then(|v| u8::try_from(v).ok())
                        .ok_or_else(|| invalid("version"))?,
                    obis: obis.as_obis().ok_or_else(|| invalid("logical name"))?,
                }),
                _ => Err(invalid("object list entry")),
            }
        })
        .collect()
}

/// Object, logical name and attribute of a capture object structure
fn capture_object(item: &Value) -> DlmsResult<AttributeDescriptor> {
    match item.items() {
        Some([class_id, obis, attribute, ..]) => Ok(AttributeDescriptor::new(
            class_id
                .as_u64()
                .and_then(|v| u16::try_from(v).ok())
                .ok_or_else(|| invalid("class id"))?,
            obis.as_obis().ok_or_else(|| invalid("logical name"))?,
            attribute
                .as_i64()
                .and_then(|v| i8::try_from(v).ok())
                .ok_or_else(|| invalid("attribute index"))?,
        )),
        _ => Err(invalid("capture object")),
    }
}

/// Parse attribute 3 of a profile generic: its columns
pub fn parse_capture_objects(data: &[u8]) -> DlmsResult<Vec<AttributeDescriptor>> {
    let value = Value::decode(data)?;
    let items = value.items().ok_or_else(|| invalid("capture objects"))?;
    items.iter().map(capture_object).collect()
}

/// Parse attribute 6 of a profile generic: the column the buffer is sorted on
///
/// `None` when the meter leaves it unset (null, or class id 0).
pub fn parse_sort_object(data: &[u8]) -> DlmsResult<Option<AttributeDescriptor>> {
    if data.is_empty() {
        return Ok(None);
    }
    match Value::decode(data)? {
        Value::Null => Ok(None),
        value => {
            let sort = capture_object(&value)?;
            Ok((sort.class_id != 0).then_some(sort))
        }
    }
}

/// Rows of a profile generic buffer
pub fn parse_rows(data: &[u8]) -> DlmsResult<Vec<Vec<Value>>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let value = Value::decode(data)?;
    let rows = value.items().ok_or_else(|| invalid("profile buffer"))?;
    Ok(rows
        .iter()
        .map(|row| match row.items() {
            Some(cells) => cells.to_vec(),
            None => vec![row.clone()],
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_object_list() {
        let data = [
            0x01, 0x02, // array of 2
            0x02, 0x04, 0x12, 0x00, 0x03, 0x11, 0x00, 0x09, 0x06, 0x01, 0x00, 0x01, 0x08, 0x00,
            0xFF, 0x02, 0x00, //
            0x02, 0x04, 0x12, 0x00, 0x07, 0x11, 0x01, 0x09, 0x06, 0x01, 0x00, 0x63, 0x01, 0x00,
            0xFF, 0x00,
        ];
        let objects = parse_object_list(&data).unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].class_name(), "Register");
        assert_eq!(objects[0].attributes_to_read(), &[3, 2]);
        assert_eq!(objects[1].obis, ObisCode::new(1, 0, 99, 1, 0, 255));
        assert_eq!(objects[1].version, 1);
        assert!(objects[1].attributes_to_read().is_empty());
        assert_eq!(objects[1].to_string(), "ProfileGeneric 1.0.99.1.0.255");
    }

    #[test]
    fn test_parse_capture_objects() {
        let data = [
            0x01, 0x01, 0x02, 0x04, 0x12, 0x00, 0x08, 0x09, 0x06, 0x00, 0x00, 0x01, 0x00, 0x00,
            0xFF, 0x0F, 0x02, 0x12, 0x00, 0x00,
        ];
        let columns = parse_capture_objects(&data).unwrap();
        assert_eq!(
            columns,
            vec![AttributeDescriptor::new(8, ObisCode::new(0, 0, 1, 0, 0, 255), 2)]
        );
        assert!(parse_capture_objects(&[0x11, 0x01]).is_err());
    }

    #[test]
    fn test_parse_rows() {
        let data = [0x01, 0x02, 0x02, 0x01, 0x11, 0x01, 0x02, 0x01, 0x11, 0x02];
        let rows = parse_rows(&data).unwrap();
        assert_eq!(rows, vec![vec![Value::Unsigned(1)], vec![Value::Unsigned(2)]]);
        assert!(parse_rows(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_parse_sort_object() {
        let data = [
            0x02, 0x04, 0x12, 0x00, 0x08, 0x09, 0x06, 0x00, 0x00, 0x01, 0x00, 0x00, 0xFF, 0x0F,
            0x02, 0x12, 0x00, 0x00,
        ];
        assert_eq!(
            parse_sort_object(&data).unwrap(),
            Some(AttributeDescriptor::new(8, ObisCode::new(0, 0, 1, 0, 0, 255), 2))
        );

        let unset = [
            0x02, 0x04, 0x12, 0x00, 0x00, 0x09, 0x06, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x0F,
            0x00, 0x12, 0x00, 0x00,
        ];
        assert_eq!(parse_sort_object(&unset).unwrap(), None);
        assert_eq!(parse_sort_object(&[0x00]).unwrap(), None);
        assert_eq!(parse_sort_object(&[]).unwrap(), None);
        assert!(parse_sort_object(&[0x11, 0x01]).is_err());
    }
}
