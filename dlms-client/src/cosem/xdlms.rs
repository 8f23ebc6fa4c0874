//! xDLMS service APDUs with logical name referencing

use super::axdr::{self, tag};
use crate::engine::{AttributeDescriptor, SelectiveAccess};
use dlms_core::{DlmsError, DlmsResult, ObisCode};

pub const GET_REQUEST: u8 = 0xC0;
pub const SET_REQUEST: u8 = 0xC1;
pub const ACTION_REQUEST: u8 = 0xC3;
pub const GET_RESPONSE: u8 = 0xC4;
pub const SET_RESPONSE: u8 = 0xC5;
pub const ACTION_RESPONSE: u8 = 0xC7;
pub const EXCEPTION_RESPONSE: u8 = 0xD8;
pub const CONFIRMED_SERVICE_ERROR: u8 = 0x0E;

const NORMAL: u8 = 0x01;
const NEXT: u8 = 0x02;
const WITH_DATABLOCK: u8 = 0x02;

/// Invoke id 1, confirmed, high priority
pub const INVOKE_ID_AND_PRIORITY: u8 = 0xC1;

/// Code reported for service errors that carry no data-access-result
pub const OTHER_REASON: u8 = 250;

/// Reply-to-HLS-authentication method of the association object
pub const REPLY_TO_HLS_AUTHENTICATION: u8 = 1;

fn push_descriptor(out: &mut Vec<u8>, class_id: u16, obis: &ObisCode, id: u8) {
    out.extend_from_slice(&class_id.to_be_bytes());
    out.extend_from_slice(obis.as_bytes());
    out.push(id);
}

fn push_selective_access(out: &mut Vec<u8>, access: &SelectiveAccess) {
    out.push(0x01);
    match access {
        SelectiveAccess::ByEntry { from, count } => {
            let to = if *count == 0 { 0 } else { from + count - 1 };
            out.extend_from_slice(&[0x02, tag::STRUCTURE, 0x04, tag::UINT32]);
            out.extend_from_slice(&from.to_be_bytes());
            out.push(tag::UINT32);
            out.extend_from_slice(&to.to_be_bytes());
            // all columns
            out.extend_from_slice(&[tag::UINT16, 0x00, 0x01, tag::UINT16, 0x00, 0x00]);
        }
        SelectiveAccess::ByRange { sort, start, end } => {
            out.extend_from_slice(&[0x01, tag::STRUCTURE, 0x04]);
            out.extend_from_slice(&[tag::STRUCTURE, 0x04, tag::UINT16]);
            out.extend_from_slice(&sort.class_id.to_be_bytes());
            out.extend_from_slice(&[tag::OCTET_STRING, 0x06]);
            out.extend_from_slice(sort.obis.as_bytes());
            out.extend_from_slice(&[tag::INT8, sort.attribute as u8, tag::UINT16, 0x00, 0x00]);
            for date in [start, end] {
                out.extend_from_slice(&[tag::OCTET_STRING, 0x0C]);
                out.extend_from_slice(date.as_bytes());
            }
            // all columns
            out.extend_from_slice(&[tag::ARRAY, 0x00]);
        }
    }
}

/// GET-Request-Normal
pub fn get_request(attribute: &AttributeDescriptor, access: Option<&SelectiveAccess>) -> Vec<u8> {
    let mut apdu = vec![GET_REQUEST, NORMAL, INVOKE_ID_AND_PRIORITY];
    push_descriptor(
        &mut apdu,
        attribute.class_id,
        &attribute.obis,
        attribute.attribute as u8,
    );
    match access {
        Some(access) => push_selective_access(&mut apdu, access),
        None => apdu.push(0x00),
    }
    apdu
}

/// GET-Request-Next acknowledging block `block_number`
pub fn get_next_request(block_number: u32) -> Vec<u8> {
    let mut apdu = vec![GET_REQUEST, NEXT, INVOKE_ID_AND_PRIORITY];
    apdu.extend_from_slice(&block_number.to_be_bytes());
    apdu
}

/// SET-Request-Normal with an A-XDR encoded value
pub fn set_request(attribute: &AttributeDescriptor, value: &[u8]) -> Vec<u8> {
    let mut apdu = vec![SET_REQUEST, NORMAL, INVOKE_ID_AND_PRIORITY];
    push_descriptor(
        &mut apdu,
        attribute.class_id,
        &attribute.obis,
        attribute.attribute as u8,
    );
    apdu.push(0x00);
    apdu.extend_from_slice(value);
    apdu
}

/// ACTION-Request-Normal with an optional A-XDR encoded parameter
pub fn action_request(class_id: u16, obis: &ObisCode, method: u8, parameter: Option<&[u8]>) -> Vec<u8> {
    let mut apdu = vec![ACTION_REQUEST, NORMAL, INVOKE_ID_AND_PRIORITY];
    push_descriptor(&mut apdu, class_id, obis, method);
    match parameter {
        Some(parameter) => {
            apdu.push(0x01);
            apdu.extend_from_slice(parameter);
        }
        None => apdu.push(0x00),
    }
    apdu
}

/// A-XDR octet string
pub fn octet_string(value: &[u8]) -> Vec<u8> {
    let mut out = vec![tag::OCTET_STRING];
    axdr::encode_length(value.len(), &mut out);
    out.extend_from_slice(value);
    out
}

/// Error code carried by a response APDU, if any
pub fn response_error(apdu: &[u8]) -> Option<u8> {
    match apdu {
        [GET_RESPONSE, NORMAL, _, 0x01, result, ..] => Some(*result),
        [GET_RESPONSE, WITH_DATABLOCK, _, _, _, _, _, _, 0x01, result, ..] => Some(*result),
        [SET_RESPONSE, NORMAL, _, result, ..] if *result != 0 => Some(*result),
        [ACTION_RESPONSE, NORMAL, _, result, ..] if *result != 0 => Some(*result),
        [EXCEPTION_RESPONSE, ..] | [CONFIRMED_SERVICE_ERROR, ..] => Some(OTHER_REASON),
        _ => None,
    }
}

/// Datablock header of a GET-Response-With-Datablock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub number: u32,
    pub last: bool,
}

/// Start of a GET response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetResponseHeader {
    /// Bytes before the first data byte
    pub length: usize,
    pub block: Option<Block>,
}

/// Parse the header of a GET response; the data follows it
pub fn get_response_header(apdu: &[u8]) -> DlmsResult<GetResponseHeader> {
    if let Some(code) = response_error(apdu) {
        return Err(DlmsError::Application(code));
    }
    match apdu {
        [GET_RESPONSE, NORMAL, _, 0x00, ..] => Ok(GetResponseHeader {
            length: 4,
            block: None,
        }),
        [GET_RESPONSE, WITH_DATABLOCK, _, last, b0, b1, b2, b3, 0x00, rest @ ..] => {
            let (_, used) = axdr::decode_length(rest).ok_or_else(|| {
                DlmsError::InvalidData("Datablock length truncated".to_string())
            })?;
            Ok(GetResponseHeader {
                length: 9 + used,
                block: Some(Block {
                    number: u32::from_be_bytes([*b0, *b1, *b2, *b3]),
                    last: *last != 0,
                }),
            })
        }
        _ => Err(DlmsError::Protocol(format!(
            "Unexpected reply to GET: {}",
            dlms_core::to_hex(&apdu[..apdu.len().min(8)])
        ))),
    }
}

/// Return data of an ACTION response, if the meter sent any
pub fn action_return_data(apdu: &[u8]) -> DlmsResult<Option<&[u8]>> {
    if let Some(code) = response_error(apdu) {
        return Err(DlmsError::Application(code));
    }
    match apdu {
        [ACTION_RESPONSE, NORMAL, _, 0x00, 0x01, 0x00, data @ ..] => Ok(Some(data)),
        [ACTION_RESPONSE, NORMAL, _, 0x00, 0x01, 0x01, result, ..] => {
            Err(DlmsError::Application(*result))
        }
        [ACTION_RESPONSE, NORMAL, _, 0x00, ..] => Ok(None),
        _ => Err(DlmsError::Protocol("Unexpected reply to ACTION".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::CLOCK_CLASS;
    use dlms_core::CosemDateTime;

    const REGISTER: AttributeDescriptor =
        AttributeDescriptor::new(3, ObisCode::new(1, 0, 1, 8, 0, 255), 2);

    #[test]
    fn test_get_request_normal() {
        assert_eq!(
            get_request(&REGISTER, None),
            vec![0xC0, 0x01, 0xC1, 0x00, 0x03, 0x01, 0x00, 0x01, 0x08, 0x00, 0xFF, 0x02, 0x00]
        );
        assert_eq!(get_next_request(2), vec![0xC0, 0x02, 0xC1, 0x00, 0x00, 0x00, 0x02]);
    }

    #[test]
    fn test_rows_by_entry() {
        let profile = AttributeDescriptor::new(7, ObisCode::new(1, 0, 99, 1, 0, 255), 2);
        let access = SelectiveAccess::ByEntry { from: 1, count: 10 };
        let apdu = get_request(&profile, Some(&access));
        assert_eq!(
            &apdu[12..],
            &[
                0x01, 0x02, 0x02, 0x04, 0x06, 0x00, 0x00, 0x00, 0x01, 0x06, 0x00, 0x00, 0x00,
                0x0A, 0x12, 0x00, 0x01, 0x12, 0x00, 0x00
            ]
        );
    }

    #[test]
    fn test_rows_by_range_layout() {
        let start = CosemDateTime::decode(&[0x07, 0xE8, 1, 1, 1, 0, 0, 0, 0xFF, 0x80, 0, 0xFF]).unwrap();
        let end = CosemDateTime::decode(&[0x07, 0xE8, 1, 2, 2, 0, 0, 0, 0xFF, 0x80, 0, 0xFF]).unwrap();
        let sort = AttributeDescriptor::new(CLOCK_CLASS, ObisCode::new(0, 0, 1, 0, 0, 255), 2);
        let profile = AttributeDescriptor::new(7, ObisCode::new(1, 0, 99, 1, 0, 255), 2);
        let apdu = get_request(&profile, Some(&SelectiveAccess::ByRange { sort, start, end }));

        assert_eq!(&apdu[12..15], &[0x01, 0x01, 0x02]);
        assert_eq!(&apdu[16..20], &[0x02, 0x04, 0x12, 0x00]);
        assert_eq!(apdu.len(), 12 + 3 + 18 + 14 + 14 + 2 + 1);
        assert_eq!(&apdu[apdu.len() - 2..], &[0x01, 0x00]);
    }

    #[test]
    fn test_response_errors() {
        assert_eq!(response_error(&[0xC4, 0x01, 0xC1, 0x01, 0x03]), Some(3));
        assert_eq!(response_error(&[0xC4, 0x01, 0xC1, 0x00, 0x11, 0x05]), None);
        assert_eq!(
            response_error(&[0xC4, 0x02, 0xC1, 0x00, 0x00, 0x00, 0x00, 0x02, 0x01, 0x04]),
            Some(4)
        );
        assert_eq!(response_error(&[0xC5, 0x01, 0xC1, 0x00]), None);
        assert_eq!(response_error(&[0xC5, 0x01, 0xC1, 0x03]), Some(3));
        assert_eq!(response_error(&[0xD8, 0x01, 0x02]), Some(OTHER_REASON));
    }

    #[test]
    fn test_datablock_header() {
        let apdu = [0xC4, 0x02, 0xC1, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x81, 0x90, 0x01];
        let header = get_response_header(&apdu).unwrap();
        assert_eq!(header.length, 11);
        assert_eq!(header.block, Some(Block { number: 1, last: false }));

        let normal = get_response_header(&[0xC4, 0x01, 0xC1, 0x00, 0x11, 0x05]).unwrap();
        assert_eq!(normal, GetResponseHeader { length: 4, block: None });

        assert!(matches!(
            get_response_header(&[0xC4, 0x01, 0xC1, 0x01, 0x03]),
            Err(DlmsError::Application(3))
        ));
    }

    #[test]
    fn test_action_return_data() {
        let apdu = [0xC7, 0x01, 0xC1, 0x00, 0x01, 0x00, 0x09, 0x02, 0xAB, 0xCD];
        assert_eq!(action_return_data(&apdu).unwrap(), Some(&apdu[6..]));
        assert_eq!(action_return_data(&[0xC7, 0x01, 0xC1, 0x00, 0x00]).unwrap(), None);
        assert!(action_return_data(&[0xC7, 0x01, 0xC1, 0x0B]).is_err());
    }
}
