//! Association control (AARQ/AARE/RLRQ) in BER

use crate::engine::Authentication;
use dlms_core::{DlmsError, DlmsResult};

pub const AARQ: u8 = 0x60;
pub const AARE: u8 = 0x61;
pub const RLRQ: u8 = 0x62;
pub const RLRE: u8 = 0x63;

/// Logical name referencing, no ciphering
const APPLICATION_CONTEXT_LN: [u8; 7] = [0x60, 0x85, 0x74, 0x05, 0x08, 0x01, 0x01];

/// Prefix of authentication mechanism names
const MECHANISM_PREFIX: [u8; 6] = [0x60, 0x85, 0x74, 0x05, 0x08, 0x02];

/// xDLMS InitiateRequest tag
const INITIATE_REQUEST: u8 = 0x01;
/// xDLMS InitiateResponse tag
const INITIATE_RESPONSE: u8 = 0x08;
const CONFIRMED_SERVICE_ERROR: u8 = 0x0E;

pub const DLMS_VERSION: u8 = 6;

/// get, set, action, selective access, block transfer with get
pub const DEFAULT_CONFORMANCE: u32 = 0x00_7E_1F;

/// Association diagnostic asking for the HLS challenge exchange
pub const DIAGNOSTIC_AUTHENTICATION_REQUIRED: u8 = 14;

/// Release request with reason "normal"
pub const RELEASE_REQUEST: [u8; 5] = [RLRQ, 0x03, 0x80, 0x01, 0x00];

fn push_length(out: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        out.push(len as u8);
    } else if len <= 0xFF {
        out.push(0x81);
        out.push(len as u8);
    } else {
        out.push(0x82);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    }
}

fn push_tlv(out: &mut Vec<u8>, tag: u8, value: &[u8]) {
    out.push(tag);
    push_length(out, value.len());
    out.extend_from_slice(value);
}

fn mechanism_id(authentication: Authentication) -> Option<u8> {
    match authentication {
        Authentication::None => None,
        Authentication::Low => Some(1),
        Authentication::High => Some(2),
    }
}

/// Build an AARQ APDU
///
/// `calling_value` is the password for low authentication and the client
/// challenge for high authentication.
pub fn encode_aarq(
    authentication: Authentication,
    calling_value: &[u8],
    conformance: u32,
    max_pdu: u16,
) -> Vec<u8> {
    let mut body = Vec::new();
    let mut context = vec![0x06, APPLICATION_CONTEXT_LN.len() as u8];
    context.extend_from_slice(&APPLICATION_CONTEXT_LN);
    push_tlv(&mut body, 0xA1, &context);

    if let Some(mechanism) = mechanism_id(authentication) {
        // sender-acse-requirements: authentication
        push_tlv(&mut body, 0x8A, &[0x07, 0x80]);
        let mut name = MECHANISM_PREFIX.to_vec();
        name.push(mechanism);
        push_tlv(&mut body, 0x8B, &name);
        let mut value = Vec::new();
        push_tlv(&mut value, 0x80, calling_value);
        push_tlv(&mut body, 0xAC, &value);
    }

    let mut initiate = vec![INITIATE_REQUEST, 0x00, 0x00, 0x00, DLMS_VERSION];
    initiate.extend_from_slice(&[0x5F, 0x1F, 0x04, 0x00]);
    initiate.extend_from_slice(&conformance.to_be_bytes()[1..]);
    initiate.extend_from_slice(&max_pdu.to_be_bytes());
    let mut user_information = Vec::new();
    push_tlv(&mut user_information, 0x04, &initiate);
    push_tlv(&mut body, 0xBE, &user_information);

    let mut apdu = Vec::with_capacity(body.len() + 3);
    push_tlv(&mut apdu, AARQ, &body);
    apdu
}

/// One BER element: tag, value and the position after it
fn read_tlv(data: &[u8], pos: usize) -> DlmsResult<(u8, &[u8], usize)> {
    let truncated = || DlmsError::InvalidData(format!("BER element truncated at {}", pos));
    let tag = *data.get(pos).ok_or_else(truncated)?;
    let first = *data.get(pos + 1).ok_or_else(truncated)?;
    let (len, header) = match first {
        0x00..=0x7F => (first as usize, 2),
        0x81 => (*data.get(pos + 2).ok_or_else(truncated)? as usize, 3),
        0x82 => {
            let bytes = data.get(pos + 2..pos + 4).ok_or_else(truncated)?;
            (u16::from_be_bytes([bytes[0], bytes[1]]) as usize, 4)
        }
        _ => {
            return Err(DlmsError::InvalidData(format!(
                "Unsupported BER length 0x{:02X}",
                first
            )))
        }
    };
    let start = pos + header;
    let value = data.get(start..start + len).ok_or_else(truncated)?;
    Ok((tag, value, start + len))
}

/// Fields of an AARE this client acts on
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aare {
    pub result: u8,
    pub diagnostic: u8,
    /// Server-to-client challenge of HLS
    pub challenge: Option<Vec<u8>>,
    pub conformance: Option<u32>,
    pub max_pdu: Option<u16>,
    /// Confirmed-service-error carried instead of an InitiateResponse
    pub initiate_error: Option<u8>,
}

impl Aare {
    pub fn is_accepted(&self) -> bool {
        self.result == 0 && self.initiate_error.is_none()
    }

    pub fn needs_authentication(&self) -> bool {
        self.diagnostic == DIAGNOSTIC_AUTHENTICATION_REQUIRED
    }
}

/// Parse an AARE APDU
pub fn decode_aare(apdu: &[u8]) -> DlmsResult<Aare> {
    let (tag, body, _) = read_tlv(apdu, 0)?;
    if tag != AARE {
        return Err(DlmsError::Protocol(format!(
            "Expected AARE, got tag 0x{:02X}",
            tag
        )));
    }

    let mut aare = Aare::default();
    let mut pos = 0;
    while pos < body.len() {
        let (tag, value, next) = read_tlv(body, pos)?;
        pos = next;
        match tag {
            // association-result: INTEGER
            0xA2 => aare.result = *value.last().unwrap_or(&0),
            // result-source-diagnostic: user or provider choice wrapping an INTEGER
            0xA3 => aare.diagnostic = *value.last().unwrap_or(&0),
            0xAA => {
                let (_, challenge, _) = read_tlv(value, 0)?;
                aare.challenge = Some(challenge.to_vec());
            }
            0xBE => {
                let (_, initiate, _) = read_tlv(value, 0)?;
                parse_initiate_response(initiate, &mut aare)?;
            }
            _ => {}
        }
    }
    Ok(aare)
}

fn parse_initiate_response(data: &[u8], aare: &mut Aare) -> DlmsResult<()> {
    match data.first() {
        Some(&INITIATE_RESPONSE) => {
            // optional negotiated quality of service
            let mut pos = if data.get(1) == Some(&0x01) { 3 } else { 2 };
            let version = data.get(pos).copied();
            if version != Some(DLMS_VERSION) {
                log::warn!("server proposes DLMS version {:?}", version);
            }
            pos += 1;
            let conformance = data.get(pos + 4..pos + 7).ok_or_else(|| {
                DlmsError::InvalidData("InitiateResponse truncated".to_string())
            })?;
            aare.conformance = Some(
                conformance
                    .iter()
                    .fold(0u32, |acc, &b| (acc << 8) | b as u32),
            );
            let pdu = data.get(pos + 7..pos + 9).ok_or_else(|| {
                DlmsError::InvalidData("InitiateResponse truncated".to_string())
            })?;
            aare.max_pdu = Some(u16::from_be_bytes([pdu[0], pdu[1]]));
            Ok(())
        }
        Some(&CONFIRMED_SERVICE_ERROR) => {
            aare.initiate_error = data.last().copied();
            Ok(())
        }
        _ => Err(DlmsError::InvalidData(
            "Unknown user-information in AARE".to_string(),
        )),
    }
}
