//! Protocol engine port
//!
//! The exchange, reassembly and bootstrap code never build or parse protocol
//! bytes themselves. Everything that knows about HDLC, the wrapper or xDLMS
//! sits behind [`ProtocolEngine`], so the same reliability code drives the
//! concrete [`CosemEngine`](crate::cosem::CosemEngine) and scripted engines in
//! tests.

use bytes::BytesMut;
use dlms_core::{CosemDateTime, DlmsError, DlmsResult, ObisCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Framing used between client and meter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceType {
    /// HDLC frames (IEC 62056-46), on serial lines or TCP
    Hdlc,
    /// IEC 62056-47 wrapper frames
    Net,
}

/// Authentication level requested in the AARQ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Authentication {
    #[default]
    None,
    /// Password (LLS)
    Low,
    /// Challenge/response (HLS)
    High,
}

impl FromStr for Authentication {
    type Err = DlmsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Authentication::None),
            "low" => Ok(Authentication::Low),
            "high" => Ok(Authentication::High),
            other => Err(DlmsError::InvalidData(format!(
                "Unknown authentication level: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for Authentication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Authentication::None => "None",
            Authentication::Low => "Low",
            Authentication::High => "High",
        };
        f.write_str(name)
    }
}

/// Kind of continuation a reply asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    /// Next link-layer segment of the same APDU
    Frame,
    /// Next application-layer block
    Datablock,
}

/// Set of pending continuations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MoreData {
    frame: bool,
    datablock: bool,
}

impl MoreData {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: RequestType) -> Self {
        self.insert(kind);
        self
    }

    pub fn insert(&mut self, kind: RequestType) {
        match kind {
            RequestType::Frame => self.frame = true,
            RequestType::Datablock => self.datablock = true,
        }
    }

    pub fn remove(&mut self, kind: RequestType) {
        match kind {
            RequestType::Frame => self.frame = false,
            RequestType::Datablock => self.datablock = false,
        }
    }

    pub fn contains(&self, kind: RequestType) -> bool {
        match kind {
            RequestType::Frame => self.frame,
            RequestType::Datablock => self.datablock,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.frame && !self.datablock
    }
}

/// Result of extracting payload from one reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataProgress {
    pub more: MoreData,
    /// Number of top-level elements announced by the payload
    pub max_progress: usize,
    /// Number of top-level elements received so far
    pub current_progress: usize,
}

/// Attribute of a COSEM object, addressed by logical name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttributeDescriptor {
    pub class_id: u16,
    pub obis: ObisCode,
    pub attribute: i8,
}

impl AttributeDescriptor {
    pub const fn new(class_id: u16, obis: ObisCode, attribute: i8) -> Self {
        Self {
            class_id,
            obis,
            attribute,
        }
    }
}

impl fmt::Display for AttributeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.class_id, self.obis, self.attribute)
    }
}

impl FromStr for AttributeDescriptor {
    type Err = DlmsError;

    /// Parse `CLASS:OBIS:ATTRIBUTE`, e.g. `3:1.0.1.8.0.255:2`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            DlmsError::InvalidData(format!(
                "Attribute must be CLASS:OBIS:ATTRIBUTE, got {}",
                s
            ))
        };
        let mut parts = s.splitn(3, ':');
        let class = parts.next().ok_or_else(invalid)?;
        let rest = parts.next().ok_or_else(invalid)?;
        let last = parts.next().ok_or_else(invalid)?;
        // The reduced OBIS form itself contains a colon (A-B:C.D.E*F)
        let (obis, attribute) = match last.rsplit_once(':') {
            Some((tail, attribute)) => (format!("{}:{}", rest, tail), attribute),
            None => (rest.to_string(), last),
        };
        Ok(Self {
            class_id: class.trim().parse().map_err(|_| invalid())?,
            obis: obis.trim().parse()?,
            attribute: attribute.trim().parse().map_err(|_| invalid())?,
        })
    }
}

/// Row filter of a profile generic buffer read
#[derive(Debug, Clone, PartialEq)]
pub enum SelectiveAccess {
    /// Rows `from..from + count`, 1-based. A count of 0 reads to the last row.
    ByEntry { from: u32, count: u32 },
    /// Rows whose sort column lies between `start` and `end`
    ByRange {
        sort: AttributeDescriptor,
        start: CosemDateTime,
        end: CosemDateTime,
    },
}

/// Producer and parser of protocol frames
///
/// Builders return complete link-layer frames ready for the transport.
/// Builders returning several frames expect one reply per frame.
pub trait ProtocolEngine: Send {
    fn interface_type(&self) -> InterfaceType;

    /// Link-layer connect request, `None` when the framing has no link layer
    fn snrm_request(&mut self) -> DlmsResult<Option<Vec<u8>>>;

    fn parse_ua_response(&mut self, reply: &[u8]) -> DlmsResult<()>;

    /// Largest information field the meter transmits, once negotiated
    fn max_info_tx(&self) -> Option<usize>;

    fn aarq_request(&mut self) -> DlmsResult<Vec<Vec<u8>>>;

    fn parse_aare_response(&mut self, reply: &[u8]) -> DlmsResult<()>;

    /// Whether the association still needs the HLS challenge exchange
    fn is_authentication_required(&self) -> bool;

    fn application_association_request(&mut self) -> DlmsResult<Vec<Vec<u8>>>;

    fn parse_application_association_response(&mut self, reply: &[u8]) -> DlmsResult<()>;

    fn disconnect_request(&mut self) -> DlmsResult<Vec<u8>>;

    fn read_request(
        &mut self,
        attribute: &AttributeDescriptor,
        access: Option<&SelectiveAccess>,
    ) -> DlmsResult<Vec<u8>>;

    /// Request frames writing the A-XDR encoded `value`
    fn write_request(
        &mut self,
        attribute: &AttributeDescriptor,
        value: &[u8],
    ) -> DlmsResult<Vec<Vec<u8>>>;

    fn receiver_ready(&mut self, kind: RequestType) -> DlmsResult<Vec<u8>>;

    /// Whether `reply` holds a whole frame
    fn is_packet_complete(&self, reply: &[u8]) -> bool;

    /// Application error codes carried by `reply`, empty on success
    fn check_reply_errors(&self, request: &[u8], reply: &[u8]) -> Vec<u8>;

    /// Append the payload of `reply` to `data`
    fn get_data_from_packet(&mut self, reply: &[u8], data: &mut BytesMut)
        -> DlmsResult<DataProgress>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_more_data_set() {
        let mut more = MoreData::none().with(RequestType::Frame);
        assert!(more.contains(RequestType::Frame));
        assert!(!more.contains(RequestType::Datablock));
        more.insert(RequestType::Datablock);
        more.remove(RequestType::Frame);
        assert!(!more.is_empty());
        more.remove(RequestType::Datablock);
        assert!(more.is_empty());
    }

    #[test]
    fn test_parse_attribute_descriptor() {
        let attr: AttributeDescriptor = "3:1.0.1.8.0.255:2".parse().unwrap();
        assert_eq!(attr.class_id, 3);
        assert_eq!(attr.obis, ObisCode::new(1, 0, 1, 8, 0, 255));
        assert_eq!(attr.attribute, 2);

        let reduced: AttributeDescriptor = "8:0-0:1.0.0:2".parse().unwrap();
        assert_eq!(reduced.obis, ObisCode::new(0, 0, 1, 0, 0, 255));
        assert_eq!(reduced.attribute, 2);

        assert!("3:1.0.1.8.0.255".parse::<AttributeDescriptor>().is_err());
    }

    #[test]
    fn test_authentication_names() {
        assert_eq!("HIGH".parse::<Authentication>().unwrap(), Authentication::High);
        assert_eq!(Authentication::Low.to_string(), "Low");
        assert!("hls5".parse::<Authentication>().is_err());
    }
}
