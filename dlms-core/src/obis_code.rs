use crate::error::{DlmsError, DlmsResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// OBIS (Object Identification System) code of a COSEM object
///
/// Serialized as its dotted string form so that settings files stay readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObisCode {
    bytes: [u8; 6],
}

impl ObisCode {
    /// Association LN object of the current association
    pub const CURRENT_ASSOCIATION: ObisCode = ObisCode::new(0, 0, 40, 0, 0, 255);

    pub const fn new(a: u8, b: u8, c: u8, d: u8, e: u8, f: u8) -> Self {
        Self {
            bytes: [a, b, c, d, e, f],
        }
    }

    /// Parse an OBIS code from either `1.0.1.8.0.255` or `1-0:1.8.0*255`
    ///
    /// In the reduced form a missing `*F` group means 255.
    pub fn parse(s: &str) -> DlmsResult<Self> {
        let s = s.trim();
        let groups: Vec<&str> = if s.contains(':') || s.contains('-') || s.contains('*') {
            let (ab, rest) = s
                .split_once(':')
                .ok_or_else(|| Self::invalid(s))?;
            let (a, b) = ab.split_once('-').ok_or_else(|| Self::invalid(s))?;
            let (cde, f) = match rest.split_once('*') {
                Some((cde, f)) => (cde, f),
                None => (rest, "255"),
            };
            let mut groups = vec![a, b];
            groups.extend(cde.split('.'));
            groups.push(f);
            groups
        } else {
            s.split('.').collect()
        };

        if groups.len() != 6 {
            return Err(Self::invalid(s));
        }
        let mut bytes = [0u8; 6];
        for (slot, group) in bytes.iter_mut().zip(&groups) {
            *slot = group.trim().parse::<u8>().map_err(|_| Self::invalid(s))?;
        }
        Ok(Self { bytes })
    }

    fn invalid(s: &str) -> DlmsError {
        DlmsError::InvalidData(format!("Invalid OBIS code format: {}", s))
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.bytes
    }

    pub fn to_bytes(&self) -> [u8; 6] {
        self.bytes
    }
}

impl From<[u8; 6]> for ObisCode {
    fn from(bytes: [u8; 6]) -> Self {
        Self { bytes }
    }
}

impl FromStr for ObisCode {
    type Err = DlmsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ObisCode {
    type Error = DlmsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ObisCode> for String {
    fn from(code: ObisCode) -> Self {
        code.to_string()
    }
}

impl fmt::Display for ObisCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.bytes;
        write!(f, "{}.{}.{}.{}.{}.{}", b[0], b[1], b[2], b[3], b[4], b[5])
    }
}
