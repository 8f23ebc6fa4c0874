//! HDLC link parameter negotiation (SNRM/UA information field)

use crate::error::{DlmsError, DlmsResult};

const FORMAT_IDENTIFIER: u8 = 0x81;
const GROUP_IDENTIFIER: u8 = 0x80;

const MAX_INFO_TX: u8 = 0x05;
const MAX_INFO_RX: u8 = 0x06;
const WINDOW_TX: u8 = 0x07;
const WINDOW_RX: u8 = 0x08;

pub const DEFAULT_MAX_INFO: u16 = 128;
pub const DEFAULT_WINDOW: u32 = 1;

/// Link limits announced by one side of the link
///
/// Values are seen from the side that sends them: in a UA frame
/// `max_info_tx` is the largest information field the meter transmits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkParameters {
    pub max_info_tx: u16,
    pub max_info_rx: u16,
    pub window_tx: u32,
    pub window_rx: u32,
}

impl Default for LinkParameters {
    fn default() -> Self {
        Self {
            max_info_tx: DEFAULT_MAX_INFO,
            max_info_rx: DEFAULT_MAX_INFO,
            window_tx: DEFAULT_WINDOW,
            window_rx: DEFAULT_WINDOW,
        }
    }
}

impl LinkParameters {
    /// Information field of an SNRM frame
    ///
    /// Defaults are implied by an empty field, so nothing is encoded for them.
    pub fn encode(&self) -> Vec<u8> {
        if *self == Self::default() {
            return Vec::new();
        }
        let mut group = Vec::new();
        push_value(&mut group, MAX_INFO_TX, self.max_info_tx as u32, false);
        push_value(&mut group, MAX_INFO_RX, self.max_info_rx as u32, false);
        push_value(&mut group, WINDOW_TX, self.window_tx, true);
        push_value(&mut group, WINDOW_RX, self.window_rx, true);

        let mut result = Vec::with_capacity(group.len() + 3);
        result.push(FORMAT_IDENTIFIER);
        result.push(GROUP_IDENTIFIER);
        result.push(group.len() as u8);
        result.extend_from_slice(&group);
        result
    }

    /// Parse the information field of a UA frame
    ///
    /// An empty field means the peer accepted the defaults. Unknown parameter
    /// ids are skipped.
    pub fn decode(data: &[u8]) -> DlmsResult<Self> {
        let mut params = Self::default();
        if data.is_empty() {
            return Ok(params);
        }
        if data.len() < 3 || data[0] != FORMAT_IDENTIFIER || data[1] != GROUP_IDENTIFIER {
            return Err(DlmsError::InvalidData(
                "Link parameters must start with 81 80".to_string(),
            ));
        }
        let end = 3 + data[2] as usize;
        let group = data.get(3..end).ok_or_else(|| {
            DlmsError::InvalidData("Link parameter group truncated".to_string())
        })?;

        let mut pos = 0;
        while pos + 2 <= group.len() {
            let id = group[pos];
            let len = group[pos + 1] as usize;
            pos += 2;
            let raw = group.get(pos..pos + len).ok_or_else(|| {
                DlmsError::InvalidData(format!("Link parameter 0x{:02X} truncated", id))
            })?;
            pos += len;
            if len > 4 {
                log::debug!("skipping link parameter 0x{:02X} of {} bytes", id, len);
                continue;
            }
            let value = raw.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32);
            match id {
                MAX_INFO_TX => params.max_info_tx = clamp_info(value),
                MAX_INFO_RX => params.max_info_rx = clamp_info(value),
                WINDOW_TX => params.window_tx = value,
                WINDOW_RX => params.window_rx = value,
                _ => log::debug!("ignoring link parameter 0x{:02X}", id),
            }
        }
        Ok(params)
    }
}

fn clamp_info(value: u32) -> u16 {
    value.min(u16::MAX as u32) as u16
}

fn push_value(out: &mut Vec<u8>, id: u8, value: u32, wide: bool) {
    out.push(id);
    if wide {
        out.push(4);
        out.extend_from_slice(&value.to_be_bytes());
    } else if value <= 0xFF {
        out.push(1);
        out.push(value as u8);
    } else {
        out.push(2);
        out.extend_from_slice(&(value as u16).to_be_bytes());
    }
}
