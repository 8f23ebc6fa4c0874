//! HDLC frame structure and encoding/decoding

use crate::error::{DlmsError, DlmsResult};
use crate::hdlc::address::HdlcAddress;
use crate::hdlc::fcs::{fcs16, FcsCalc};
use std::fmt;

/// HDLC frame flag
pub const FLAG: u8 = 0x7E;

/// LLC header in front of every client request APDU
pub const LLC_REQUEST: [u8; 3] = [0xE6, 0xE6, 0x00];

/// LLC header in front of every server response APDU
pub const LLC_RESPONSE: [u8; 3] = [0xE6, 0xE7, 0x00];

/// Largest value of the 11 bit frame length field
const MAX_FRAME_LENGTH: usize = 0x7FF;

/// Poll/final bit of the control field
const POLL_FINAL: u8 = 0x10;

/// HDLC frame type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Information,
    ReceiveReady,
    ReceiveNotReady,
    SetNormalResponseMode,
    Disconnect,
    UnnumberedAcknowledge,
    DisconnectMode,
    FrameReject,
    UnnumberedInformation,
    InvalidType,
}

impl FrameType {
    /// Get frame type from control byte
    pub fn from_control_byte(control_byte: u8) -> Self {
        match control_byte {
            x if (x & 0x01) == 0x00 => FrameType::Information,
            x if (x & 0x0F) == 0x01 => FrameType::ReceiveReady,
            x if (x & 0x0F) == 0x05 => FrameType::ReceiveNotReady,
            x if (x & 0xEF) == 0x83 => FrameType::SetNormalResponseMode,
            x if (x & 0xEF) == 0x43 => FrameType::Disconnect,
            x if (x & 0xEF) == 0x63 => FrameType::UnnumberedAcknowledge,
            x if (x & 0xEF) == 0x0F => FrameType::DisconnectMode,
            x if (x & 0xEF) == 0x87 => FrameType::FrameReject,
            x if (x & 0xEF) == 0x03 => FrameType::UnnumberedInformation,
            _ => FrameType::InvalidType,
        }
    }

    /// Control byte with the poll bit set
    ///
    /// Sequence numbers are only used by information and supervisory frames.
    pub fn to_control_byte(&self, send_seq: u8, recv_seq: u8) -> u8 {
        let recv = (recv_seq & 0x07) << 5;
        match self {
            FrameType::Information => recv | POLL_FINAL | ((send_seq & 0x07) << 1),
            FrameType::ReceiveReady => recv | POLL_FINAL | 0x01,
            FrameType::ReceiveNotReady => recv | POLL_FINAL | 0x05,
            FrameType::SetNormalResponseMode => 0x83 | POLL_FINAL,
            FrameType::Disconnect => 0x43 | POLL_FINAL,
            FrameType::UnnumberedAcknowledge => 0x63 | POLL_FINAL,
            FrameType::DisconnectMode => 0x0F | POLL_FINAL,
            FrameType::FrameReject => 0x87 | POLL_FINAL,
            FrameType::UnnumberedInformation => 0x03 | POLL_FINAL,
            FrameType::InvalidType => 0xFF,
        }
    }
}

/// HDLC frame
#[derive(Debug, Clone, PartialEq)]
pub struct HdlcFrame {
    destination: HdlcAddress,
    source: HdlcAddress,
    control: u8,
    segmented: bool,
    information: Vec<u8>,
}

impl HdlcFrame {
    /// Create a frame with an explicit control byte
    pub fn new(
        destination: HdlcAddress,
        source: HdlcAddress,
        control: u8,
        information: Vec<u8>,
    ) -> Self {
        Self {
            destination,
            source,
            control,
            segmented: false,
            information,
        }
    }

    /// Mark the frame as one segment of a longer message
    pub fn segmented(mut self, segmented: bool) -> Self {
        self.segmented = segmented;
        self
    }

    /// Encode the frame including both flags
    ///
    /// The header check sequence is only present when the frame carries an
    /// information field.
    pub fn encode(&self) -> DlmsResult<Vec<u8>> {
        let destination = self.destination.encode();
        let source = self.source.encode();
        let header_len = 2 + destination.len() + source.len() + 1;
        let length = if self.information.is_empty() {
            header_len + 2
        } else {
            header_len + 2 + self.information.len() + 2
        };
        if length > MAX_FRAME_LENGTH {
            return Err(DlmsError::FrameInvalid(format!(
                "HDLC frame of {} bytes exceeds the {} byte length field",
                length, MAX_FRAME_LENGTH
            )));
        }

        let mut body = Vec::with_capacity(length);
        let format = 0xA0 | if self.segmented { 0x08 } else { 0x00 };
        body.push(format | ((length >> 8) & 0x07) as u8);
        body.push((length & 0xFF) as u8);
        body.extend_from_slice(&destination);
        body.extend_from_slice(&source);
        body.push(self.control);
        if !self.information.is_empty() {
            let hcs = fcs16(&body);
            body.extend_from_slice(&hcs);
            body.extend_from_slice(&self.information);
        }
        let fcs = fcs16(&body);
        body.extend_from_slice(&fcs);

        let mut result = Vec::with_capacity(body.len() + 2);
        result.push(FLAG);
        result.extend_from_slice(&body);
        result.push(FLAG);
        Ok(result)
    }

    /// Decode the first frame found in `data`
    ///
    /// # Returns
    ///
    /// The frame and the number of bytes consumed from `data`, trailing
    /// flag included.
    pub fn decode(data: &[u8]) -> DlmsResult<(Self, usize)> {
        let start = data
            .iter()
            .position(|&b| b == FLAG)
            .ok_or_else(|| DlmsError::FrameInvalid("Opening flag not found".to_string()))?;
        let frame = &data[start + 1..];
        if frame.len() < 2 {
            return Err(DlmsError::FrameInvalid("Frame too short".to_string()));
        }

        if (frame[0] & 0xF0) != 0xA0 {
            return Err(DlmsError::FrameInvalid("Illegal frame format".to_string()));
        }
        let segmented = (frame[0] & 0x08) == 0x08;
        let length = (((frame[0] & 0x07) as usize) << 8) | frame[1] as usize;
        if frame.len() < length + 1 {
            return Err(DlmsError::FrameInvalid(format!(
                "Frame truncated: {} of {} bytes",
                frame.len(),
                length + 1
            )));
        }
        if frame[length] != FLAG {
            return Err(DlmsError::FrameInvalid("Closing flag not found".to_string()));
        }
        let body = &frame[..length];

        let mut pos = 2;
        let (destination, dest_len) = HdlcAddress::decode(&body[pos..])?;
        pos += dest_len;
        let (source, src_len) = HdlcAddress::decode(&body[pos..])?;
        pos += src_len;
        let control = *body
            .get(pos)
            .ok_or_else(|| DlmsError::FrameInvalid("Frame too short for control field".to_string()))?;
        pos += 1;

        if FrameType::from_control_byte(control) == FrameType::InvalidType {
            return Err(DlmsError::FrameInvalid(format!(
                "Control field unknown: 0x{:02X}",
                control
            )));
        }

        let information = if body.len() > pos + 2 {
            let mut hcs = FcsCalc::new();
            hcs.update_bytes(&body[..pos + 2]);
            hcs.validate()?;
            pos += 2;
            if body.len() < pos + 2 {
                return Err(DlmsError::FrameInvalid("Frame too short for FCS".to_string()));
            }
            body[pos..body.len() - 2].to_vec()
        } else {
            Vec::new()
        };

        let mut fcs = FcsCalc::new();
        fcs.update_bytes(body);
        fcs.validate()?;

        let frame = Self {
            destination,
            source,
            control,
            segmented,
            information,
        };
        Ok((frame, start + 1 + length + 1))
    }

    pub fn frame_type(&self) -> FrameType {
        FrameType::from_control_byte(self.control)
    }

    pub fn control(&self) -> u8 {
        self.control
    }

    /// N(S) of an information frame
    pub fn send_sequence(&self) -> Option<u8> {
        match self.frame_type() {
            FrameType::Information => Some((self.control >> 1) & 0x07),
            _ => None,
        }
    }

    /// N(R) of an information or supervisory frame
    pub fn receive_sequence(&self) -> Option<u8> {
        match self.frame_type() {
            FrameType::Information | FrameType::ReceiveReady | FrameType::ReceiveNotReady => {
                Some((self.control >> 5) & 0x07)
            }
            _ => None,
        }
    }

    pub fn information_field(&self) -> &[u8] {
        &self.information
    }

    pub fn into_information_field(self) -> Vec<u8> {
        self.information
    }

    pub fn is_segmented(&self) -> bool {
        self.segmented
    }

    pub fn source(&self) -> HdlcAddress {
        self.source
    }

    pub fn destination(&self) -> HdlcAddress {
        self.destination
    }
}

impl fmt::Display for HdlcFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HDLC Frame: type={:?}, src={}, dst={}, info={}",
            self.frame_type(),
            self.source,
            self.destination,
            self.information.len()
        )
    }
}

/// Whether `data` holds a whole HDLC frame
///
/// Bytes with an unusable format field count as complete so that the decoder
/// reports them instead of the receiver waiting for more.
pub fn is_frame_complete(data: &[u8]) -> bool {
    let Some(start) = data.iter().position(|&b| b == FLAG) else {
        return false;
    };
    let frame = &data[start + 1..];
    if frame.len() < 2 {
        return false;
    }
    if (frame[0] & 0xF0) != 0xA0 {
        // Back-to-back flags: the closing flag of a previous frame
        return frame[0] != FLAG;
    }
    let length = (((frame[0] & 0x07) as usize) << 8) | frame[1] as usize;
    frame.len() > length
}
