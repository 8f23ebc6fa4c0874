//! Frame Check Sequence (FCS) calculation for HDLC (CRC-16/X.25)

use crate::error::{DlmsError, DlmsResult};

const INITIAL_FCS: u16 = 0xFFFF;
const GOOD_FCS: u16 = 0xF0B8;
const KEY: u16 = 0x8408; // Bit-reversed 1021

static FCS_TABLE: once_cell::sync::Lazy<[u16; 256]> = once_cell::sync::Lazy::new(|| {
    let mut table = [0u16; 256];
    for (b, slot) in table.iter_mut().enumerate() {
        let mut v = b as u16;
        for _ in 0..8 {
            v = if v & 1 == 1 { (v >> 1) ^ KEY } else { v >> 1 };
        }
        *slot = v;
    }
    table
});

/// Running FCS over a byte stream
#[derive(Debug, Clone, Copy)]
pub struct FcsCalc {
    fcs_value: u16,
}

impl FcsCalc {
    pub fn new() -> Self {
        Self {
            fcs_value: INITIAL_FCS,
        }
    }

    pub fn update(&mut self, data: u8) {
        self.fcs_value =
            (self.fcs_value >> 8) ^ FCS_TABLE[((self.fcs_value ^ data as u16) & 0xFF) as usize];
    }

    pub fn update_bytes(&mut self, data: &[u8]) {
        for &byte in data {
            self.update(byte);
        }
    }

    /// FCS as transmitted, least significant byte first
    pub fn fcs_value_bytes(&self) -> [u8; 2] {
        (self.fcs_value ^ 0xFFFF).to_le_bytes()
    }

    /// Validate a run that included the transmitted FCS bytes
    pub fn validate(&self) -> DlmsResult<()> {
        if self.fcs_value != GOOD_FCS {
            Err(DlmsError::FrameInvalid(format!(
                "FCS has wrong value: 0x{:04X}, expected 0x{:04X}",
                self.fcs_value, GOOD_FCS
            )))
        } else {
            Ok(())
        }
    }
}

impl Default for FcsCalc {
    fn default() -> Self {
        Self::new()
    }
}

/// FCS of `data`, ready to append to the frame
pub fn fcs16(data: &[u8]) -> [u8; 2] {
    let mut calc = FcsCalc::new();
    calc.update_bytes(data);
    calc.fcs_value_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_snrm_header_check() {
        // 7E A0 07 03 21 93 0F 01 7E is the textbook SNRM from client 0x10 to server 0x01
        assert_eq!(fcs16(&[0xA0, 0x07, 0x03, 0x21, 0x93]), [0x0F, 0x01]);
    }

    #[test]
    fn test_validate_includes_fcs() {
        let data = [0x01u8, 0x02, 0x03];
        let mut calc = FcsCalc::new();
        calc.update_bytes(&data);
        calc.update_bytes(&fcs16(&data));
        assert!(calc.validate().is_ok());

        let mut bad = FcsCalc::new();
        bad.update_bytes(&data);
        bad.update_bytes(&[0x00, 0x00]);
        assert!(bad.validate().is_err());
    }
}
