//! IEC 62056-21 sign-on used to switch an optical port into HDLC mode (mode E)

use dlms_core::{DlmsError, DlmsResult};

/// Sign-on request sent at 300 baud
pub const SIGN_ON_REQUEST: &[u8] = b"/?!\r\n";

/// Line terminator of sign-on replies
pub const LINE_END: u8 = b'\n';

/// Protocol control character selecting the HDLC procedure
const PROTOCOL_HDLC: u8 = b'2';

/// Mode control character selecting binary mode
const MODE_BINARY: u8 = b'2';

/// Identification line of a meter, e.g. `/LGZ5ZMD3104107.B32\r\n`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identification {
    pub manufacturer: String,
    pub baud_char: char,
    pub baud_rate: u32,
}

/// Baud rate announced by identification character `c`
pub fn baud_rate(c: char) -> DlmsResult<u32> {
    match c {
        '0' => Ok(300),
        '1' => Ok(600),
        '2' => Ok(1200),
        '3' => Ok(2400),
        '4' => Ok(4800),
        '5' => Ok(9600),
        '6' => Ok(19200),
        other => Err(DlmsError::UnknownBaudRate(other)),
    }
}

/// Check the identification reply against the expected manufacturer
pub fn parse_identification(reply: &[u8], expected: &str) -> DlmsResult<Identification> {
    let text = String::from_utf8_lossy(reply);
    if !text.starts_with('/') {
        return Err(DlmsError::InvalidSignOnReply(format!(
            "reply does not start with '/': {}",
            text.trim_end()
        )));
    }
    let chars: Vec<char> = text.chars().collect();
    if chars.len() < 5 {
        return Err(DlmsError::InvalidSignOnReply(format!(
            "identification too short: {}",
            text.trim_end()
        )));
    }

    let manufacturer: String = chars[1..4].iter().collect();
    if !manufacturer.eq_ignore_ascii_case(expected) {
        return Err(DlmsError::ManufacturerMismatch {
            expected: expected.to_string(),
            found: manufacturer,
        });
    }
    let baud_char = chars[4];
    Ok(Identification {
        manufacturer,
        baud_char,
        baud_rate: baud_rate(baud_char)?,
    })
}

/// Acknowledgement switching to HDLC mode at the announced baud rate
pub fn mode_switch_request(baud_char: char) -> [u8; 6] {
    [
        0x06,
        PROTOCOL_HDLC,
        baud_char as u8,
        MODE_BINARY,
        b'\r',
        b'\n',
    ]
}
