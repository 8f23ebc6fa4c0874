use thiserror::Error;

/// Data-access-result reported by a meter when the attribute may not be read or written
pub const ACCESS_DENIED: u8 = 3;

/// Main error type for DLMS client operations
#[derive(Error, Debug)]
pub enum DlmsError {
    /// I/O failure opening, closing or writing the medium
    #[error("Connection error: {0}")]
    Connection(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Security error: {0}")]
    Security(String),

    /// No reply within the wait budget after every resend was used
    #[error("Failed to receive reply from the device in given time.")]
    TransportTimeout,

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Frame invalid: {0}")]
    FrameInvalid(String),

    #[error("Manufacturer {expected} expected but {found} found.")]
    ManufacturerMismatch { expected: String, found: String },

    #[error("Unknown baud rate: '{0}'")]
    UnknownBaudRate(char),

    #[error("Invalid sign-on reply: {0}")]
    InvalidSignOnReply(String),

    #[error("Association rejected: {0}")]
    AssociationRejected(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The remote device reported an application level error code
    #[error("Device reported application error {0}")]
    Application(u8),
}

impl DlmsError {
    /// Application error codes that a bulk read may skip and continue after
    pub fn is_access_denied(&self) -> bool {
        matches!(self, DlmsError::Application(ACCESS_DENIED))
    }

    /// Application error code, if this error came from the device
    pub fn application_code(&self) -> Option<u8> {
        match self {
            DlmsError::Application(code) => Some(*code),
            _ => None,
        }
    }
}

/// Result type alias for DLMS client operations
pub type DlmsResult<T> = Result<T, DlmsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_denied_classification() {
        assert!(DlmsError::Application(3).is_access_denied());
        assert!(!DlmsError::Application(4).is_access_denied());
        assert!(!DlmsError::TransportTimeout.is_access_denied());
        assert_eq!(DlmsError::Application(9).application_code(), Some(9));
        assert_eq!(DlmsError::TransportTimeout.application_code(), None);
    }

    #[test]
    fn test_manufacturer_mismatch_message() {
        let err = DlmsError::ManufacturerMismatch {
            expected: "LGZ".to_string(),
            found: "GRX".to_string(),
        };
        assert_eq!(err.to_string(), "Manufacturer LGZ expected but GRX found.");
    }
}
