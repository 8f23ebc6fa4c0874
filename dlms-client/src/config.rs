//! Session configuration and manufacturer profiles
//!
//! A [`DeviceProfile`] describes how a manufacturer's meters are addressed.
//! Profiles come from the built-in table or from a JSON settings file. A
//! [`SessionConfig`] is derived from one profile plus the options of a single
//! connection and stays fixed for the lifetime of that connection.

use crate::engine::{Authentication, InterfaceType};
use crate::exchange::{HDLC_REPLY_SIZE, NET_REPLY_SIZE};
use dlms_core::{DlmsError, DlmsResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Wait time per receive when a profile does not set one
pub const DEFAULT_WAIT_TIME: Duration = Duration::from_millis(5000);

/// Pause required by IEC 62056-21 between the mode-switch ack and the baud change
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Public client address (no authentication)
pub const PUBLIC_CLIENT: u16 = 0x10;

fn default_wait_time_ms() -> u64 {
    DEFAULT_WAIT_TIME.as_millis() as u64
}

/// Client addresses per authentication level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientAddresses {
    pub none: u16,
    pub low: u16,
    pub high: u16,
}

impl ClientAddresses {
    pub fn for_authentication(&self, authentication: Authentication) -> u16 {
        match authentication {
            Authentication::None => self.none,
            Authentication::Low => self.low,
            Authentication::High => self.high,
        }
    }
}

/// Server (meter) HDLC address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerAddress {
    pub logical: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical: Option<u16>,
}

/// Manufacturer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    /// Three-letter FLAG id as sent in the IEC identification line
    pub identification: String,
    pub name: String,
    /// Use the IEC 62056-47 wrapper on TCP connections
    #[serde(default)]
    pub use_iec47: bool,
    #[serde(default = "default_wait_time_ms")]
    pub wait_time_ms: u64,
    pub client_addresses: ClientAddresses,
    pub server: ServerAddress,
}

impl DeviceProfile {
    pub fn wait_time(&self) -> Duration {
        Duration::from_millis(self.wait_time_ms)
    }
}

/// Set of known manufacturer profiles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileTable {
    pub profiles: Vec<DeviceProfile>,
}

impl ProfileTable {
    /// Profiles shipped with the reader
    pub fn builtin() -> Self {
        Self {
            profiles: vec![
                DeviceProfile {
                    identification: "lgz".to_string(),
                    name: "Landis+Gyr".to_string(),
                    use_iec47: false,
                    wait_time_ms: default_wait_time_ms(),
                    client_addresses: ClientAddresses {
                        none: PUBLIC_CLIENT,
                        low: 0x20,
                        high: 0x01,
                    },
                    server: ServerAddress {
                        logical: 0x01,
                        physical: Some(0x11),
                    },
                },
                DeviceProfile {
                    identification: "grx".to_string(),
                    name: "Gurux".to_string(),
                    use_iec47: true,
                    wait_time_ms: default_wait_time_ms(),
                    client_addresses: ClientAddresses {
                        none: PUBLIC_CLIENT,
                        low: 0x11,
                        high: 0x12,
                    },
                    server: ServerAddress {
                        logical: 0x01,
                        physical: None,
                    },
                },
            ],
        }
    }

    /// Read a JSON settings file
    pub fn load<P: AsRef<Path>>(path: P) -> DlmsResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            DlmsError::InvalidData(format!("Cannot read settings {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            DlmsError::InvalidData(format!("Invalid settings {}: {}", path.display(), e))
        })
    }

    /// Write the table as a JSON settings file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> DlmsResult<()> {
        let path = path.as_ref();
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| DlmsError::InvalidData(format!("Cannot encode settings: {}", e)))?;
        std::fs::write(path, text).map_err(|e| {
            DlmsError::InvalidData(format!("Cannot write settings {}: {}", path.display(), e))
        })
    }

    /// Profile by identification, ignoring case
    pub fn find(&self, identification: &str) -> Option<&DeviceProfile> {
        self.profiles
            .iter()
            .find(|p| p.identification.eq_ignore_ascii_case(identification))
    }
}

impl Default for ProfileTable {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Options of one connection
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub interface: InterfaceType,
    pub authentication: Authentication,
    pub password: String,
    pub client_address: u16,
    pub server: ServerAddress,
    /// Wait-time budget of a single receive
    pub wait_time: Duration,
    /// Initial reply buffer size, replaced after link negotiation
    pub reply_size: usize,
    /// Run the IEC 62056-21 sign-on before the link connect
    pub iec_sign_on: bool,
    /// Manufacturer id expected in the sign-on reply
    pub manufacturer: String,
    pub settle_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            interface: InterfaceType::Hdlc,
            authentication: Authentication::None,
            password: String::new(),
            client_address: PUBLIC_CLIENT,
            server: ServerAddress {
                logical: 0x01,
                physical: None,
            },
            wait_time: DEFAULT_WAIT_TIME,
            reply_size: HDLC_REPLY_SIZE,
            iec_sign_on: false,
            manufacturer: String::new(),
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }
}

impl SessionConfig {
    /// Configuration for a meter described by `profile`
    ///
    /// The wrapper is used only when the profile asks for it and the
    /// connection runs over a network transport. The wrapper addresses the
    /// meter's logical device 1.
    pub fn from_profile(
        profile: &DeviceProfile,
        authentication: Authentication,
        network: bool,
    ) -> Self {
        let interface = if profile.use_iec47 && network {
            InterfaceType::Net
        } else {
            InterfaceType::Hdlc
        };
        let server = match interface {
            InterfaceType::Hdlc => profile.server,
            InterfaceType::Net => ServerAddress {
                logical: 1,
                physical: None,
            },
        };
        Self::default()
            .with_interface(interface)
            .with_authentication(authentication)
            .with_client_address(profile.client_addresses.for_authentication(authentication))
            .with_server(server)
            .with_wait_time(profile.wait_time())
            .with_manufacturer(&profile.identification)
    }

    /// Select the framing; the reply buffer hint follows it
    pub fn with_interface(mut self, interface: InterfaceType) -> Self {
        self.interface = interface;
        self.reply_size = match interface {
            InterfaceType::Hdlc => HDLC_REPLY_SIZE,
            InterfaceType::Net => NET_REPLY_SIZE,
        };
        self
    }

    pub fn with_authentication(mut self, authentication: Authentication) -> Self {
        self.authentication = authentication;
        self
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.password = password.to_string();
        self
    }

    pub fn with_client_address(mut self, address: u16) -> Self {
        self.client_address = address;
        self
    }

    pub fn with_server(mut self, server: ServerAddress) -> Self {
        self.server = server;
        self
    }

    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }

    pub fn with_iec_sign_on(mut self, enabled: bool) -> Self {
        self.iec_sign_on = enabled;
        self
    }

    pub fn with_manufacturer(mut self, manufacturer: &str) -> Self {
        self.manufacturer = manufacturer.to_string();
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }
}
