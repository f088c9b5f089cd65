//! Command codes, AVP codes and well-known values used by the client.
//!
//! Only the entries the client itself builds or inspects are listed here;
//! caller-supplied AVPs travel with whatever code the caller chose.

use std::fmt;

/// Diameter base protocol application id (CER/CEA, DWR/DWA).
pub const BASE_APP_ID: u32 = 0;

/// Diameter Credit-Control application id.
pub const CREDIT_CONTROL_APP_ID: u32 = 4;

/// Result-Code for a successful answer.
pub const DIAMETER_SUCCESS: u32 = 2001;

/// Command identities the client sends or expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Command {
    /// Capabilities-Exchange (CER/CEA)
    CapabilitiesExchange = 257,
    /// Credit-Control (CCR/CCA)
    CreditControl = 272,
    /// Device-Watchdog (DWR/DWA)
    DeviceWatchdog = 280,
}

impl Command {
    /// Look up a command by its wire code.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            257 => Some(Self::CapabilitiesExchange),
            272 => Some(Self::CreditControl),
            280 => Some(Self::DeviceWatchdog),
            _ => None,
        }
    }

    /// Wire code
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Short name of the request form (e.g. `CER`).
    pub fn request_name(self) -> &'static str {
        match self {
            Self::CapabilitiesExchange => "CER",
            Self::CreditControl => "CCR",
            Self::DeviceWatchdog => "DWR",
        }
    }

    /// Short name of the answer form (e.g. `CEA`).
    pub fn answer_name(self) -> &'static str {
        match self {
            Self::CapabilitiesExchange => "CEA",
            Self::CreditControl => "CCA",
            Self::DeviceWatchdog => "DWA",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CapabilitiesExchange => "Capabilities-Exchange",
            Self::CreditControl => "Credit-Control",
            Self::DeviceWatchdog => "Device-Watchdog",
        };
        f.write_str(name)
    }
}

/// AVP codes.
#[allow(missing_docs)]
pub mod avp_code {
    pub const EVENT_TIMESTAMP: u32 = 55;
    pub const HOST_IP_ADDRESS: u32 = 257;
    pub const AUTH_APPLICATION_ID: u32 = 258;
    pub const ACCT_APPLICATION_ID: u32 = 259;
    pub const SESSION_ID: u32 = 263;
    pub const ORIGIN_HOST: u32 = 264;
    pub const SUPPORTED_VENDOR_ID: u32 = 265;
    pub const VENDOR_ID: u32 = 266;
    pub const FIRMWARE_REVISION: u32 = 267;
    pub const RESULT_CODE: u32 = 268;
    pub const PRODUCT_NAME: u32 = 269;
    pub const ORIGIN_STATE_ID: u32 = 278;
    pub const DESTINATION_REALM: u32 = 283;
    pub const DESTINATION_HOST: u32 = 293;
    pub const ORIGIN_REALM: u32 = 296;
    pub const CC_REQUEST_NUMBER: u32 = 415;
    pub const CC_REQUEST_TYPE: u32 = 416;
    pub const REQUESTED_ACTION: u32 = 436;
    pub const SERVICE_IDENTIFIER: u32 = 439;
    pub const SUBSCRIPTION_ID: u32 = 443;
    pub const SUBSCRIPTION_ID_DATA: u32 = 444;
    pub const SUBSCRIPTION_ID_TYPE: u32 = 450;
    pub const SERVICE_CONTEXT_ID: u32 = 461;
    pub const SERVICE_INFORMATION: u32 = 873;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_codes_roundtrip() {
        for cmd in [
            Command::CapabilitiesExchange,
            Command::CreditControl,
            Command::DeviceWatchdog,
        ] {
            assert_eq!(Command::from_code(cmd.code()), Some(cmd));
        }
        assert_eq!(Command::from_code(282), None);
    }

    #[test]
    fn test_command_names() {
        assert_eq!(Command::CreditControl.request_name(), "CCR");
        assert_eq!(Command::DeviceWatchdog.answer_name(), "DWA");
        assert_eq!(Command::CapabilitiesExchange.to_string(), "Capabilities-Exchange");
    }
}
