// Wire constants for the recorder protocol
//
// These values are fixed by the device firmware; there is no negotiation.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Top-level payload category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    /// Battery, storage and firmware queries
    Control,
    /// Live audio (not consumed by this engine)
    AudioStream,
    /// Catalog listing and file import
    FileTransfer,
    /// Hardware button events (not consumed by this engine)
    ButtonCommand,
}

impl Domain {
    pub fn code(self) -> u8 {
        match self {
            Domain::Control => 0,
            Domain::AudioStream => 1,
            Domain::FileTransfer => 2,
            Domain::ButtonCommand => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Domain::Control),
            1 => Some(Domain::AudioStream),
            2 => Some(Domain::FileTransfer),
            3 => Some(Domain::ButtonCommand),
            _ => None,
        }
    }
}

/// Commands in the control domain (requests and replies share codes)
pub mod control {
    pub const BATTERY: u8 = 0x01;
    pub const CAPACITY: u8 = 0x02;
    pub const VERSION: u8 = 0x03;
    pub const HIGH_SPEED: u8 = 0x04;
}

/// Commands in the file-transfer domain
pub mod file {
    /// List request from host, list reply from device
    pub const LIST: u8 = 0x01;
    /// Catalog records or file contents, depending on the active operation
    pub const FILE_DATA: u8 = 0x02;
    pub const LIST_COMPLETE: u8 = 0x03;
    /// Import (download) request from host
    pub const IMPORT: u8 = 0x04;
    pub const IMPORT_STARTED: u8 = 0x05;
    /// Carries a status byte, 0 on success
    pub const IMPORT_COMPLETE: u8 = 0x06;
}

/// GATT identifiers of the recorder's sync service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GattProfile {
    pub service: Uuid,
    /// Host → device writes
    pub write: Uuid,
    /// Bulk data notifications (file transfer)
    pub data_notify: Uuid,
    /// Control / status notifications
    pub status_notify: Uuid,
}

impl Default for GattProfile {
    fn default() -> Self {
        Self {
            service: Uuid::from_u128(0x0000ae30_0000_1000_8000_00805f9b34fb),
            write: Uuid::from_u128(0x0000ae01_0000_1000_8000_00805f9b34fb),
            data_notify: Uuid::from_u128(0x0000ae02_0000_1000_8000_00805f9b34fb),
            status_notify: Uuid::from_u128(0x0000ae03_0000_1000_8000_00805f9b34fb),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_codes() {
        for domain in [
            Domain::Control,
            Domain::AudioStream,
            Domain::FileTransfer,
            Domain::ButtonCommand,
        ] {
            assert_eq!(Domain::from_code(domain.code()), Some(domain));
        }
        assert_eq!(Domain::from_code(4), None);
    }
}
