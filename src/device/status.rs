use serde::{Deserialize, Serialize};

/// Device capacity figures are reported in megabytes
pub const MEGABYTE: u64 = 1024 * 1024;

/// Storage usage reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageCapacity {
    pub used_bytes: u64,
    pub total_bytes: u64,
}

/// Latest known device status
///
/// Fields are filled in independently as control replies arrive, so any of
/// them may be stale relative to the others.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub battery_percent: Option<u8>,
    pub capacity: Option<StorageCapacity>,
    pub firmware_version: Option<String>,
}

/// A single field update decoded from a control reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusUpdate {
    Battery(u8),
    Capacity(StorageCapacity),
    Firmware(String),
}

impl DeviceStatus {
    pub fn apply(&mut self, update: &StatusUpdate) {
        match update {
            StatusUpdate::Battery(percent) => self.battery_percent = Some(*percent),
            StatusUpdate::Capacity(capacity) => self.capacity = Some(*capacity),
            StatusUpdate::Firmware(version) => self.firmware_version = Some(version.clone()),
        }
    }
}

pub fn parse_battery(body: &[u8]) -> Option<StatusUpdate> {
    body.first().map(|&percent| StatusUpdate::Battery(percent.min(100)))
}

/// Capacity reply: big-endian u32 remaining MB, then big-endian u32 total MB
pub fn parse_capacity(body: &[u8]) -> Option<StatusUpdate> {
    if body.len() < 8 {
        return None;
    }

    let remaining = u32::from_be_bytes([body[0], body[1], body[2], body[3]]) as u64;
    let total = u32::from_be_bytes([body[4], body[5], body[6], body[7]]) as u64;

    Some(StatusUpdate::Capacity(StorageCapacity {
        used_bytes: total.saturating_sub(remaining) * MEGABYTE,
        total_bytes: total * MEGABYTE,
    }))
}

/// Version reply: null-terminated string
pub fn parse_version(body: &[u8]) -> Option<StatusUpdate> {
    let end = body.iter().position(|&b| b == 0).unwrap_or(body.len());
    let version = String::from_utf8_lossy(&body[..end]).trim().to_string();

    if version.is_empty() {
        None
    } else {
        Some(StatusUpdate::Firmware(version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_capacity() {
        let mut body = Vec::new();
        body.extend_from_slice(&1000u32.to_be_bytes());
        body.extend_from_slice(&4096u32.to_be_bytes());

        let update = parse_capacity(&body).unwrap();
        assert_eq!(
            update,
            StatusUpdate::Capacity(StorageCapacity {
                used_bytes: 3096 * MEGABYTE,
                total_bytes: 4096 * MEGABYTE,
            })
        );
    }

    #[test]
    fn test_parse_capacity_remaining_exceeds_total() {
        let mut body = Vec::new();
        body.extend_from_slice(&5000u32.to_be_bytes());
        body.extend_from_slice(&4096u32.to_be_bytes());

        match parse_capacity(&body) {
            Some(StatusUpdate::Capacity(capacity)) => assert_eq!(capacity.used_bytes, 0),
            other => panic!("unexpected update: {:?}", other),
        }
    }

    #[test]
    fn test_parse_capacity_short_body() {
        assert!(parse_capacity(&[0, 0, 0, 1]).is_none());
    }

    #[test]
    fn test_parse_version_stops_at_null() {
        assert_eq!(
            parse_version(b"2.1.7\0garbage"),
            Some(StatusUpdate::Firmware("2.1.7".to_string()))
        );
        assert_eq!(parse_version(b"\0"), None);
    }

    #[test]
    fn test_apply_updates_independently() {
        let mut status = DeviceStatus::default();
        status.apply(&StatusUpdate::Battery(76));
        status.apply(&StatusUpdate::Firmware("1.0.0".to_string()));

        assert_eq!(status.battery_percent, Some(76));
        assert_eq!(status.firmware_version.as_deref(), Some("1.0.0"));
        assert!(status.capacity.is_none());
    }
}
