use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::SyncError;
use crate::protocol::GattProfile;

/// Notification characteristic a fragment arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotifyChannel {
    /// Bulk file-transfer traffic
    Data,
    /// Control / status replies
    Status,
}

/// Inbound traffic from the platform BLE stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// One notification payload
    Notification { channel: NotifyChannel, data: Vec<u8> },
    /// The platform reported the link as lost
    Disconnected,
}

/// Outcome of `BleAdapter::connect`
pub enum AdapterConnect {
    Connected(BleConnection),
    /// The user dismissed the device picker
    Cancelled,
}

/// An established, subscribed GATT connection
pub struct BleConnection {
    /// Writer for the host → device characteristic
    pub link: Arc<dyn BleLink>,
    /// Notifications from both characteristics plus link-loss events
    pub events: mpsc::Receiver<LinkEvent>,
}

/// Platform BLE stack
///
/// Implementations run the platform's device-selection flow, connect to GATT,
/// discover the sync service and subscribe to both notification
/// characteristics before returning.
#[async_trait]
pub trait BleAdapter: Send + Sync {
    async fn connect(&self, profile: &GattProfile) -> Result<AdapterConnect, SyncError>;

    /// Get adapter name for logging
    fn name(&self) -> &str;
}

/// Write side of a connected device
#[async_trait]
pub trait BleLink: Send + Sync {
    /// Write one encoded frame to the device
    async fn write(&self, data: &[u8]) -> Result<(), SyncError>;

    /// Close the GATT connection
    async fn disconnect(&self) -> Result<(), SyncError>;

    /// Device name as reported by the platform
    fn device_name(&self) -> &str;
}
