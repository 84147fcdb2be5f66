use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the sync session to its caller.
///
/// Protocol corruption and codec failures are recovered internally and never
/// appear here.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The platform has no usable Bluetooth LE stack.
    #[error("Bluetooth LE is not supported on this platform")]
    Unsupported,

    /// GATT connect, service discovery or notification subscription failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// `connect()` was called while a connection is already active.
    #[error("Already connected or connecting")]
    AlreadyConnected,

    /// An operation needing the device was called without a connection.
    #[error("Not connected to a device")]
    NotConnected,

    /// A catalog fetch or download is already running.
    #[error("Device is busy: {0} in progress")]
    Busy(&'static str),

    /// Writing a request to the device failed.
    #[error("Failed to write to device: {0}")]
    Write(String),

    /// The device finished an import with a non-zero status code.
    #[error("Device reported error status {0}")]
    DeviceStatus(u8),

    /// No data arrived within the watchdog window.
    #[error("Transfer stalled: no data for {0:?}")]
    Timeout(Duration),

    /// The link dropped or `disconnect()` was called mid-operation.
    #[error("Device disconnected")]
    Disconnected,

    /// The downloaded bytes could not be turned into a playable file.
    #[error("Audio reconstruction failed: {0}")]
    Reconstruction(String),
}

/// Result type alias using [`SyncError`].
pub type SyncResult<T> = std::result::Result<T, SyncError>;
