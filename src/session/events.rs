use crate::audio::ReconstructedAudio;
use crate::device::{DeviceFileInfo, StatusUpdate};
use crate::error::SyncError;

/// Notifications delivered to the application
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A control reply updated one status field
    Status(StatusUpdate),
    /// A catalog fetch finished (fired once per fetch)
    Catalog(Vec<DeviceFileInfo>),
    /// Download progress, 0-100
    Progress { name: String, percent: u8 },
    /// A download finished and was reconstructed
    Downloaded(ReconstructedAudio),
    /// A download ended with an error
    DownloadFailed { name: String, error: SyncError },
}
