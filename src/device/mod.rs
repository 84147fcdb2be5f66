//! Device-side data decoded from protocol replies
//!
//! This module provides:
//! - Device status (battery, storage, firmware) parsing
//! - Catalog (file list) decoding
//! - Per-transfer download state with progress throttling and a stall watchdog

pub mod catalog;
pub mod download;
pub mod status;

pub use catalog::{CatalogDecoder, DeviceFileInfo};
pub use download::{import_request_body, DownloadPhase, DownloadSession};
pub use status::{DeviceStatus, StatusUpdate, StorageCapacity};
