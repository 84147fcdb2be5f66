//! Sync session management
//!
//! This module provides the `SyncSession` abstraction that manages:
//! - Connecting to a recorder through the platform BLE adapter
//! - The post-connect handshake (battery, capacity, firmware, high-speed mode)
//! - Catalog fetches and file downloads, one at a time
//! - Reconstruction of downloaded files into playable audio
//! - Connection state and event delivery to the application

mod config;
pub mod dispatcher;
mod events;
mod session;

pub use config::SyncConfig;
pub use dispatcher::{Dispatcher, Operation, Outcome};
pub use events::SyncEvent;
pub use session::{ConnectOutcome, SyncSession};
