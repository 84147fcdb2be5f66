//! BLE transport seam and connection state
//!
//! The platform stack (device picker, GATT, notifications) lives behind
//! [`BleAdapter`] and [`BleLink`]; everything above speaks in frames.

pub mod backend;
pub mod state;

pub use backend::{AdapterConnect, BleAdapter, BleConnection, BleLink, LinkEvent, NotifyChannel};
pub use state::{state_stream, ConnectionState};
