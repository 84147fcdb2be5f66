//! Binary protocol spoken by the recorder
//!
//! - [`crc`] - CRC16 used by the frame header
//! - [`frame`] - frame encode / decode
//! - [`commands`] - domain and command codes, GATT identifiers
//! - [`reassembler`] - fragment accumulation and resynchronisation

pub mod commands;
pub mod crc;
pub mod frame;
pub mod reassembler;

pub use commands::{Domain, GattProfile};
pub use crc::crc16;
pub use frame::{decode, encode, Frame, HEADER_LEN, SYNC_BYTE};
pub use reassembler::FrameAssembler;
