pub mod audio;
pub mod config;
pub mod device;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;

pub use audio::{AudioDecoder, AudioFile, AudioReconstructor, ReconstructedAudio, Resampler, RubatoResampler};
pub use config::{AudioConfig, Config};
pub use device::{CatalogDecoder, DeviceFileInfo, DeviceStatus, StatusUpdate, StorageCapacity};
pub use error::{SyncError, SyncResult};
pub use protocol::{Domain, Frame, FrameAssembler, GattProfile};
pub use session::{ConnectOutcome, SyncConfig, SyncEvent, SyncSession};
pub use transport::{BleAdapter, BleConnection, BleLink, ConnectionState, LinkEvent, NotifyChannel};
