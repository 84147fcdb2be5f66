//! Audio reconstruction
//!
//! Turns the raw bytes pulled off the recorder into a playable WAV file:
//! - RIFF/WAVE input passes through untouched
//! - headerless PCM gets a synthesized 44-byte header
//! - raw Opus frames are split, decoded through an [`AudioDecoder`] and resampled
//!
//! Also slices existing files by time range.

pub mod backend;
pub mod decoder;
pub mod file;
pub mod opus;
pub mod reconstruct;
pub mod resampler;
pub mod wav;

pub use backend::{AudioDecoder, Codec, DecoderConfig, EncodedFrame, PcmBuffer, Resampler};
pub use decoder::OpusDecoder;
pub use file::AudioFile;
pub use reconstruct::{AudioReconstructor, ReconstructedAudio, SourceKind, WAV_MIME};
pub use resampler::RubatoResampler;
