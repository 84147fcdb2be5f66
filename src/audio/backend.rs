use anyhow::Result;

/// Codecs the reconstructor knows how to hand to a decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    Opus,
}

/// Configuration passed to the platform decoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderConfig {
    pub codec: Codec,
    /// Sample rate the stream was encoded at
    pub sample_rate: u32,
    /// Number of encoded channels
    pub channels: u16,
    /// Codec-specific setup data (for Opus: an `OpusHead` identification header)
    pub description: Vec<u8>,
}

/// One encoded frame handed to the decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedFrame<'a> {
    pub data: &'a [u8],
    /// Presentation time in microseconds since stream start
    pub timestamp_us: u64,
    pub duration_us: u64,
}

/// Decoded audio (f32, interleaved)
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
}

impl PcmBuffer {
    /// Average all channels into one
    pub fn to_mono(&self) -> Vec<f32> {
        let channels = self.channels.max(1) as usize;
        if channels == 1 {
            return self.samples.clone();
        }

        self.samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    }
}

/// Platform audio decoder
///
/// Implementations wrap whatever the host offers (libopus, a WebCodecs bridge,
/// a mobile media API). The reconstructor only relies on this narrow surface so
/// the frame-splitting logic can be tested with a fake.
pub trait AudioDecoder: Send + Sync {
    /// Decode a sequence of frames, returning zero or more PCM buffers
    fn decode(&self, config: &DecoderConfig, frames: &[EncodedFrame<'_>]) -> Result<Vec<PcmBuffer>>;

    /// Get decoder name for logging
    fn name(&self) -> &str;
}

/// Sample-rate conversion for mono f32 audio
pub trait Resampler: Send + Sync {
    fn resample(&self, samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>>;
}
