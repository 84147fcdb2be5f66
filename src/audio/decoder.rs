use anyhow::{bail, Context, Result};
use tracing::{debug, warn};

use super::backend::{AudioDecoder, DecoderConfig, EncodedFrame, PcmBuffer};

/// Rates libopus can decode to directly
const SUPPORTED_RATES: [u32; 5] = [8000, 12000, 16000, 24000, 48000];

/// Longest Opus packet is 120 ms; at 48 kHz that is 5760 samples per channel
const MAX_FRAME_SAMPLES: usize = 5760;

/// Opus decoding through libopus
#[derive(Debug, Clone, Copy, Default)]
pub struct OpusDecoder;

impl OpusDecoder {
    pub fn new() -> Self {
        Self
    }
}

/// Channel count and input rate from an `OpusHead` header, if it parses
fn parse_opus_head(description: &[u8]) -> Option<(u16, u32)> {
    if description.len() < 19 || &description[..8] != b"OpusHead" {
        return None;
    }
    let channels = description[9] as u16;
    let input_rate = u32::from_le_bytes([description[12], description[13], description[14], description[15]]);
    Some((channels, input_rate))
}

impl AudioDecoder for OpusDecoder {
    fn decode(&self, config: &DecoderConfig, frames: &[EncodedFrame<'_>]) -> Result<Vec<PcmBuffer>> {
        let (channels, input_rate) =
            parse_opus_head(&config.description).unwrap_or((config.channels, config.sample_rate));
        let channels = channels.clamp(1, 2);

        let sample_rate = if SUPPORTED_RATES.contains(&input_rate) {
            input_rate
        } else {
            debug!("Opus input rate {}Hz not directly supported, decoding at 48kHz", input_rate);
            48000
        };

        let layout = if channels == 2 {
            opus::Channels::Stereo
        } else {
            opus::Channels::Mono
        };
        let mut decoder = opus::Decoder::new(sample_rate, layout).context("Failed to create Opus decoder")?;

        let mut pcm = vec![0.0f32; MAX_FRAME_SAMPLES * channels as usize];
        let mut buffers = Vec::with_capacity(frames.len());
        let mut failed = 0usize;

        for frame in frames {
            match decoder.decode_float(frame.data, &mut pcm, false) {
                Ok(samples_per_channel) => buffers.push(PcmBuffer {
                    samples: pcm[..samples_per_channel * channels as usize].to_vec(),
                    sample_rate,
                    channels,
                }),
                Err(e) => {
                    failed += 1;
                    debug!("Skipping Opus frame at {}us: {}", frame.timestamp_us, e);
                }
            }
        }

        if failed > 0 {
            warn!("{} of {} Opus frames failed to decode", failed, frames.len());
        }
        if buffers.is_empty() && !frames.is_empty() {
            bail!("None of {} Opus frames could be decoded", frames.len());
        }

        Ok(buffers)
    }

    fn name(&self) -> &str {
        "libopus"
    }
}
