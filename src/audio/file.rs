use anyhow::{Context, Result};
use std::io::Cursor;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{info, warn};

use super::wav::encode_wav;

/// Decoded audio held in memory, one sample vector per channel
pub struct AudioFile {
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: Vec<Vec<f32>>,
}

impl AudioFile {
    /// Decode any container/codec symphonia understands
    pub fn decode(bytes: &[u8], extension: Option<&str>) -> Result<Self> {
        let source = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = extension {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, source, &FormatOptions::default(), &MetadataOptions::default())
            .context("Unrecognised audio format")?;
        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .context("No decodable audio track")?;
        let track_id = track.id;
        let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
        let mut channel_count = track.codec_params.channels.map(|c| c.count()).unwrap_or(1);

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .context("Unsupported audio codec")?;

        let mut interleaved: Vec<f32> = Vec::new();

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(e).context("Failed to read audio packet"),
            };

            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    sample_rate = spec.rate;
                    channel_count = spec.channels.count();

                    let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                    buffer.copy_interleaved_ref(decoded);
                    interleaved.extend_from_slice(buffer.samples());
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("Skipping undecodable packet: {}", e);
                }
                Err(e) => return Err(e).context("Failed to decode audio"),
            }
        }

        let channel_count = channel_count.max(1);
        let mut channels = vec![Vec::with_capacity(interleaved.len() / channel_count); channel_count];
        for frame in interleaved.chunks_exact(channel_count) {
            for (channel, &sample) in channels.iter_mut().zip(frame) {
                channel.push(sample);
            }
        }

        let frames = channels.first().map(Vec::len).unwrap_or(0);
        let duration_seconds = if sample_rate > 0 {
            frames as f64 / sample_rate as f64
        } else {
            0.0
        };

        info!(
            "Audio decoded: {:.1}s, {}Hz, {} channels",
            duration_seconds, sample_rate, channel_count
        );

        Ok(Self {
            duration_seconds,
            sample_rate,
            channels,
        })
    }

    /// Number of samples per channel
    pub fn frame_count(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    /// Copy the `[start_secs, end_secs)` range of every channel
    pub fn slice(&self, start_secs: f64, end_secs: f64) -> Self {
        let total = self.frame_count();
        let to_index = |secs: f64| ((secs.max(0.0) * self.sample_rate as f64) as usize).min(total);

        let start = to_index(start_secs);
        let end = to_index(end_secs).max(start);

        let channels: Vec<Vec<f32>> = self
            .channels
            .iter()
            .map(|channel| channel[start..end].to_vec())
            .collect();

        Self {
            duration_seconds: (end - start) as f64 / self.sample_rate.max(1) as f64,
            sample_rate: self.sample_rate,
            channels,
        }
    }

    /// Interleave and encode as 16-bit WAV
    pub fn to_wav(&self) -> Result<Vec<u8>> {
        let channel_count = self.channels.len().max(1);
        let frames = self.frame_count();

        let mut interleaved = Vec::with_capacity(frames * channel_count);
        for i in 0..frames {
            for channel in &self.channels {
                interleaved.push(channel.get(i).copied().unwrap_or(0.0));
            }
        }

        encode_wav(&interleaved, self.sample_rate, channel_count as u16)
    }
}
