use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::backend::{AudioDecoder, Codec, DecoderConfig, EncodedFrame, Resampler};
use super::decoder::OpusDecoder;
use super::file::AudioFile;
use super::opus::{default_layout, detect_frame_layout, opus_head};
use super::resampler::RubatoResampler;
use super::wav::{encode_wav, is_riff_wave, wrap_pcm16};
use crate::config::AudioConfig;

pub const WAV_MIME: &str = "audio/wav";

/// A finished audio file ready to hand to the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconstructedAudio {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl ReconstructedAudio {
    pub fn is_wav(&self) -> bool {
        self.mime_type == WAV_MIME
    }

    /// Write the file into `dir`, creating it if needed
    ///
    /// Only the final component of `file_name` is used, so names the device
    /// reports can never place the file outside `dir`.
    pub fn write_to(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

        let path = dir.join(local_file_name(&self.file_name));
        fs::write(&path, &self.bytes).with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Wrote {} ({} bytes)", path.display(), self.bytes.len());

        Ok(path)
    }
}

/// How the downloaded bytes are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// WAV, possibly headerless PCM
    Wav,
    /// Raw Opus frames (declared or assumed)
    Opus,
    /// A container we leave alone
    Passthrough(&'static str),
}

impl SourceKind {
    /// Infer from the file name's extension
    pub fn from_file_name(name: &str) -> Self {
        match extension(name).as_deref() {
            Some("wav") => SourceKind::Wav,
            Some("mp3") => SourceKind::Passthrough("audio/mpeg"),
            Some("m4a") | Some("mp4") => SourceKind::Passthrough("audio/mp4"),
            Some("aac") => SourceKind::Passthrough("audio/aac"),
            Some("flac") => SourceKind::Passthrough("audio/flac"),
            // opus, ogg, webm, vendor extensions and no extension at all
            _ => SourceKind::Opus,
        }
    }
}

fn extension(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Last path component of a device-supplied name
fn local_file_name(name: &str) -> String {
    let last = name.rsplit(['/', '\\']).next().unwrap_or_default();
    match Path::new(last).file_name().and_then(|name| name.to_str()) {
        Some(name) if !name.trim().is_empty() => name.to_string(),
        _ => "recording".to_string(),
    }
}

fn wav_name(name: &str) -> String {
    let stem = Path::new(name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .unwrap_or("recording");
    format!("{}.wav", stem)
}

/// Turns downloaded bytes into a playable file
#[derive(Clone)]
pub struct AudioReconstructor {
    decoder: Option<Arc<dyn AudioDecoder>>,
    resampler: Arc<dyn Resampler>,
    target_sample_rate: u32,
    slice_max_bytes: usize,
}

impl AudioReconstructor {
    /// Reconstructor using libopus for Opus input and rubato for resampling
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            decoder: Some(Arc::new(OpusDecoder::new())),
            resampler: Arc::new(RubatoResampler::new()),
            target_sample_rate: config.target_sample_rate,
            slice_max_bytes: config.slice_max_bytes,
        }
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn AudioDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    pub fn with_resampler(mut self, resampler: Arc<dyn Resampler>) -> Self {
        self.resampler = resampler;
        self
    }

    /// Produce a playable file from the bytes downloaded for `file_name`
    pub fn reconstruct(&self, file_name: &str, bytes: Vec<u8>) -> Result<ReconstructedAudio> {
        if bytes.is_empty() {
            bail!("No audio data received for {}", file_name);
        }

        if is_riff_wave(&bytes) {
            debug!("{}: already a RIFF/WAVE file", file_name);
            let file_name = if extension(file_name).as_deref() == Some("wav") {
                file_name.to_string()
            } else {
                wav_name(file_name)
            };
            return Ok(ReconstructedAudio {
                file_name,
                mime_type: WAV_MIME.to_string(),
                bytes,
            });
        }

        match SourceKind::from_file_name(file_name) {
            SourceKind::Wav => Ok(self.wrap_raw_pcm(file_name, &bytes)),
            SourceKind::Opus => match self.decode_opus(file_name, &bytes) {
                Ok(Some(samples)) => {
                    let wav = encode_wav(&samples, self.target_sample_rate, 1)?;
                    info!(
                        "{}: decoded {} bytes of Opus into {:.1}s of audio",
                        file_name,
                        bytes.len(),
                        samples.len() as f64 / self.target_sample_rate as f64
                    );
                    Ok(ReconstructedAudio {
                        file_name: wav_name(file_name),
                        mime_type: WAV_MIME.to_string(),
                        bytes: wav,
                    })
                }
                Ok(None) => {
                    warn!("{}: Opus decode produced no audio, treating as raw PCM", file_name);
                    Ok(self.wrap_raw_pcm(file_name, &bytes))
                }
                Err(e) => {
                    warn!("{}: Opus decode failed ({:#}), treating as raw PCM", file_name, e);
                    Ok(self.wrap_raw_pcm(file_name, &bytes))
                }
            },
            SourceKind::Passthrough(mime_type) => Ok(ReconstructedAudio {
                file_name: file_name.to_string(),
                mime_type: mime_type.to_string(),
                bytes,
            }),
        }
    }

    /// Headerless 16-bit mono PCM at the target rate
    fn wrap_raw_pcm(&self, file_name: &str, bytes: &[u8]) -> ReconstructedAudio {
        debug!("{}: synthesizing WAV header for {} PCM bytes", file_name, bytes.len());
        ReconstructedAudio {
            file_name: wav_name(file_name),
            mime_type: WAV_MIME.to_string(),
            bytes: wrap_pcm16(bytes, self.target_sample_rate, 1),
        }
    }

    /// Split into frames, decode, downmix and resample to the target rate
    ///
    /// Returns `Ok(None)` when no decoder is available or nothing was decoded.
    fn decode_opus(&self, file_name: &str, bytes: &[u8]) -> Result<Option<Vec<f32>>> {
        let Some(decoder) = &self.decoder else {
            debug!("{}: no Opus decoder available", file_name);
            return Ok(None);
        };

        let layout = detect_frame_layout(bytes).unwrap_or_else(|| {
            debug!("{}: no repeating TOC stride, assuming default frames", file_name);
            default_layout(bytes)
        });

        let frames: Vec<EncodedFrame<'_>> = bytes
            .chunks_exact(layout.frame_size)
            .enumerate()
            .map(|(i, data)| EncodedFrame {
                data,
                timestamp_us: i as u64 * layout.frame_duration_us(),
                duration_us: layout.frame_duration_us(),
            })
            .collect();

        let trailing = bytes.len() % layout.frame_size;
        if trailing > 0 {
            debug!("{}: dropping {} trailing bytes (partial frame)", file_name, trailing);
        }

        let config = DecoderConfig {
            codec: Codec::Opus,
            sample_rate: self.target_sample_rate,
            channels: 1,
            description: opus_head(1, self.target_sample_rate),
        };

        info!(
            "{}: decoding {} Opus frames ({} bytes, {}ms) with {}",
            file_name,
            frames.len(),
            layout.frame_size,
            layout.frame_duration_ms,
            decoder.name()
        );

        let buffers = decoder.decode(&config, &frames)?;
        let Some(native_rate) = buffers.iter().find(|b| !b.samples.is_empty()).map(|b| b.sample_rate) else {
            return Ok(None);
        };

        let mut mono = Vec::new();
        for buffer in &buffers {
            if buffer.sample_rate != native_rate {
                warn!(
                    "{}: skipping decoded buffer at {}Hz (stream is {}Hz)",
                    file_name, buffer.sample_rate, native_rate
                );
                continue;
            }
            mono.extend(buffer.to_mono());
        }

        if native_rate != self.target_sample_rate {
            mono = self.resampler.resample(&mono, native_rate, self.target_sample_rate)?;
        }

        if mono.is_empty() {
            Ok(None)
        } else {
            Ok(Some(mono))
        }
    }

    /// Trim an existing audio file to `[start_secs, end_secs)`
    ///
    /// Files above the configured ceiling, undecodable files and empty ranges
    /// come back unchanged.
    pub fn slice(&self, audio: &ReconstructedAudio, start_secs: f64, end_secs: f64) -> ReconstructedAudio {
        if audio.bytes.len() > self.slice_max_bytes {
            warn!(
                "{}: {} bytes exceeds slicing limit of {} bytes, returning original",
                audio.file_name,
                audio.bytes.len(),
                self.slice_max_bytes
            );
            return audio.clone();
        }

        let decoded = match AudioFile::decode(&audio.bytes, extension(&audio.file_name).as_deref()) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("{}: cannot decode for slicing ({:#}), returning original", audio.file_name, e);
                return audio.clone();
            }
        };

        let sliced = decoded.slice(start_secs, end_secs);
        if sliced.frame_count() == 0 {
            warn!(
                "{}: range {:.2}s-{:.2}s is empty, returning original",
                audio.file_name, start_secs, end_secs
            );
            return audio.clone();
        }

        match sliced.to_wav() {
            Ok(bytes) => ReconstructedAudio {
                file_name: wav_name(&audio.file_name),
                mime_type: WAV_MIME.to_string(),
                bytes,
            },
            Err(e) => {
                warn!("{}: failed to encode slice ({:#}), returning original", audio.file_name, e);
                audio.clone()
            }
        }
    }
}
