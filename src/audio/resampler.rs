use anyhow::{anyhow, Result};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{Fft, FixedSync, Resampler as _};
use tracing::debug;

use super::backend::Resampler;

/// FFT resampler backed by rubato
#[derive(Debug, Clone)]
pub struct RubatoResampler {
    chunk_size: usize,
}

impl RubatoResampler {
    pub fn new() -> Self {
        Self { chunk_size: 1024 }
    }
}

impl Default for RubatoResampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Resampler for RubatoResampler {
    fn resample(&self, samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
        if samples.is_empty() || from_rate == to_rate {
            return Ok(samples.to_vec());
        }

        let mut resampler = Fft::<f32>::new(
            from_rate as usize,
            to_rate as usize,
            self.chunk_size,
            2, // sub-chunks
            1, // mono
            FixedSync::Input,
        )
        .map_err(|e| anyhow!("Failed to create resampler: {}", e))?;

        // rubato may round the chunk to a multiple of its FFT size
        let chunk_size = resampler.input_frames_next();
        let estimated_len = (samples.len() as f64 * to_rate as f64 / from_rate as f64) as usize;
        let mut output = Vec::with_capacity(estimated_len);

        for chunk in samples.chunks(chunk_size) {
            let input_chunk = if chunk.len() < chunk_size {
                let mut padded = chunk.to_vec();
                padded.resize(chunk_size, 0.0);
                padded
            } else {
                chunk.to_vec()
            };

            let input_adapter = InterleavedSlice::new(&input_chunk, 1, chunk_size)
                .map_err(|e| anyhow!("Failed to create input adapter: {}", e))?;

            let output_frames = resampler.output_frames_max();
            let mut output_chunk = vec![0.0f32; output_frames];
            let mut output_adapter = InterleavedSlice::new_mut(&mut output_chunk, 1, output_frames)
                .map_err(|e| anyhow!("Failed to create output adapter: {}", e))?;

            let (_input_frames, written) = resampler
                .process_into_buffer(&input_adapter, &mut output_adapter, None)
                .map_err(|e| anyhow!("Resampling failed: {}", e))?;

            output.extend_from_slice(&output_chunk[..written]);
        }

        output.truncate(estimated_len);

        debug!(
            "Resampled {} samples at {}Hz to {} samples at {}Hz",
            samples.len(),
            from_rate,
            output.len(),
            to_rate
        );

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_rate_is_identity() {
        let samples = vec![0.1, -0.2, 0.3];
        let out = RubatoResampler::new().resample(&samples, 16000, 16000).unwrap();
        assert_eq!(out, samples);
    }

    #[test]
    fn test_downsample_length() {
        let samples = vec![0.0f32; 48000];
        let out = RubatoResampler::new().resample(&samples, 48000, 16000).unwrap();

        // One second in, roughly one second out
        assert!(out.len() <= 16000);
        assert!(out.len() > 14000, "got {} samples", out.len());
    }
}
