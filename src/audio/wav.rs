use anyhow::{Context, Result};
use std::io::Cursor;

/// Size of a canonical PCM WAV header
pub const WAV_HEADER_LEN: usize = 44;

/// Whether the bytes already carry a RIFF/WAVE container
pub fn is_riff_wave(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
}

/// Canonical 44-byte header for integer PCM data of `data_len` bytes
pub fn pcm_wav_header(data_len: u32, sample_rate: u32, channels: u16, bits_per_sample: u16) -> [u8; WAV_HEADER_LEN] {
    let block_align = channels * bits_per_sample / 8;
    let byte_rate = sample_rate * block_align as u32;

    let mut header = [0u8; WAV_HEADER_LEN];
    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&36u32.saturating_add(data_len).to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");
    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&1u16.to_le_bytes()); // PCM
    header[22..24].copy_from_slice(&channels.to_le_bytes());
    header[24..28].copy_from_slice(&sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    header[32..34].copy_from_slice(&block_align.to_le_bytes());
    header[34..36].copy_from_slice(&bits_per_sample.to_le_bytes());
    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&data_len.to_le_bytes());
    header
}

/// Wrap headerless 16-bit PCM in a WAV container, leaving the data untouched
pub fn wrap_pcm16(data: &[u8], sample_rate: u32, channels: u16) -> Vec<u8> {
    let data_len = u32::try_from(data.len()).unwrap_or(u32::MAX);
    let mut out = Vec::with_capacity(WAV_HEADER_LEN + data.len());
    out.extend_from_slice(&pcm_wav_header(data_len, sample_rate, channels, 16));
    out.extend_from_slice(data);
    out
}

/// Encode interleaved f32 samples as a 16-bit PCM WAV file
pub fn encode_wav(samples: &[f32], sample_rate: u32, channels: u16) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).context("Failed to create WAV writer")?;
        for &sample in samples {
            let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer
                .write_sample(value)
                .context("Failed to write sample to WAV")?;
        }
        writer.finalize().context("Failed to finalize WAV data")?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_pcm16_header() {
        let data = vec![1u8, 2, 3, 4, 5, 6];
        let wav = wrap_pcm16(&data, 16000, 1);

        assert_eq!(wav.len(), WAV_HEADER_LEN + data.len());
        assert!(is_riff_wave(&wav));
        assert_eq!(&wav[12..16], b"fmt ");
        assert_eq!(&wav[36..40], b"data");
        assert_eq!(u32::from_le_bytes([wav[40], wav[41], wav[42], wav[43]]), 6);
        assert_eq!(u32::from_le_bytes([wav[24], wav[25], wav[26], wav[27]]), 16000);
        assert_eq!(u32::from_le_bytes([wav[28], wav[29], wav[30], wav[31]]), 32000);
        assert_eq!(&wav[WAV_HEADER_LEN..], data.as_slice());
    }

    #[test]
    fn test_encode_wav_reads_back() {
        let samples = vec![0.0, 0.5, -0.5, 1.0];
        let bytes = encode_wav(&samples, 16000, 1).unwrap();

        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.spec().sample_rate, 16000);
        assert_eq!(reader.spec().channels, 1);
        let decoded: Vec<i16> = reader.into_samples::<i16>().collect::<Result<_, _>>().unwrap();
        assert_eq!(decoded, vec![0, 16383, -16383, i16::MAX]);
    }

    #[test]
    fn test_is_riff_wave_rejects_short_and_foreign() {
        assert!(!is_riff_wave(b"RIFF"));
        assert!(!is_riff_wave(b"OggS\0\0\0\0\0\0\0\0"));
    }
}
