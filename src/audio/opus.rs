// Raw Opus frame detection
//
// The recorder stores Opus packets back to back with no container and no
// length prefixes. The frame size is recovered heuristically: the upper six
// bits of the TOC byte (config + stereo flag) stay constant for a CBR stream,
// so a stride at which they repeat is taken to be the frame size.
//
// The duration mapping from the TOC's upper nibble follows what the device
// firmware has been observed to produce; it is not a full Opus TOC parse.

use tracing::debug;

/// Strides probed, in order of preference
pub const CANDIDATE_FRAME_SIZES: [usize; 6] = [40, 80, 60, 120, 20, 160];

/// Stride assumed when no candidate matches
pub const DEFAULT_FRAME_SIZE: usize = 40;

/// Masks out the two frame-count bits of the TOC byte
const TOC_MASK: u8 = 0xFC;

/// Frame layout detected in a raw Opus stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    /// Bytes per encoded frame
    pub frame_size: usize,
    /// Audio duration of one frame in milliseconds
    pub frame_duration_ms: u32,
}

impl FrameLayout {
    pub fn frame_duration_us(&self) -> u64 {
        self.frame_duration_ms as u64 * 1000
    }
}

/// Frame duration derived from the TOC byte's upper nibble
pub fn frame_duration_ms(toc: u8) -> u32 {
    match toc >> 4 {
        0..=3 => 10,
        4..=7 => 20,
        8..=11 => 40,
        _ => 60,
    }
}

/// Probe candidate strides for a repeating TOC byte across three frames
pub fn detect_frame_layout(bytes: &[u8]) -> Option<FrameLayout> {
    let toc = *bytes.first()?;
    let masked = toc & TOC_MASK;

    CANDIDATE_FRAME_SIZES
        .iter()
        .copied()
        .find(|&size| {
            bytes.len() >= size * 3
                && bytes[size] & TOC_MASK == masked
                && bytes[size * 2] & TOC_MASK == masked
        })
        .map(|frame_size| {
            let layout = FrameLayout {
                frame_size,
                frame_duration_ms: frame_duration_ms(toc),
            };
            debug!(
                "Detected Opus frames: {} bytes, {}ms (TOC 0x{:02x})",
                layout.frame_size, layout.frame_duration_ms, toc
            );
            layout
        })
}

/// Layout to use when detection fails
pub fn default_layout(bytes: &[u8]) -> FrameLayout {
    FrameLayout {
        frame_size: DEFAULT_FRAME_SIZE,
        frame_duration_ms: frame_duration_ms(bytes.first().copied().unwrap_or(0)),
    }
}

/// Minimal 19-byte `OpusHead` identification header (RFC 7845, mapping family 0)
pub fn opus_head(channels: u8, input_sample_rate: u32) -> Vec<u8> {
    let mut head = Vec::with_capacity(19);
    head.extend_from_slice(b"OpusHead");
    head.push(1); // version
    head.push(channels);
    head.extend_from_slice(&0u16.to_le_bytes()); // pre-skip
    head.extend_from_slice(&input_sample_rate.to_le_bytes());
    head.extend_from_slice(&0i16.to_le_bytes()); // output gain
    head.push(0); // channel mapping family
    head
}
