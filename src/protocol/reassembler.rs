//! Stream reassembly for BLE notifications.
//!
//! Notifications arrive in arbitrarily sized fragments: a frame may span several
//! notifications and one notification may carry several frames. [`FrameAssembler`]
//! accumulates fragments and yields validated frames, resynchronising on the
//! sync byte after corruption.

use tracing::debug;

use super::frame::{decode, Frame, SYNC_BYTE};

/// Accumulates inbound fragments for one notification channel
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buffer: Vec<u8>,
    discarded: u64,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a single fragment and extract every complete, valid frame
    pub fn push(&mut self, fragment: &[u8]) -> Vec<Frame> {
        self.push_batch([fragment])
    }

    /// Append several queued fragments in one pass, then extract frames
    pub fn push_batch<'a, I>(&mut self, fragments: I) -> Vec<Frame>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        for fragment in fragments {
            self.buffer.extend_from_slice(fragment);
        }

        let mut frames = Vec::new();
        let mut offset = 0;

        loop {
            // Skip garbage up to the next sync marker
            match self.buffer[offset..].iter().position(|&b| b == SYNC_BYTE) {
                Some(0) => {}
                Some(skip) => {
                    debug!("Skipping {} bytes before sync marker", skip);
                    self.discarded += skip as u64;
                    offset += skip;
                }
                None => {
                    let rest = self.buffer.len() - offset;
                    if rest > 0 {
                        debug!("No sync marker in {} buffered bytes, discarding", rest);
                        self.discarded += rest as u64;
                    }
                    offset = self.buffer.len();
                    break;
                }
            }

            match decode(&self.buffer[offset..]) {
                // Header or payload still incomplete
                None => break,
                Some(frame) if !frame.valid => {
                    // The length field may itself be corrupt, so only step one byte
                    debug!(
                        "CRC mismatch on frame seq={} len={}, resyncing",
                        frame.sequence, frame.length
                    );
                    self.discarded += 1;
                    offset += 1;
                }
                Some(frame) => {
                    offset += frame.wire_len();
                    frames.push(frame);
                }
            }
        }

        self.buffer.drain(..offset);
        frames
    }

    /// Drop all buffered bytes
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.discarded = 0;
    }

    /// Number of bytes waiting for more data
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Total bytes thrown away while resynchronising
    pub fn discarded_bytes(&self) -> u64 {
        self.discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::encode;

    fn sample_frames(count: usize) -> Vec<Vec<u8>> {
        (0..count)
            .map(|i| {
                let body: Vec<u8> = (0..(i * 7 % 40)).map(|b| (b as u8).wrapping_mul(3)).collect();
                encode(i as u8, 2, Some(0x02), &body)
            })
            .collect()
    }

    #[test]
    fn test_single_frame() {
        let mut assembler = FrameAssembler::new();
        let frames = assembler.push(&encode(1, 0, Some(1), &[80]));

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].body(), &[80]);
        assert!(assembler.is_empty());
    }

    #[test]
    fn test_multiple_frames_in_one_fragment() {
        let stream: Vec<u8> = sample_frames(5).concat();
        let mut assembler = FrameAssembler::new();

        let frames = assembler.push(&stream);

        assert_eq!(frames.len(), 5);
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.sequence, i as u8);
        }
    }

    #[test]
    fn test_frame_split_across_fragments() {
        let bytes = encode(9, 2, Some(2), &[1, 2, 3, 4, 5, 6, 7, 8]);
        let mut assembler = FrameAssembler::new();

        assert!(assembler.push(&bytes[..2]).is_empty());
        assert!(assembler.push(&bytes[2..7]).is_empty());
        let frames = assembler.push(&bytes[7..]);

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].sequence, 9);
    }

    #[test]
    fn test_resync_after_inserted_byte() {
        let frame_a = encode(1, 0, Some(1), &[10, 20]);
        let frame_b = encode(2, 0, Some(3), b"1.0.4\0");

        let mut stream = frame_a.clone();
        stream.push(0x00);
        stream.extend_from_slice(&frame_b);

        let mut assembler = FrameAssembler::new();
        let frames = assembler.push(&stream);

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].sequence, 1);
        assert_eq!(frames[1].sequence, 2);
        assert_eq!(assembler.discarded_bytes(), 1);
    }

    #[test]
    fn test_resync_after_corrupted_frame() {
        let mut frame_a = encode(1, 2, Some(2), &[1, 2, 3, 4]);
        let frame_b = encode(2, 2, Some(2), &[5, 6, 7, 8]);
        frame_a[7] ^= 0x40;

        let mut stream = frame_a;
        stream.extend_from_slice(&frame_b);

        let mut assembler = FrameAssembler::new();
        let frames = assembler.push(&stream);

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].sequence, 2);
        assert_eq!(frames[0].body(), &[5, 6, 7, 8]);
    }

    #[test]
    fn test_garbage_without_sync_is_discarded() {
        let mut assembler = FrameAssembler::new();

        assert!(assembler.push(&[0x01, 0x02, 0x03]).is_empty());
        assert!(assembler.is_empty());

        let frames = assembler.push(&encode(3, 0, Some(1), &[]));
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_batch_append() {
        let encoded = sample_frames(4);
        let stream = encoded.concat();
        let (left, right) = stream.split_at(stream.len() / 2);

        let mut assembler = FrameAssembler::new();
        let frames = assembler.push_batch([left, right]);

        assert_eq!(frames.len(), 4);
    }

    #[test]
    fn test_arbitrary_chunking_is_invariant() {
        let stream: Vec<u8> = sample_frames(30).concat();
        let whole = FrameAssembler::new().push(&stream);
        assert_eq!(whole.len(), 30);

        // Deterministic pseudo-random partitions
        let mut state: u32 = 0x1234_5678;
        for _round in 0..50 {
            let mut assembler = FrameAssembler::new();
            let mut collected = Vec::new();
            let mut pos = 0;

            while pos < stream.len() {
                state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                let size = 1 + (state >> 16) as usize % 23;
                let end = (pos + size).min(stream.len());
                collected.extend(assembler.push(&stream[pos..end]));
                pos = end;
            }

            assert_eq!(collected, whole);
            assert!(assembler.is_empty());
        }
    }

    #[test]
    fn test_reset_clears_partial_frame() {
        let bytes = encode(1, 0, Some(1), &[1, 2, 3]);
        let mut assembler = FrameAssembler::new();

        assembler.push(&bytes[..4]);
        assert_eq!(assembler.len(), 4);

        assembler.reset();
        assert!(assembler.is_empty());
    }
}
