// Frame codec for the recorder's binary protocol
//
// Layout (6-byte header followed by the payload):
//
//   [0]     sync byte 0x5A
//   [1]     sequence
//   [2..4]  CRC16, big-endian
//   [4..6]  payload length, little-endian
//   [6..]   payload: domain, optional command, optional body
//
// The CRC covers the two little-endian length bytes followed by the payload.
// The mixed endianness is what the device firmware speaks.

use super::crc::crc16;

/// Sync marker that starts every frame
pub const SYNC_BYTE: u8 = 0x5A;

/// Size of the fixed frame header
pub const HEADER_LEN: usize = 6;

/// A single decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Sequence number assigned by the sender
    pub sequence: u8,
    /// CRC as carried on the wire
    pub crc: u16,
    /// Declared payload length
    pub length: u16,
    /// Raw payload (domain, command, body)
    pub payload: Vec<u8>,
    /// Whether the carried CRC matches the recomputed one
    pub valid: bool,
}

impl Frame {
    /// Domain code, the first payload byte
    pub fn domain(&self) -> Option<u8> {
        self.payload.first().copied()
    }

    /// Command code, the second payload byte
    pub fn command(&self) -> Option<u8> {
        self.payload.get(1).copied()
    }

    /// Everything after domain and command
    pub fn body(&self) -> &[u8] {
        self.payload.get(2..).unwrap_or(&[])
    }

    /// Bytes this frame occupies on the wire
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.length as usize
    }
}

fn checksum(length: u16, payload: &[u8]) -> u16 {
    let mut covered = Vec::with_capacity(2 + payload.len());
    covered.extend_from_slice(&length.to_le_bytes());
    covered.extend_from_slice(payload);
    crc16(&covered)
}

/// Encode a frame ready to be written to the device
///
/// `body` is only appended when a command is present.
pub fn encode(sequence: u8, domain: u8, command: Option<u8>, body: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(2 + body.len());
    payload.push(domain);
    if let Some(command) = command {
        payload.push(command);
        payload.extend_from_slice(body);
    }

    // Payloads are bounded by the BLE write size, far below u16::MAX
    let length = payload.len().min(u16::MAX as usize) as u16;
    payload.truncate(length as usize);
    let crc = checksum(length, &payload);

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.push(SYNC_BYTE);
    out.push(sequence);
    out.extend_from_slice(&crc.to_be_bytes());
    out.extend_from_slice(&length.to_le_bytes());
    out.extend_from_slice(&payload);
    out
}

/// Try to decode a frame at the start of `buffer`
///
/// Returns `None` when the buffer does not start with the sync byte or does not
/// yet hold the whole frame. A complete frame with a bad CRC is returned with
/// `valid == false` so the caller can decide how to resynchronise.
pub fn decode(buffer: &[u8]) -> Option<Frame> {
    if buffer.len() < HEADER_LEN || buffer[0] != SYNC_BYTE {
        return None;
    }

    let sequence = buffer[1];
    let crc = u16::from_be_bytes([buffer[2], buffer[3]]);
    let length = u16::from_le_bytes([buffer[4], buffer[5]]);

    let end = HEADER_LEN + length as usize;
    if buffer.len() < end {
        return None;
    }

    let payload = buffer[HEADER_LEN..end].to_vec();
    let valid = checksum(length, &payload) == crc;

    Some(Frame {
        sequence,
        crc,
        length,
        payload,
        valid,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_header_layout() {
        let bytes = encode(7, 2, Some(0x10), &[0xAA, 0xBB, 0xCC]);

        assert_eq!(bytes[0], SYNC_BYTE);
        assert_eq!(bytes[1], 7);
        // Length is little-endian
        assert_eq!(&bytes[4..6], &[5, 0]);
        // CRC is big-endian over length ++ payload
        let expected = crc16(&[5, 0, 2, 0x10, 0xAA, 0xBB, 0xCC]);
        assert_eq!(&bytes[2..4], &expected.to_be_bytes());
        assert_eq!(&bytes[6..], &[2, 0x10, 0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn test_round_trip() {
        let cases: Vec<(u8, Option<u8>, Vec<u8>)> = vec![
            (0, Some(1), vec![]),
            (2, Some(5), vec![1, 2, 3, 4]),
            (3, None, vec![]),
            (1, Some(0xFF), (0..=255).collect()),
        ];

        for (seq, (domain, command, body)) in cases.into_iter().enumerate() {
            let bytes = encode(seq as u8, domain, command, &body);
            let frame = decode(&bytes).expect("complete frame");

            assert!(frame.valid);
            assert_eq!(frame.sequence, seq as u8);
            assert_eq!(frame.length as usize, frame.payload.len());
            assert_eq!(frame.domain(), Some(domain));
            assert_eq!(frame.command(), command);
            assert_eq!(frame.body(), body.as_slice());
            assert_eq!(frame.wire_len(), bytes.len());
        }
    }

    #[test]
    fn test_single_bit_flip_invalidates_crc() {
        let bytes = encode(1, 2, Some(3), &[9, 8, 7, 6]);

        for index in HEADER_LEN..bytes.len() {
            for bit in 0..8 {
                let mut corrupted = bytes.clone();
                corrupted[index] ^= 1 << bit;
                let frame = decode(&corrupted).expect("complete frame");
                assert!(!frame.valid, "flip at byte {} bit {} went unnoticed", index, bit);
            }
        }
    }

    #[test]
    fn test_decode_needs_more_data() {
        let bytes = encode(0, 2, Some(2), &[1, 2, 3, 4, 5, 6]);

        assert!(decode(&bytes[..3]).is_none());
        assert!(decode(&bytes[..HEADER_LEN]).is_none());
        assert!(decode(&bytes[..bytes.len() - 1]).is_none());
        assert!(decode(&bytes).is_some());
    }

    #[test]
    fn test_decode_rejects_missing_sync() {
        let mut bytes = encode(0, 0, Some(1), &[]);
        bytes[0] = 0x00;
        assert!(decode(&bytes).is_none());
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let mut bytes = encode(4, 0, Some(1), &[50]);
        let len = bytes.len();
        bytes.extend_from_slice(&[0x5A, 0x01]);

        let frame = decode(&bytes).expect("complete frame");
        assert!(frame.valid);
        assert_eq!(frame.wire_len(), len);
    }
}
