// Catalog decoding
//
// The device streams its directory as back-to-back 28-byte records:
//
//   [0..4]   protocol time, big-endian u32 (epoch seconds or duration)
//   [4..8]   file size, big-endian u32
//   [8..28]  file name, null-padded, GBK with UTF-8 fallback
//
// Records may be split across notifications, so partial records are buffered.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

pub const RECORD_LEN: usize = 28;
const NAME_OFFSET: usize = 8;

/// 2000-01-01T00:00:00Z; protocol times above this are calendar timestamps
const EPOCH_2000: u64 = 946_684_800;

/// Protocol times below one week are recording durations
const ONE_WEEK_SECS: u64 = 7 * 24 * 60 * 60;

/// A recording stored on the device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFileInfo {
    /// Decoded file name
    pub name: String,
    /// Name bytes exactly as the device sent them (without padding)
    pub raw_name_bytes: Vec<u8>,
    /// File size in bytes
    pub size_bytes: u64,
    /// When the recording was made
    pub recorded_at: DateTime<Utc>,
    /// Recording length, when the device reported one
    pub duration_seconds: Option<u64>,
}

impl DeviceFileInfo {
    pub fn recorded_at_epoch_seconds(&self) -> u64 {
        self.recorded_at.timestamp().max(0) as u64
    }
}

/// Incremental decoder for one catalog fetch
#[derive(Debug)]
pub struct CatalogDecoder {
    pending: Vec<u8>,
    files: Vec<DeviceFileInfo>,
    seen: HashSet<(String, u64)>,
    now: DateTime<Utc>,
}

impl CatalogDecoder {
    /// `now` is the fallback timestamp for records without a usable date
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            pending: Vec::new(),
            files: Vec::new(),
            seen: HashSet::new(),
            now,
        }
    }

    /// Decode a complete catalog dump in one go
    pub fn decode_stream(bytes: &[u8], now: DateTime<Utc>) -> Vec<DeviceFileInfo> {
        let mut decoder = Self::new(now);
        decoder.feed(bytes);
        decoder.finish()
    }

    /// Feed catalog bytes, returning how many new entries were added
    pub fn feed(&mut self, bytes: &[u8]) -> usize {
        self.pending.extend_from_slice(bytes);

        let complete = self.pending.len() / RECORD_LEN * RECORD_LEN;
        let mut added = 0;

        for record in self.pending[..complete].chunks_exact(RECORD_LEN) {
            let Some(file) = decode_record(record, self.now) else {
                continue;
            };
            if self.seen.insert((file.name.clone(), file.size_bytes)) {
                debug!("Catalog entry: {} ({} bytes)", file.name, file.size_bytes);
                self.files.push(file);
                added += 1;
            } else {
                debug!("Duplicate catalog entry: {}", file.name);
            }
        }

        self.pending.drain(..complete);
        added
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Finish the fetch and hand out the deduplicated list
    pub fn finish(self) -> Vec<DeviceFileInfo> {
        if !self.pending.is_empty() {
            warn!(
                "Discarding {} trailing catalog bytes (incomplete record)",
                self.pending.len()
            );
        }
        self.files
    }
}

/// Decode one 28-byte directory record; `None` if fewer bytes are given
pub fn decode_record(record: &[u8], now: DateTime<Utc>) -> Option<DeviceFileInfo> {
    let record = record.get(..RECORD_LEN)?;
    let protocol_time = u32::from_be_bytes([record[0], record[1], record[2], record[3]]) as u64;
    let size_bytes = u32::from_be_bytes([record[4], record[5], record[6], record[7]]) as u64;

    let name_field = &record[NAME_OFFSET..];
    let end = name_field.iter().position(|&b| b == 0).unwrap_or(name_field.len());
    let raw_name_bytes = name_field[..end].to_vec();

    let name = decode_name(&raw_name_bytes).unwrap_or_else(|| {
        warn!("Undecodable file name {:02x?}", raw_name_bytes);
        format!("File_{}", protocol_time)
    });

    let recorded_at = timestamp_from_name(&name)
        .or_else(|| {
            if protocol_time > EPOCH_2000 {
                Utc.timestamp_opt(protocol_time as i64, 0).single()
            } else {
                None
            }
        })
        .unwrap_or(now);

    let duration_seconds = if (1..ONE_WEEK_SECS).contains(&protocol_time) {
        Some(protocol_time)
    } else {
        None
    };

    Some(DeviceFileInfo {
        name,
        raw_name_bytes,
        size_bytes,
        recorded_at,
        duration_seconds,
    })
}

/// GBK first, then UTF-8; `None` if neither yields a printable name
fn decode_name(raw: &[u8]) -> Option<String> {
    if raw.is_empty() {
        return None;
    }

    let printable = |name: &str| !name.trim().is_empty() && !name.chars().any(char::is_control);

    if let Some(name) = encoding_rs::GBK.decode_without_bom_handling_and_without_replacement(raw) {
        if printable(&name) {
            return Some(name.trim().to_string());
        }
    }

    match std::str::from_utf8(raw) {
        Ok(name) if printable(name) => Some(name.trim().to_string()),
        _ => None,
    }
}

/// Find a `YYYYMMDD[-_]?HHMMSS` stamp anywhere in the name
fn timestamp_from_name(name: &str) -> Option<DateTime<Utc>> {
    let bytes = name.as_bytes();

    let digits = |start: usize, len: usize| -> Option<u32> {
        let slice = bytes.get(start..start + len)?;
        if !slice.iter().all(u8::is_ascii_digit) {
            return None;
        }
        slice
            .iter()
            .try_fold(0u32, |acc, &b| Some(acc * 10 + (b - b'0') as u32))
    };

    for start in 0..bytes.len() {
        let Some(date) = digits(start, 8) else {
            continue;
        };

        let time_start = match bytes.get(start + 8) {
            Some(b'-') | Some(b'_') => start + 9,
            _ => start + 8,
        };
        let Some(time) = digits(time_start, 6) else {
            continue;
        };

        let parsed = NaiveDate::from_ymd_opt((date / 10_000) as i32, date / 100 % 100, date % 100)
            .and_then(|day| day.and_hms_opt(time / 10_000, time / 100 % 100, time % 100));

        if let Some(naive) = parsed {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    None
}
