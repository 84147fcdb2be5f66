use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Import request body: 4 reserved bytes followed by a 20-byte name field
pub const REQUEST_BODY_LEN: usize = 24;
const NAME_FIELD_LEN: usize = 20;

/// Build the import request body for a file
///
/// Uses the raw on-device name bytes when available so names in the device's
/// legacy codepage round-trip exactly.
pub fn import_request_body(name: &str, raw_name_bytes: &[u8]) -> [u8; REQUEST_BODY_LEN] {
    let source = if raw_name_bytes.is_empty() {
        name.as_bytes()
    } else {
        raw_name_bytes
    };

    let mut body = [0u8; REQUEST_BODY_LEN];
    let len = source.len().min(NAME_FIELD_LEN);
    body[4..4 + len].copy_from_slice(&source[..len]);
    body
}

/// Progress of a transfer as seen from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadPhase {
    /// Import request sent, nothing received yet
    Requested,
    /// Device acknowledged or data is flowing
    Receiving,
}

/// Rate-limits progress notifications
#[derive(Debug)]
struct ProgressThrottle {
    interval: Duration,
    last_percent: Option<u8>,
    last_emit: Option<Instant>,
}

impl ProgressThrottle {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_percent: None,
            last_emit: None,
        }
    }

    fn update(&mut self, percent: u8, now: Instant) -> Option<u8> {
        if self.last_percent == Some(percent) {
            return None;
        }

        let due = match self.last_emit {
            None => true,
            Some(last) => now.duration_since(last) >= self.interval,
        };

        // 0% and 100% always go out
        if percent == 0 || percent == 100 || due {
            self.last_percent = Some(percent);
            self.last_emit = Some(now);
            Some(percent)
        } else {
            None
        }
    }
}

/// State of one file transfer
#[derive(Debug)]
pub struct DownloadSession {
    target_name: String,
    chunks: Vec<Vec<u8>>,
    received_bytes: u64,
    total_bytes: u64,
    phase: DownloadPhase,
    watchdog: Duration,
    deadline: Instant,
    progress: ProgressThrottle,
}

impl DownloadSession {
    /// Start tracking a transfer; returns the session and the initial 0% report
    pub fn new(
        target_name: impl Into<String>,
        total_bytes: u64,
        watchdog: Duration,
        progress_interval: Duration,
        now: Instant,
    ) -> (Self, u8) {
        let mut progress = ProgressThrottle::new(progress_interval);
        let initial = progress.update(0, now).unwrap_or(0);

        let session = Self {
            target_name: target_name.into(),
            chunks: Vec::new(),
            received_bytes: 0,
            total_bytes,
            phase: DownloadPhase::Requested,
            watchdog,
            deadline: now + watchdog,
            progress,
        };

        (session, initial)
    }

    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    pub fn phase(&self) -> DownloadPhase {
        self.phase
    }

    pub fn received_bytes(&self) -> u64 {
        self.received_bytes
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// When the watchdog fires unless more data arrives
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn watchdog(&self) -> Duration {
        self.watchdog
    }

    pub fn is_stalled(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    /// Device acknowledged the import request
    pub fn mark_started(&mut self, now: Instant) {
        self.phase = DownloadPhase::Receiving;
        self.deadline = now + self.watchdog;
    }

    /// Append a data chunk; returns a progress percentage when one is due
    pub fn push_chunk(&mut self, data: &[u8], now: Instant) -> Option<u8> {
        self.phase = DownloadPhase::Receiving;
        self.deadline = now + self.watchdog;
        self.received_bytes += data.len() as u64;
        self.chunks.push(data.to_vec());

        let percent = self.percent();
        let emitted = self.progress.update(percent, now);
        if let Some(percent) = emitted {
            debug!(
                "{}: {}% ({}/{} bytes)",
                self.target_name, percent, self.received_bytes, self.total_bytes
            );
        }
        emitted
    }

    fn percent(&self) -> u8 {
        if self.total_bytes == 0 {
            return 0;
        }
        (self.received_bytes.saturating_mul(100) / self.total_bytes).min(100) as u8
    }

    /// Close the transfer; returns the name, the concatenated bytes and a final
    /// 100% report if it has not been sent yet
    pub fn finish(mut self, now: Instant) -> (String, Vec<u8>, Option<u8>) {
        let final_progress = self.progress.update(100, now);
        let bytes = self.chunks.concat();
        (self.target_name, bytes, final_progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WATCHDOG: Duration = Duration::from_secs(8);
    const INTERVAL: Duration = Duration::from_millis(200);

    #[test]
    fn test_request_body_uses_raw_name() {
        let body = import_request_body("ignored", &[0xC2, 0xBC, b'1']);

        assert_eq!(body.len(), REQUEST_BODY_LEN);
        assert_eq!(&body[..4], &[0, 0, 0, 0]);
        assert_eq!(&body[4..7], &[0xC2, 0xBC, b'1']);
        assert!(body[7..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_request_body_falls_back_to_utf8_and_truncates() {
        let body = import_request_body("a-very-long-recording-name.wav", &[]);

        assert_eq!(&body[4..], b"a-very-long-recordin");
    }

    #[test]
    fn test_initial_progress_is_zero() {
        let (session, initial) = DownloadSession::new("a.wav", 100, WATCHDOG, INTERVAL, Instant::now());

        assert_eq!(initial, 0);
        assert_eq!(session.phase(), DownloadPhase::Requested);
    }

    #[test]
    fn test_rapid_chunks_only_report_bounds() {
        let now = Instant::now();
        let (mut session, _) = DownloadSession::new("a.wav", 1000, WATCHDOG, INTERVAL, now);

        let reports: Vec<u8> = (0..1000)
            .filter_map(|_| session.push_chunk(&[0u8], now))
            .collect();

        // Everything lands within one throttle window: only 100% gets through
        assert_eq!(reports, vec![100]);
        assert_eq!(session.received_bytes(), 1000);
    }

    #[test]
    fn test_progress_throttled_by_elapsed_time() {
        let start = Instant::now();
        let (mut session, _) = DownloadSession::new("a.wav", 1000, WATCHDOG, INTERVAL, start);

        // 1000 chunks spread over one second
        let mut calls = 1; // initial 0%
        for i in 0..1000u64 {
            let now = start + Duration::from_millis(i + 1);
            if session.push_chunk(&[0u8], now).is_some() {
                calls += 1;
            }
        }

        let elapsed_windows = 1000 / INTERVAL.as_millis() as usize;
        assert!(calls <= elapsed_windows + 2, "too many progress calls: {}", calls);
        assert!(calls >= 2);
    }

    #[test]
    fn test_chunks_reset_watchdog() {
        let start = Instant::now();
        let (mut session, _) = DownloadSession::new("a.wav", 10, WATCHDOG, INTERVAL, start);

        let later = start + Duration::from_secs(5);
        session.push_chunk(&[1, 2], later);

        assert!(!session.is_stalled(start + Duration::from_secs(9)));
        assert!(session.is_stalled(later + WATCHDOG));
    }

    #[test]
    fn test_finish_concatenates_in_order() {
        let now = Instant::now();
        let (mut session, _) = DownloadSession::new("a.wav", 0, WATCHDOG, INTERVAL, now);
        session.push_chunk(&[1, 2], now);
        session.push_chunk(&[3], now);

        let (name, bytes, final_progress) = session.finish(now);

        assert_eq!(name, "a.wav");
        assert_eq!(bytes, vec![1, 2, 3]);
        // Unknown total never reported 100% on its own
        assert_eq!(final_progress, Some(100));
    }
}
