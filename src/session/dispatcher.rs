//! Frame dispatch and per-operation state.
//!
//! The dispatcher is synchronous and clock-injected: the connection task feeds
//! it validated frames and the current time, and acts on the returned
//! [`Outcome`]s. Which of "fetching the catalog" and "downloading" is active is
//! an explicit [`Operation`] tag, so the overloaded `FILE_DATA` command is
//! routed by matching on it.

use chrono::{DateTime, Utc};
use std::mem;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::config::SyncConfig;
use crate::device::status::{parse_battery, parse_capacity, parse_version};
use crate::device::{CatalogDecoder, DeviceFileInfo, DeviceStatus, DownloadSession, StatusUpdate};
use crate::error::SyncError;
use crate::protocol::commands::{control, file};
use crate::protocol::{Domain, Frame};

/// Bytes at the start of a list reply before the catalog records
const LIST_REPLY_PREFIX: usize = 4;

/// A catalog fetch in progress
#[derive(Debug)]
pub struct CatalogFetch {
    decoder: CatalogDecoder,
    deadline: Instant,
}

/// The single operation a connection may be running
#[derive(Debug)]
pub enum Operation {
    Idle,
    FetchingCatalog(CatalogFetch),
    Downloading(DownloadSession),
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Idle => "idle",
            Operation::FetchingCatalog(_) => "catalog fetch",
            Operation::Downloading(_) => "download",
        }
    }
}

/// What the connection task must do in response to traffic or timers
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Status(StatusUpdate),
    CatalogReady(Vec<DeviceFileInfo>),
    CatalogFailed(SyncError),
    Progress { name: String, percent: u8 },
    DownloadReady { name: String, bytes: Vec<u8> },
    DownloadFailed { name: String, error: SyncError },
}

pub struct Dispatcher {
    config: SyncConfig,
    status: DeviceStatus,
    operation: Operation,
}

impl Dispatcher {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            status: DeviceStatus::default(),
            operation: Operation::Idle,
        }
    }

    pub fn status(&self) -> &DeviceStatus {
        &self.status
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    fn ensure_idle(&self) -> Result<(), SyncError> {
        match self.operation {
            Operation::Idle => Ok(()),
            ref busy => Err(SyncError::Busy(busy.name())),
        }
    }

    /// Start a catalog fetch; the idle window is armed immediately
    pub fn begin_catalog(&mut self, now: Instant, wall_clock: DateTime<Utc>) -> Result<(), SyncError> {
        self.ensure_idle()?;

        info!("Fetching catalog");
        self.operation = Operation::FetchingCatalog(CatalogFetch {
            decoder: CatalogDecoder::new(wall_clock),
            deadline: now + self.config.catalog_idle(),
        });
        Ok(())
    }

    /// Start a download; returns the initial 0% progress report
    pub fn begin_download(&mut self, target: &DeviceFileInfo, now: Instant) -> Result<Outcome, SyncError> {
        self.ensure_idle()?;

        info!("Downloading {} ({} bytes)", target.name, target.size_bytes);
        let (session, percent) = DownloadSession::new(
            target.name.clone(),
            target.size_bytes,
            self.config.watchdog(),
            self.config.progress_interval(),
            now,
        );
        self.operation = Operation::Downloading(session);

        Ok(Outcome::Progress {
            name: target.name.clone(),
            percent,
        })
    }

    /// Earliest pending timer (catalog idle window or download watchdog)
    pub fn next_deadline(&self) -> Option<Instant> {
        match &self.operation {
            Operation::Idle => None,
            Operation::FetchingCatalog(fetch) => Some(fetch.deadline),
            Operation::Downloading(session) => Some(session.deadline()),
        }
    }

    /// Fire any timers that have expired at `now`
    pub fn poll_timers(&mut self, now: Instant) -> Vec<Outcome> {
        let expired = match &self.operation {
            Operation::Idle => false,
            Operation::FetchingCatalog(fetch) => now >= fetch.deadline,
            Operation::Downloading(session) => session.is_stalled(now),
        };

        if !expired {
            return Vec::new();
        }

        match mem::replace(&mut self.operation, Operation::Idle) {
            Operation::FetchingCatalog(fetch) => {
                debug!("Catalog stream idle, finalizing");
                vec![Self::finish_catalog(fetch)]
            }
            Operation::Downloading(session) => {
                warn!(
                    "Download of {} stalled after {} bytes",
                    session.target_name(),
                    session.received_bytes()
                );
                vec![Outcome::DownloadFailed {
                    name: session.target_name().to_string(),
                    error: SyncError::Timeout(session.watchdog()),
                }]
            }
            Operation::Idle => Vec::new(),
        }
    }

    /// Abandon whatever is running (used on disconnect and write failures)
    pub fn abort(&mut self, error: SyncError) -> Option<Outcome> {
        match mem::replace(&mut self.operation, Operation::Idle) {
            Operation::Idle => None,
            Operation::FetchingCatalog(_) => Some(Outcome::CatalogFailed(error)),
            Operation::Downloading(session) => Some(Outcome::DownloadFailed {
                name: session.target_name().to_string(),
                error,
            }),
        }
    }

    fn finish_catalog(fetch: CatalogFetch) -> Outcome {
        let files = fetch.decoder.finish();
        info!("Catalog complete: {} files", files.len());
        Outcome::CatalogReady(files)
    }

    /// Route one frame by domain and command
    pub fn handle_frame(&mut self, frame: &Frame, now: Instant) -> Vec<Outcome> {
        if !frame.valid {
            debug!("Ignoring frame with bad CRC (seq={})", frame.sequence);
            return Vec::new();
        }

        let (Some(domain), Some(command)) = (frame.domain(), frame.command()) else {
            debug!("Ignoring frame without command (seq={})", frame.sequence);
            return Vec::new();
        };

        match Domain::from_code(domain) {
            Some(Domain::Control) => self.handle_control(command, frame.body()),
            Some(Domain::FileTransfer) => self.handle_file(command, frame.body(), now),
            Some(other) => {
                debug!("Ignoring {:?} frame (command 0x{:02x})", other, command);
                Vec::new()
            }
            None => {
                debug!("Ignoring frame with unknown domain 0x{:02x}", domain);
                Vec::new()
            }
        }
    }

    fn handle_control(&mut self, command: u8, body: &[u8]) -> Vec<Outcome> {
        let update = match command {
            control::BATTERY => parse_battery(body),
            control::CAPACITY => parse_capacity(body),
            control::VERSION => parse_version(body),
            control::HIGH_SPEED => {
                info!("High-speed transfer mode acknowledged");
                None
            }
            other => {
                debug!("Unknown control command 0x{:02x}", other);
                None
            }
        };

        match update {
            Some(update) => {
                debug!("Device status update: {:?}", update);
                self.status.apply(&update);
                vec![Outcome::Status(update)]
            }
            None => Vec::new(),
        }
    }

    fn handle_file(&mut self, command: u8, body: &[u8], now: Instant) -> Vec<Outcome> {
        match command {
            file::LIST => {
                if let Operation::FetchingCatalog(fetch) = &mut self.operation {
                    let records = body.get(LIST_REPLY_PREFIX..).unwrap_or(&[]);
                    fetch.decoder.feed(records);
                    fetch.deadline = now + self.config.catalog_idle();
                } else {
                    debug!("List reply outside a catalog fetch");
                }
                Vec::new()
            }

            file::FILE_DATA => match &mut self.operation {
                Operation::FetchingCatalog(fetch) => {
                    fetch.decoder.feed(body);
                    fetch.deadline = now + self.config.catalog_idle();
                    Vec::new()
                }
                Operation::Downloading(session) => session
                    .push_chunk(body, now)
                    .map(|percent| Outcome::Progress {
                        name: session.target_name().to_string(),
                        percent,
                    })
                    .into_iter()
                    .collect(),
                Operation::Idle => {
                    debug!("Unsolicited file data ({} bytes)", body.len());
                    Vec::new()
                }
            },

            file::LIST_COMPLETE => {
                if !matches!(self.operation, Operation::FetchingCatalog(_)) {
                    debug!("List complete outside a catalog fetch");
                    return Vec::new();
                }
                match mem::replace(&mut self.operation, Operation::Idle) {
                    Operation::FetchingCatalog(fetch) => vec![Self::finish_catalog(fetch)],
                    other => {
                        self.operation = other;
                        Vec::new()
                    }
                }
            }

            file::IMPORT_STARTED => {
                if let Operation::Downloading(session) = &mut self.operation {
                    debug!("Device started sending {}", session.target_name());
                    session.mark_started(now);
                }
                Vec::new()
            }

            file::IMPORT_COMPLETE => {
                if !matches!(self.operation, Operation::Downloading(_)) {
                    debug!("Import complete outside a download");
                    return Vec::new();
                }
                let Operation::Downloading(session) = mem::replace(&mut self.operation, Operation::Idle) else {
                    return Vec::new();
                };

                let code = body.first().copied().unwrap_or(0);
                if code != 0 {
                    warn!("Device rejected import of {} (status {})", session.target_name(), code);
                    return vec![Outcome::DownloadFailed {
                        name: session.target_name().to_string(),
                        error: SyncError::DeviceStatus(code),
                    }];
                }

                let received = session.received_bytes();
                let expected = session.total_bytes();
                if expected > 0 && received != expected {
                    warn!(
                        "{}: received {} bytes, catalog listed {}",
                        session.target_name(),
                        received,
                        expected
                    );
                }

                let (name, bytes, final_progress) = session.finish(now);
                info!("Download of {} complete ({} bytes)", name, bytes.len());

                let mut outcomes = Vec::with_capacity(2);
                if let Some(percent) = final_progress {
                    outcomes.push(Outcome::Progress {
                        name: name.clone(),
                        percent,
                    });
                }
                outcomes.push(Outcome::DownloadReady { name, bytes });
                outcomes
            }

            other => {
                debug!("Unknown file-transfer command 0x{:02x}", other);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::status::{StorageCapacity, MEGABYTE};
    use crate::protocol::{decode, encode};
    use chrono::TimeZone;
    use std::time::Duration;

    fn frame(domain: Domain, command: u8, body: &[u8]) -> Frame {
        decode(&encode(0, domain.code(), Some(command), body)).unwrap()
    }

    fn record(name: &[u8], size: u32) -> Vec<u8> {
        let mut bytes = vec![0, 0, 0, 0];
        bytes.extend_from_slice(&size.to_be_bytes());
        let mut field = [0u8; 20];
        field[..name.len()].copy_from_slice(name);
        bytes.extend_from_slice(&field);
        bytes
    }

    fn target(name: &str, size: u64) -> DeviceFileInfo {
        DeviceFileInfo {
            name: name.to_string(),
            raw_name_bytes: name.as_bytes().to_vec(),
            size_bytes: size,
            recorded_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            duration_seconds: None,
        }
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(SyncConfig::default())
    }

    #[test]
    fn test_control_replies_update_status() {
        let mut d = dispatcher();
        let now = Instant::now();

        let mut capacity = Vec::new();
        capacity.extend_from_slice(&100u32.to_be_bytes());
        capacity.extend_from_slice(&300u32.to_be_bytes());

        d.handle_frame(&frame(Domain::Control, control::BATTERY, &[64]), now);
        d.handle_frame(&frame(Domain::Control, control::CAPACITY, &capacity), now);
        let outcomes = d.handle_frame(&frame(Domain::Control, control::VERSION, b"3.2.1\0"), now);

        assert_eq!(outcomes, vec![Outcome::Status(StatusUpdate::Firmware("3.2.1".into()))]);
        assert_eq!(d.status().battery_percent, Some(64));
        assert_eq!(
            d.status().capacity,
            Some(StorageCapacity {
                used_bytes: 200 * MEGABYTE,
                total_bytes: 300 * MEGABYTE,
            })
        );
    }

    #[test]
    fn test_invalid_frame_is_ignored() {
        let mut bytes = encode(0, 0, Some(control::BATTERY), &[50]);
        bytes[7] ^= 0xFF;
        let corrupted = decode(&bytes).unwrap();

        let mut d = dispatcher();
        assert!(d.handle_frame(&corrupted, Instant::now()).is_empty());
        assert_eq!(d.status().battery_percent, None);
    }

    #[test]
    fn test_catalog_dedup_across_list_replies() {
        let mut d = dispatcher();
        let now = Instant::now();
        d.begin_catalog(now, Utc::now()).unwrap();

        let mut reply = vec![0, 0, 0, 1];
        reply.extend(record(b"a.wav", 10));
        d.handle_frame(&frame(Domain::FileTransfer, file::LIST, &reply), now);
        d.handle_frame(&frame(Domain::FileTransfer, file::LIST, &reply), now);

        let outcomes = d.handle_frame(&frame(Domain::FileTransfer, file::LIST_COMPLETE, &[]), now);
        match outcomes.as_slice() {
            [Outcome::CatalogReady(files)] => assert_eq!(files.len(), 1),
            other => panic!("unexpected outcomes: {:?}", other),
        }
    }

    #[test]
    fn test_file_data_routes_to_catalog_during_fetch() {
        let mut d = dispatcher();
        let now = Instant::now();
        d.begin_catalog(now, Utc::now()).unwrap();

        d.handle_frame(&frame(Domain::FileTransfer, file::FILE_DATA, &record(b"b.wav", 5)), now);
        let outcomes = d.poll_timers(now + Duration::from_millis(1500));

        match outcomes.as_slice() {
            [Outcome::CatalogReady(files)] => assert_eq!(files[0].name, "b.wav"),
            other => panic!("unexpected outcomes: {:?}", other),
        }
    }

    #[test]
    fn test_catalog_finalizes_once_on_explicit_complete() {
        let mut d = dispatcher();
        let now = Instant::now();
        d.begin_catalog(now, Utc::now()).unwrap();

        let complete = frame(Domain::FileTransfer, file::LIST_COMPLETE, &[]);
        let first = d.handle_frame(&complete, now);
        let second = d.handle_frame(&complete, now);
        let timer = d.poll_timers(now + Duration::from_secs(10));

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert!(timer.is_empty());
    }

    #[test]
    fn test_catalog_finalizes_once_on_idle() {
        let mut d = dispatcher();
        let now = Instant::now();
        d.begin_catalog(now, Utc::now()).unwrap();

        let mut reply = vec![0, 0, 0, 1];
        reply.extend(record(b"c.wav", 1));
        let later = now + Duration::from_millis(1000);
        d.handle_frame(&frame(Domain::FileTransfer, file::LIST, &reply), later);

        // Activity pushed the deadline out
        assert!(d.poll_timers(now + Duration::from_millis(1600)).is_empty());
        assert_eq!(d.next_deadline(), Some(later + Duration::from_millis(1500)));

        let fired = d.poll_timers(later + Duration::from_millis(1500));
        assert_eq!(fired.len(), 1);

        let late_complete = d.handle_frame(&frame(Domain::FileTransfer, file::LIST_COMPLETE, &[]), later);
        assert!(late_complete.is_empty());
        assert!(d.poll_timers(later + Duration::from_secs(60)).is_empty());
    }

    #[test]
    fn test_only_one_operation_at_a_time() {
        let mut d = dispatcher();
        let now = Instant::now();
        d.begin_catalog(now, Utc::now()).unwrap();

        assert_eq!(
            d.begin_download(&target("a.wav", 4), now),
            Err(SyncError::Busy("catalog fetch"))
        );
        assert_eq!(d.begin_catalog(now, Utc::now()), Err(SyncError::Busy("catalog fetch")));
    }

    #[test]
    fn test_download_happy_path() {
        let mut d = dispatcher();
        let now = Instant::now();

        let initial = d.begin_download(&target("a.wav", 4), now).unwrap();
        assert_eq!(initial, Outcome::Progress { name: "a.wav".into(), percent: 0 });

        d.handle_frame(&frame(Domain::FileTransfer, file::IMPORT_STARTED, &[]), now);
        d.handle_frame(&frame(Domain::FileTransfer, file::FILE_DATA, &[1, 2]), now);
        let last = d.handle_frame(&frame(Domain::FileTransfer, file::FILE_DATA, &[3, 4]), now);
        assert_eq!(last, vec![Outcome::Progress { name: "a.wav".into(), percent: 100 }]);

        let done = d.handle_frame(&frame(Domain::FileTransfer, file::IMPORT_COMPLETE, &[0]), now);
        assert_eq!(
            done,
            vec![Outcome::DownloadReady {
                name: "a.wav".into(),
                bytes: vec![1, 2, 3, 4],
            }]
        );
        assert!(matches!(d.operation(), Operation::Idle));
    }

    #[test]
    fn test_download_device_error() {
        let mut d = dispatcher();
        let now = Instant::now();
        d.begin_download(&target("a.wav", 4), now).unwrap();

        let outcomes = d.handle_frame(&frame(Domain::FileTransfer, file::IMPORT_COMPLETE, &[3]), now);

        assert_eq!(
            outcomes,
            vec![Outcome::DownloadFailed {
                name: "a.wav".into(),
                error: SyncError::DeviceStatus(3),
            }]
        );
        assert!(d.next_deadline().is_none());
    }

    #[test]
    fn test_watchdog_fires_once() {
        let mut d = dispatcher();
        let now = Instant::now();
        d.begin_download(&target("a.wav", 100), now).unwrap();

        assert!(d.poll_timers(now + Duration::from_millis(7999)).is_empty());

        let fired = d.poll_timers(now + Duration::from_secs(8));
        assert_eq!(
            fired,
            vec![Outcome::DownloadFailed {
                name: "a.wav".into(),
                error: SyncError::Timeout(Duration::from_secs(8)),
            }]
        );
        assert!(d.poll_timers(now + Duration::from_secs(20)).is_empty());
    }

    #[test]
    fn test_import_started_resets_watchdog() {
        let mut d = dispatcher();
        let now = Instant::now();
        d.begin_download(&target("a.wav", 100), now).unwrap();

        let later = now + Duration::from_secs(6);
        d.handle_frame(&frame(Domain::FileTransfer, file::IMPORT_STARTED, &[]), later);

        assert!(d.poll_timers(now + Duration::from_secs(9)).is_empty());
        assert_eq!(d.poll_timers(later + Duration::from_secs(8)).len(), 1);
    }

    #[test]
    fn test_abort_reports_running_operation() {
        let mut d = dispatcher();
        let now = Instant::now();

        assert!(d.abort(SyncError::Disconnected).is_none());

        d.begin_download(&target("a.wav", 1), now).unwrap();
        assert_eq!(
            d.abort(SyncError::Disconnected),
            Some(Outcome::DownloadFailed {
                name: "a.wav".into(),
                error: SyncError::Disconnected,
            })
        );
        assert!(d.next_deadline().is_none());
    }

    #[test]
    fn test_unsolicited_file_data_is_ignored() {
        let mut d = dispatcher();
        let outcomes = d.handle_frame(&frame(Domain::FileTransfer, file::FILE_DATA, &[1, 2, 3]), Instant::now());
        assert!(outcomes.is_empty());
    }
}
