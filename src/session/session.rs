use super::config::SyncConfig;
use super::dispatcher::{Dispatcher, Outcome};
use super::events::SyncEvent;
use crate::audio::{AudioReconstructor, ReconstructedAudio};
use crate::device::{import_request_body, DeviceFileInfo, DeviceStatus};
use crate::error::{SyncError, SyncResult};
use crate::protocol::commands::{control, file};
use crate::protocol::{encode, Domain, Frame, FrameAssembler, GattProfile};
use crate::transport::{
    state_stream, AdapterConnect, BleAdapter, BleConnection, BleLink, ConnectionState, LinkEvent, NotifyChannel,
};
use chrono::Utc;
use futures::stream::Stream;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

/// Result of a `connect()` call that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected,
    /// The user dismissed device selection; the session is back to `Idle`
    Cancelled,
}

/// Requests from the session handle to the connection task
enum Command {
    ListFiles {
        reply: oneshot::Sender<SyncResult<Vec<DeviceFileInfo>>>,
    },
    Download {
        file: DeviceFileInfo,
        reply: oneshot::Sender<SyncResult<ReconstructedAudio>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
}

/// Requests written after connecting, one handshake delay apart
const HANDSHAKE: [(u8, &[u8]); 4] = [
    (control::BATTERY, &[]),
    (control::CAPACITY, &[]),
    (control::VERSION, &[]),
    (control::HIGH_SPEED, &[1]),
];

struct ActorHandle {
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
    device_name: String,
}

/// A sync session with one recorder at a time
///
/// Each successful `connect()` spawns a connection task that owns the frame
/// assemblers, the dispatcher and the sequence counter. The session only keeps
/// a command channel into it, so every request is processed one at a time.
pub struct SyncSession {
    /// Platform BLE stack
    adapter: Arc<dyn BleAdapter>,

    /// Service and characteristic UUIDs to connect to
    profile: GattProfile,

    /// Timing configuration handed to each connection
    config: SyncConfig,

    /// Shared with every connection for downloaded files
    reconstructor: Arc<AudioReconstructor>,

    /// Connection lifecycle, observed through `subscribe_state`
    state: Arc<watch::Sender<ConnectionState>>,

    /// Latest device status snapshot
    status: Arc<watch::Sender<DeviceStatus>>,

    /// Event sink for the application
    events: mpsc::UnboundedSender<SyncEvent>,

    /// Running connection task, if any
    actor: Mutex<Option<ActorHandle>>,

    /// Wakes a `connect()` still waiting on the adapter when `disconnect()` is called
    connect_cancel: Notify,
}

impl SyncSession {
    /// Create a session and the receiver its events are delivered on
    pub fn new(
        adapter: Arc<dyn BleAdapter>,
        config: SyncConfig,
        reconstructor: AudioReconstructor,
    ) -> (Self, mpsc::UnboundedReceiver<SyncEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Idle);
        let (status, _) = watch::channel(DeviceStatus::default());

        let session = Self {
            adapter,
            profile: GattProfile::default(),
            config,
            reconstructor: Arc::new(reconstructor),
            state: Arc::new(state),
            status: Arc::new(status),
            events,
            actor: Mutex::new(None),
            connect_cancel: Notify::new(),
        };

        (session, events_rx)
    }

    /// Override the GATT service and characteristic UUIDs
    pub fn with_profile(mut self, profile: GattProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch the connection state; the current value is visible immediately
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Stream of connection states, starting with the current one
    pub fn state_stream(&self) -> impl Stream<Item = ConnectionState> {
        state_stream(self.state.subscribe())
    }

    /// Snapshot of what the device last reported
    pub fn device_status(&self) -> DeviceStatus {
        self.status.borrow().clone()
    }

    /// Name of the connected device, if any
    pub async fn device_name(&self) -> Option<String> {
        if !self.state().is_connected() {
            return None;
        }
        self.actor
            .lock()
            .await
            .as_ref()
            .map(|handle| handle.device_name.clone())
    }

    /// Select a device, connect and start the handshake
    ///
    /// A `disconnect()` while the adapter is still searching abandons the
    /// attempt: this returns `Err(SyncError::Disconnected)` and the session
    /// stays `Disconnected`.
    pub async fn connect(&self) -> SyncResult<ConnectOutcome> {
        let claimed = self.state.send_if_modified(|state| {
            if state.can_connect() {
                *state = ConnectionState::Searching;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(SyncError::AlreadyConnected);
        }

        // A previous connection that ended on link loss leaves its handle behind
        if let Some(previous) = self.actor.lock().await.take() {
            drop(previous.commands);
            if let Err(e) = previous.task.await {
                error!("Previous connection task panicked: {}", e);
            }
        }

        // Registered before the state check so a disconnect cannot slip between them
        let cancelled = self.connect_cancel.notified();
        if self.state() != ConnectionState::Searching {
            info!("Connect abandoned before device selection");
            return Err(SyncError::Disconnected);
        }

        info!("Searching for recorder via {}", self.adapter.name());

        let selection = tokio::select! {
            selection = self.adapter.connect(&self.profile) => selection,
            _ = cancelled => {
                info!("Connect abandoned by disconnect");
                return Err(SyncError::Disconnected);
            }
        };

        let connection = match selection {
            Ok(AdapterConnect::Connected(connection)) => connection,
            Ok(AdapterConnect::Cancelled) => {
                info!("Device selection cancelled");
                self.leave_searching(ConnectionState::Idle);
                return Ok(ConnectOutcome::Cancelled);
            }
            Err(e) => {
                warn!("Connection failed: {}", e);
                self.leave_searching(ConnectionState::Idle);
                return Err(e);
            }
        };

        let BleConnection { link, events } = connection;
        let device_name = link.device_name().to_string();

        // Held until the state is settled so a concurrent disconnect() finds
        // either the running task or the Searching state
        let mut slot = self.actor.lock().await;
        if self.state() != ConnectionState::Searching {
            info!("Connect abandoned, closing link to {}", device_name);
            if let Err(e) = link.disconnect().await {
                warn!("Failed to close link: {}", e);
            }
            return Err(SyncError::Disconnected);
        }

        info!("Connected to {}", device_name);

        self.status.send_replace(DeviceStatus::default());

        let (commands, commands_rx) = mpsc::channel(self.config.command_queue.max(1));
        let actor = ConnectionActor::new(
            link,
            self.config.clone(),
            Arc::clone(&self.reconstructor),
            Arc::clone(&self.state),
            Arc::clone(&self.status),
            self.events.clone(),
        );
        let task = tokio::spawn(actor.run(commands_rx, events));

        *slot = Some(ActorHandle {
            commands,
            task,
            device_name,
        });

        // The link may already have dropped, in which case the task has
        // moved the state on to Disconnected
        self.leave_searching(ConnectionState::Connected);

        Ok(ConnectOutcome::Connected)
    }

    /// Move out of `Searching`; returns false if something else already did
    fn leave_searching(&self, next: ConnectionState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Searching {
                *state = next;
                true
            } else {
                false
            }
        })
    }

    async fn command_sender(&self) -> SyncResult<mpsc::Sender<Command>> {
        if !self.state().is_connected() {
            return Err(SyncError::NotConnected);
        }
        let actor = self.actor.lock().await;
        match actor.as_ref() {
            Some(handle) => Ok(handle.commands.clone()),
            None => Err(SyncError::NotConnected),
        }
    }

    /// Fetch the recorder's file catalog
    pub async fn list_files(&self) -> SyncResult<Vec<DeviceFileInfo>> {
        let commands = self.command_sender().await?;
        let (reply, response) = oneshot::channel();

        commands
            .send(Command::ListFiles { reply })
            .await
            .map_err(|_| SyncError::NotConnected)?;

        response.await.unwrap_or(Err(SyncError::Disconnected))
    }

    /// Download one file and reconstruct it into a playable recording
    pub async fn download(&self, target: &DeviceFileInfo) -> SyncResult<ReconstructedAudio> {
        let commands = self.command_sender().await?;
        let (reply, response) = oneshot::channel();

        commands
            .send(Command::Download {
                file: target.clone(),
                reply,
            })
            .await
            .map_err(|_| SyncError::NotConnected)?;

        response.await.unwrap_or(Err(SyncError::Disconnected))
    }

    /// Close the connection, failing any in-flight operation
    ///
    /// Returns once the connection task has stopped. A `connect()` still
    /// searching for a device is abandoned instead.
    pub async fn disconnect(&self) -> SyncResult<()> {
        let handle = self.actor.lock().await.take();
        let Some(handle) = handle else {
            if self.leave_searching(ConnectionState::Disconnected) {
                info!("Disconnect requested while searching, abandoning connect");
                self.connect_cancel.notify_waiters();
            } else {
                debug!("Disconnect requested with no active connection");
            }
            return Ok(());
        };

        info!("Disconnecting from {}", handle.device_name);

        let (reply, done) = oneshot::channel();
        if handle.commands.send(Command::Disconnect { reply }).await.is_ok() {
            let _ = done.await;
        }
        drop(handle.commands);

        if let Err(e) = handle.task.await {
            error!("Connection task panicked: {}", e);
        }

        self.state.send_replace(ConnectionState::Disconnected);
        Ok(())
    }
}

/// Why the connection task stopped
enum Shutdown {
    /// `disconnect()` was called or the session was dropped
    Requested,
    /// The platform reported the link as gone
    LinkLost,
}

/// Per-connection task state
struct ConnectionActor {
    link: Arc<dyn BleLink>,
    config: SyncConfig,
    reconstructor: Arc<AudioReconstructor>,
    state: Arc<watch::Sender<ConnectionState>>,
    status: Arc<watch::Sender<DeviceStatus>>,
    events: mpsc::UnboundedSender<SyncEvent>,
    dispatcher: Dispatcher,
    data_frames: FrameAssembler,
    status_frames: FrameAssembler,
    sequence: u8,
    /// Handshake requests not yet written
    handshake: VecDeque<(u8, &'static [u8])>,
    /// When the next handshake request is due
    handshake_at: Option<Instant>,
    catalog_reply: Option<oneshot::Sender<SyncResult<Vec<DeviceFileInfo>>>>,
    download_reply: Option<oneshot::Sender<SyncResult<ReconstructedAudio>>>,
}

impl ConnectionActor {
    fn new(
        link: Arc<dyn BleLink>,
        config: SyncConfig,
        reconstructor: Arc<AudioReconstructor>,
        state: Arc<watch::Sender<ConnectionState>>,
        status: Arc<watch::Sender<DeviceStatus>>,
        events: mpsc::UnboundedSender<SyncEvent>,
    ) -> Self {
        Self {
            link,
            dispatcher: Dispatcher::new(config.clone()),
            config,
            reconstructor,
            state,
            status,
            events,
            data_frames: FrameAssembler::new(),
            status_frames: FrameAssembler::new(),
            sequence: 0,
            handshake: HANDSHAKE.into_iter().collect(),
            handshake_at: None,
            catalog_reply: None,
            download_reply: None,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>, mut link_events: mpsc::Receiver<LinkEvent>) {
        debug!("Connection task started for {}", self.link.device_name());

        self.advance_handshake().await;

        let mut disconnect_reply = None;
        let reason = loop {
            let deadline = match (self.dispatcher.next_deadline(), self.handshake_at) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };

            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Disconnect { reply }) => {
                        disconnect_reply = Some(reply);
                        break Shutdown::Requested;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => break Shutdown::Requested,
                },

                event = link_events.recv() => match event {
                    Some(LinkEvent::Notification { channel, data }) => {
                        if self.handle_notifications(channel, data, &mut link_events).await {
                            break Shutdown::LinkLost;
                        }
                    }
                    Some(LinkEvent::Disconnected) | None => break Shutdown::LinkLost,
                },

                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    let now = Instant::now();
                    if self.handshake_at.is_some_and(|at| at <= now) {
                        self.advance_handshake().await;
                    }
                    let outcomes = self.dispatcher.poll_timers(now);
                    self.apply(outcomes).await;
                }
            }
        };

        self.shutdown(reason).await;

        if let Some(reply) = disconnect_reply {
            let _ = reply.send(());
        }
        debug!("Connection task stopped");
    }

    /// Write the next handshake request and schedule the one after it
    async fn advance_handshake(&mut self) {
        let Some((command, body)) = self.handshake.pop_front() else {
            self.handshake_at = None;
            return;
        };
        if let Err(e) = self.send(Domain::Control, command, body).await {
            warn!("Handshake request 0x{:02x} failed: {}", command, e);
        }

        self.handshake_at = if self.handshake.is_empty() {
            debug!("Handshake sent");
            None
        } else {
            Some(Instant::now() + self.config.handshake_delay())
        };
    }

    /// Encode and write one request, advancing the sequence counter
    async fn send(&mut self, domain: Domain, command: u8, body: &[u8]) -> SyncResult<()> {
        let bytes = encode(self.sequence, domain.code(), Some(command), body);
        debug!(
            "TX seq={} domain={:?} command=0x{:02x} ({} bytes)",
            self.sequence,
            domain,
            command,
            bytes.len()
        );
        self.sequence = self.sequence.wrapping_add(1);
        self.link.write(&bytes).await
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            info!("Connection state: {} -> {}", previous, state);
        }
    }

    fn emit(&self, event: SyncEvent) {
        if self.events.send(event).is_err() {
            debug!("Event receiver dropped");
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::ListFiles { reply } => {
                if let Err(e) = self.dispatcher.begin_catalog(Instant::now(), Utc::now()) {
                    let _ = reply.send(Err(e));
                    return;
                }
                self.catalog_reply = Some(reply);

                if let Err(e) = self.send(Domain::FileTransfer, file::LIST, &[]).await {
                    warn!("Failed to request file list: {}", e);
                    if let Some(outcome) = self.dispatcher.abort(e) {
                        self.apply(vec![outcome]).await;
                    }
                }
            }

            Command::Download { file: target, reply } => {
                let initial = match self.dispatcher.begin_download(&target, Instant::now()) {
                    Ok(initial) => initial,
                    Err(e) => {
                        let _ = reply.send(Err(e));
                        return;
                    }
                };
                self.download_reply = Some(reply);
                self.set_state(ConnectionState::Syncing);
                self.apply(vec![initial]).await;

                let body = import_request_body(&target.name, &target.raw_name_bytes);
                if let Err(e) = self.send(Domain::FileTransfer, file::IMPORT, &body).await {
                    warn!("Failed to request {}: {}", target.name, e);
                    if let Some(outcome) = self.dispatcher.abort(e) {
                        self.apply(vec![outcome]).await;
                    }
                }
            }

            Command::Disconnect { reply } => {
                // Handled by the run loop
                let _ = reply.send(());
            }
        }
    }

    /// Reassemble one notification plus everything already queued behind it
    ///
    /// Returns true if a link-loss event was found in the queue.
    async fn handle_notifications(
        &mut self,
        channel: NotifyChannel,
        data: Vec<u8>,
        link_events: &mut mpsc::Receiver<LinkEvent>,
    ) -> bool {
        let mut data_fragments = Vec::new();
        let mut status_fragments = Vec::new();
        let mut link_lost = false;

        let mut queue = |channel: NotifyChannel, data: Vec<u8>| match channel {
            NotifyChannel::Data => data_fragments.push(data),
            NotifyChannel::Status => status_fragments.push(data),
        };
        queue(channel, data);

        while let Ok(event) = link_events.try_recv() {
            match event {
                LinkEvent::Notification { channel, data } => queue(channel, data),
                LinkEvent::Disconnected => {
                    link_lost = true;
                    break;
                }
            }
        }

        let mut frames = Vec::new();
        if !status_fragments.is_empty() {
            frames.extend(Self::reassemble(&mut self.status_frames, &status_fragments, "status"));
        }
        if !data_fragments.is_empty() {
            frames.extend(Self::reassemble(&mut self.data_frames, &data_fragments, "data"));
        }

        for frame in frames {
            let outcomes = self.dispatcher.handle_frame(&frame, Instant::now());
            self.apply(outcomes).await;
        }

        link_lost
    }

    fn reassemble(assembler: &mut FrameAssembler, fragments: &[Vec<u8>], label: &str) -> Vec<Frame> {
        let discarded_before = assembler.discarded_bytes();
        let frames = assembler.push_batch(fragments.iter().map(Vec::as_slice));

        let discarded = assembler.discarded_bytes() - discarded_before;
        if discarded > 0 {
            debug!("Resynchronised {} channel, skipped {} bytes", label, discarded);
        }
        frames
    }

    /// Act on dispatcher outcomes while the connection is up
    async fn apply(&mut self, outcomes: Vec<Outcome>) {
        for outcome in outcomes {
            let ends_download = matches!(outcome, Outcome::DownloadReady { .. } | Outcome::DownloadFailed { .. });
            self.deliver(outcome).await;
            if ends_download {
                self.set_state(ConnectionState::Connected);
            }
        }
    }

    /// Publish an outcome as events and replies, without touching the state
    async fn deliver(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Status(update) => {
                self.status.send_replace(self.dispatcher.status().clone());
                self.emit(SyncEvent::Status(update));
            }

            Outcome::CatalogReady(files) => {
                self.emit(SyncEvent::Catalog(files.clone()));
                if let Some(reply) = self.catalog_reply.take() {
                    let _ = reply.send(Ok(files));
                }
            }

            Outcome::CatalogFailed(error) => {
                if let Some(reply) = self.catalog_reply.take() {
                    let _ = reply.send(Err(error));
                }
            }

            Outcome::Progress { name, percent } => {
                debug!("{}: {}%", name, percent);
                self.emit(SyncEvent::Progress { name, percent });
            }

            Outcome::DownloadReady { name, bytes } => {
                let result = self.reconstruct(name.clone(), bytes).await;
                match &result {
                    Ok(audio) => {
                        info!("Reconstructed {} as {} ({} bytes)", name, audio.file_name, audio.bytes.len());
                        self.emit(SyncEvent::Downloaded(audio.clone()));
                    }
                    Err(e) => {
                        error!("Failed to reconstruct {}: {}", name, e);
                        self.emit(SyncEvent::DownloadFailed {
                            name,
                            error: e.clone(),
                        });
                    }
                }
                if let Some(reply) = self.download_reply.take() {
                    let _ = reply.send(result);
                }
            }

            Outcome::DownloadFailed { name, error } => {
                warn!("Download of {} failed: {}", name, error);
                self.emit(SyncEvent::DownloadFailed {
                    name,
                    error: error.clone(),
                });
                if let Some(reply) = self.download_reply.take() {
                    let _ = reply.send(Err(error));
                }
            }
        }
    }

    async fn reconstruct(&self, name: String, bytes: Vec<u8>) -> SyncResult<ReconstructedAudio> {
        let reconstructor = Arc::clone(&self.reconstructor);

        tokio::task::spawn_blocking(move || reconstructor.reconstruct(&name, bytes))
            .await
            .map_err(|e| SyncError::Reconstruction(e.to_string()))?
            .map_err(|e| SyncError::Reconstruction(format!("{:#}", e)))
    }

    async fn shutdown(&mut self, reason: Shutdown) {
        match reason {
            Shutdown::Requested => {
                if let Some(outcome) = self.dispatcher.abort(SyncError::Disconnected) {
                    self.deliver(outcome).await;
                }
                if let Err(e) = self.link.disconnect().await {
                    warn!("Failed to close link: {}", e);
                }
            }
            Shutdown::LinkLost => {
                warn!("Link to {} lost", self.link.device_name());
                // In-flight work is abandoned without an event
                if self.dispatcher.abort(SyncError::Disconnected).is_some() {
                    debug!("Abandoned in-flight operation");
                }
                if let Some(reply) = self.catalog_reply.take() {
                    let _ = reply.send(Err(SyncError::Disconnected));
                }
                if let Some(reply) = self.download_reply.take() {
                    let _ = reply.send(Err(SyncError::Disconnected));
                }
            }
        }

        self.data_frames.reset();
        self.status_frames.reset();
        self.set_state(ConnectionState::Disconnected);
    }
}
