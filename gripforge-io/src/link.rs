// gripforge-io/src/link.rs
//
// The serial link worker: one sequential loop that either ingests bytes or
// performs a device reset, never both at once. Everything the rest of the
// process learns about the link arrives over the event channel.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use gripforge_core::framing::MAX_FRAME_LEN;
use gripforge_core::{parse_reading, GripStore, LineDecoder};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::port::{ByteSource, ResetSignal, SerialGripPort};

const INITIAL_BACKOFF: Duration = Duration::from_millis(250);
const MAX_BACKOFF: Duration = Duration::from_secs(5);
const COMMAND_QUEUE_DEPTH: usize = 8;
const EVENT_QUEUE_DEPTH: usize = 1024;

/// Link configuration. Defaults mirror the garage deployment: a NodeMCU on
/// the first USB adapter, talking at 9600 baud.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub port: String,
    pub baud: u32,
    /// Upper bound on how long a quiet line holds the worker per iteration.
    /// Cancellation and queued resets are honored within this interval.
    pub poll_interval: Duration,
    /// How long the reset line is held asserted. The device needs at least
    /// 100 ms to reboot reliably.
    pub settle_time: Duration,
    /// Echo each accepted reading back over the link for a downstream
    /// display.
    pub echo: bool,
    /// Reopen the port with backoff after transport errors instead of
    /// stopping the worker.
    pub reconnect: bool,
    pub max_frame_len: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud: 9600,
            poll_interval: Duration::from_millis(20),
            settle_time: Duration::from_millis(100),
            echo: false,
            reconnect: true,
            max_frame_len: MAX_FRAME_LEN,
        }
    }
}

/// Errors surfaced to link callers.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("link is not connected")]
    NotConnected,
    #[error("link worker is gone")]
    Closed,
    #[error("port error: {0}")]
    Io(#[from] io::Error),
}

/// Events from the link layer.
#[derive(Debug)]
pub enum LinkEvent {
    Connected(String),
    Disconnected(String),
    /// A line failed validation. The observability hook for wire noise.
    ParseRejected { line: String, reason: String },
    /// A reset sequence ran to completion, never emitted early.
    ResetComplete,
    Error(String),
}

/// Where the link currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Closed,
    Open,
    Reading,
    Resetting,
}

/// Running counters for whoever wants to watch the link. Monotonic over the
/// process lifetime; a session reset does not touch them.
#[derive(Debug, Default)]
pub struct LinkStats {
    bytes: AtomicU64,
    frames: AtomicU64,
    rejects: AtomicU64,
    resets: AtomicU64,
    reconnects: AtomicU64,
}

impl LinkStats {
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn rejects(&self) -> u64 {
        self.rejects.load(Ordering::Relaxed)
    }

    pub fn resets(&self) -> u64 {
        self.resets.load(Ordering::Relaxed)
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }
}

/// Requests queued to the worker thread. Serviced between read iterations,
/// which is what makes a reset mutually exclusive with reads.
pub enum LinkCommand {
    Reset {
        done: oneshot::Sender<Result<(), LinkError>>,
    },
}

/// How a session ended, from the worker's point of view.
#[derive(Debug)]
pub enum SessionExit {
    Cancelled,
    Disconnected,
    Failed(io::Error),
}

/// One open connection: the port, the pending frame tail, and the store it
/// feeds. Created per successful open, dropped on any exit.
pub struct LinkSession<P> {
    port: P,
    decoder: LineDecoder,
    store: GripStore,
    events: mpsc::Sender<LinkEvent>,
    cancel: Arc<AtomicBool>,
    stats: Arc<LinkStats>,
    state: Arc<Mutex<LinkState>>,
    echo: bool,
    settle_time: Duration,
}

impl<P: ByteSource + ResetSignal> LinkSession<P> {
    pub fn new(
        port: P,
        config: &LinkConfig,
        store: GripStore,
        events: mpsc::Sender<LinkEvent>,
        cancel: Arc<AtomicBool>,
        stats: Arc<LinkStats>,
        state: Arc<Mutex<LinkState>>,
    ) -> Self {
        Self {
            port,
            decoder: LineDecoder::with_max_frame(config.max_frame_len),
            store,
            events,
            cancel,
            stats,
            state,
            echo: config.echo,
            settle_time: config.settle_time,
        }
    }

    /// Run until cancelled, disconnected, or broken.
    ///
    /// Strictly sequential: each iteration services queued commands first,
    /// then does one bounded read. A reset therefore never overlaps a read,
    /// and both operate on the same decoder tail without contention.
    pub fn run(&mut self, commands: &std_mpsc::Receiver<LinkCommand>) -> SessionExit {
        self.set_state(LinkState::Reading);
        let mut buf = [0u8; 256];

        loop {
            if self.cancel.load(Ordering::Relaxed) {
                self.set_state(LinkState::Closed);
                return SessionExit::Cancelled;
            }

            while let Ok(cmd) = commands.try_recv() {
                match cmd {
                    LinkCommand::Reset { done } => {
                        let result = self.reset_device();
                        let _ = done.send(result);
                    }
                }
            }

            match self.port.read_chunk(&mut buf) {
                Ok(0) => {
                    self.set_state(LinkState::Closed);
                    return SessionExit::Disconnected;
                }
                Ok(n) => self.ingest(&buf[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::TimedOut => {
                    // Quiet line; the bounded wait is our poll interval.
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.set_state(LinkState::Closed);
                    return SessionExit::Failed(e);
                }
            }
        }
    }

    /// Decode, validate, publish. Rejected lines are counted and reported,
    /// never fatal.
    fn ingest(&mut self, chunk: &[u8]) {
        self.stats.bytes.fetch_add(chunk.len() as u64, Ordering::Relaxed);

        for line in self.decoder.feed(chunk) {
            match parse_reading(&line) {
                Ok(reading) => {
                    let snap = self.store.update(reading);
                    self.stats.frames.fetch_add(1, Ordering::Relaxed);
                    if self.echo {
                        let ack = format!("{:.2}@{:.2}\n", snap.current, snap.max);
                        if let Err(e) = self.port.write_chunk(ack.as_bytes()) {
                            tracing::warn!("echo write failed: {}", e);
                        }
                    }
                }
                Err(e) => {
                    self.stats.rejects.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(%line, "rejected line: {}", e);
                    let _ = self.events.try_send(LinkEvent::ParseRejected {
                        line,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    fn reset_device(&mut self) -> Result<(), LinkError> {
        self.set_state(LinkState::Resetting);
        let result = self.reset_sequence();
        match &result {
            Ok(()) => {
                self.stats.resets.fetch_add(1, Ordering::Relaxed);
                let _ = self.events.try_send(LinkEvent::ResetComplete);
                tracing::info!("device reset complete");
            }
            Err(e) => {
                // Never leave the device held in reset.
                let _ = self.port.release_reset();
                tracing::warn!("device reset failed: {}", e);
            }
        }
        self.set_state(LinkState::Reading);
        result
    }

    /// The hardware reset sequence: assert the line, hold it for the full
    /// settling time, flush every byte buffered on either side of the port,
    /// release, and only then zero the session. Runs on the worker thread,
    /// so no read and no store update can interleave with it.
    fn reset_sequence(&mut self) -> Result<(), LinkError> {
        self.port.assert_reset()?;

        // Hold for the full settling time even if the sleep comes back
        // early; the device is not ready until it has really elapsed.
        let start = Instant::now();
        loop {
            let elapsed = start.elapsed();
            if elapsed >= self.settle_time {
                break;
            }
            std::thread::sleep(self.settle_time - elapsed);
        }

        // A half-received frame from before the reset must never be glued
        // to post-reset bytes.
        self.port.clear_input()?;
        self.decoder.clear();

        self.port.release_reset()?;
        self.store.reset_session();
        Ok(())
    }

    fn set_state(&self, state: LinkState) {
        *self.state.lock().unwrap() = state;
    }
}

/// Handle to the link worker. Owns the command side; events come back on
/// the receiver returned from [`LinkManager::start`].
pub struct LinkManager {
    cmd_tx: std_mpsc::SyncSender<LinkCommand>,
    cancel: Arc<AtomicBool>,
    stats: Arc<LinkStats>,
    state: Arc<Mutex<LinkState>>,
    task: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl LinkManager {
    /// Start the worker on a dedicated blocking thread. Must be called from
    /// within a tokio runtime.
    pub fn start(config: LinkConfig, store: GripStore) -> (Self, mpsc::Receiver<LinkEvent>) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (cmd_tx, cmd_rx) = std_mpsc::sync_channel(COMMAND_QUEUE_DEPTH);
        let cancel = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(LinkStats::default());
        let state = Arc::new(Mutex::new(LinkState::Closed));

        let worker = LinkWorker {
            config,
            store,
            events: event_tx,
            commands: cmd_rx,
            cancel: cancel.clone(),
            stats: stats.clone(),
            state: state.clone(),
        };
        let task = tokio::task::spawn_blocking(move || worker.run());

        let manager = Self {
            cmd_tx,
            cancel,
            stats,
            state,
            task: tokio::sync::Mutex::new(Some(task)),
        };
        (manager, event_rx)
    }

    /// Request a device reset and wait for the full sequence to finish.
    /// The device is not ready until this returns Ok.
    pub async fn reset(&self) -> Result<(), LinkError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.cmd_tx
            .try_send(LinkCommand::Reset { done: done_tx })
            .map_err(|_| LinkError::Closed)?;
        done_rx.await.map_err(|_| LinkError::Closed)?
    }

    pub fn state(&self) -> LinkState {
        *self.state.lock().unwrap()
    }

    pub fn stats(&self) -> Arc<LinkStats> {
        self.stats.clone()
    }

    /// Ask the worker to stop and wait for it to release the port.
    /// A reset in progress completes first; the flag is observed within one
    /// poll interval otherwise.
    pub async fn shutdown(&self) {
        self.cancel.store(true, Ordering::Relaxed);
        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }
    }
}

/// The open-ingest-reconnect loop. Owns the port handle for as long as the
/// process runs; nothing else ever touches it.
struct LinkWorker {
    config: LinkConfig,
    store: GripStore,
    events: mpsc::Sender<LinkEvent>,
    commands: std_mpsc::Receiver<LinkCommand>,
    cancel: Arc<AtomicBool>,
    stats: Arc<LinkStats>,
    state: Arc<Mutex<LinkState>>,
}

impl LinkWorker {
    fn run(self) {
        let mut backoff = INITIAL_BACKOFF;

        while !self.cancel.load(Ordering::Relaxed) {
            match SerialGripPort::open(
                &self.config.port,
                self.config.baud,
                self.config.poll_interval,
            ) {
                Ok(port) => {
                    tracing::info!(port = %self.config.port, baud = self.config.baud, "serial link open");
                    *self.state.lock().unwrap() = LinkState::Open;
                    let _ = self
                        .events
                        .try_send(LinkEvent::Connected(self.config.port.clone()));
                    backoff = INITIAL_BACKOFF;

                    let mut session = LinkSession::new(
                        port,
                        &self.config,
                        self.store.clone(),
                        self.events.clone(),
                        self.cancel.clone(),
                        self.stats.clone(),
                        self.state.clone(),
                    );
                    match session.run(&self.commands) {
                        SessionExit::Cancelled => break,
                        SessionExit::Disconnected => {
                            tracing::warn!(port = %self.config.port, "serial link disconnected");
                            let _ = self
                                .events
                                .try_send(LinkEvent::Disconnected(self.config.port.clone()));
                        }
                        SessionExit::Failed(e) => {
                            tracing::warn!(port = %self.config.port, "serial link failed: {}", e);
                            let _ = self.events.try_send(LinkEvent::Error(format!(
                                "read failed on {}: {}",
                                self.config.port, e
                            )));
                        }
                    }
                }
                Err(e) => {
                    let _ = self.events.try_send(LinkEvent::Error(format!(
                        "failed to open {}: {}",
                        self.config.port, e
                    )));
                }
            }

            if !self.config.reconnect {
                break;
            }
            self.stats.reconnects.fetch_add(1, Ordering::Relaxed);
            self.wait_before_retry(backoff);
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }

        *self.state.lock().unwrap() = LinkState::Closed;
        tracing::info!("serial link worker stopped");
    }

    /// Sleep out the backoff in poll-sized slices so cancellation stays
    /// responsive, and fail any reset request arriving while the port is
    /// closed.
    fn wait_before_retry(&self, backoff: Duration) {
        let deadline = Instant::now() + backoff;
        loop {
            if self.cancel.load(Ordering::Relaxed) {
                return;
            }
            while let Ok(LinkCommand::Reset { done }) = self.commands.try_recv() {
                let _ = done.send(Err(LinkError::NotConnected));
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            std::thread::sleep((deadline - now).min(self.config.poll_interval));
        }
    }
}
