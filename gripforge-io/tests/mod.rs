use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use gripforge_core::GripStore;
use gripforge_io::{
    ByteSource, LinkCommand, LinkConfig, LinkError, LinkEvent, LinkManager, LinkSession,
    LinkState, LinkStats, ResetSignal, SessionExit,
};
use tokio::sync::{mpsc, oneshot};

// ============================================================================
// Fake port
// ============================================================================

/// What the fake serves on the next read.
enum Step {
    Bytes(Vec<u8>),
    Fail(io::ErrorKind),
}

#[derive(Default)]
struct FakePortInner {
    script: VecDeque<Step>,
    writes: Vec<Vec<u8>>,
    /// Signal-line and buffer operations, in call order.
    ops: Vec<&'static str>,
    eof: bool,
}

/// A scripted port implementing both capability traits. Clones share state,
/// so the test keeps a handle while the session owns another.
#[derive(Clone)]
struct FakePort(Arc<Mutex<FakePortInner>>);

impl FakePort {
    fn new() -> Self {
        FakePort(Arc::new(Mutex::new(FakePortInner::default())))
    }

    fn push_bytes(&self, bytes: &[u8]) {
        self.0.lock().unwrap().script.push_back(Step::Bytes(bytes.to_vec()));
    }

    fn push_read_error(&self, kind: io::ErrorKind) {
        self.0.lock().unwrap().script.push_back(Step::Fail(kind));
    }

    fn set_eof(&self) {
        self.0.lock().unwrap().eof = true;
    }

    fn ops(&self) -> Vec<&'static str> {
        self.0.lock().unwrap().ops.clone()
    }

    fn writes(&self) -> Vec<Vec<u8>> {
        self.0.lock().unwrap().writes.clone()
    }
}

impl ByteSource for FakePort {
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut inner = self.0.lock().unwrap();
        match inner.script.pop_front() {
            Some(Step::Bytes(chunk)) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    inner.script.push_front(Step::Bytes(chunk[n..].to_vec()));
                }
                Ok(n)
            }
            Some(Step::Fail(kind)) => Err(io::Error::new(kind, "scripted failure")),
            None => {
                if inner.eof {
                    return Ok(0);
                }
                drop(inner);
                // Simulate the bounded wait of a quiet line.
                thread::sleep(Duration::from_millis(1));
                Err(io::Error::new(io::ErrorKind::TimedOut, "no data"))
            }
        }
    }

    fn write_chunk(&mut self, data: &[u8]) -> io::Result<()> {
        self.0.lock().unwrap().writes.push(data.to_vec());
        Ok(())
    }

    fn clear_input(&mut self) -> io::Result<()> {
        let mut inner = self.0.lock().unwrap();
        inner.script.clear();
        inner.ops.push("clear");
        Ok(())
    }
}

impl ResetSignal for FakePort {
    fn assert_reset(&mut self) -> io::Result<()> {
        self.0.lock().unwrap().ops.push("assert");
        Ok(())
    }

    fn release_reset(&mut self) -> io::Result<()> {
        self.0.lock().unwrap().ops.push("release");
        Ok(())
    }
}

// ============================================================================
// Session rig
// ============================================================================

struct Rig {
    port: FakePort,
    store: GripStore,
    events: mpsc::Receiver<LinkEvent>,
    cmd_tx: std::sync::mpsc::SyncSender<LinkCommand>,
    cancel: Arc<AtomicBool>,
    stats: Arc<LinkStats>,
    state: Arc<Mutex<LinkState>>,
    handle: thread::JoinHandle<SessionExit>,
}

fn spawn_session(config: LinkConfig) -> Rig {
    let port = FakePort::new();
    let store = GripStore::new();
    let (event_tx, events) = mpsc::channel(64);
    let (cmd_tx, cmd_rx) = std::sync::mpsc::sync_channel(8);
    let cancel = Arc::new(AtomicBool::new(false));
    let stats = Arc::new(LinkStats::default());
    let state = Arc::new(Mutex::new(LinkState::Closed));

    let mut session = LinkSession::new(
        port.clone(),
        &config,
        store.clone(),
        event_tx,
        cancel.clone(),
        stats.clone(),
        state.clone(),
    );
    let handle = thread::spawn(move || session.run(&cmd_rx));

    Rig {
        port,
        store,
        events,
        cmd_tx,
        cancel,
        stats,
        state,
        handle,
    }
}

impl Rig {
    /// Queue a reset and block until the worker acknowledges it.
    fn reset(&self) -> Result<(), LinkError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.cmd_tx
            .try_send(LinkCommand::Reset { done: done_tx })
            .expect("worker gone");
        done_rx.blocking_recv().expect("worker dropped the ack")
    }

    fn finish(self) -> SessionExit {
        self.cancel.store(true, Ordering::Relaxed);
        self.handle.join().unwrap()
    }

    fn drain_events(&mut self) -> Vec<LinkEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = self.events.try_recv() {
            out.push(ev);
        }
        out
    }
}

fn wait_until(timeout: Duration, mut f: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if f() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    f()
}

fn fast_config() -> LinkConfig {
    LinkConfig {
        settle_time: Duration::from_millis(20),
        ..LinkConfig::default()
    }
}

// ============================================================================
// LinkConfig Tests
// ============================================================================

#[test]
fn test_link_config_defaults() {
    let config = LinkConfig::default();
    assert_eq!(config.port, "/dev/ttyUSB0");
    assert_eq!(config.baud, 9600);
    assert!(config.settle_time >= Duration::from_millis(100));
    assert!(!config.echo);
    assert!(config.reconnect);
}

// ============================================================================
// Ingest Tests
// ============================================================================

#[test]
fn test_session_ingests_into_store() {
    let rig = spawn_session(fast_config());
    rig.port.push_bytes(b"42.50@137.20\n");

    assert!(wait_until(Duration::from_secs(2), || rig.stats.frames() == 1));
    let snap = rig.store.snapshot();
    assert_eq!(snap.current, 42.5);
    assert_eq!(snap.max, 42.5);

    assert!(matches!(rig.finish(), SessionExit::Cancelled));
}

#[test]
fn test_session_reassembles_split_frames() {
    let rig = spawn_session(fast_config());
    rig.port.push_bytes(b"42.5");
    rig.port.push_bytes(b"0@137.2\n12.0@137");
    rig.port.push_bytes(b".2\n");

    assert!(wait_until(Duration::from_secs(2), || rig.stats.frames() == 2));
    let snap = rig.store.snapshot();
    assert_eq!(snap.current, 12.0);
    assert_eq!(snap.max, 42.5);

    rig.finish();
}

#[test]
fn test_session_rejects_noise_and_reports_it() {
    let mut rig = spawn_session(fast_config());
    rig.port.push_bytes(b"@137.2\n");

    let mut seen = Vec::new();
    assert!(wait_until(Duration::from_secs(2), || {
        seen.extend(rig.drain_events());
        seen.iter().any(|ev| matches!(
            ev,
            LinkEvent::ParseRejected { line, .. } if line == "@137.2"
        ))
    }));

    assert_eq!(rig.stats.rejects(), 1);
    assert_eq!(rig.stats.frames(), 0);

    // Store untouched by the rejected line.
    let snap = rig.store.snapshot();
    assert_eq!(snap.current, 0.0);
    assert_eq!(snap.max, 0.0);

    rig.finish();
}

#[test]
fn test_session_echoes_accepted_readings() {
    let config = LinkConfig {
        echo: true,
        ..fast_config()
    };
    let rig = spawn_session(config);
    rig.port.push_bytes(b"42.50@137.20\n");

    assert!(wait_until(Duration::from_secs(2), || rig.stats.frames() == 1));
    assert!(wait_until(Duration::from_secs(2), || !rig.port.writes().is_empty()));
    // The echo carries the store's view: the session max is derived from
    // observed current values, not the device's accumulator.
    assert_eq!(rig.port.writes()[0], b"42.50@42.50\n".to_vec());

    rig.finish();
}

#[test]
fn test_state_reaches_reading() {
    let rig = spawn_session(fast_config());
    let state = rig.state.clone();
    assert!(wait_until(Duration::from_secs(2), || {
        *state.lock().unwrap() == LinkState::Reading
    }));
    rig.finish();
}

// ============================================================================
// Reset Tests
// ============================================================================

#[test]
fn test_reset_discards_buffered_tail() {
    let mut rig = spawn_session(fast_config());

    // Half of a long, unterminated line sits in the decoder tail.
    rig.port.push_bytes(&[b'7'; 50]);
    assert!(wait_until(Duration::from_secs(2), || rig.stats.bytes() == 50));

    rig.reset().unwrap();

    // The tail is gone and the session is zeroed.
    let snap = rig.store.snapshot();
    assert_eq!(snap.current, 0.0);
    assert_eq!(snap.max, 0.0);

    // The next complete line starts clean from post-reset bytes only.
    rig.port.push_bytes(b"12.00@137.20\n");
    assert!(wait_until(Duration::from_secs(2), || rig.stats.frames() == 1));
    let snap = rig.store.snapshot();
    assert_eq!(snap.current, 12.0);
    assert_eq!(snap.max, 12.0);

    let events = rig.drain_events();
    assert!(events.iter().any(|ev| matches!(ev, LinkEvent::ResetComplete)));
    assert_eq!(rig.stats.resets(), 1);

    rig.finish();
}

#[test]
fn test_reset_sequence_order_and_settle_hold() {
    let config = LinkConfig {
        settle_time: Duration::from_millis(40),
        ..LinkConfig::default()
    };
    let rig = spawn_session(config);

    let started = Instant::now();
    rig.reset().unwrap();
    let elapsed = started.elapsed();

    // Assert first, flush while still held, release last.
    assert_eq!(rig.port.ops(), vec!["assert", "clear", "release"]);
    // The ack never comes back before the full settling time has passed.
    assert!(
        elapsed >= Duration::from_millis(40),
        "reset acked after {:?}",
        elapsed
    );

    rig.finish();
}

#[test]
fn test_resets_are_serialized_with_reads() {
    // Two back-to-back resets and a burst of frames: the worker services
    // them on one thread, so both complete and every counter adds up.
    let rig = spawn_session(fast_config());

    rig.port.push_bytes(b"10.0@10.0\n");
    assert!(wait_until(Duration::from_secs(2), || rig.stats.frames() == 1));

    rig.reset().unwrap();
    rig.reset().unwrap();
    assert_eq!(rig.stats.resets(), 2);

    rig.port.push_bytes(b"5.0@5.0\n");
    assert!(wait_until(Duration::from_secs(2), || rig.stats.frames() == 2));
    let snap = rig.store.snapshot();
    assert_eq!(snap.current, 5.0);
    assert_eq!(snap.max, 5.0);

    rig.finish();
}

// ============================================================================
// Lifecycle Tests
// ============================================================================

#[test]
fn test_cancellation_stops_session() {
    let rig = spawn_session(fast_config());
    let exit = rig.finish();
    assert!(matches!(exit, SessionExit::Cancelled));
}

#[test]
fn test_disconnect_ends_session() {
    let rig = spawn_session(fast_config());
    rig.port.set_eof();
    let exit = rig.handle.join().unwrap();
    assert!(matches!(exit, SessionExit::Disconnected));
    assert_eq!(*rig.state.lock().unwrap(), LinkState::Closed);
}

#[test]
fn test_read_failure_ends_session() {
    let rig = spawn_session(fast_config());
    rig.port.push_read_error(io::ErrorKind::PermissionDenied);
    let exit = rig.handle.join().unwrap();
    assert!(matches!(exit, SessionExit::Failed(_)));
}

// ============================================================================
// LinkManager Tests
// ============================================================================

#[tokio::test]
async fn test_manager_surfaces_open_failure_and_closes() {
    let config = LinkConfig {
        port: "/dev/nonexistent_gripforge_port".to_string(),
        reconnect: false,
        ..LinkConfig::default()
    };
    let (manager, mut events) = LinkManager::start(config, GripStore::new());

    let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("no event from worker");
    match event {
        Some(LinkEvent::Error(msg)) => assert!(msg.contains("failed to open")),
        other => panic!("unexpected event: {:?}", other),
    }

    manager.shutdown().await;
    assert_eq!(manager.state(), LinkState::Closed);
    // The worker is gone; a reset can no longer be queued.
    assert!(matches!(manager.reset().await, Err(LinkError::Closed)));
}
