use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use jsonrelay_frame::{ExtractorConfig, Frame, FrameError, FrameExtractor, FrameWriter};
use jsonrelay_transport::{PortIdentifier, SerialLink, SerialOpener, SerialSettings, TransportError};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::{RelayError, Result};
use crate::event::{Direction, ReconnectOrigin, RelayEvent};
use crate::fault::{FaultKind, FaultPolicy, FaultTracker, FaultVerdict, IdleBackoff};
use crate::state::{sleep_while, AtomicCell, ConnectionState};

const READ_CHUNK_SIZE: usize = 4 * 1024;
const FORWARD_WARN_LIMIT: u64 = 3;

/// Per-direction tuning.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub settings: SerialSettings,
    pub fault: FaultPolicy,
    /// Delay before restarting a worker loop that exited unexpectedly.
    pub restart_delay: Duration,
    pub extractor: ExtractorConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            settings: SerialSettings::default(),
            fault: FaultPolicy::default(),
            restart_delay: Duration::from_secs(1),
            extractor: ExtractorConfig::default(),
        }
    }
}

/// Called synchronously for every frame the worker extracts.
pub type ForwardFn = Box<dyn FnMut(&Frame) -> std::result::Result<(), FrameError> + Send>;

/// Snapshot of one direction's counters.
#[derive(Debug, Clone, Serialize)]
pub struct DirectionStatus {
    pub direction: Direction,
    pub port: PortIdentifier,
    pub state: ConnectionState,
    pub frames: u64,
    pub bytes: u64,
    pub faults: u32,
    pub forward_errors: u64,
    pub restarts: u64,
}

#[derive(Default)]
struct Counters {
    frames: AtomicU64,
    bytes: AtomicU64,
    faults: AtomicU32,
    forward_errors: AtomicU64,
    restarts: AtomicU64,
}

struct Shared {
    direction: Direction,
    port: PortIdentifier,
    handle: Mutex<Option<Box<dyn SerialLink>>>,
    state: AtomicCell<ConnectionState>,
    /// `Open` while the worker should keep running.
    desired: AtomicCell<ConnectionState>,
    counters: Counters,
    events: Sender<RelayEvent>,
}

impl Shared {
    fn lock_handle(&self) -> MutexGuard<'_, Option<Box<dyn SerialLink>>> {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wants_open(&self) -> bool {
        self.desired.load() == ConnectionState::Open
    }

    fn close_handle(&self) {
        if self.lock_handle().take().is_some() {
            debug!(direction = %self.direction, port = %self.port, "closed handle");
        }
    }

    /// Give up on this direction and ask the engine for a full reconnect.
    fn request_reconnect(&self) {
        self.desired.store(ConnectionState::Disconnected);
        self.close_handle();
        self.state.store(ConnectionState::Disconnected);
        let event = RelayEvent::ReconnectRequested {
            origin: ReconnectOrigin::Supervisor(self.direction),
        };
        if self.events.send(event).is_err() {
            debug!(direction = %self.direction, "engine gone, reconnect request dropped");
        }
    }
}

/// Writes frames into a supervisor's port from another thread.
#[derive(Clone)]
pub struct LinkWriter {
    shared: Arc<Shared>,
}

impl LinkWriter {
    /// Write the frame bytes. The port is not flushed.
    pub fn write_frame(&self, frame: &Frame) -> std::result::Result<(), FrameError> {
        let mut guard = self.shared.lock_handle();
        let link = guard.as_mut().ok_or_else(|| {
            FrameError::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                format!("{} is not open", self.shared.port),
            ))
        })?;
        FrameWriter::new(link).write_frame(frame)
    }

    pub fn port(&self) -> &PortIdentifier {
        &self.shared.port
    }
}

/// Keeps one port open and pumps its frames into a forward callback.
pub struct ConnectionSupervisor {
    shared: Arc<Shared>,
    opener: Arc<dyn SerialOpener>,
    config: SupervisorConfig,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionSupervisor {
    pub fn new(
        direction: Direction,
        port: PortIdentifier,
        opener: Arc<dyn SerialOpener>,
        config: SupervisorConfig,
        events: Sender<RelayEvent>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                direction,
                port,
                handle: Mutex::new(None),
                state: AtomicCell::new(ConnectionState::Disconnected),
                desired: AtomicCell::new(ConnectionState::Disconnected),
                counters: Counters::default(),
                events,
            }),
            opener,
            config,
            worker: Mutex::new(None),
        }
    }

    pub fn direction(&self) -> Direction {
        self.shared.direction
    }

    pub fn port(&self) -> &PortIdentifier {
        &self.shared.port
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.load()
    }

    /// Open the port. Does not start the worker.
    pub fn open(&self) -> std::result::Result<(), TransportError> {
        let shared = &self.shared;
        shared.state.store(ConnectionState::Connecting);
        match self.opener.open(&shared.port, &self.config.settings) {
            Ok(link) => {
                *shared.lock_handle() = Some(link);
                shared.state.store(ConnectionState::Open);
                info!(direction = %shared.direction, port = %shared.port, "port open");
                Ok(())
            }
            Err(err) => {
                shared.state.store(ConnectionState::Disconnected);
                warn!(direction = %shared.direction, port = %shared.port, error = %err, "open failed");
                Err(err)
            }
        }
    }

    /// Start the worker thread on the open port.
    pub fn start(&self, forward: ForwardFn) -> Result<()> {
        let shared = &self.shared;
        if shared.lock_handle().is_none() {
            return Err(RelayError::NotOpen(shared.direction));
        }
        self.join_worker();
        shared.desired.store(ConnectionState::Open);

        let worker_shared = Arc::clone(shared);
        let config = self.config.clone();
        let handle = thread::Builder::new()
            .name(format!("relay-{}", shared.direction))
            .spawn(move || supervise(worker_shared, config, forward))
            .map_err(|err| {
                shared.desired.store(ConnectionState::Disconnected);
                RelayError::Spawn(err)
            })?;
        *self.lock_worker() = Some(handle);
        Ok(())
    }

    /// Handle for writing into this port from another direction.
    pub fn writer(&self) -> LinkWriter {
        LinkWriter {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Stop the worker and close the port, leaving it reconnectable.
    pub fn disconnect(&self) {
        self.halt(ConnectionState::Disconnected);
    }

    /// Stop the worker and close the port for good.
    pub fn stop(&self) {
        self.halt(ConnectionState::Closed);
    }

    fn halt(&self, target: ConnectionState) {
        self.shared.desired.store(target);
        self.join_worker();
        self.shared.close_handle();
        self.shared.state.store(target);
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn join_worker(&self) {
        let Some(handle) = self.lock_worker().take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            error!(direction = %self.shared.direction, "relay worker panicked outside its loop");
        }
    }

    pub fn status(&self) -> DirectionStatus {
        let shared = &self.shared;
        let c = &shared.counters;
        DirectionStatus {
            direction: shared.direction,
            port: shared.port.clone(),
            state: shared.state.load(),
            frames: c.frames.load(Ordering::Relaxed),
            bytes: c.bytes.load(Ordering::Relaxed),
            faults: c.faults.load(Ordering::Relaxed),
            forward_errors: c.forward_errors.load(Ordering::Relaxed),
            restarts: c.restarts.load(Ordering::Relaxed),
        }
    }
}

impl Drop for ConnectionSupervisor {
    fn drop(&mut self) {
        if self.shared.wants_open() {
            self.stop();
        }
    }
}

impl std::fmt::Debug for ConnectionSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSupervisor")
            .field("direction", &self.shared.direction)
            .field("port", &self.shared.port)
            .field("state", &self.shared.state.load())
            .finish()
    }
}

enum LoopExit {
    /// Desired state changed; nothing to do.
    Stopped,
    /// Fault threshold reached; the engine owns recovery now.
    Escalated,
}

/// Worker body: run the poll loop, restarting it in place when it dies
/// while the port should still be open.
fn supervise(shared: Arc<Shared>, config: SupervisorConfig, mut forward: ForwardFn) {
    let direction = shared.direction;
    loop {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            run_loop(&shared, &config, forward.as_mut())
        }));

        match outcome {
            Ok(LoopExit::Stopped) => {
                debug!(%direction, "relay loop stopped");
                return;
            }
            Ok(LoopExit::Escalated) => return,
            Err(_) if !shared.wants_open() => return,
            Err(_) => {
                if shared.lock_handle().is_none() {
                    warn!(%direction, "relay loop died without a port, requesting reconnect");
                    shared.request_reconnect();
                    return;
                }
                let restarts = shared.counters.restarts.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(%direction, restarts, "relay loop exited unexpectedly, restarting");
                if !sleep_while(config.restart_delay, || shared.wants_open()) {
                    return;
                }
            }
        }
    }
}

fn run_loop(
    shared: &Shared,
    config: &SupervisorConfig,
    forward: &mut (dyn FnMut(&Frame) -> std::result::Result<(), FrameError> + Send),
) -> LoopExit {
    let direction = shared.direction;
    let counters = &shared.counters;
    let mut extractor = FrameExtractor::with_config(config.extractor.clone());
    let mut tracker = FaultTracker::new(config.fault.clone());
    let mut backoff = IdleBackoff::default();
    let mut buf = [0u8; READ_CHUNK_SIZE];

    while shared.wants_open() {
        let polled = {
            let mut guard = shared.lock_handle();
            match guard.as_mut() {
                Some(link) => poll(&mut **link, &mut buf),
                None => Err(io::Error::new(io::ErrorKind::NotConnected, "port handle closed")),
            }
        };

        match polled {
            Ok(0) => {
                tracker.record_success();
                shared.state.transition(ConnectionState::Degraded, ConnectionState::Open);
                counters.faults.store(0, Ordering::Relaxed);
                let delay = backoff.next_delay();
                thread::sleep(delay);
            }
            Ok(n) => {
                tracker.record_success();
                backoff.reset();
                shared.state.transition(ConnectionState::Degraded, ConnectionState::Open);
                counters.faults.store(0, Ordering::Relaxed);
                counters.bytes.fetch_add(n as u64, Ordering::Relaxed);

                for frame in extractor.feed(&buf[..n]) {
                    counters.frames.fetch_add(1, Ordering::Relaxed);
                    if let Err(err) = forward(&frame) {
                        let errors = counters.forward_errors.fetch_add(1, Ordering::Relaxed) + 1;
                        if errors <= FORWARD_WARN_LIMIT {
                            warn!(%direction, errors, error = %err, "failed to forward frame");
                        } else {
                            debug!(%direction, errors, error = %err, "failed to forward frame");
                        }
                    }
                }
            }
            Err(err) => {
                if !shared.wants_open() {
                    break;
                }
                shared.state.transition(ConnectionState::Open, ConnectionState::Degraded);
                match tracker.record_fault(FaultKind::of(&err), Instant::now()) {
                    FaultVerdict::Retry { pause, warn } => {
                        let faults = tracker.consecutive();
                        counters.faults.store(faults, Ordering::Relaxed);
                        if warn {
                            warn!(%direction, port = %shared.port, faults, error = %err, "port fault");
                        } else {
                            debug!(%direction, port = %shared.port, faults, error = %err, "port fault");
                        }
                        sleep_while(pause, || shared.wants_open());
                    }
                    FaultVerdict::Escalate => {
                        counters.faults.store(0, Ordering::Relaxed);
                        error!(
                            %direction,
                            port = %shared.port,
                            threshold = config.fault.threshold,
                            "fault threshold reached, requesting reconnect"
                        );
                        shared.request_reconnect();
                        return LoopExit::Escalated;
                    }
                }
            }
        }
    }

    LoopExit::Stopped
}

/// Read whatever is waiting on `link`. `Ok(0)` means idle.
fn poll(link: &mut dyn SerialLink, buf: &mut [u8]) -> io::Result<usize> {
    let waiting = link.bytes_to_read().map_err(TransportError::into_io)?;
    if waiting == 0 {
        return Ok(0);
    }
    let want = waiting.min(buf.len());
    loop {
        match link.read(&mut buf[..want]) {
            Ok(n) => return Ok(n),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) if err.kind() == io::ErrorKind::TimedOut => return Ok(0),
            Err(err) => return Err(err),
        }
    }
}
