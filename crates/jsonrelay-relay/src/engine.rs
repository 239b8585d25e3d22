use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use jsonrelay_ports::{PairProvisioner, PortPair};
use jsonrelay_transport::{PortIdentifier, SerialOpener};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::{RelayError, Result};
use crate::event::{Direction, ReconnectOrigin, RelayEvent};
use crate::state::{sleep_while, AtomicCell, EngineHealth};
use crate::supervisor::{ConnectionSupervisor, DirectionStatus, SupervisorConfig};

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub supervisor: SupervisorConfig,
    /// Pause between closing both ports and reopening them.
    pub settle: Duration,
    pub reconnect_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            supervisor: SupervisorConfig::default(),
            settle: Duration::from_secs(3),
            reconnect_attempts: 3,
            retry_delay: Duration::from_secs(2),
        }
    }
}

/// Point-in-time view of the relay.
#[derive(Debug, Clone, Serialize)]
pub struct RelayStatus {
    pub health: EngineHealth,
    /// Full reconnects performed since the engine was created.
    pub reconnects: u64,
    pub pair: Option<PortPair>,
    pub input: Option<DirectionStatus>,
    pub output: Option<DirectionStatus>,
}

struct Session {
    pair: PortPair,
    input: Arc<ConnectionSupervisor>,
    output: Arc<ConnectionSupervisor>,
    events: Sender<RelayEvent>,
    control: Option<JoinHandle<()>>,
}

struct Inner {
    opener: Arc<dyn SerialOpener>,
    config: EngineConfig,
    health: AtomicCell<EngineHealth>,
    stopping: AtomicBool,
    reconnects: AtomicU64,
}

impl Inner {
    fn keep_going(&self) -> bool {
        !self.stopping.load(Ordering::Acquire)
    }
}

/// Runs the two supervised directions of a port pair.
///
/// The pair's primary port feeds the input supervisor and the secondary port
/// the output supervisor. Each forwards frames into the other's port.
pub struct RelayEngine {
    inner: Arc<Inner>,
    provisioner: Option<PairProvisioner>,
    session: Mutex<Option<Session>>,
}

impl RelayEngine {
    pub fn new(opener: Arc<dyn SerialOpener>) -> Self {
        Self::with_config(opener, EngineConfig::default())
    }

    pub fn with_config(opener: Arc<dyn SerialOpener>, config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                opener,
                config,
                health: AtomicCell::new(EngineHealth::Idle),
                stopping: AtomicBool::new(false),
                reconnects: AtomicU64::new(0),
            }),
            provisioner: None,
            session: Mutex::new(None),
        }
    }

    /// Attach the allocator/store/driver bundle used by
    /// [`start_provisioned`](Self::start_provisioned) and
    /// [`reconfigure`](Self::reconfigure).
    pub fn with_provisioner(mut self, provisioner: PairProvisioner) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    pub fn provisioner(&self) -> Option<&PairProvisioner> {
        self.provisioner.as_ref()
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn health(&self) -> EngineHealth {
        self.inner.health.load()
    }

    /// Open both ports and start relaying.
    pub fn start(&self, pair: PortPair) -> Result<()> {
        let mut session = self.lock_session();
        if session.is_some() {
            return Err(RelayError::AlreadyRunning);
        }
        self.inner.stopping.store(false, Ordering::Release);

        let (events, rx) = mpsc::channel();
        let supervisor = |direction, port: &PortIdentifier| {
            Arc::new(ConnectionSupervisor::new(
                direction,
                port.clone(),
                Arc::clone(&self.inner.opener),
                self.inner.config.supervisor.clone(),
                events.clone(),
            ))
        };
        let input = supervisor(Direction::Input, pair.primary());
        let output = supervisor(Direction::Output, pair.secondary());

        input.open().map_err(|source| RelayError::Open {
            direction: Direction::Input,
            source,
        })?;
        if let Err(source) = output.open() {
            input.stop();
            return Err(RelayError::Open {
                direction: Direction::Output,
                source,
            });
        }
        if let Err(err) = wire(&input, &output) {
            input.stop();
            output.stop();
            return Err(err);
        }

        let control = {
            let inner = Arc::clone(&self.inner);
            let (input, output) = (Arc::clone(&input), Arc::clone(&output));
            thread::Builder::new()
                .name("relay-control".to_string())
                .spawn(move || control_loop(inner, rx, input, output))
        };
        let control = match control {
            Ok(handle) => handle,
            Err(err) => {
                input.stop();
                output.stop();
                return Err(RelayError::Spawn(err));
            }
        };

        self.inner.health.store(EngineHealth::Running);
        info!(%pair, "relay started");
        *session = Some(Session {
            pair,
            input,
            output,
            events,
            control: Some(control),
        });
        Ok(())
    }

    /// Stop both directions and close the ports. Idempotent.
    pub fn stop(&self) {
        let Some(mut session) = self.lock_session().take() else {
            return;
        };
        self.inner.stopping.store(true, Ordering::Release);
        let _ = session.events.send(RelayEvent::Shutdown);
        if let Some(control) = session.control.take() {
            if control.join().is_err() {
                error!("relay control thread panicked");
            }
        }
        session.input.stop();
        session.output.stop();
        self.inner.health.store(EngineHealth::Stopped);
        info!(pair = %session.pair, "relay stopped");
    }

    /// Ask for a full reconnect of both directions.
    ///
    /// This is also the only way out of `ReconnectFailed`.
    pub fn reconnect(&self) -> Result<()> {
        let session = self.lock_session();
        let session = session.as_ref().ok_or(RelayError::NotRunning)?;
        session
            .events
            .send(RelayEvent::ReconnectRequested {
                origin: ReconnectOrigin::Operator,
            })
            .map_err(|_| RelayError::NotRunning)
    }

    pub fn status(&self) -> RelayStatus {
        let session = self.lock_session();
        RelayStatus {
            health: self.inner.health.load(),
            reconnects: self.inner.reconnects.load(Ordering::Relaxed),
            pair: session.as_ref().map(|s| s.pair.clone()),
            input: session.as_ref().map(|s| s.input.status()),
            output: session.as_ref().map(|s| s.output.status()),
        }
    }

    /// Load or create the pair through the provisioner, then start on it.
    ///
    /// The higher-numbered port becomes the input.
    pub fn start_provisioned(&self) -> Result<PortPair> {
        let provisioner = self.provisioner.as_ref().ok_or(RelayError::NoProvisioner)?;
        let provisioned = provisioner.get_or_create()?;
        if provisioned.created {
            info!(pair = %provisioned.pair, "using newly created pair");
        }
        let pair = oriented(&provisioned.pair);
        self.start(pair.clone())?;
        Ok(pair)
    }

    /// Stop, forget the persisted pair, create a new one and start on it.
    pub fn reconfigure(&self) -> Result<PortPair> {
        let provisioner = self.provisioner.as_ref().ok_or(RelayError::NoProvisioner)?;
        self.stop();
        let pair = oriented(&provisioner.reconfigure()?);
        self.start(pair.clone())?;
        Ok(pair)
    }
}

impl Drop for RelayEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn oriented(pair: &PortPair) -> PortPair {
    let (input, output) = pair.oriented();
    PortPair::new(input, output)
}

/// Start both workers, each forwarding into the other's port.
fn wire(input: &ConnectionSupervisor, output: &ConnectionSupervisor) -> Result<()> {
    let to_output = output.writer();
    input.start(Box::new(move |frame| to_output.write_frame(frame)))?;

    let to_input = input.writer();
    if let Err(err) = output.start(Box::new(move |frame| to_input.write_frame(frame))) {
        input.disconnect();
        return Err(err);
    }
    Ok(())
}

fn control_loop(
    inner: Arc<Inner>,
    rx: Receiver<RelayEvent>,
    input: Arc<ConnectionSupervisor>,
    output: Arc<ConnectionSupervisor>,
) {
    while let Ok(event) = rx.recv() {
        let origin = match event {
            RelayEvent::Shutdown => break,
            RelayEvent::ReconnectRequested { origin } => origin,
        };

        if inner.health.load() == EngineHealth::ReconnectFailed
            && origin != ReconnectOrigin::Operator
        {
            debug!(?origin, "ignoring reconnect request after reconnect failure");
            continue;
        }

        full_reconnect(&inner, &input, &output, origin);

        // Requests that piled up during the reconnect are covered by it.
        loop {
            match rx.try_recv() {
                Ok(RelayEvent::ReconnectRequested { origin }) => {
                    debug!(?origin, "coalesced reconnect request");
                }
                Ok(RelayEvent::Shutdown) | Err(TryRecvError::Disconnected) => return,
                Err(TryRecvError::Empty) => break,
            }
        }
    }
    debug!("relay control loop exited");
}

fn full_reconnect(
    inner: &Inner,
    input: &ConnectionSupervisor,
    output: &ConnectionSupervisor,
    origin: ReconnectOrigin,
) {
    let config = &inner.config;
    inner.health.store(EngineHealth::Reconnecting);
    let count = inner.reconnects.fetch_add(1, Ordering::Relaxed) + 1;
    warn!(?origin, count, "full reconnect");

    input.disconnect();
    output.disconnect();
    if !sleep_while(config.settle, || inner.keep_going()) {
        return;
    }

    for attempt in 1..=config.reconnect_attempts {
        if !inner.keep_going() {
            return;
        }
        match reopen(input, output) {
            Ok(()) => {
                inner.health.store(EngineHealth::Running);
                info!(attempt, "reconnect succeeded");
                return;
            }
            Err(err) => {
                warn!(attempt, attempts = config.reconnect_attempts, error = %err, "reconnect attempt failed");
            }
        }
        if attempt < config.reconnect_attempts
            && !sleep_while(config.retry_delay, || inner.keep_going())
        {
            return;
        }
    }

    inner.health.store(EngineHealth::ReconnectFailed);
    error!(
        attempts = config.reconnect_attempts,
        "reconnect failed, relay halted until reconnect is requested"
    );
}

fn reopen(input: &ConnectionSupervisor, output: &ConnectionSupervisor) -> Result<()> {
    input.open().map_err(|source| RelayError::Open {
        direction: Direction::Input,
        source,
    })?;
    if let Err(source) = output.open() {
        input.disconnect();
        return Err(RelayError::Open {
            direction: Direction::Output,
            source,
        });
    }
    if let Err(err) = wire(input, output) {
        input.disconnect();
        output.disconnect();
        return Err(err);
    }
    Ok(())
}
