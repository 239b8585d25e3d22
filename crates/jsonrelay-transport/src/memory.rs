//! In-memory null-modem pairs.
//!
//! A [`MemoryBus`] holds any number of cross-connected endpoint pairs: bytes
//! written on one endpoint become readable on its peer. Endpoints are
//! exclusive like real serial ports, and faults can be injected per endpoint
//! so supervisor and engine behaviour can be exercised without hardware.

use std::collections::{HashMap, VecDeque};
use std::io::{self, ErrorKind, Read, Write};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::error::{Result, TransportError};
use crate::port::PortIdentifier;
use crate::settings::SerialSettings;
use crate::traits::{SerialLink, SerialOpener};

/// Shared registry of in-memory serial endpoints. Cloning shares the bus.
#[derive(Debug, Clone, Default)]
pub struct MemoryBus {
    shared: Arc<Shared>,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<BusState>,
    readable: Condvar,
}

#[derive(Debug, Default)]
struct BusState {
    endpoints: HashMap<PortIdentifier, Endpoint>,
}

#[derive(Debug)]
struct Endpoint {
    peer: PortIdentifier,
    inbound: VecDeque<u8>,
    open: bool,
    read_faults: VecDeque<ErrorKind>,
    write_faults: VecDeque<ErrorKind>,
    open_faults: VecDeque<ErrorKind>,
}

impl Endpoint {
    fn new(peer: PortIdentifier) -> Self {
        Self {
            peer,
            inbound: VecDeque::new(),
            open: false,
            read_faults: VecDeque::new(),
            write_faults: VecDeque::new(),
            open_faults: VecDeque::new(),
        }
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a cross-connected pair `a <-> b`.
    pub fn add_pair(&self, a: &PortIdentifier, b: &PortIdentifier) -> Result<()> {
        let mut state = self.lock();
        for port in [a, b] {
            if state.endpoints.contains_key(port) {
                return Err(TransportError::AlreadyExists(port.clone()));
            }
        }
        state.endpoints.insert(a.clone(), Endpoint::new(b.clone()));
        state.endpoints.insert(b.clone(), Endpoint::new(a.clone()));
        debug!(%a, %b, "memory pair added");
        Ok(())
    }

    /// Remove the pair containing `port`. Open links on either side start
    /// failing with `NotConnected`.
    pub fn remove_pair(&self, port: &PortIdentifier) -> Result<()> {
        let mut state = self.lock();
        let endpoint = state
            .endpoints
            .remove(port)
            .ok_or_else(|| TransportError::UnknownPort(port.clone()))?;
        state.endpoints.remove(&endpoint.peer);
        drop(state);
        self.shared.readable.notify_all();
        debug!(%port, peer = %endpoint.peer, "memory pair removed");
        Ok(())
    }

    pub fn contains(&self, port: &PortIdentifier) -> bool {
        self.lock().endpoints.contains_key(port)
    }

    /// The peer of `port`, if registered.
    pub fn peer_of(&self, port: &PortIdentifier) -> Option<PortIdentifier> {
        self.lock().endpoints.get(port).map(|e| e.peer.clone())
    }

    /// All registered endpoints, ordered by numeric suffix then name.
    pub fn ports(&self) -> Vec<PortIdentifier> {
        let mut ports: Vec<PortIdentifier> = self.lock().endpoints.keys().cloned().collect();
        ports.sort_by(|a, b| {
            a.numeric_suffix()
                .cmp(&b.numeric_suffix())
                .then_with(|| a.cmp(b))
        });
        ports
    }

    /// Whether some link currently holds `port` open.
    pub fn is_open(&self, port: &PortIdentifier) -> bool {
        self.lock().endpoints.get(port).is_some_and(|e| e.open)
    }

    /// Bytes queued for reading on `port`.
    pub fn pending(&self, port: &PortIdentifier) -> usize {
        self.lock()
            .endpoints
            .get(port)
            .map_or(0, |e| e.inbound.len())
    }

    /// Make the next `count` reads (or `bytes_to_read` polls) on `port` fail.
    pub fn inject_read_faults(&self, port: &PortIdentifier, kind: ErrorKind, count: usize) {
        if let Some(endpoint) = self.lock().endpoints.get_mut(port) {
            endpoint.read_faults.extend(std::iter::repeat_n(kind, count));
        }
        self.shared.readable.notify_all();
    }

    /// Make the next `count` writes on `port` fail.
    pub fn inject_write_faults(&self, port: &PortIdentifier, kind: ErrorKind, count: usize) {
        if let Some(endpoint) = self.lock().endpoints.get_mut(port) {
            endpoint.write_faults.extend(std::iter::repeat_n(kind, count));
        }
    }

    /// Make the next `count` opens of `port` fail.
    pub fn inject_open_faults(&self, port: &PortIdentifier, kind: ErrorKind, count: usize) {
        if let Some(endpoint) = self.lock().endpoints.get_mut(port) {
            endpoint.open_faults.extend(std::iter::repeat_n(kind, count));
        }
    }

    fn release(&self, port: &PortIdentifier) {
        if let Some(endpoint) = self.lock().endpoints.get_mut(port) {
            endpoint.open = false;
        }
    }
}

impl SerialOpener for MemoryBus {
    fn open(
        &self,
        port: &PortIdentifier,
        settings: &SerialSettings,
    ) -> Result<Box<dyn SerialLink>> {
        let mut state = self.lock();
        let endpoint = state
            .endpoints
            .get_mut(port)
            .ok_or_else(|| TransportError::UnknownPort(port.clone()))?;

        if let Some(kind) = endpoint.open_faults.pop_front() {
            return Err(TransportError::Open {
                port: port.clone(),
                source: io::Error::new(kind, "injected open fault"),
            });
        }
        if endpoint.open {
            return Err(TransportError::Open {
                port: port.clone(),
                source: io::Error::new(ErrorKind::PermissionDenied, "port is busy"),
            });
        }
        endpoint.open = true;
        drop(state);

        debug!(%port, %settings, "opened memory port");
        Ok(Box::new(MemoryLink {
            port: port.clone(),
            bus: self.clone(),
            timeout: settings.timeout,
        }))
    }

    fn available_ports(&self) -> Result<Vec<PortIdentifier>> {
        Ok(self.ports())
    }

    fn transport_name(&self) -> &'static str {
        "memory"
    }
}

/// One open end of a memory pair.
struct MemoryLink {
    port: PortIdentifier,
    bus: MemoryBus,
    timeout: Duration,
}

impl MemoryLink {
    fn disconnected(&self) -> io::Error {
        io::Error::new(
            ErrorKind::NotConnected,
            format!("memory port {} was removed", self.port),
        )
    }
}

impl Read for MemoryLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let deadline = Instant::now() + self.timeout;
        let mut state = self.bus.lock();
        loop {
            let endpoint = match state.endpoints.get_mut(&self.port) {
                Some(endpoint) => endpoint,
                None => return Err(self.disconnected()),
            };
            if let Some(kind) = endpoint.read_faults.pop_front() {
                return Err(io::Error::new(kind, "injected read fault"));
            }
            if !endpoint.inbound.is_empty() {
                let n = buf.len().min(endpoint.inbound.len());
                for (slot, byte) in buf.iter_mut().zip(endpoint.inbound.drain(..n)) {
                    *slot = byte;
                }
                trace!(port = %self.port, n, "memory read");
                return Ok(n);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(io::Error::new(ErrorKind::TimedOut, "read timed out"));
            }
            state = self
                .bus
                .shared
                .readable
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

impl Write for MemoryLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.bus.lock();
        let endpoint = match state.endpoints.get_mut(&self.port) {
            Some(endpoint) => endpoint,
            None => return Err(self.disconnected()),
        };
        if let Some(kind) = endpoint.write_faults.pop_front() {
            return Err(io::Error::new(kind, "injected write fault"));
        }
        let peer = endpoint.peer.clone();
        match state.endpoints.get_mut(&peer) {
            Some(peer_endpoint) => peer_endpoint.inbound.extend(buf.iter().copied()),
            None => return Err(io::Error::from(ErrorKind::BrokenPipe)),
        }
        drop(state);
        self.bus.shared.readable.notify_all();
        trace!(port = %self.port, %peer, n = buf.len(), "memory write");
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SerialLink for MemoryLink {
    fn port(&self) -> &PortIdentifier {
        &self.port
    }

    fn bytes_to_read(&self) -> Result<usize> {
        let mut state = self.bus.lock();
        let endpoint = state
            .endpoints
            .get_mut(&self.port)
            .ok_or_else(|| TransportError::Io(self.disconnected()))?;
        if let Some(kind) = endpoint.read_faults.pop_front() {
            return Err(TransportError::Io(io::Error::new(kind, "injected read fault")));
        }
        Ok(endpoint.inbound.len())
    }
}

impl Drop for MemoryLink {
    fn drop(&mut self) {
        self.bus.release(&self.port);
        debug!(port = %self.port, "closed memory port");
    }
}
