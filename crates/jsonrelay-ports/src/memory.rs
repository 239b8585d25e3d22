use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use jsonrelay_transport::{MemoryBus, PortIdentifier, TransportError};
use tracing::info;

use crate::driver::{DriverError, DriverPair, PortPairDriver, Result};
use crate::pair::PortPair;

/// In-process driver that creates pairs on a [`MemoryBus`].
#[derive(Debug)]
pub struct MemoryDriver {
    bus: MemoryBus,
    available: AtomicBool,
    state: Mutex<DriverState>,
}

#[derive(Debug, Default)]
struct DriverState {
    pairs: BTreeMap<u32, PortPair>,
    next_index: u32,
    /// Names claimed by something other than this driver.
    foreign_busy: BTreeSet<PortIdentifier>,
}

impl MemoryDriver {
    pub fn new(bus: MemoryBus) -> Self {
        Self {
            bus,
            available: AtomicBool::new(true),
            state: Mutex::new(DriverState::default()),
        }
    }

    pub fn bus(&self) -> &MemoryBus {
        &self.bus
    }

    fn lock(&self) -> MutexGuard<'_, DriverState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Report `ports` as claimed by other devices.
    pub fn mark_busy<I, P>(&self, ports: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<PortIdentifier>,
    {
        self.lock()
            .foreign_busy
            .extend(ports.into_iter().map(Into::into));
    }

    /// Simulate the driver being installed or not.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    fn ensure_available(&self) -> Result<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(DriverError::Unavailable("memory driver disabled".to_string()))
        }
    }
}

impl PortPairDriver for MemoryDriver {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    fn list_busy_ports(&self) -> Result<Vec<PortIdentifier>> {
        self.ensure_available()?;
        let state = self.lock();
        let mut busy: BTreeSet<PortIdentifier> = self.bus.ports().into_iter().collect();
        busy.extend(state.foreign_busy.iter().cloned());
        Ok(busy.into_iter().collect())
    }

    fn list_pairs(&self) -> Result<Vec<DriverPair>> {
        self.ensure_available()?;
        Ok(self
            .lock()
            .pairs
            .iter()
            .filter(|(_, pair)| self.bus.contains(pair.primary()))
            .map(|(&index, pair)| DriverPair {
                index,
                a: Some(pair.primary().clone()),
                b: Some(pair.secondary().clone()),
            })
            .collect())
    }

    fn create_pair(&self, hint_a: &PortIdentifier, hint_b: &PortIdentifier) -> Result<PortPair> {
        self.ensure_available()?;
        self.bus
            .add_pair(hint_a, hint_b)
            .map_err(|err| match err {
                TransportError::AlreadyExists(port) => DriverError::Failed {
                    command: format!("install {hint_a} {hint_b}"),
                    status: Some(1),
                    stderr: format!("{port} already exists"),
                },
                other => DriverError::Io(other.into_io()),
            })?;

        let pair = PortPair::new(hint_a.clone(), hint_b.clone());
        let mut state = self.lock();
        let index = state.next_index;
        state.next_index += 1;
        state.pairs.insert(index, pair.clone());
        info!(index, %pair, "created memory pair");
        Ok(pair)
    }

    fn remove_pair(&self, pair: &PortPair) -> Result<()> {
        self.ensure_available()?;
        let mut state = self.lock();
        let index = state
            .pairs
            .iter()
            .find(|(_, p)| p.contains(pair.primary()) || p.contains(pair.secondary()))
            .map(|(&index, _)| index)
            .ok_or_else(|| DriverError::PairNotFound(pair.primary().clone()))?;
        if let Some(removed) = state.pairs.remove(&index) {
            let _ = self.bus.remove_pair(removed.primary());
            info!(index, pair = %removed, "removed memory pair");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_pairs_are_busy_and_listed() {
        let driver = MemoryDriver::new(MemoryBus::new());
        driver.mark_busy(["COM1"]);
        let pair = driver
            .create_pair(&"COM20".into(), &"COM21".into())
            .unwrap();

        let busy = driver.list_busy_ports().unwrap();
        assert!(busy.contains(&"COM1".into()));
        assert!(busy.contains(&"COM20".into()));
        assert!(driver.pair_exists(&pair).unwrap());
    }

    #[test]
    fn remove_drops_pair_from_bus() {
        let driver = MemoryDriver::new(MemoryBus::new());
        let pair = driver
            .create_pair(&"COM20".into(), &"COM21".into())
            .unwrap();
        driver.remove_pair(&pair).unwrap();

        assert!(!driver.bus().contains(&"COM21".into()));
        assert!(!driver.pair_exists(&pair).unwrap());
        assert!(matches!(
            driver.remove_pair(&pair),
            Err(DriverError::PairNotFound(_))
        ));
    }

    #[test]
    fn disabled_driver_is_unavailable() {
        let driver = MemoryDriver::new(MemoryBus::new());
        driver.set_available(false);
        assert!(matches!(
            driver.list_pairs(),
            Err(DriverError::Unavailable(_))
        ));
    }

    #[test]
    fn duplicate_names_fail_creation() {
        let driver = MemoryDriver::new(MemoryBus::new());
        driver.create_pair(&"COM20".into(), &"COM21".into()).unwrap();
        assert!(matches!(
            driver.create_pair(&"COM21".into(), &"COM22".into()),
            Err(DriverError::Failed { .. })
        ));
    }
}
