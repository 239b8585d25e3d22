use std::sync::Arc;
use std::time::Duration;

use jsonrelay_transport::{SerialOpener, SerialSettings};
use tracing::{info, warn};

use crate::allocator::{AllocError, PortAllocator};
use crate::driver::{DriverError, PortPairDriver};
use crate::pair::PortPair;
use crate::probe::probe_pair;
use crate::store::{PairConfigStore, StoreError};

/// Errors while resolving the pair to relay on.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("{0} driver is not available")]
    DriverUnavailable(&'static str),

    #[error(transparent)]
    Alloc(#[from] AllocError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, ProvisionError>;

/// How long a persisted pair gets to echo a test frame before it is
/// considered dead.
pub const DEFAULT_LINK_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

/// A resolved pair and whether it was created on this call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provisioned {
    pub pair: PortPair,
    pub created: bool,
}

/// Loads, validates, creates and persists the relay's port pair.
#[derive(Clone)]
pub struct PairProvisioner {
    driver: Arc<dyn PortPairDriver>,
    allocator: PortAllocator,
    store: PairConfigStore,
    link_check: Option<LinkCheck>,
}

#[derive(Clone)]
struct LinkCheck {
    opener: Arc<dyn SerialOpener>,
    settings: SerialSettings,
    timeout: Duration,
}

impl PairProvisioner {
    pub fn new(driver: Arc<dyn PortPairDriver>, store: PairConfigStore) -> Self {
        let allocator = PortAllocator::new(Arc::clone(&driver));
        Self::with_allocator(driver, allocator, store)
    }

    pub fn with_allocator(
        driver: Arc<dyn PortPairDriver>,
        allocator: PortAllocator,
        store: PairConfigStore,
    ) -> Self {
        Self {
            driver,
            allocator,
            store,
            link_check: None,
        }
    }

    /// Also require a persisted pair to carry a test frame before reusing it.
    pub fn with_link_check(mut self, opener: Arc<dyn SerialOpener>) -> Self {
        self.link_check = Some(LinkCheck {
            opener,
            settings: SerialSettings::default(),
            timeout: DEFAULT_LINK_CHECK_TIMEOUT,
        });
        self
    }

    /// Change how long the link check waits for its test frame.
    pub fn with_link_check_timeout(mut self, timeout: Duration) -> Self {
        if let Some(check) = self.link_check.as_mut() {
            check.timeout = timeout;
        }
        self
    }

    pub fn driver(&self) -> &dyn PortPairDriver {
        self.driver.as_ref()
    }

    pub fn allocator(&self) -> &PortAllocator {
        &self.allocator
    }

    pub fn store(&self) -> &PairConfigStore {
        &self.store
    }

    /// The persisted pair, if it still exists in the driver and, with a
    /// link check attached, still carries traffic.
    ///
    /// A stale pair is reported as `None`; the document is left in place.
    pub fn load_valid(&self) -> Result<Option<PortPair>> {
        let Some(config) = self.store.load() else {
            return Ok(None);
        };
        self.require_driver()?;
        if !self.driver.pair_exists(&config.pair)? {
            warn!(pair = %config.pair, "persisted pair no longer exists in driver");
            return Ok(None);
        }
        if let Some(check) = &self.link_check {
            let (input, output) = config.pair.oriented();
            if let Err(err) = probe_pair(
                check.opener.as_ref(),
                &output,
                &input,
                &check.settings,
                check.timeout,
            ) {
                warn!(pair = %config.pair, error = %err, "persisted pair failed link check");
                return Ok(None);
            }
        }
        info!(pair = %config.pair, "reusing persisted pair");
        Ok(Some(config.pair))
    }

    /// Allocate, create and persist a new pair.
    ///
    /// A failed save is logged; the created pair is still returned.
    pub fn create_new(&self) -> Result<PortPair> {
        self.require_driver()?;
        let wanted = self.allocator.find_available_pair()?;
        let pair = self.driver.create_pair(wanted.primary(), wanted.secondary())?;
        info!(%pair, "created port pair");

        if let Err(err) = self.store.save(&pair) {
            warn!(%pair, error = %err, "created pair could not be persisted");
        }
        Ok(pair)
    }

    /// Reuse the persisted pair when it is live, otherwise create one.
    pub fn get_or_create(&self) -> Result<Provisioned> {
        if let Some(pair) = self.load_valid()? {
            return Ok(Provisioned {
                pair,
                created: false,
            });
        }
        Ok(Provisioned {
            pair: self.create_new()?,
            created: true,
        })
    }

    /// Forget the persisted pair and create a fresh one.
    pub fn reconfigure(&self) -> Result<PortPair> {
        self.store.clear()?;
        self.create_new()
    }

    /// Remove the persisted pair from the driver and clear the document.
    ///
    /// Returns the removed pair, or `None` when nothing was persisted.
    pub fn remove(&self) -> Result<Option<PortPair>> {
        let Some(config) = self.store.load() else {
            return Ok(None);
        };
        self.require_driver()?;
        match self.driver.remove_pair(&config.pair) {
            Ok(()) => {}
            Err(DriverError::PairNotFound(port)) => {
                warn!(%port, "persisted pair was already gone from driver");
            }
            Err(err) => return Err(err.into()),
        }
        self.store.clear()?;
        Ok(Some(config.pair))
    }

    fn require_driver(&self) -> Result<()> {
        if self.driver.is_available() {
            Ok(())
        } else {
            Err(ProvisionError::DriverUnavailable(self.driver.name()))
        }
    }
}

impl std::fmt::Debug for PairProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairProvisioner")
            .field("driver", &self.driver.name())
            .field("allocator", &self.allocator)
            .field("store", &self.store)
            .field("link_check", &self.link_check.is_some())
            .finish()
    }
}
