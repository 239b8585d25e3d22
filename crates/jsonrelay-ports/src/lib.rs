//! Virtual serial pair management.
//!
//! Finds a free pair of consecutive port names, asks the virtual null-modem
//! driver to create it, and persists the choice so later runs reuse it:
//! - [`PortAllocator`] picks the first free consecutive pair
//! - [`PairConfigStore`] is the only durable state, one small JSON document
//! - [`PortPairDriver`] hides the driver's control program behind a trait
//! - [`PairProvisioner`] ties the three together for the relay engine

pub mod allocator;
pub mod driver;
pub mod memory;
pub mod pair;
pub mod probe;
pub mod provision;
pub mod setupc;
pub mod store;

pub use allocator::{AllocError, AllocatorConfig, PortAllocator};
pub use driver::{DriverError, DriverPair, PortPairDriver};
pub use memory::MemoryDriver;
pub use pair::{PersistedConfig, PortPair};
pub use probe::{probe_pair, ProbeError, ProbeReport};
pub use provision::{PairProvisioner, ProvisionError, Provisioned, DEFAULT_LINK_CHECK_TIMEOUT};
pub use setupc::{SetupcConfig, SetupcDriver};
pub use store::{PairConfigStore, StoreError, DEFAULT_CONFIG_PATH};
