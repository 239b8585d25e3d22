//! Serial port transport abstraction.
//!
//! Provides a unified interface over the endpoints a relay can open:
//! - System serial ports through the `serialport` crate
//! - In-memory null-modem pairs for tests and local demos
//!
//! This is the lowest layer of jsonrelay. Everything else builds on top of
//! the [`SerialLink`] and [`SerialOpener`] traits provided here.

pub mod error;
pub mod memory;
pub mod port;
pub mod settings;
pub mod system;
pub mod traits;

pub use error::{Result, TransportError};
pub use memory::MemoryBus;
pub use port::PortIdentifier;
pub use settings::{DataBits, Parity, SerialSettings, StopBits, DEFAULT_BAUD_RATE};
pub use system::SystemSerial;
pub use traits::{SerialLink, SerialOpener};
