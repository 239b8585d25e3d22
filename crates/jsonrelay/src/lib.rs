//! Relay concatenated JSON frames between paired virtual serial ports.
//!
//! jsonrelay keeps two serial endpoints bridged as one JSON message channel,
//! allocating and persisting the port pair on first use and recovering from
//! transient port faults on its own.
//!
//! # Crate Structure
//!
//! - [`transport`]: Serial port abstraction (system ports, in-memory pairs)
//! - [`frame`]: Brace-balanced JSON frame extraction
//! - [`ports`]: Pair allocation, persistence and driver control
//! - [`relay`]: Supervised bidirectional relay engine

/// Re-export transport types.
pub mod transport {
    pub use jsonrelay_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use jsonrelay_frame::*;
}

/// Re-export port pair management types.
pub mod ports {
    pub use jsonrelay_ports::*;
}

/// Re-export relay engine types.
pub mod relay {
    pub use jsonrelay_relay::*;
}
