//! Supervised relay between the two endpoints of a virtual serial pair.
//!
//! Each direction runs a [`ConnectionSupervisor`] on its own thread: it polls
//! its port, extracts frames and writes them to the peer supervisor's port.
//! Faults are absorbed up to a threshold, after which the [`RelayEngine`]
//! tears both directions down and reopens them.

pub mod engine;
pub mod error;
pub mod event;
pub mod fault;
pub mod state;
pub mod supervisor;

pub use engine::{EngineConfig, RelayEngine, RelayStatus};
pub use error::{RelayError, Result};
pub use event::{Direction, ReconnectOrigin, RelayEvent};
pub use fault::{FaultKind, FaultPolicy, FaultTracker, FaultVerdict, IdleBackoff};
pub use state::{ConnectionState, EngineHealth};
pub use supervisor::{ConnectionSupervisor, DirectionStatus, ForwardFn, LinkWriter, SupervisorConfig};
