use jsonrelay_ports::ProvisionError;
use jsonrelay_transport::TransportError;

use crate::event::Direction;

/// Errors that can occur in relay operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// A direction's port could not be opened.
    #[error("{direction} port: {source}")]
    Open {
        direction: Direction,
        source: TransportError,
    },

    /// Resolving or creating the port pair failed.
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    /// The engine has no pair provisioner attached.
    #[error("no pair provisioner configured")]
    NoProvisioner,

    #[error("relay is already running")]
    AlreadyRunning,

    #[error("relay is not running")]
    NotRunning,

    /// The supervisor has no open handle to run on.
    #[error("{0} supervisor has no open port")]
    NotOpen(Direction),

    /// A worker thread could not be spawned.
    #[error("failed to spawn relay thread: {0}")]
    Spawn(std::io::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;
