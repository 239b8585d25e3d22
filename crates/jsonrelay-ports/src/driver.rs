use std::time::Duration;

use jsonrelay_transport::PortIdentifier;
use serde::Serialize;

use crate::pair::PortPair;

/// Errors from the virtual null-modem driver.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// The driver or its control program is not installed.
    #[error("driver unavailable: {0}")]
    Unavailable(String),

    /// The control program exited unsuccessfully.
    #[error("`{command}` failed ({}): {stderr}", exit_label(.status))]
    Failed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    /// The control program did not finish in time and was killed.
    #[error("`{command}` timed out after {after:?}")]
    Timeout { command: String, after: Duration },

    /// The control program's output did not contain what was expected.
    #[error("unexpected driver output: {0}")]
    Parse(String),

    /// No driver pair contains the given port.
    #[error("no driver pair contains {0}")]
    PairNotFound(PortIdentifier),

    /// Spawning or talking to the control program failed.
    #[error("driver I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DriverError>;

fn exit_label(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("exit {code}"),
        None => "killed by signal".to_string(),
    }
}

/// One pair as the driver reports it.
///
/// An endpoint is `None` while it has no addressable name yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriverPair {
    pub index: u32,
    pub a: Option<PortIdentifier>,
    pub b: Option<PortIdentifier>,
}

impl DriverPair {
    pub fn contains(&self, port: &PortIdentifier) -> bool {
        self.a.as_ref() == Some(port) || self.b.as_ref() == Some(port)
    }

    /// Both names, when both endpoints are addressable.
    pub fn to_pair(&self) -> Option<PortPair> {
        match (&self.a, &self.b) {
            (Some(a), Some(b)) => Some(PortPair::new(a.clone(), b.clone())),
            _ => None,
        }
    }
}

/// Control surface of a virtual null-modem driver.
pub trait PortPairDriver: Send + Sync {
    /// Short driver name for diagnostics.
    fn name(&self) -> &'static str;

    /// Whether the driver can be controlled at all.
    fn is_available(&self) -> bool;

    /// Port names currently claimed on the system, by any device.
    fn list_busy_ports(&self) -> Result<Vec<PortIdentifier>>;

    /// Pairs the driver currently manages.
    fn list_pairs(&self) -> Result<Vec<DriverPair>>;

    /// Create a pair, naming the endpoints `hint_a` and `hint_b` when the
    /// driver allows it. Returns the names actually addressable.
    fn create_pair(&self, hint_a: &PortIdentifier, hint_b: &PortIdentifier) -> Result<PortPair>;

    /// Remove the driver pair containing either endpoint of `pair`.
    fn remove_pair(&self, pair: &PortPair) -> Result<()>;

    /// True when one driver pair holds both endpoints of `pair`.
    fn pair_exists(&self, pair: &PortPair) -> Result<bool> {
        Ok(self
            .list_pairs()?
            .iter()
            .any(|p| p.contains(pair.primary()) && p.contains(pair.secondary())))
    }
}
