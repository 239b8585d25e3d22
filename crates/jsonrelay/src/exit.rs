use std::fmt;
use std::io;

use jsonrelay_frame::FrameError;
use jsonrelay_ports::{AllocError, DriverError, ProbeError, ProvisionError, StoreError};
use jsonrelay_relay::RelayError;
use jsonrelay_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const HEALTH_CHECK_FAILED: i32 = 30;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const DRIVER_UNAVAILABLE: i32 = 69;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound
        | io::ErrorKind::NotConnected
        | io::ErrorKind::BrokenPipe => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Open { ref source, .. } if source.kind() == io::ErrorKind::PermissionDenied => {
            CliError::new(
                PERMISSION_DENIED,
                format!("{context}: {err} (is another program using the port?)"),
            )
        }
        TransportError::Io(source) => io_error(context, source),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::Malformed(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        FrameError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
    }
}

pub fn driver_error(context: &str, err: DriverError) -> CliError {
    match err {
        DriverError::Unavailable(_) => CliError::new(
            DRIVER_UNAVAILABLE,
            format!("{context}: {err} (install com0com or pass --setupc <PATH>)"),
        ),
        DriverError::Timeout { .. } => CliError::new(TIMEOUT, format!("{context}: {err}")),
        DriverError::Io(source) => io_error(context, source),
        other => CliError::new(FAILURE, format!("{context}: {other}")),
    }
}

pub fn store_error(context: &str, err: StoreError) -> CliError {
    match err {
        StoreError::Io { ref source, .. } if source.kind() == io::ErrorKind::PermissionDenied => {
            CliError::new(PERMISSION_DENIED, format!("{context}: {err}"))
        }
        other => CliError::new(FAILURE, format!("{context}: {other}")),
    }
}

pub fn alloc_error(context: &str, err: AllocError) -> CliError {
    match err {
        AllocError::Driver(err) => driver_error(context, err),
        AllocError::NotFound { .. } => CliError::new(
            FAILURE,
            format!("{context}: {err} (free some ports or remove unused pairs)"),
        ),
    }
}

pub fn provision_error(context: &str, err: ProvisionError) -> CliError {
    match err {
        ProvisionError::DriverUnavailable(_) => CliError::new(
            DRIVER_UNAVAILABLE,
            format!("{context}: {err} (install com0com or pass --setupc <PATH>)"),
        ),
        ProvisionError::Alloc(err) => alloc_error(context, err),
        ProvisionError::Driver(err) => driver_error(context, err),
        ProvisionError::Store(err) => store_error(context, err),
    }
}

pub fn relay_error(context: &str, err: RelayError) -> CliError {
    match err {
        RelayError::Open { direction, source } => {
            transport_error(&format!("{context} ({direction})"), source)
        }
        RelayError::Provision(err) => provision_error(context, err),
        RelayError::NoProvisioner | RelayError::NotOpen(_) | RelayError::Spawn(_) => {
            CliError::new(INTERNAL, format!("{context}: {err}"))
        }
        other => CliError::new(FAILURE, format!("{context}: {other}")),
    }
}

pub fn probe_error(context: &str, err: ProbeError) -> CliError {
    match err {
        ProbeError::Transport(err) => transport_error(context, err),
        ProbeError::Frame(err) => frame_error(context, err),
        ProbeError::Timeout { .. } => CliError::new(TIMEOUT, format!("{context}: {err}")),
        ProbeError::Mismatch { .. } => CliError::new(DATA_INVALID, format!("{context}: {err}")),
    }
}
