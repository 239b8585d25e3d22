use crate::port::PortIdentifier;

/// Errors that can occur in serial transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to open the specified port.
    #[error("failed to open {port}: {source}")]
    Open {
        port: PortIdentifier,
        source: std::io::Error,
    },

    /// The port is not known to this transport.
    #[error("unknown serial port: {0}")]
    UnknownPort(PortIdentifier),

    /// A pair could not be registered because an endpoint already exists.
    #[error("serial port already exists: {0}")]
    AlreadyExists(PortIdentifier),

    /// Listing the ports present on the system failed.
    #[error("failed to enumerate serial ports: {0}")]
    Enumerate(std::io::Error),

    /// An I/O error occurred on an open port.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// True when the OS refused access, usually because another process
    /// holds the port.
    pub fn is_permission_denied(&self) -> bool {
        match self {
            TransportError::Open { source, .. }
            | TransportError::Enumerate(source)
            | TransportError::Io(source) => {
                source.kind() == std::io::ErrorKind::PermissionDenied
            }
            _ => false,
        }
    }

    /// Convert into an `io::Error`, keeping the kind where one exists.
    pub fn into_io(self) -> std::io::Error {
        match self {
            TransportError::Open { source, .. }
            | TransportError::Enumerate(source)
            | TransportError::Io(source) => source,
            TransportError::UnknownPort(port) => std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("unknown serial port: {port}"),
            ),
            other => std::io::Error::other(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
