use std::io::{Read, Write};

use crate::error::Result;
use crate::port::PortIdentifier;
use crate::settings::SerialSettings;

/// An open serial endpoint.
///
/// Reads honor the timeout from [`SerialSettings`]; a read on an idle port
/// returns `ErrorKind::TimedOut` rather than blocking indefinitely.
pub trait SerialLink: Read + Write + Send {
    /// The port this link was opened on.
    fn port(&self) -> &PortIdentifier;

    /// Number of bytes waiting in the receive buffer.
    fn bytes_to_read(&self) -> Result<usize>;
}

/// Opens serial endpoints by name.
///
/// The relay only ever talks to this trait, so the system serial backend and
/// the in-memory bus are interchangeable.
pub trait SerialOpener: Send + Sync {
    /// Open `port` with the given line settings.
    fn open(&self, port: &PortIdentifier, settings: &SerialSettings)
        -> Result<Box<dyn SerialLink>>;

    /// Ports currently present on this transport.
    fn available_ports(&self) -> Result<Vec<PortIdentifier>>;

    /// Transport name for diagnostics.
    fn transport_name(&self) -> &'static str;
}
