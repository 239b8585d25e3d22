use std::io::{Read, Write};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::port::PortIdentifier;
use crate::settings::SerialSettings;
use crate::traits::{SerialLink, SerialOpener};

/// Serial ports exposed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemSerial;

impl SystemSerial {
    pub fn new() -> Self {
        Self
    }
}

impl SerialOpener for SystemSerial {
    fn open(
        &self,
        port: &PortIdentifier,
        settings: &SerialSettings,
    ) -> Result<Box<dyn SerialLink>> {
        let inner = serialport::new(port.as_str(), settings.baud_rate)
            .data_bits(settings.data_bits.into())
            .parity(settings.parity.into())
            .stop_bits(settings.stop_bits.into())
            .timeout(settings.timeout)
            .open()
            .map_err(|err| TransportError::Open {
                port: port.clone(),
                source: err.into(),
            })?;

        info!(%port, %settings, "opened serial port");

        Ok(Box::new(SystemLink {
            port: port.clone(),
            inner,
        }))
    }

    fn available_ports(&self) -> Result<Vec<PortIdentifier>> {
        let ports = serialport::available_ports()
            .map_err(|err| TransportError::Enumerate(err.into()))?;
        let mut names: Vec<PortIdentifier> = ports
            .into_iter()
            .map(|info| PortIdentifier::new(info.port_name))
            .collect();
        names.sort_by_key(|p| (p.numeric_suffix().unwrap_or(0), p.as_str().to_string()));
        debug!(count = names.len(), "enumerated system serial ports");
        Ok(names)
    }

    fn transport_name(&self) -> &'static str {
        "system-serial"
    }
}

struct SystemLink {
    port: PortIdentifier,
    inner: Box<dyn serialport::SerialPort>,
}

impl Read for SystemLink {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for SystemLink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl SerialLink for SystemLink {
    fn port(&self) -> &PortIdentifier {
        &self.port
    }

    fn bytes_to_read(&self) -> Result<usize> {
        self.inner
            .bytes_to_read()
            .map(|n| n as usize)
            .map_err(|err| TransportError::Io(err.into()))
    }
}

impl Drop for SystemLink {
    fn drop(&mut self) {
        debug!(port = %self.port, "closing serial port");
    }
}

impl std::fmt::Debug for SystemLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemLink")
            .field("port", &self.port)
            .finish()
    }
}
