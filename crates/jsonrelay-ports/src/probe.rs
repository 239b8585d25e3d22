use std::time::{Duration, Instant};

use jsonrelay_frame::{FrameError, FrameReader, FrameWriter};
use jsonrelay_transport::{PortIdentifier, SerialOpener, SerialSettings, TransportError};
use serde::Serialize;
use tracing::{debug, info};

/// Errors from a link probe.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("no reply on {port} within {after:?}")]
    Timeout { port: PortIdentifier, after: Duration },

    #[error("{port} received {received:?}, expected {sent:?}")]
    Mismatch {
        port: PortIdentifier,
        sent: String,
        received: String,
    },
}

/// Outcome of a successful probe.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub from: PortIdentifier,
    pub to: PortIdentifier,
    pub bytes: usize,
    pub elapsed_ms: u64,
}

/// Write a test frame on `from` and read it back on `to`.
///
/// Both ports must be free; the relay holds them while it runs.
pub fn probe_pair(
    opener: &dyn SerialOpener,
    from: &PortIdentifier,
    to: &PortIdentifier,
    settings: &SerialSettings,
    timeout: Duration,
) -> Result<ProbeReport, ProbeError> {
    let sender = opener.open(from, settings)?;
    let receiver = opener.open(to, settings)?;

    let message = serde_json::json!({ "probe": format!("Hello from {from}!") }).to_string();
    let started = Instant::now();

    let mut writer = FrameWriter::new(sender);
    writer.write_raw(message.as_bytes())?;
    writer.flush()?;
    debug!(%from, %to, bytes = message.len(), "probe sent");

    let mut reader = FrameReader::new(receiver);
    let frame = loop {
        match reader.read_frame() {
            Ok(frame) => break frame,
            Err(err) if err.is_timeout() && started.elapsed() < timeout => continue,
            Err(err) if err.is_timeout() => {
                return Err(ProbeError::Timeout {
                    port: to.clone(),
                    after: timeout,
                })
            }
            Err(err) => return Err(err.into()),
        }
    };

    if frame.as_bytes() != message.as_bytes() {
        return Err(ProbeError::Mismatch {
            port: to.clone(),
            sent: message,
            received: String::from_utf8_lossy(frame.as_bytes()).into_owned(),
        });
    }

    let report = ProbeReport {
        from: from.clone(),
        to: to.clone(),
        bytes: frame.len(),
        elapsed_ms: started.elapsed().as_millis() as u64,
    };
    info!(%from, %to, elapsed_ms = report.elapsed_ms, "probe succeeded");
    Ok(report)
}
