use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use jsonrelay_ports::{
    MemoryDriver, PairConfigStore, PairProvisioner, PortPair, PortPairDriver, SetupcConfig,
    SetupcDriver,
};
use jsonrelay_transport::{MemoryBus, PortIdentifier, SerialOpener, SystemSerial};

use crate::exit::{provision_error, CliError, CliResult, FAILURE, USAGE};
use crate::output::OutputFormat;

pub mod clear;
pub mod create;
pub mod doctor;
pub mod listen;
pub mod ports;
pub mod probe;
pub mod remove;
pub mod run;
pub mod send;
pub mod show;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Resolve or create the port pair and relay frames until interrupted.
    Run(RunArgs),
    /// Create and persist a port pair, or show the one already persisted.
    Create(CreateArgs),
    /// Print the persisted port pair.
    Show(ShowArgs),
    /// Delete the persisted port pair so the next run creates a new one.
    Clear(ClearArgs),
    /// Remove the persisted pair from the driver and delete the config.
    Remove(RemoveArgs),
    /// Show driver state, busy ports, existing pairs and the next free pair.
    Ports(PortsArgs),
    /// Write a test frame on one port and read it back on its peer.
    Probe(ProbeArgs),
    /// Print frames arriving on a port.
    Listen(ListenArgs),
    /// Write a single frame to a port.
    Send(SendArgs),
    /// Run driver, config and serial enumeration checks.
    Doctor(DoctorArgs),
    /// Show version information.
    Version(VersionArgs),
}

/// Which virtual null-modem driver to control.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum DriverKind {
    /// com0com through its `setupc` program.
    Setupc,
    /// In-process pairs, for demos and tests.
    Memory,
}

/// Options shared by every subcommand.
#[derive(Debug, Clone)]
pub struct Context {
    pub format: OutputFormat,
    pub config: PathBuf,
    pub driver: DriverKind,
    pub setupc: Option<PathBuf>,
}

/// Driver plus the serial opener that reaches its ports.
pub struct Backend {
    pub driver: Arc<dyn PortPairDriver>,
    pub opener: Arc<dyn SerialOpener>,
}

impl Context {
    pub fn store(&self) -> PairConfigStore {
        PairConfigStore::new(&self.config)
    }

    pub fn backend(&self) -> Backend {
        match self.driver {
            DriverKind::Setupc => {
                let config = match &self.setupc {
                    Some(program) => SetupcConfig::with_program(program),
                    None => SetupcConfig::default(),
                };
                Backend {
                    driver: Arc::new(SetupcDriver::new(config)),
                    opener: Arc::new(SystemSerial::new()),
                }
            }
            DriverKind::Memory => {
                let bus = MemoryBus::new();
                Backend {
                    driver: Arc::new(MemoryDriver::new(bus.clone())),
                    opener: Arc::new(bus),
                }
            }
        }
    }

    /// Provisioner that only reuses a persisted pair that still carries a
    /// test frame.
    pub fn provisioner(&self, backend: &Backend) -> PairProvisioner {
        PairProvisioner::new(Arc::clone(&backend.driver), self.store())
            .with_link_check(Arc::clone(&backend.opener))
    }
}

pub fn run(command: Command, ctx: &Context) -> CliResult<i32> {
    match command {
        Command::Run(args) => run::run(args, ctx),
        Command::Create(args) => create::run(args, ctx),
        Command::Show(args) => show::run(args, ctx),
        Command::Clear(args) => clear::run(args, ctx),
        Command::Remove(args) => remove::run(args, ctx),
        Command::Ports(args) => ports::run(args, ctx),
        Command::Probe(args) => probe::run(args, ctx),
        Command::Listen(args) => listen::run(args, ctx),
        Command::Send(args) => send::run(args, ctx),
        Command::Doctor(args) => doctor::run(args, ctx),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Input (listening) port. Requires --output; skips allocation.
    #[arg(long, requires = "output")]
    pub input: Option<PortIdentifier>,
    /// Output port. Requires --input.
    #[arg(long, requires = "input")]
    pub output: Option<PortIdentifier>,
    /// Fail instead of creating a pair when none is persisted.
    #[arg(long)]
    pub no_create: bool,
    /// How often to log relay status (e.g. 30s, 500ms).
    #[arg(long, default_value = "30s")]
    pub status_interval: String,
}

#[derive(Args, Debug, Default)]
pub struct CreateArgs {
    /// Discard any persisted pair and create a new one.
    #[arg(long)]
    pub fresh: bool,
}

#[derive(Args, Debug, Default)]
pub struct ShowArgs {}

#[derive(Args, Debug, Default)]
pub struct ClearArgs {}

#[derive(Args, Debug, Default)]
pub struct RemoveArgs {}

#[derive(Args, Debug, Default)]
pub struct PortsArgs {}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Port to write on. Defaults to the persisted pair.
    #[arg(requires = "to")]
    pub from: Option<PortIdentifier>,
    /// Port to read on.
    pub to: Option<PortIdentifier>,
    /// How long to wait for the frame (e.g. 2s, 500ms).
    #[arg(long, default_value = "2s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Port to read frames from.
    pub port: PortIdentifier,
    /// Exit after receiving N frames.
    #[arg(long)]
    pub count: Option<usize>,
    /// Line speed.
    #[arg(long, default_value_t = jsonrelay_transport::DEFAULT_BAUD_RATE)]
    pub baud: u32,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Port to write the frame to.
    pub port: PortIdentifier,
    /// JSON object to send.
    #[arg(long, conflicts_with = "file", required_unless_present = "file")]
    pub json: Option<String>,
    /// Read the JSON object from a file.
    #[arg(long, conflicts_with = "json")]
    pub file: Option<PathBuf>,
    /// Line speed.
    #[arg(long, default_value_t = jsonrelay_transport::DEFAULT_BAUD_RATE)]
    pub baud: u32,
}

#[derive(Args, Debug, Default)]
pub struct DoctorArgs {}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `5s`, `150ms` or a bare number of seconds.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(match unit {
        "ms" => Duration::from_millis(value),
        _ => Duration::from_secs(value),
    })
}

/// The persisted pair, still present in the driver.
pub fn require_persisted_pair(ctx: &Context, backend: &Backend) -> CliResult<PortPair> {
    ctx.provisioner(backend)
        .load_valid()
        .map_err(|err| provision_error("loading persisted pair failed", err))?
        .ok_or_else(|| {
            CliError::new(
                FAILURE,
                format!(
                    "no usable port pair in {} (run `jsonrelay create` first)",
                    ctx.config.display()
                ),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration(" ").is_err());
    }
}
