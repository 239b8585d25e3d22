//! com0com control through its `setupc` program.
//!
//! `setupc` prints one line per endpoint, e.g.
//!
//! ```text
//!        CNCA0 PortName=COM#,RealPortName=COM20,EmuBR=yes
//!        CNCB0 PortName=COM21
//! ```
//!
//! and `busynames COM*` prints the claimed names, one or more per line.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use jsonrelay_transport::PortIdentifier;
use tracing::{debug, info, warn};

use crate::driver::{DriverError, DriverPair, PortPairDriver, Result};
use crate::pair::PortPair;

/// Placeholder name com0com gives endpoints created with `PortName=COM#`.
const PLACEHOLDER_NAME: &str = "COM#";
const WAIT_POLL: Duration = Duration::from_millis(20);

/// Where `setupc` lives and how long to wait for it.
#[derive(Debug, Clone)]
pub struct SetupcConfig {
    pub program: PathBuf,
    /// Limit for list/install/remove invocations.
    pub timeout: Duration,
    /// Limit for `RealPortName` changes, which reinstall the device.
    pub rename_timeout: Duration,
    /// Pause after creating a pair before listing it.
    pub settle: Duration,
    /// Prefix of names reported by `busynames`.
    pub port_prefix: String,
}

impl Default for SetupcConfig {
    fn default() -> Self {
        Self {
            program: Self::locate().unwrap_or_else(|| PathBuf::from(Self::CANDIDATES[0])),
            timeout: Duration::from_secs(10),
            rename_timeout: Duration::from_secs(30),
            settle: Duration::from_secs(2),
            port_prefix: "COM".to_string(),
        }
    }
}

impl SetupcConfig {
    /// Usual install locations, checked in order.
    pub const CANDIDATES: [&'static str; 4] = [
        r"C:\Program Files\com0com\setupc.exe",
        r"C:\Program Files (x86)\com0com\setupc.exe",
        r"C:\com0com\setupc.exe",
        r"com0com\setupc.exe",
    ];

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// First candidate location that exists.
    pub fn locate() -> Option<PathBuf> {
        Self::CANDIDATES
            .iter()
            .map(PathBuf::from)
            .find(|p| p.is_file())
    }
}

/// [`PortPairDriver`] backed by the com0com `setupc` program.
#[derive(Debug, Clone)]
pub struct SetupcDriver {
    config: SetupcConfig,
}

struct Output {
    status: ExitStatus,
    stdout: String,
    stderr: String,
}

impl SetupcDriver {
    pub fn new(config: SetupcConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SetupcConfig {
        &self.config
    }

    fn program_dir(&self) -> Option<&Path> {
        self.config
            .program
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
    }

    /// Run `setupc` with `args`, killing it after `timeout`.
    fn run(&self, args: &[&str], timeout: Duration) -> Result<String> {
        let command = format!("setupc {}", args.join(" "));
        if !self.is_available() {
            return Err(DriverError::Unavailable(format!(
                "{} not found",
                self.config.program.display()
            )));
        }

        let mut cmd = Command::new(&self.config.program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = self.program_dir() {
            cmd.current_dir(dir);
        }

        debug!(%command, "running driver control program");
        let mut child = cmd.spawn()?;
        let stdout = spawn_drain(child.stdout.take());
        let stderr = spawn_drain(child.stderr.take());

        let deadline = Instant::now() + timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                warn!(%command, ?timeout, "driver control program timed out");
                return Err(DriverError::Timeout {
                    command,
                    after: timeout,
                });
            }
            thread::sleep(WAIT_POLL);
        };

        let output = Output {
            status,
            stdout: join_drain(stdout),
            stderr: join_drain(stderr),
        };
        if !output.status.success() {
            warn!(%command, stderr = %output.stderr.trim(), "driver control program failed");
            return Err(DriverError::Failed {
                command,
                status: output.status.code(),
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output.stdout)
    }

    /// Best-effort `change`; failures are logged and ignored.
    fn change(&self, endpoint: &str, param: &str, timeout: Duration) {
        if let Err(err) = self.run(&["--silent", "change", endpoint, param], timeout) {
            warn!(endpoint, param, error = %err, "driver change failed");
        }
    }
}

impl PortPairDriver for SetupcDriver {
    fn name(&self) -> &'static str {
        "com0com"
    }

    fn is_available(&self) -> bool {
        self.config.program.is_file()
    }

    fn list_busy_ports(&self) -> Result<Vec<PortIdentifier>> {
        let pattern = format!("{}*", self.config.port_prefix);
        let out = self.run(&["busynames", &pattern], self.config.timeout)?;
        Ok(parse_busy_names(&out, &self.config.port_prefix))
    }

    fn list_pairs(&self) -> Result<Vec<DriverPair>> {
        let out = self.run(&["list"], self.config.timeout)?;
        Ok(parse_pair_listing(&out))
    }

    fn create_pair(&self, hint_a: &PortIdentifier, hint_b: &PortIdentifier) -> Result<PortPair> {
        let installed = self.run(
            &["--silent", "install", "PortName=COM#", "PortName=COM#"],
            self.config.timeout,
        )?;

        let index = match parse_pair_listing(&installed).iter().map(|p| p.index).max() {
            Some(index) => index,
            None => self
                .list_pairs()?
                .iter()
                .map(|p| p.index)
                .max()
                .ok_or_else(|| DriverError::Parse("install reported no pair".to_string()))?,
        };
        info!(index, %hint_a, %hint_b, "installed driver pair");

        let cnca = format!("CNCA{index}");
        let cncb = format!("CNCB{index}");
        self.change(&cnca, &format!("RealPortName={hint_a}"), self.config.rename_timeout);
        self.change(&cncb, &format!("RealPortName={hint_b}"), self.config.rename_timeout);
        self.change(&cnca, "EmuBR=no", self.config.timeout);
        self.change(&cncb, "EmuBR=no", self.config.timeout);

        thread::sleep(self.config.settle);

        let created = self
            .list_pairs()?
            .into_iter()
            .find(|p| p.index == index)
            .ok_or_else(|| DriverError::Parse(format!("pair {index} missing after install")))?;
        let pair = created.to_pair().ok_or_else(|| {
            DriverError::Parse(format!("pair {index} has no addressable port names"))
        })?;
        if pair != PortPair::new(hint_a.clone(), hint_b.clone()) {
            warn!(%pair, %hint_a, %hint_b, "driver assigned different port names");
        }
        Ok(pair)
    }

    fn remove_pair(&self, pair: &PortPair) -> Result<()> {
        let index = self
            .list_pairs()?
            .into_iter()
            .find(|p| p.contains(pair.primary()) || p.contains(pair.secondary()))
            .map(|p| p.index)
            .ok_or_else(|| DriverError::PairNotFound(pair.primary().clone()))?;

        self.run(&["--silent", "remove", &index.to_string()], self.config.timeout)?;
        info!(index, %pair, "removed driver pair");
        Ok(())
    }
}

fn spawn_drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<thread::JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn join_drain(handle: Option<thread::JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

/// Every whitespace token starting with `prefix`.
pub fn parse_busy_names(output: &str, prefix: &str) -> Vec<PortIdentifier> {
    output
        .split_whitespace()
        .filter(|token| token.starts_with(prefix))
        .map(PortIdentifier::new)
        .collect()
}

/// Pairs from `list` or `install` output, ordered by index.
pub fn parse_pair_listing(output: &str) -> Vec<DriverPair> {
    let mut pairs: BTreeMap<u32, DriverPair> = BTreeMap::new();

    for line in output.lines() {
        let mut tokens = line.split_whitespace();
        let Some((side, index)) = tokens.by_ref().find_map(endpoint_token) else {
            continue;
        };
        let params: Vec<&str> = tokens.flat_map(|t| t.split(',')).collect();
        let name = addressable_name(&params);

        let entry = pairs.entry(index).or_insert_with(|| DriverPair {
            index,
            a: None,
            b: None,
        });
        match side {
            Side::A => entry.a = name,
            Side::B => entry.b = name,
        }
    }

    pairs.into_values().collect()
}

#[derive(Debug, Clone, Copy)]
enum Side {
    A,
    B,
}

fn endpoint_token(token: &str) -> Option<(Side, u32)> {
    let (side, digits) = if let Some(d) = token.strip_prefix("CNCA") {
        (Side::A, d)
    } else if let Some(d) = token.strip_prefix("CNCB") {
        (Side::B, d)
    } else {
        return None;
    };
    digits.parse().ok().map(|index| (side, index))
}

fn addressable_name(params: &[&str]) -> Option<PortIdentifier> {
    let value = |key: &str| {
        params.iter().find_map(|p| {
            let (k, v) = p.split_once('=')?;
            (k.eq_ignore_ascii_case(key) && !v.is_empty() && v != "-").then_some(v)
        })
    };

    value("RealPortName")
        .or_else(|| value("PortName").filter(|v| *v != PLACEHOLDER_NAME))
        .map(PortIdentifier::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "       CNCA0 PortName=COM#,RealPortName=COM20,EmuBR=no\r\n\
                           \x20      CNCB0 PortName=COM#,RealPortName=COM21,EmuBR=no\r\n\
                           \x20      CNCA1 PortName=COM5  \r\n\
                           \x20      CNCB1 PortName=COM#\r\n\
                           some unrelated banner line\r\n";

    #[test]
    fn listing_prefers_real_port_name() {
        let pairs = parse_pair_listing(LISTING);
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].to_pair(), Some(PortPair::new("COM20", "COM21")));
    }

    #[test]
    fn placeholder_names_are_not_addressable() {
        let pairs = parse_pair_listing(LISTING);
        assert_eq!(pairs[1].index, 1);
        assert_eq!(pairs[1].a, Some("COM5".into()));
        assert_eq!(pairs[1].b, None);
    }

    #[test]
    fn install_confirmation_yields_new_index() {
        let out = "       CNCA3 PortName=COM#\n       CNCB3 PortName=COM#\nComDB: COM20 - logged as \"in use\"\n";
        let pairs = parse_pair_listing(out);
        assert_eq!(pairs.iter().map(|p| p.index).max(), Some(3));
    }

    #[test]
    fn busy_names_collects_prefixed_tokens() {
        let out = "COM1\nCOM3 COM4 \r\n  COM20\nnot-a-port\n";
        let busy = parse_busy_names(out, "COM");
        assert_eq!(busy, vec![
            PortIdentifier::new("COM1"),
            PortIdentifier::new("COM3"),
            PortIdentifier::new("COM4"),
            PortIdentifier::new("COM20"),
        ]);
    }

    #[test]
    fn unrelated_cnc_tokens_are_ignored() {
        assert!(parse_pair_listing("CNCAX PortName=COM1\nCNCC0 PortName=COM2\n").is_empty());
    }

    #[test]
    fn missing_program_is_unavailable() {
        let driver = SetupcDriver::new(SetupcConfig::with_program(
            "/nonexistent/com0com/setupc.exe",
        ));
        assert!(!driver.is_available());
        assert!(matches!(
            driver.list_busy_ports(),
            Err(DriverError::Unavailable(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn scripted_program_output_is_parsed() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("setupc");
        std::fs::write(
            &script,
            "#!/bin/sh\nif [ \"$1\" = busynames ]; then echo COM1 COM2; exit 0; fi\necho boom >&2\nexit 3\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let driver = SetupcDriver::new(SetupcConfig::with_program(&script));
        assert_eq!(driver.list_busy_ports().unwrap().len(), 2);

        match driver.list_pairs() {
            Err(DriverError::Failed { status, stderr, .. }) => {
                assert_eq!(status, Some(3));
                assert_eq!(stderr, "boom");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn hung_program_is_killed() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("setupc");
        std::fs::write(&script, "#!/bin/sh\nexec sleep 5\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let driver = SetupcDriver::new(SetupcConfig {
            timeout: Duration::from_millis(100),
            ..SetupcConfig::with_program(&script)
        });
        assert!(matches!(
            driver.list_pairs(),
            Err(DriverError::Timeout { .. })
        ));
    }
}
