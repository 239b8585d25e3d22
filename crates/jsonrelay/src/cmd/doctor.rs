use std::path::Path;

use serde::Serialize;

use crate::cmd::{Context, DoctorArgs};
use crate::exit::{CliResult, HEALTH_CHECK_FAILED, SUCCESS};
use crate::output::OutputFormat;

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Pass,
    Fail,
    Warn,
    Info,
    Skip,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    name: String,
    status: CheckStatus,
    detail: String,
}

impl CheckResult {
    fn new(name: &str, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorOutput {
    checks: Vec<CheckResult>,
    overall: &'static str,
}

pub fn run(_args: DoctorArgs, ctx: &Context) -> CliResult<i32> {
    let backend = ctx.backend();
    let provisioner = ctx.provisioner(&backend);

    let driver_ok = provisioner.driver().is_available();
    let mut checks = vec![
        driver_check(provisioner.driver().name(), driver_ok),
        config_dir_check(&ctx.config),
        serial_enumeration_check(backend.opener.transport_name(), || {
            backend.opener.available_ports()
        }),
    ];

    checks.push(if driver_ok {
        match provisioner.load_valid() {
            Ok(Some(pair)) => {
                CheckResult::new("persisted_pair", CheckStatus::Pass, format!("{pair} present"))
            }
            Ok(None) if provisioner.store().load().is_some() => CheckResult::new(
                "persisted_pair",
                CheckStatus::Warn,
                "persisted pair no longer exists in the driver; the next run recreates it",
            ),
            Ok(None) => CheckResult::new(
                "persisted_pair",
                CheckStatus::Info,
                "no pair persisted yet; the next run creates one",
            ),
            Err(err) => CheckResult::new("persisted_pair", CheckStatus::Fail, err.to_string()),
        }
    } else {
        CheckResult::new("persisted_pair", CheckStatus::Skip, "driver unavailable")
    });

    let has_fail = checks.iter().any(|c| matches!(c.status, CheckStatus::Fail));
    let output = DoctorOutput {
        checks,
        overall: if has_fail { "fail" } else { "pass" },
    };

    print_doctor(&output, ctx.format);

    if has_fail {
        Ok(HEALTH_CHECK_FAILED)
    } else {
        Ok(SUCCESS)
    }
}

fn driver_check(name: &str, available: bool) -> CheckResult {
    if available {
        CheckResult::new("driver", CheckStatus::Pass, format!("{name} available"))
    } else {
        CheckResult::new(
            "driver",
            CheckStatus::Fail,
            format!("{name} not found (install com0com or pass --setupc <PATH>)"),
        )
    }
}

fn config_dir_check(config: &Path) -> CheckResult {
    let dir = match config.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    if !dir.exists() {
        return CheckResult::new(
            "config_dir",
            CheckStatus::Info,
            format!("{} will be created on first save", dir.display()),
        );
    }

    match write_probe(dir) {
        Ok(()) => CheckResult::new(
            "config_dir",
            CheckStatus::Pass,
            format!("{} is writable", dir.display()),
        ),
        Err(err) => CheckResult::new(
            "config_dir",
            CheckStatus::Fail,
            format!("{} is not writable: {err}", dir.display()),
        ),
    }
}

fn write_probe(dir: &Path) -> std::io::Result<()> {
    let probe = dir.join(format!(".jsonrelay-doctor-{}", std::process::id()));
    std::fs::write(&probe, b"{}")?;
    std::fs::remove_file(&probe)
}

fn serial_enumeration_check<F>(transport: &str, list: F) -> CheckResult
where
    F: FnOnce() -> jsonrelay_transport::Result<Vec<jsonrelay_transport::PortIdentifier>>,
{
    match list() {
        Ok(ports) if ports.is_empty() => CheckResult::new(
            "serial_ports",
            CheckStatus::Warn,
            format!("{transport}: no ports visible"),
        ),
        Ok(ports) => CheckResult::new(
            "serial_ports",
            CheckStatus::Pass,
            format!(
                "{transport}: {}",
                ports
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        ),
        Err(err) => CheckResult::new(
            "serial_ports",
            CheckStatus::Warn,
            format!("{transport}: enumeration failed: {err}"),
        ),
    }
}

fn print_doctor(output: &DoctorOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(output).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("jsonrelay doctor\n");
            for c in &output.checks {
                println!(
                    "  [{:>4}] {:<22} {}",
                    status_text(c.status),
                    c.name,
                    c.detail
                );
            }
            if output.overall == "pass" {
                println!("\n  Result: all checks passed");
            } else {
                println!("\n  Result: one or more checks failed");
            }
        }
        OutputFormat::Raw => {
            println!("{}", output.overall);
        }
    }
}

fn status_text(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Pass => "PASS",
        CheckStatus::Fail => "FAIL",
        CheckStatus::Warn => "WARN",
        CheckStatus::Info => "INFO",
        CheckStatus::Skip => "SKIP",
    }
}
