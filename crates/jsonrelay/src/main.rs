mod cmd;
mod exit;
mod logging;
mod output;

use std::path::PathBuf;

use clap::Parser;

use crate::cmd::{Command, Context, DriverKind};
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(
    name = "jsonrelay",
    version,
    about = "Relay JSON frames between paired virtual serial ports"
)]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    /// Persisted pair configuration.
    #[arg(
        long,
        value_name = "PATH",
        env = "JSONRELAY_CONFIG",
        default_value = jsonrelay_ports::DEFAULT_CONFIG_PATH,
        global = true
    )]
    config: PathBuf,

    /// Virtual null-modem driver.
    #[arg(long, value_name = "DRIVER", default_value = "setupc", global = true)]
    driver: DriverKind,

    /// Path to com0com's setupc program.
    #[arg(long, value_name = "PATH", env = "JSONRELAY_SETUPC", global = true)]
    setupc: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let ctx = Context {
        format: cli.format.unwrap_or_else(OutputFormat::default_for_stdout),
        config: cli.config,
        driver: cli.driver,
        setupc: cli.setupc,
    };

    match cmd::run(cli.command, &ctx) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_explicit_ports() {
        let cli = Cli::try_parse_from([
            "jsonrelay", "run", "--input", "COM21", "--output", "COM20",
        ])
        .expect("run args should parse");

        assert!(matches!(cli.command, Command::Run(_)));
        assert_eq!(cli.driver, DriverKind::Setupc);
    }

    #[test]
    fn run_input_requires_output() {
        let err = Cli::try_parse_from(["jsonrelay", "run", "--input", "COM21"])
            .expect_err("lone --input should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn rejects_conflicting_payload_args() {
        let err = Cli::try_parse_from([
            "jsonrelay",
            "send",
            "COM20",
            "--json",
            "{\"x\":1}",
            "--file",
            "payload.json",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "jsonrelay",
            "show",
            "--driver",
            "memory",
            "--config",
            "/tmp/pair.json",
        ])
        .expect("global flags should parse");

        assert_eq!(cli.driver, DriverKind::Memory);
        assert_eq!(cli.config, PathBuf::from("/tmp/pair.json"));
    }
}
