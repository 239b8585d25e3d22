use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use jsonrelay_frame::Frame;
use jsonrelay_relay::{DirectionStatus, RelayStatus};
use jsonrelay_transport::PortIdentifier;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

/// Two-column key/value table.
pub fn print_fields(fields: &[(&str, String)]) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["FIELD", "VALUE"]);
    for (name, value) in fields {
        table.add_row(vec![name.to_string(), value.clone()]);
    }
    println!("{table}");
}

pub fn print_pretty_fields(title: &str, fields: &[(&str, String)]) {
    println!("{title}:");
    let width = fields.iter().map(|(n, _)| n.len()).max().unwrap_or(0) + 1;
    for (name, value) in fields {
        println!("  {:<width$} {}", format!("{name}:"), value, width = width);
    }
}

#[derive(Serialize)]
struct FrameOutput<'a> {
    port: &'a str,
    size: usize,
    frame: String,
    json: Option<serde_json::Value>,
    timestamp: String,
}

pub fn print_frame(frame: &Frame, port: &PortIdentifier, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = FrameOutput {
                port: port.as_str(),
                size: frame.len(),
                frame: frame_preview(frame.as_bytes()),
                json: frame.parse_json().ok(),
                timestamp: chrono::Local::now().to_rfc3339(),
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["PORT", "SIZE", "VALID", "FRAME"])
                .add_row(vec![
                    port.to_string(),
                    frame.len().to_string(),
                    frame.parse_json().is_ok().to_string(),
                    frame_preview(frame.as_bytes()),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let body = frame
                .parse_json()
                .ok()
                .and_then(|v| serde_json::to_string_pretty(&v).ok())
                .unwrap_or_else(|| frame_preview(frame.as_bytes()));
            println!(
                "[{}] {} ({} bytes)\n{}",
                chrono::Local::now().format("%H:%M:%S"),
                port,
                frame.len(),
                body
            );
        }
        OutputFormat::Raw => {
            print_raw(frame.as_bytes());
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

pub fn print_status(status: &RelayStatus, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(status),
        OutputFormat::Table => {
            println!(
                "health: {}  pair: {}  reconnects: {}",
                status.health,
                status
                    .pair
                    .as_ref()
                    .map_or_else(|| "-".to_string(), ToString::to_string),
                status.reconnects
            );
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![
                    "DIRECTION", "PORT", "STATE", "FRAMES", "BYTES", "FAULTS", "FWD ERRORS",
                    "RESTARTS",
                ]);
            for dir in [&status.input, &status.output].into_iter().flatten() {
                table.add_row(direction_row(dir));
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("Relay: {} ({} reconnects)", status.health, status.reconnects);
            for dir in [&status.input, &status.output].into_iter().flatten() {
                println!(
                    "  {:<6} {:<10} {:<12} frames={} bytes={} faults={} forward_errors={} restarts={}",
                    dir.direction.to_string(),
                    dir.port.to_string(),
                    dir.state.to_string(),
                    dir.frames,
                    dir.bytes,
                    dir.faults,
                    dir.forward_errors,
                    dir.restarts
                );
            }
        }
        OutputFormat::Raw => println!("{}", status.health),
    }
}

fn direction_row(dir: &DirectionStatus) -> Vec<String> {
    vec![
        dir.direction.to_string(),
        dir.port.to_string(),
        dir.state.to_string(),
        dir.frames.to_string(),
        dir.bytes.to_string(),
        dir.faults.to_string(),
        dir.forward_errors.to_string(),
        dir.restarts.to_string(),
    ]
}

fn frame_preview(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", bytes.len()),
    }
}
