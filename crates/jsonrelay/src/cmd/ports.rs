use serde::Serialize;

use crate::cmd::{Context, PortsArgs};
use crate::exit::{alloc_error, driver_error, CliResult, SUCCESS};
use crate::output::{print_fields, print_json, print_pretty_fields, OutputFormat};

#[derive(Serialize)]
struct PortsOutput {
    driver: &'static str,
    available: bool,
    busy: Vec<String>,
    pairs: Vec<PairEntry>,
    next_free: Option<[String; 2]>,
}

#[derive(Serialize)]
struct PairEntry {
    index: u32,
    a: Option<String>,
    b: Option<String>,
}

pub fn run(_args: PortsArgs, ctx: &Context) -> CliResult<i32> {
    let backend = ctx.backend();
    let provisioner = ctx.provisioner(&backend);
    let driver = provisioner.driver();

    let available = driver.is_available();
    let mut out = PortsOutput {
        driver: driver.name(),
        available,
        busy: Vec::new(),
        pairs: Vec::new(),
        next_free: None,
    };

    if available {
        out.busy = driver
            .list_busy_ports()
            .map_err(|err| driver_error("listing busy ports failed", err))?
            .iter()
            .map(ToString::to_string)
            .collect();
        out.pairs = driver
            .list_pairs()
            .map_err(|err| driver_error("listing pairs failed", err))?
            .into_iter()
            .map(|p| PairEntry {
                index: p.index,
                a: p.a.map(|port| port.to_string()),
                b: p.b.map(|port| port.to_string()),
            })
            .collect();
        out.next_free = match provisioner.allocator().find_available_pair() {
            Ok(pair) => Some([pair.primary().to_string(), pair.secondary().to_string()]),
            Err(jsonrelay_ports::AllocError::NotFound { .. }) => None,
            Err(err) => return Err(alloc_error("allocation failed", err)),
        };
    }

    let pairs = out
        .pairs
        .iter()
        .map(|p| {
            format!(
                "{}: {} <-> {}",
                p.index,
                p.a.as_deref().unwrap_or("-"),
                p.b.as_deref().unwrap_or("-")
            )
        })
        .collect::<Vec<_>>()
        .join("; ");
    let fields = [
        ("driver", out.driver.to_string()),
        ("available", available.to_string()),
        ("busy", out.busy.join(", ")),
        ("pairs", pairs),
        (
            "next_free",
            out.next_free
                .as_ref()
                .map_or_else(|| "none".to_string(), |p| p.join(", ")),
        ),
    ];
    match ctx.format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => print_fields(&fields),
        OutputFormat::Pretty => print_pretty_fields("Ports", &fields),
        OutputFormat::Raw => {
            for port in &out.busy {
                println!("{port}");
            }
        }
    }
    Ok(SUCCESS)
}
