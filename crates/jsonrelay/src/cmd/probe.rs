use jsonrelay_ports::probe_pair;
use jsonrelay_transport::SerialSettings;

use crate::cmd::{parse_duration, require_persisted_pair, Context, ProbeArgs};
use crate::exit::{probe_error, CliResult, SUCCESS};
use crate::output::{print_fields, print_json, print_pretty_fields, OutputFormat};

pub fn run(args: ProbeArgs, ctx: &Context) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let backend = ctx.backend();

    let (from, to) = match (args.from, args.to) {
        (Some(from), Some(to)) => (from, to),
        _ => require_persisted_pair(ctx, &backend)?.oriented(),
    };

    let report = probe_pair(
        backend.opener.as_ref(),
        &from,
        &to,
        &SerialSettings::default(),
        timeout,
    )
    .map_err(|err| probe_error("probe failed", err))?;

    let fields = [
        ("from", report.from.to_string()),
        ("to", report.to.to_string()),
        ("bytes", report.bytes.to_string()),
        ("elapsed_ms", report.elapsed_ms.to_string()),
    ];
    match ctx.format {
        OutputFormat::Json => print_json(&report),
        OutputFormat::Table => print_fields(&fields),
        OutputFormat::Pretty => print_pretty_fields("Probe ok", &fields),
        OutputFormat::Raw => println!("ok"),
    }
    Ok(SUCCESS)
}
