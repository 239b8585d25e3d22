use serde::Serialize;

use crate::cmd::{Context, CreateArgs};
use crate::exit::{provision_error, CliResult, SUCCESS};
use crate::output::{print_fields, print_json, print_pretty_fields, OutputFormat};

#[derive(Serialize)]
struct CreateOutput {
    ports: [String; 2],
    input: String,
    output: String,
    created: bool,
    config: String,
}

pub fn run(args: CreateArgs, ctx: &Context) -> CliResult<i32> {
    let backend = ctx.backend();
    let provisioner = ctx.provisioner(&backend);

    let (pair, created) = if args.fresh {
        let pair = provisioner
            .reconfigure()
            .map_err(|err| provision_error("pair creation failed", err))?;
        (pair, true)
    } else {
        let provisioned = provisioner
            .get_or_create()
            .map_err(|err| provision_error("pair creation failed", err))?;
        (provisioned.pair, provisioned.created)
    };

    let (input, output) = pair.oriented();
    let out = CreateOutput {
        ports: [pair.primary().to_string(), pair.secondary().to_string()],
        input: input.to_string(),
        output: output.to_string(),
        created,
        config: ctx.config.display().to_string(),
    };

    let fields = [
        ("pair", pair.to_string()),
        ("input", out.input.clone()),
        ("output", out.output.clone()),
        ("created", created.to_string()),
        ("config", out.config.clone()),
    ];
    match ctx.format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => print_fields(&fields),
        OutputFormat::Pretty => print_pretty_fields("Port pair", &fields),
        OutputFormat::Raw => println!("{} {}", out.ports[0], out.ports[1]),
    }
    Ok(SUCCESS)
}
