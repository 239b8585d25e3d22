use serde::Serialize;

use crate::cmd::{Context, ShowArgs};
use crate::exit::{CliError, CliResult, FAILURE, SUCCESS};
use crate::output::{print_fields, print_json, print_pretty_fields, OutputFormat};

#[derive(Serialize)]
struct ShowOutput {
    ports: [String; 2],
    created_at: Option<String>,
    config: String,
}

pub fn run(_args: ShowArgs, ctx: &Context) -> CliResult<i32> {
    let store = ctx.store();
    let persisted = store.load().ok_or_else(|| {
        CliError::new(
            FAILURE,
            format!("no persisted port pair at {}", store.path().display()),
        )
    })?;

    let out = ShowOutput {
        ports: [
            persisted.pair.primary().to_string(),
            persisted.pair.secondary().to_string(),
        ],
        created_at: persisted.created_at,
        config: store.path().display().to_string(),
    };

    let fields = [
        ("ports", out.ports.join(", ")),
        (
            "created_at",
            out.created_at.clone().unwrap_or_else(|| "unknown".to_string()),
        ),
        ("config", out.config.clone()),
    ];
    match ctx.format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => print_fields(&fields),
        OutputFormat::Pretty => print_pretty_fields("Persisted pair", &fields),
        OutputFormat::Raw => println!("{} {}", out.ports[0], out.ports[1]),
    }
    Ok(SUCCESS)
}
