use serde::Serialize;

use crate::cmd::{Context, RemoveArgs};
use crate::exit::{provision_error, CliResult, SUCCESS};
use crate::output::{print_json, OutputFormat};

#[derive(Serialize)]
struct RemoveOutput {
    removed: Option<[String; 2]>,
}

pub fn run(_args: RemoveArgs, ctx: &Context) -> CliResult<i32> {
    let backend = ctx.backend();
    let removed = ctx
        .provisioner(&backend)
        .remove()
        .map_err(|err| provision_error("removing pair failed", err))?;

    let out = RemoveOutput {
        removed: removed
            .as_ref()
            .map(|p| [p.primary().to_string(), p.secondary().to_string()]),
    };
    match ctx.format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table | OutputFormat::Pretty => match &removed {
            Some(pair) => println!("Removed pair {pair} and cleared {}.", ctx.config.display()),
            None => println!("No persisted pair to remove."),
        },
        OutputFormat::Raw => {
            if let Some(pair) = &removed {
                println!("{} {}", pair.primary(), pair.secondary());
            }
        }
    }
    Ok(SUCCESS)
}
