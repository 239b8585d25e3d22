use serde::Serialize;

use crate::cmd::{ClearArgs, Context};
use crate::exit::{store_error, CliResult, SUCCESS};
use crate::output::{print_json, OutputFormat};

#[derive(Serialize)]
struct ClearOutput {
    removed: bool,
    config: String,
}

pub fn run(_args: ClearArgs, ctx: &Context) -> CliResult<i32> {
    let store = ctx.store();
    let removed = store
        .clear()
        .map_err(|err| store_error("clearing config failed", err))?;

    let out = ClearOutput {
        removed,
        config: store.path().display().to_string(),
    };
    match ctx.format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table | OutputFormat::Pretty => {
            if removed {
                println!("Removed {}; the next run creates a new pair.", out.config);
            } else {
                println!("Nothing to clear at {}.", out.config);
            }
        }
        OutputFormat::Raw => println!("{removed}"),
    }
    Ok(SUCCESS)
}
