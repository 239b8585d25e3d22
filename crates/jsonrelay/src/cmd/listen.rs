use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use jsonrelay_frame::FrameReader;
use jsonrelay_transport::SerialSettings;

use crate::cmd::{Context, ListenArgs};
use crate::exit::{frame_error, transport_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::print_frame;

pub fn run(args: ListenArgs, ctx: &Context) -> CliResult<i32> {
    let settings = SerialSettings {
        baud_rate: args.baud,
        ..SerialSettings::default()
    };
    let link = ctx
        .backend()
        .opener
        .open(&args.port, &settings)
        .map_err(|err| transport_error("open failed", err))?;
    let mut reader = FrameReader::new(link);

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) {
        let frame = match reader.read_frame() {
            Ok(frame) => frame,
            Err(err) if err.is_timeout() => continue,
            Err(err) => return Err(frame_error("receive failed", err)),
        };

        print_frame(&frame, &args.port, ctx.format);
        printed = printed.saturating_add(1);

        if let Some(count) = args.count {
            if printed >= count {
                break;
            }
        }
    }

    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
