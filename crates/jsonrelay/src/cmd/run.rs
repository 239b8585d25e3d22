use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonrelay_ports::PortPair;
use jsonrelay_relay::{EngineHealth, RelayEngine};
use tracing::info;

use crate::cmd::{parse_duration, require_persisted_pair, Context, RunArgs};
use crate::exit::{relay_error, CliError, CliResult, INTERNAL, SUCCESS, TRANSPORT_ERROR};
use crate::output::print_status;

const TICK: Duration = Duration::from_millis(100);

pub fn run(args: RunArgs, ctx: &Context) -> CliResult<i32> {
    let interval = parse_duration(&args.status_interval)?;
    let backend = ctx.backend();
    let engine =
        RelayEngine::new(Arc::clone(&backend.opener)).with_provisioner(ctx.provisioner(&backend));

    let pair = match (args.input, args.output) {
        (Some(input), Some(output)) => {
            let pair = PortPair::new(input, output);
            engine
                .start(pair.clone())
                .map_err(|err| relay_error("relay start failed", err))?;
            pair
        }
        _ if args.no_create => {
            let (input, output) = require_persisted_pair(ctx, &backend)?.oriented();
            let pair = PortPair::new(input, output);
            engine
                .start(pair.clone())
                .map_err(|err| relay_error("relay start failed", err))?;
            pair
        }
        _ => engine
            .start_provisioned()
            .map_err(|err| relay_error("relay start failed", err))?,
    };
    info!(
        input = %pair.primary(),
        output = %pair.secondary(),
        "relaying, press Ctrl-C to stop"
    );

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut last_report = Instant::now();
    let mut outcome = Ok(SUCCESS);
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(TICK);

        if engine.health() == EngineHealth::ReconnectFailed {
            outcome = Err(CliError::new(
                TRANSPORT_ERROR,
                format!(
                    "relay could not reopen {pair}; check that the ports exist and are not in use, then run again"
                ),
            ));
            break;
        }

        if last_report.elapsed() >= interval {
            last_report = Instant::now();
            let status = engine.status();
            for dir in [&status.input, &status.output].into_iter().flatten() {
                info!(
                    direction = %dir.direction,
                    port = %dir.port,
                    state = %dir.state,
                    frames = dir.frames,
                    bytes = dir.bytes,
                    forward_errors = dir.forward_errors,
                    restarts = dir.restarts,
                    "relay status"
                );
            }
        }
    }

    let status = engine.status();
    engine.stop();
    print_status(&status, ctx.format);
    outcome
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
