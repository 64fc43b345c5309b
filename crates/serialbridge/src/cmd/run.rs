use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

use serialbridge_bridge::{link_from_parameters, Bridge, BridgeConfig};
use tracing::{error, info};

use crate::cmd::RunArgs;
use crate::exit::{bridge_error, CliError, CliResult, INTERNAL, SUCCESS, TRANSPORT_ERROR};
use crate::host::{spawn_stdin_reader, StdioHost};
use crate::output::OutputFormat;

pub fn run(args: RunArgs, format: OutputFormat) -> CliResult<i32> {
    let params = args.params.load()?;
    let link =
        link_from_parameters(&params).map_err(|err| bridge_error("invalid parameters", err))?;
    let config =
        BridgeConfig::from_parameters(&params).map_err(|err| bridge_error("invalid parameters", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut host = StdioHost::new(format);
    let mut bridge = Bridge::open(&link, &config, &params, &mut host)
        .map_err(|err| bridge_error("bridge startup failed", err))?;

    let (queue, pending) = mpsc::channel();
    if !args.no_stdin {
        let mut topics: Vec<_> = host.outbound_topics().collect();
        topics.sort_unstable();
        info!(topics = ?topics, "reading host messages from stdin");
        spawn_stdin_reader(queue)?;
    }

    let write_sleep = config.write_sleep();
    while running.load(Ordering::SeqCst) {
        host.pump(&pending);

        if args.count.is_some_and(|count| host.published() >= count) {
            info!(published = host.published(), "message count reached");
            break;
        }
        if !bridge.is_reading() {
            error!("reader stopped, shutting down");
            break;
        }
        thread::sleep(write_sleep);
    }

    let summary = bridge
        .shutdown()
        .map_err(|err| bridge_error("shutdown failed", err))?;
    if summary.link_failed {
        return Err(CliError::new(TRANSPORT_ERROR, "link failed while bridging"));
    }
    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
