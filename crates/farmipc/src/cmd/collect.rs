use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use farmipc_monitor::ProcessState;
use farmipc_socket::Context;

use crate::cmd::{parse_duration, ChannelArgs, CollectArgs};
use crate::exit::{channels_unavailable, CliError, CliResult, INTERNAL, SUCCESS, TIMEOUT};
use crate::output::{print_event, Direction, Event, OutputFormat};

/// Receive timeout used when neither the config nor `--timeout` sets one.
const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(1);

pub fn run(args: CollectArgs, channels: &ChannelArgs, format: OutputFormat) -> CliResult<i32> {
    let deadline = args
        .deadline
        .as_deref()
        .map(parse_duration)
        .transpose()?
        .map(|limit| Instant::now() + limit);

    let mut registry = channels.registry()?;
    if registry.receive_timeout().is_none() {
        registry.set_timeout(Some(DEFAULT_RECEIVE_TIMEOUT));
    }
    if !registry.ensure_server_role() {
        return Err(channels_unavailable("collector"));
    }

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone(), registry.transport().clone())?;

    let mut printed = 0usize;
    let reached = |printed: usize| args.count.is_some_and(|count| printed >= count);

    while running.load(Ordering::SeqCst) {
        let state = registry.try_to_receive_state();
        if state != ProcessState::Timeout {
            print_event(&Event::State(state), Direction::Received, format);
            printed = printed.saturating_add(1);
            if reached(printed) {
                return Ok(SUCCESS);
            }
        }

        if !running.load(Ordering::SeqCst) {
            break;
        }

        let statistic = registry.try_to_receive_statistics();
        if !statistic.is_empty() {
            print_event(&Event::Statistic(&statistic), Direction::Received, format);
            printed = printed.saturating_add(1);
            if reached(printed) {
                return Ok(SUCCESS);
            }
        }

        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return match args.count {
                Some(count) => Err(CliError::new(
                    TIMEOUT,
                    format!("received {printed} of {count} messages before the deadline"),
                )),
                None => Ok(SUCCESS),
            };
        }
    }

    Ok(SUCCESS)
}

/// Ctrl-C ends the loop and breaks the receive in progress.
fn install_ctrlc_handler(running: Arc<AtomicBool>, context: Context) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
        context.interrupt();
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
