use std::time::{Duration, Instant};

use farmipc_monitor::{ChannelRegistry, StatisticsMessage};

use crate::cmd::{
    parse_duration, ChannelArgs, DeliveryArgs, ReportErrorArgs, ReportStateArgs, ReportStatsArgs,
};
use crate::exit::{channels_unavailable, CliError, CliResult, SUCCESS, TIMEOUT, USAGE};
use crate::output::{print_event, Direction, Event, OutputFormat};

const DELIVERY_POLL_INTERVAL: Duration = Duration::from_millis(10);

pub fn state(args: ReportStateArgs, channels: &ChannelArgs, format: OutputFormat) -> CliResult<i32> {
    let linger = parse_duration(&args.delivery.linger)?;
    let mut registry = channels.registry()?;
    if !registry.ensure_client_role() {
        return Err(channels_unavailable("worker"));
    }
    registry.update_state(args.state);
    settle(&registry, &Event::State(args.state), &args.delivery, linger, format)
}

pub fn stats(args: ReportStatsArgs, channels: &ChannelArgs, format: OutputFormat) -> CliResult<i32> {
    let message = StatisticsMessage::new(args.name, args.value)
        .ok_or_else(|| CliError::new(USAGE, "statistic name and value must not be empty"))?;
    send(&message, &args.delivery, channels, format)
}

pub fn error(args: ReportErrorArgs, channels: &ChannelArgs, format: OutputFormat) -> CliResult<i32> {
    let message = StatisticsMessage::error(args.text)
        .ok_or_else(|| CliError::new(USAGE, "error text must not be empty"))?;
    send(&message, &args.delivery, channels, format)
}

fn send(
    message: &StatisticsMessage,
    delivery: &DeliveryArgs,
    channels: &ChannelArgs,
    format: OutputFormat,
) -> CliResult<i32> {
    let linger = parse_duration(&delivery.linger)?;
    let mut registry = channels.registry()?;
    if !registry.ensure_client_role() {
        return Err(channels_unavailable("worker"));
    }
    registry.send_statistics(message.name(), message.value());
    let frame = message.to_frame();
    settle(&registry, &Event::Statistic(&frame), delivery, linger, format)
}

/// Wait up to `linger` for a collector to take the report. A report still
/// queued afterwards is dropped with the registry.
fn settle(
    registry: &ChannelRegistry,
    event: &Event<'_>,
    delivery: &DeliveryArgs,
    linger: Duration,
    format: OutputFormat,
) -> CliResult<i32> {
    let deadline = Instant::now() + linger;
    while registry.pending_sends() > 0 && Instant::now() < deadline {
        std::thread::sleep(DELIVERY_POLL_INTERVAL);
    }

    if registry.pending_sends() > 0 {
        print_event(event, Direction::Queued, format);
        return Err(CliError::new(
            TIMEOUT,
            format!(
                "no collector took the report within {}; it was not delivered",
                delivery.linger
            ),
        ));
    }
    print_event(event, Direction::Sent, format);
    Ok(SUCCESS)
}
