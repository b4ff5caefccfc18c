use std::time::Duration;

use crate::cmd::{AwaitCommandArgs, ChannelArgs};
use crate::exit::{channels_unavailable, CliResult, SUCCESS};
use crate::output::{print_event, Direction, Event, OutputFormat};

/// Pause after a failed receive so a persistently broken channel does not spin.
const RETRY_PAUSE: Duration = Duration::from_millis(100);

pub fn run(args: AwaitCommandArgs, channels: &ChannelArgs, format: OutputFormat) -> CliResult<i32> {
    let mut registry = channels.registry()?;
    if !registry.ensure_client_role() {
        return Err(channels_unavailable("worker"));
    }

    let mut received = 0usize;
    loop {
        let command = registry.get_next_command();
        if command.is_empty() {
            std::thread::sleep(RETRY_PAUSE);
            continue;
        }

        print_event(&Event::Command(&command), Direction::Received, format);
        received = received.saturating_add(1);
        if args.count.is_some_and(|count| received >= count) {
            return Ok(SUCCESS);
        }
    }
}
