use tracing::debug;

use crate::cmd::{parse_duration, ChannelArgs, SendCommandArgs};
use crate::exit::{channels_unavailable, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_event, Direction, Event, OutputFormat};

pub fn run(args: SendCommandArgs, channels: &ChannelArgs, format: OutputFormat) -> CliResult<i32> {
    if args.command.is_empty() {
        return Err(CliError::new(USAGE, "command must not be empty"));
    }
    let linger = parse_duration(&args.linger)?;

    let mut registry = channels.registry()?;
    if !registry.ensure_server_role() {
        return Err(channels_unavailable("collector"));
    }
    registry.send_command(&args.command);
    print_event(&Event::Command(&args.command), Direction::Sent, format);

    // Workers connect on their own schedule; queued commands are handed to
    // the first one that attaches while the channel is still open.
    debug!(?linger, "keeping command channel open");
    std::thread::sleep(linger);
    Ok(SUCCESS)
}
