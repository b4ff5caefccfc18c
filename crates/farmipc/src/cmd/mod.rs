use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use farmipc_monitor::{ChannelRegistry, MonitorConfig, ProcessState};
use farmipc_socket::Context;

use crate::exit::{monitor_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod await_command;
pub mod collect;
pub mod config;
pub mod report;
pub mod send_command;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Report this process's state to the collector.
    ReportState(ReportStateArgs),
    /// Report a `name:value` statistic to the collector.
    ReportStats(ReportStatsArgs),
    /// Report an error message on the statistics channel.
    ReportError(ReportErrorArgs),
    /// Wait for commands from the collector and print them.
    AwaitCommand(AwaitCommandArgs),
    /// Send a command to the workers.
    SendCommand(SendCommandArgs),
    /// Receive and print worker state and statistics.
    Collect(CollectArgs),
    /// Print the effective channel configuration.
    Config(ConfigArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, channels: &ChannelArgs, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::ReportState(args) => report::state(args, channels, format),
        Command::ReportStats(args) => report::stats(args, channels, format),
        Command::ReportError(args) => report::error(args, channels, format),
        Command::AwaitCommand(args) => await_command::run(args, channels, format),
        Command::SendCommand(args) => send_command::run(args, channels, format),
        Command::Collect(args) => collect::run(args, channels, format),
        Command::Config(args) => config::run(args, channels),
        Command::Version(args) => version::run(args),
    }
}

/// Channel addresses and timeouts shared by every subcommand.
///
/// Flags override the config file; unset flags fall back to `FARMIPC_*`
/// environment variables.
#[derive(Args, Debug, Default)]
pub struct ChannelArgs {
    /// JSON configuration file.
    #[arg(long, value_name = "FILE", env = "FARMIPC_CONFIG", global = true)]
    pub config: Option<PathBuf>,
    /// State channel address (ipc://PATH or PATH).
    #[arg(long, value_name = "ADDRESS", env = "FARMIPC_STATE_ADDRESS", global = true)]
    pub state_address: Option<String>,
    /// Statistics channel address (ipc://PATH or PATH).
    #[arg(long, value_name = "ADDRESS", env = "FARMIPC_STATISTICS_ADDRESS", global = true)]
    pub statistics_address: Option<String>,
    /// Command channel address (ipc://PATH or PATH).
    #[arg(long, value_name = "ADDRESS", env = "FARMIPC_COMMAND_ADDRESS", global = true)]
    pub command_address: Option<String>,
    /// Receive timeout for state and statistics (e.g. 1s, 500ms).
    #[arg(long, value_name = "DURATION", env = "FARMIPC_TIMEOUT", global = true)]
    pub timeout: Option<String>,
}

impl ChannelArgs {
    /// Config file (if any) with flag overrides applied.
    pub fn monitor_config(&self) -> CliResult<MonitorConfig> {
        let mut config = match &self.config {
            Some(path) => MonitorConfig::from_json_file(path)
                .map_err(|err| monitor_error("failed to load config", err))?,
            None => MonitorConfig::default(),
        };

        if let Some(address) = &self.state_address {
            config.addresses.state.clone_from(address);
        }
        if let Some(address) = &self.statistics_address {
            config.addresses.statistics.clone_from(address);
        }
        if let Some(address) = &self.command_address {
            config.addresses.command.clone_from(address);
        }
        if let Some(timeout) = &self.timeout {
            let millis = parse_duration(timeout)?.as_millis();
            config.receive_timeout_ms = Some(u64::try_from(millis).unwrap_or(u64::MAX));
        }
        Ok(config)
    }

    /// A registry on a fresh context. No channel is opened yet.
    pub fn registry(&self) -> CliResult<ChannelRegistry> {
        let config = self.monitor_config()?;
        ChannelRegistry::from_config(Context::default(), &config)
            .map_err(|err| monitor_error("invalid config", err))
    }
}

/// Delivery options shared by the report commands.
#[derive(Args, Debug)]
pub struct DeliveryArgs {
    /// How long to wait for a collector to take the report before giving up
    /// (e.g. 1s, 500ms).
    #[arg(long, default_value = "1s")]
    pub linger: String,
}

#[derive(Args, Debug)]
pub struct ReportStateArgs {
    /// One of off, initialized, running, error.
    pub state: ProcessState,
    #[command(flatten)]
    pub delivery: DeliveryArgs,
}

#[derive(Args, Debug)]
pub struct ReportStatsArgs {
    /// Statistic name.
    pub name: String,
    /// Statistic value.
    pub value: String,
    #[command(flatten)]
    pub delivery: DeliveryArgs,
}

#[derive(Args, Debug)]
pub struct ReportErrorArgs {
    /// Error text.
    pub text: String,
    #[command(flatten)]
    pub delivery: DeliveryArgs,
}

#[derive(Args, Debug)]
pub struct AwaitCommandArgs {
    /// Exit after receiving N commands.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct SendCommandArgs {
    /// Command text.
    pub command: String,
    /// How long to keep the channel open so connecting workers can pick the
    /// command up (e.g. 1s, 500ms).
    #[arg(long, default_value = "1s")]
    pub linger: String,
}

#[derive(Args, Debug)]
pub struct CollectArgs {
    /// Exit after printing N messages.
    #[arg(long)]
    pub count: Option<usize>,
    /// Stop collecting after this long (e.g. 10s). With --count, running out
    /// of time is an error.
    #[arg(long, value_name = "DURATION")]
    pub deadline: Option<String>,
}

#[derive(Args, Debug, Default)]
pub struct ConfigArgs {}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn flags_override_defaults() {
        let args = ChannelArgs {
            state_address: Some("/run/farm/state".to_string()),
            timeout: Some("250ms".to_string()),
            ..ChannelArgs::default()
        };
        let config = args.monitor_config().unwrap();
        assert_eq!(config.addresses.state, "/run/farm/state");
        assert_eq!(
            config.addresses.command,
            farmipc_monitor::DEFAULT_COMMAND_ADDRESS
        );
        assert_eq!(config.receive_timeout_ms, Some(250));
    }

    #[test]
    fn invalid_address_is_a_usage_error() {
        let args = ChannelArgs {
            command_address: Some("tcp://127.0.0.1:5555".to_string()),
            ..ChannelArgs::default()
        };
        let err = args.registry().unwrap_err();
        assert_eq!(err.code, USAGE);
    }
}
