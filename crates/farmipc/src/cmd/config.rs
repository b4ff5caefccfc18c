use crate::cmd::{ChannelArgs, ConfigArgs};
use crate::exit::{monitor_error, CliError, CliResult, INTERNAL, SUCCESS};

/// Print the configuration a registry would be built from, after validating
/// every address.
pub fn run(_args: ConfigArgs, channels: &ChannelArgs) -> CliResult<i32> {
    let config = channels.monitor_config()?;
    config
        .endpoints()
        .map_err(|err| monitor_error("invalid config", err))?;

    let json = serde_json::to_string_pretty(&config)
        .map_err(|err| CliError::new(INTERNAL, format!("failed to render config: {err}")))?;
    println!("{json}");
    Ok(SUCCESS)
}
