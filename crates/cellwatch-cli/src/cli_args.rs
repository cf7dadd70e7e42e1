use std::path::PathBuf;

use cellwatch_telemetry::{ChannelKind, DEFAULT_TELEMETRY_PORT};
use clap::{Args, Parser, Subcommand};

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "cellwatch",
    about = "Send commands to a cellular modem and watch its live telemetry",
    version
)]
pub struct Cli {
    #[arg(
        long,
        env = "CELLWATCH_API_BASE",
        default_value = "http://192.168.225.1",
        help = "Base URL of the modem's HTTP command endpoints."
    )]
    pub api_base: String,

    #[arg(
        long,
        env = "CELLWATCH_COMMAND_PREFIX",
        default_value = "AT",
        help = "Prefix prepended to commands that do not already carry it."
    )]
    pub command_prefix: String,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Queue a device command and print its classified result.
    Send(SendArgs),
    /// Fetch the result of a command queued with `send --no-wait`.
    Result(ResultArgs),
    /// Stream one telemetry channel and print its rolling window.
    Watch(WatchArgs),
}

#[derive(Debug, Args)]
pub struct SendArgs {
    /// Command text; the prefix is added when missing (`+CSQ` becomes `AT+CSQ`).
    pub text: String,

    #[arg(
        long,
        env = "CELLWATCH_COMMAND_TIMEOUT_SECONDS",
        default_value_t = 30,
        value_parser = parse_positive_u64,
        help = "Seconds the device may spend executing the command."
    )]
    pub timeout: u64,

    #[arg(long, help = "Return the queue receipt instead of waiting for the result.")]
    pub no_wait: bool,

    #[arg(long, help = "Print the raw device transcript instead of the extracted output.")]
    pub raw: bool,
}

#[derive(Debug, Args)]
pub struct ResultArgs {
    pub command_id: String,

    #[arg(long, help = "Print the raw device transcript instead of the extracted output.")]
    pub raw: bool,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Telemetry channel: ping (alias latency), memory, bandwidth or speed.
    pub channel: ChannelKind,

    #[arg(
        long,
        env = "CELLWATCH_HOST",
        default_value = "192.168.225.1",
        help = "Host serving the telemetry WebSocket."
    )]
    pub host: String,

    #[arg(long, env = "CELLWATCH_TELEMETRY_PORT", default_value_t = DEFAULT_TELEMETRY_PORT)]
    pub port: u16,

    #[arg(
        long,
        env = "CELLWATCH_MULTIPLEXED",
        help = "Read the channel from the shared /ws connection instead of /ws/<channel>."
    )]
    pub multiplexed: bool,

    #[arg(
        long,
        env = "CELLWATCH_CACHE_DIR",
        help = "Directory for the per-channel sample cache used to seed the window on start."
    )]
    pub cache_dir: Option<PathBuf>,

    #[arg(
        long,
        env = "CELLWATCH_THROTTLE_MS",
        default_value_t = 1_000,
        help = "Minimum milliseconds between applied samples."
    )]
    pub throttle_ms: u64,

    #[arg(long, env = "CELLWATCH_MAX_RECONNECT_ATTEMPTS", default_value_t = 5)]
    pub max_reconnect_attempts: u32,

    #[arg(long, env = "CELLWATCH_NO_AUTO_RECONNECT")]
    pub no_auto_reconnect: bool,

    #[arg(
        long,
        help = "Issue a manual reconnect instead of exiting once automatic attempts are exhausted."
    )]
    pub keep_retrying: bool,

    #[arg(long, help = "Stop after this many window updates.")]
    pub updates: Option<u64>,

    #[arg(long, help = "Print each window snapshot as a JSON line.")]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use cellwatch_telemetry::ChannelKind;
    use clap::Parser;

    use super::{Cli, CliCommand};

    #[test]
    fn unit_send_defaults_to_waiting_with_thirty_second_timeout() {
        let cli = Cli::try_parse_from(["cellwatch", "send", "+CSQ"]).expect("parse");
        let CliCommand::Send(args) = cli.command else {
            panic!("expected send");
        };
        assert_eq!(args.text, "+CSQ");
        assert_eq!(args.timeout, 30);
        assert!(!args.no_wait);
        assert_eq!(cli.command_prefix, "AT");
    }

    #[test]
    fn unit_send_rejects_zero_timeout() {
        assert!(Cli::try_parse_from(["cellwatch", "send", "+CSQ", "--timeout", "0"]).is_err());
    }

    #[test]
    fn functional_watch_parses_channel_aliases_and_options() {
        let cli = Cli::try_parse_from([
            "cellwatch",
            "watch",
            "latency",
            "--host",
            "10.0.0.1",
            "--multiplexed",
            "--cache-dir",
            "/tmp/cellwatch",
            "--updates",
            "3",
        ])
        .expect("parse");
        let CliCommand::Watch(args) = cli.command else {
            panic!("expected watch");
        };
        assert_eq!(args.channel, ChannelKind::Latency);
        assert_eq!(args.host, "10.0.0.1");
        assert_eq!(args.port, 8838);
        assert!(args.multiplexed);
        assert_eq!(args.cache_dir, Some(PathBuf::from("/tmp/cellwatch")));
        assert_eq!(args.updates, Some(3));
    }

    #[test]
    fn regression_unknown_channel_is_a_usage_error() {
        assert!(Cli::try_parse_from(["cellwatch", "watch", "cpu"]).is_err());
    }
}
