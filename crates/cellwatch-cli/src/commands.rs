use std::{sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use cellwatch_command::{CommandClient, CommandClientConfig, CommandOutcome, CommandResult};
use cellwatch_telemetry::{
    BandwidthSample, ChannelConfig, ChannelDemultiplexer, ChannelKind, ConnectionState,
    ConnectionStatus, FileStore, LifecycleConfig, MemorySample, PersistenceCache, PingSample,
    ReconnectPolicy, SamplePipeline, SpeedSample, StreamConfig, TelemetryEndpoint,
    TelemetrySample, TelemetryStreamManager, WindowSnapshot,
};
use chrono::{DateTime, Local};

use crate::cli_args::{Cli, CliCommand, ResultArgs, SendArgs, WatchArgs};

pub(crate) async fn run_cli(cli: Cli) -> Result<()> {
    let command_config = CommandClientConfig {
        api_base: cli.api_base.clone(),
        command_prefix: cli.command_prefix.clone(),
        ..CommandClientConfig::default()
    };
    match cli.command {
        CliCommand::Send(args) => run_send(command_config, args).await,
        CliCommand::Result(args) => run_result(command_config, args).await,
        CliCommand::Watch(args) => run_watch(args).await,
    }
}

async fn run_send(config: CommandClientConfig, args: SendArgs) -> Result<()> {
    let prefix = config.command_prefix.clone();
    let client = CommandClient::new(config).context("failed to build command client")?;
    let outcome = client
        .send(&args.text, !args.no_wait, args.timeout)
        .await
        .with_context(|| format!("command '{}' failed", args.text))?;
    match outcome {
        CommandOutcome::Completed(result) => {
            println!("{}", render_result(&result, &prefix, args.raw))
        }
        CommandOutcome::Queued(queued) => println!("queued command_id={}", queued.command_id),
    }
    Ok(())
}

async fn run_result(config: CommandClientConfig, args: ResultArgs) -> Result<()> {
    let prefix = config.command_prefix.clone();
    let client = CommandClient::new(config).context("failed to build command client")?;
    let fetched = client
        .fetch_result(&args.command_id)
        .await
        .with_context(|| format!("failed to fetch result for command {}", args.command_id))?;
    match fetched {
        Some(result) => println!("{}", render_result(&result, &prefix, args.raw)),
        None => println!("pending command_id={}", args.command_id),
    }
    Ok(())
}

fn render_result(result: &CommandResult, prefix: &str, raw: bool) -> String {
    if raw {
        return result.raw_output.trim_end().to_string();
    }
    let output = result.output(prefix);
    if output.is_empty() {
        return format!("{} ({} ms)", result.status.as_str(), result.duration_ms);
    }
    output
}

async fn run_watch(args: WatchArgs) -> Result<()> {
    let cache = match args.cache_dir.as_ref() {
        Some(dir) => PersistenceCache::new(Arc::new(FileStore::new(dir))),
        None => PersistenceCache::disabled(),
    };
    match args.channel {
        ChannelKind::Latency => watch_channel::<PingSample>(&args, cache).await,
        ChannelKind::Memory => watch_channel::<MemorySample>(&args, cache).await,
        ChannelKind::Bandwidth => watch_channel::<BandwidthSample>(&args, cache).await,
        ChannelKind::Speed => watch_channel::<SpeedSample>(&args, cache).await,
    }
}

fn stream_config_for(args: &WatchArgs) -> StreamConfig {
    let path = if args.multiplexed {
        "/ws".to_string()
    } else {
        format!("/ws/{}", args.channel.as_str())
    };
    StreamConfig {
        endpoint: TelemetryEndpoint::from_host(&args.host, args.port, &path),
        lifecycle: LifecycleConfig {
            reconnect: ReconnectPolicy {
                auto_reconnect: !args.no_auto_reconnect,
                max_attempts: args.max_reconnect_attempts,
                ..ReconnectPolicy::default()
            },
            ..LifecycleConfig::default()
        },
    }
}

async fn watch_channel<S: TelemetrySample>(
    args: &WatchArgs,
    cache: PersistenceCache,
) -> Result<()> {
    let stream = stream_config_for(args);
    let channel = ChannelConfig {
        throttle_interval: Duration::from_millis(args.throttle_ms),
        ..ChannelConfig::defaults_for(S::CHANNEL)
    };
    tracing::debug!(endpoint = %stream.endpoint, channel = %S::CHANNEL, "starting telemetry watch");

    let (manager, mut snapshots) = if args.multiplexed {
        let pipeline = SamplePipeline::<S>::new(channel, cache);
        let snapshots = pipeline.subscribe();
        let mut demux = ChannelDemultiplexer::new();
        demux.register(S::CHANNEL, pipeline);
        (TelemetryStreamManager::spawn(stream, demux), snapshots)
    } else {
        TelemetryStreamManager::for_channel::<S>(stream, channel, cache)
    };
    let mut states = manager.subscribe_state();

    let seeded = snapshots.borrow_and_update().clone();
    if !seeded.samples.is_empty() {
        print_snapshot(&seeded, args.json)?;
    }
    manager.connect();

    let mut updates = 0_u64;
    let outcome = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break Ok(()),
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let snapshot = snapshots.borrow_and_update().clone();
                print_snapshot(&snapshot, args.json)?;
                updates += 1;
                if args.updates.is_some_and(|limit| updates >= limit) {
                    break Ok(());
                }
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let state = states.borrow_and_update().clone();
                eprintln!("{}", render_state(&state));
                if state.status == ConnectionStatus::AwaitingManualReconnect {
                    if args.keep_retrying {
                        manager.reconnect();
                    } else {
                        break Err(state);
                    }
                }
            }
        }
    };
    manager.shutdown().await;

    if let Err(state) = outcome {
        match state.last_error {
            Some(error) => bail!("telemetry stream stopped: {error}"),
            None => bail!("telemetry stream stopped"),
        }
    }
    Ok(())
}

fn print_snapshot<S: TelemetrySample>(snapshot: &WindowSnapshot<S>, json: bool) -> Result<()> {
    if json {
        let encoded = serde_json::to_string(snapshot).context("failed to encode snapshot")?;
        println!("{encoded}");
    } else {
        println!("{}", render_snapshot_line(snapshot, Local::now()));
    }
    Ok(())
}

fn render_snapshot_line<S: TelemetrySample>(
    snapshot: &WindowSnapshot<S>,
    at: DateTime<Local>,
) -> String {
    let mut line = format!(
        "{} {} samples={}",
        at.format("%H:%M:%S"),
        snapshot.channel,
        snapshot.samples.len()
    );
    for (metric, aggregate) in &snapshot.aggregates {
        line.push_str(&format!(
            " {metric}=avg:{:.2},min:{:.2},max:{:.2}",
            aggregate.avg, aggregate.min, aggregate.max
        ));
    }
    if snapshot.stats.throttled > 0 || snapshot.stats.discarded > 0 {
        line.push_str(&format!(
            " throttled={} discarded={}",
            snapshot.stats.throttled, snapshot.stats.discarded
        ));
    }
    line
}

fn render_state(state: &ConnectionState) -> String {
    let mut line = format!("connection {}", state.status.as_str());
    if state.reconnect_attempts > 0 {
        line.push_str(&format!(" attempts={}", state.reconnect_attempts));
    }
    if let Some(error) = state.last_error.as_ref() {
        line.push_str(&format!(" last_error=\"{error}\""));
    }
    line
}

#[cfg(test)]
mod tests {
    use cellwatch_command::{CommandResult, CommandStatus};
    use cellwatch_telemetry::{
        compute_aggregates, ChannelKind, ConnectionState, ConnectionStatus, PingSample,
        PipelineStats, TelemetryError, WindowSnapshot,
    };
    use chrono::{Local, TimeZone};

    use super::{render_result, render_snapshot_line, render_state};

    fn ping(timestamp: u64, latency_ms: f64) -> PingSample {
        PingSample {
            timestamp,
            host: "8.8.8.8".to_string(),
            latency_ms: Some(latency_ms),
            packet_loss_pct: 0.0,
            ok: true,
        }
    }

    #[test]
    fn unit_result_rendering_prefers_extracted_output() {
        let result = CommandResult {
            status: CommandStatus::Success,
            raw_output: "AT+CSQ\n+CSQ: 20,99\n\nOK".to_string(),
            completion_time: None,
            duration_ms: 12,
        };
        assert_eq!(render_result(&result, "AT", false), "+CSQ: 20,99");
        assert_eq!(render_result(&result, "AT", true), "AT+CSQ\n+CSQ: 20,99\n\nOK");

        let bare = CommandResult {
            raw_output: "AT+CFUN=1,1\nOK".to_string(),
            ..result
        };
        assert_eq!(render_result(&bare, "AT", false), "success (12 ms)");
    }

    #[test]
    fn unit_snapshot_line_lists_aggregates_in_metric_order() {
        let samples = vec![ping(1, 10.0), ping(2, 30.0)];
        let snapshot = WindowSnapshot {
            channel: ChannelKind::Latency,
            latest: samples.last().cloned(),
            aggregates: compute_aggregates(samples.iter()),
            samples,
            stats: PipelineStats {
                applied: 2,
                throttled: 3,
                discarded: 0,
            },
        };
        let at = Local
            .with_ymd_and_hms(2026, 10, 14, 8, 30, 5)
            .single()
            .expect("local time");
        assert_eq!(
            render_snapshot_line(&snapshot, at),
            "08:30:05 ping samples=2 latency_ms=avg:20.00,min:10.00,max:30.00 \
             packet_loss_pct=avg:0.00,min:0.00,max:0.00 throttled=3 discarded=0"
        );
    }

    #[test]
    fn unit_state_rendering_includes_attempts_and_error() {
        let state = ConnectionState {
            status: ConnectionStatus::AwaitingManualReconnect,
            reconnect_attempts: 5,
            last_error: Some(TelemetryError::ReconnectExhausted { attempts: 5 }),
        };
        assert_eq!(
            render_state(&state),
            "connection awaiting-manual-reconnect attempts=5 \
             last_error=\"gave up after 5 reconnect attempts; manual reconnect required\""
        );
    }
}
