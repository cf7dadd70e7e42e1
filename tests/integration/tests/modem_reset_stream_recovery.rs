use std::time::Duration;

use cellwatch_command::{CommandClient, CommandClientConfig, CommandStatus};
use cellwatch_telemetry::{
    ChannelConfig, ConnectionStatus, LifecycleConfig, PersistenceCache, PingSample,
    ReconnectPolicy, StreamConfig, TelemetryEndpoint, TelemetryStreamManager, WindowBound,
};
use futures_util::{SinkExt, StreamExt};
use httpmock::prelude::*;
use serde_json::json;
use tokio::{net::TcpListener, sync::oneshot};
use tokio_tungstenite::{accept_async, tungstenite::Message};

const WAIT: Duration = Duration::from_secs(5);

fn ping_frame(timestamp: u64) -> String {
    json!({
        "timestamp": timestamp,
        "host": "8.8.8.8",
        "latency_ms": 25.0,
        "packet_loss_pct": 0.0,
        "ok": true
    })
    .to_string()
}

#[tokio::test]
async fn integration_radio_reset_command_drops_stream_which_recovers_with_window_intact() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (reset_tx, reset_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.expect("first accept");
        let mut ws = accept_async(tcp).await.expect("first handshake");
        for timestamp in 0..3 {
            ws.send(Message::Text(ping_frame(timestamp).into()))
                .await
                .expect("send");
        }
        let _ = reset_rx.await;
        drop(ws);

        let (tcp, _) = listener.accept().await.expect("second accept");
        let mut ws = accept_async(tcp).await.expect("second handshake");
        for timestamp in 3..5 {
            ws.send(Message::Text(ping_frame(timestamp).into()))
                .await
                .expect("send");
        }
        while let Some(Ok(_)) = ws.next().await {}
    });

    let http = MockServer::start();
    let reset = http.mock(|when, then| {
        when.method(GET)
            .path("/cgi-bin/at_queue")
            .query_param("command", "AT+CFUN=1,1")
            .query_param("wait", "1");
        then.status(200).json_body(json!({
            "response": {
                "status": "success",
                "raw_output": "AT+CFUN=1,1\nOK",
                "duration_ms": 2100
            }
        }));
    });

    let lifecycle = LifecycleConfig {
        reconnect: ReconnectPolicy {
            base_delay: Duration::from_millis(300),
            cap_delay: Duration::from_millis(600),
            ..ReconnectPolicy::default()
        },
        ..LifecycleConfig::default()
    };
    let (manager, mut snapshots) = TelemetryStreamManager::for_channel::<PingSample>(
        StreamConfig {
            endpoint: TelemetryEndpoint::new(format!("ws://{addr}/ws/ping")),
            lifecycle,
        },
        ChannelConfig {
            bound: WindowBound::Count(30),
            throttle_interval: Duration::ZERO,
        },
        PersistenceCache::disabled(),
    );
    let mut states = manager.subscribe_state();
    manager.connect();
    tokio::time::timeout(WAIT, snapshots.wait_for(|s| s.samples.len() == 3))
        .await
        .expect("initial samples")
        .expect("pipeline alive");

    let client = CommandClient::new(CommandClientConfig {
        api_base: http.base_url(),
        ..CommandClientConfig::default()
    })
    .expect("client");
    let outcome = client.send_command("+CFUN=1,1").await.expect("reset");
    reset.assert();
    let result = outcome.into_completed().expect("completed");
    assert_eq!(result.status, CommandStatus::Success);
    let _ = reset_tx.send(());

    tokio::time::timeout(WAIT, states.wait_for(|s| s.status == ConnectionStatus::Reconnecting))
        .await
        .expect("reconnecting within deadline")
        .expect("driver alive");
    let snapshot = tokio::time::timeout(WAIT, snapshots.wait_for(|s| s.samples.len() == 5))
        .await
        .expect("samples after recovery")
        .expect("pipeline alive")
        .clone();
    let timestamps = snapshot.samples.iter().map(|s| s.timestamp).collect::<Vec<_>>();
    assert_eq!(timestamps, vec![0, 1, 2, 3, 4]);
    assert_eq!(manager.state().status, ConnectionStatus::Connected);
    assert_eq!(manager.state().reconnect_attempts, 0);
    manager.shutdown().await;
}
