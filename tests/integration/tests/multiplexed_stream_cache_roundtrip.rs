use std::{sync::Arc, time::Duration};

use cellwatch_telemetry::{
    BandwidthSample, ChannelConfig, ChannelDemultiplexer, ChannelKind, FileStore,
    MemorySample, PersistenceCache, SamplePipeline, StreamConfig, TelemetryEndpoint,
    TelemetryStreamManager, WindowBound,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_tungstenite::{accept_async, tungstenite::Message};

const WAIT: Duration = Duration::from_secs(5);

fn unthrottled(bound: WindowBound) -> ChannelConfig {
    ChannelConfig {
        bound,
        throttle_interval: Duration::ZERO,
    }
}

#[tokio::test]
async fn integration_shared_connection_feeds_each_channel_and_seeds_next_start() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.expect("accept");
        let mut ws = accept_async(tcp).await.expect("handshake");
        for index in 0..8u64 {
            let frames = [
                json!({
                    "channel": "memory",
                    "data": {
                        "timestamp": index,
                        "total_bytes": 1_000,
                        "used_bytes": 500 + index,
                        "available_bytes": 500 - index
                    }
                }),
                json!({
                    "channel": "bandwidth",
                    "data": {
                        "timestamp": index,
                        "download_bps": 100.0 * index as f64,
                        "upload_bps": 10.0
                    }
                }),
                json!({
                    "channel": "speed",
                    "data": { "download_kbps": 1.0, "upload_kbps": 1.0, "interface_name": "rmnet0" }
                }),
                json!({ "event": "heartbeat" }),
            ];
            for frame in frames {
                ws.send(Message::Text(frame.to_string().into()))
                    .await
                    .expect("send frame");
            }
        }
        while let Some(Ok(_)) = ws.next().await {}
    });

    let cache_dir = tempfile::tempdir().expect("tempdir");
    let cache = PersistenceCache::new(Arc::new(FileStore::new(cache_dir.path())));
    let memory = SamplePipeline::<MemorySample>::new(
        unthrottled(WindowBound::Count(6)),
        cache.clone(),
    );
    let bandwidth = SamplePipeline::<BandwidthSample>::new(
        unthrottled(WindowBound::Age(Duration::from_secs(30))),
        cache.clone(),
    );
    let mut memory_rx = memory.subscribe();
    let mut bandwidth_rx = bandwidth.subscribe();
    let mut demux = ChannelDemultiplexer::new();
    demux
        .register(ChannelKind::Memory, memory)
        .register(ChannelKind::Bandwidth, bandwidth);

    let manager = TelemetryStreamManager::spawn(
        StreamConfig::new(TelemetryEndpoint::new(format!("ws://{addr}/ws"))),
        demux,
    );
    manager.connect();

    let memory_snapshot = tokio::time::timeout(WAIT, memory_rx.wait_for(|s| s.stats.applied == 8))
        .await
        .expect("memory samples within deadline")
        .expect("memory pipeline alive")
        .clone();
    let bandwidth_snapshot =
        tokio::time::timeout(WAIT, bandwidth_rx.wait_for(|s| s.stats.applied == 8))
            .await
            .expect("bandwidth samples within deadline")
            .expect("bandwidth pipeline alive")
            .clone();
    manager.shutdown().await;

    let memory_timestamps = memory_snapshot
        .samples
        .iter()
        .map(|s| s.timestamp)
        .collect::<Vec<_>>();
    assert_eq!(memory_timestamps, vec![2, 3, 4, 5, 6, 7]);
    assert_eq!(bandwidth_snapshot.samples.len(), 8);
    assert_eq!(bandwidth_snapshot.aggregates["download_bps"].max, 700.0);
    assert_eq!(bandwidth_snapshot.aggregates["download_bps"].avg, 350.0);

    let restarted_cache = PersistenceCache::new(Arc::new(FileStore::new(cache_dir.path())));
    let seeded_memory = SamplePipeline::<MemorySample>::new(
        unthrottled(WindowBound::Count(6)),
        restarted_cache.clone(),
    );
    let seeded_bandwidth = SamplePipeline::<BandwidthSample>::new(
        unthrottled(WindowBound::Age(Duration::from_secs(30))),
        restarted_cache,
    );
    let seeded_memory_ts = seeded_memory
        .window()
        .samples()
        .map(|s| s.timestamp)
        .collect::<Vec<_>>();
    assert_eq!(seeded_memory_ts, vec![2, 3, 4, 5, 6, 7]);
    let seeded_bandwidth_ts = seeded_bandwidth
        .window()
        .samples()
        .map(|s| s.timestamp)
        .collect::<Vec<_>>();
    assert_eq!(seeded_bandwidth_ts, vec![2, 3, 4, 5, 6, 7]);
    assert!(!cache_dir
        .path()
        .join("cellwatch.telemetry.speed.json")
        .exists());
}
