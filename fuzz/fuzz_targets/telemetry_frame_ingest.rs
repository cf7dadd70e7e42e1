#![no_main]

use cellwatch_telemetry::{
    compute_aggregates, BandwidthSample, ChannelConfig, ChannelDemultiplexer, ChannelKind,
    FrameHandler, MemorySample, PersistenceCache, PingSample, SamplePipeline, SpeedSample,
    WindowBound,
};
use libfuzzer_sys::fuzz_target;
use serde_json::Value;
use tokio::time::Instant;

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    let config = ChannelConfig {
        bound: WindowBound::Count(4),
        throttle_interval: std::time::Duration::ZERO,
    };
    let ping = SamplePipeline::<PingSample>::new(config, PersistenceCache::disabled());
    let memory = SamplePipeline::<MemorySample>::new(config, PersistenceCache::disabled());
    let bandwidth = SamplePipeline::<BandwidthSample>::new(config, PersistenceCache::disabled());
    let speed = SamplePipeline::<SpeedSample>::new(config, PersistenceCache::disabled());
    let receivers = (
        ping.subscribe(),
        memory.subscribe(),
        bandwidth.subscribe(),
        speed.subscribe(),
    );

    let mut demux = ChannelDemultiplexer::new();
    demux
        .register(ChannelKind::Latency, ping)
        .register(ChannelKind::Memory, memory)
        .register(ChannelKind::Bandwidth, bandwidth)
        .register(ChannelKind::Speed, speed);

    let now = Instant::now();
    for line in raw.lines() {
        if let Ok(frame) = serde_json::from_str::<Value>(line) {
            demux.handle_frame(frame, now);
        }
    }

    let ping = receivers.0.borrow();
    assert!(ping.samples.len() <= 4);
    assert_eq!(ping.aggregates, compute_aggregates(ping.samples.iter()));
    assert!(receivers.1.borrow().samples.len() <= 4);
    assert!(receivers.2.borrow().samples.len() <= 4);
    assert!(receivers.3.borrow().samples.len() <= 4);
});
