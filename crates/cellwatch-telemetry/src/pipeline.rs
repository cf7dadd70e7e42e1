//! Per-channel sample pipeline: validate, throttle, window, persist, publish.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::{sync::watch, time::Instant};

use crate::{
    cache::PersistenceCache,
    sample::{ChannelKind, TelemetrySample},
    throttle::{ThrottleGate, DEFAULT_THROTTLE_INTERVAL},
    window::{Aggregates, RollingWindow, WindowBound},
};

/// Receives every decoded JSON frame, in arrival order, on the driver task.
pub trait FrameHandler: Send + 'static {
    fn handle_frame(&mut self, frame: Value, now: Instant) -> FrameDisposition;

    /// Whether anyone still observes this handler's output.
    fn is_active(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDisposition {
    Applied,
    Throttled,
    Discarded,
    Unrouted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    pub bound: WindowBound,
    pub throttle_interval: Duration,
}

impl ChannelConfig {
    pub fn defaults_for(channel: ChannelKind) -> Self {
        let bound = match channel {
            ChannelKind::Latency => WindowBound::Count(30),
            ChannelKind::Memory => WindowBound::Count(6),
            ChannelKind::Bandwidth => WindowBound::Age(Duration::from_secs(30)),
            ChannelKind::Speed => WindowBound::Count(6),
        };
        Self {
            bound,
            throttle_interval: DEFAULT_THROTTLE_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub applied: u64,
    pub throttled: u64,
    pub discarded: u64,
}

#[derive(Debug, Clone, Serialize)]
/// What subscribers observe after every applied sample.
pub struct WindowSnapshot<S> {
    pub channel: ChannelKind,
    pub latest: Option<S>,
    pub samples: Vec<S>,
    pub aggregates: Aggregates,
    pub stats: PipelineStats,
}

pub struct SamplePipeline<S: TelemetrySample> {
    gate: ThrottleGate,
    window: RollingWindow<S>,
    cache: PersistenceCache,
    stats: PipelineStats,
    snapshot_tx: watch::Sender<WindowSnapshot<S>>,
}

impl<S: TelemetrySample> SamplePipeline<S> {
    /// Builds the pipeline and pre-seeds the window from `cache`.
    ///
    /// Seeded samples do not arm the throttle, so the first live sample is
    /// always applied.
    pub fn new(config: ChannelConfig, cache: PersistenceCache) -> Self {
        let mut window = RollingWindow::new(config.bound);
        let seeded = cache.load::<S>();
        let now = Instant::now();
        let seeded_count = seeded.len();
        for sample in seeded {
            window.push(sample, now);
        }
        if seeded_count > 0 {
            tracing::debug!(
                channel = %S::CHANNEL,
                seeded = seeded_count,
                "seeded telemetry window from cache"
            );
        }
        let stats = PipelineStats::default();
        let (snapshot_tx, _) = watch::channel(snapshot_of(&window, stats));
        Self {
            gate: ThrottleGate::new(config.throttle_interval),
            window,
            cache,
            stats,
            snapshot_tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<WindowSnapshot<S>> {
        self.snapshot_tx.subscribe()
    }

    pub fn window(&self) -> &RollingWindow<S> {
        &self.window
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn ingest(&mut self, frame: &Value, now: Instant) -> FrameDisposition {
        let Some(sample) = S::validate(frame) else {
            self.stats.discarded += 1;
            tracing::trace!(channel = %S::CHANNEL, "discarded frame failing sample validation");
            return FrameDisposition::Discarded;
        };
        if !self.gate.admit(now) {
            self.stats.throttled += 1;
            return FrameDisposition::Throttled;
        }
        self.window.push(sample, now);
        self.stats.applied += 1;
        self.cache.save(&self.window.most_recent(self.cache.capacity()));
        self.snapshot_tx
            .send_replace(snapshot_of(&self.window, self.stats));
        FrameDisposition::Applied
    }
}

impl<S: TelemetrySample> Drop for SamplePipeline<S> {
    fn drop(&mut self) {
        self.cache.flush();
    }
}

impl<S: TelemetrySample> FrameHandler for SamplePipeline<S> {
    fn handle_frame(&mut self, frame: Value, now: Instant) -> FrameDisposition {
        self.ingest(&frame, now)
    }

    fn is_active(&self) -> bool {
        self.snapshot_tx.receiver_count() > 0
    }
}

fn snapshot_of<S: TelemetrySample>(
    window: &RollingWindow<S>,
    stats: PipelineStats,
) -> WindowSnapshot<S> {
    WindowSnapshot {
        channel: S::CHANNEL,
        latest: window.latest().cloned(),
        samples: window.to_vec(),
        aggregates: window.aggregates().clone(),
        stats,
    }
}
