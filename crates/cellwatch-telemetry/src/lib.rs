//! Live telemetry streaming for the modem's WebSocket channels.
//!
//! Owns the connection lifecycle (handshake deadline, keepalive, capped
//! exponential reconnect), per-channel rolling windows with throttled
//! updates, a demultiplexer for shared connections, and a best-effort cache
//! that pre-seeds windows on cold start.

pub mod backoff;
pub mod cache;
pub mod connection;
pub mod demux;
pub mod endpoint;
pub mod error;
pub mod manager;
pub mod pipeline;
pub mod sample;
pub mod throttle;
pub mod window;

pub use backoff::ReconnectPolicy;
pub use cache::{DurableStore, FileStore, MemoryStore, PersistenceCache, DEFAULT_CACHE_CAPACITY};
pub use connection::{
    ConnectionController, ConnectionState, ConnectionStatus, Directive, LifecycleConfig,
    TimerKind,
};
pub use demux::{ChannelDemultiplexer, DEFAULT_DISCRIMINATOR_FIELD};
pub use endpoint::{TelemetryEndpoint, DEFAULT_TELEMETRY_PORT};
pub use error::TelemetryError;
pub use manager::{StreamConfig, TelemetryStreamManager, KEEPALIVE_FRAME};
pub use pipeline::{
    ChannelConfig, FrameDisposition, FrameHandler, PipelineStats, SamplePipeline, WindowSnapshot,
};
pub use sample::{
    BandwidthSample, ChannelKind, MemorySample, PingSample, Sample, SpeedSample, TelemetrySample,
};
pub use throttle::{ThrottleGate, DEFAULT_THROTTLE_INTERVAL};
pub use window::{compute_aggregates, Aggregate, Aggregates, RollingWindow, WindowBound};
