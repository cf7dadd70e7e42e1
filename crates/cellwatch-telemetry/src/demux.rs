//! Routes frames from one shared connection to per-channel handlers.

use std::collections::HashMap;

use serde_json::Value;
use tokio::time::Instant;

use crate::{
    pipeline::{FrameDisposition, FrameHandler},
    sample::ChannelKind,
};

pub const DEFAULT_DISCRIMINATOR_FIELD: &str = "channel";

pub struct ChannelDemultiplexer {
    discriminator_field: String,
    routes: HashMap<ChannelKind, Box<dyn FrameHandler>>,
    unrouted: u64,
}

impl Default for ChannelDemultiplexer {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelDemultiplexer {
    pub fn new() -> Self {
        Self::with_discriminator(DEFAULT_DISCRIMINATOR_FIELD)
    }

    pub fn with_discriminator(field: impl Into<String>) -> Self {
        Self {
            discriminator_field: field.into(),
            routes: HashMap::new(),
            unrouted: 0,
        }
    }

    /// Replaces any handler already registered for `channel`.
    pub fn register(&mut self, channel: ChannelKind, handler: impl FrameHandler) -> &mut Self {
        self.routes.insert(channel, Box::new(handler));
        self
    }

    pub fn unregister(&mut self, channel: ChannelKind) -> bool {
        self.routes.remove(&channel).is_some()
    }

    pub fn channels(&self) -> Vec<ChannelKind> {
        let mut channels = self.routes.keys().copied().collect::<Vec<_>>();
        channels.sort();
        channels
    }

    pub fn unrouted(&self) -> u64 {
        self.unrouted
    }

    fn route_of(&self, frame: &Value) -> Option<ChannelKind> {
        frame
            .get(&self.discriminator_field)
            .and_then(Value::as_str)
            .and_then(ChannelKind::parse)
    }

    fn drop_unrouted(&mut self, reason: &'static str) -> FrameDisposition {
        self.unrouted += 1;
        tracing::trace!(reason, "dropped multiplexed telemetry frame");
        FrameDisposition::Unrouted
    }
}

impl FrameHandler for ChannelDemultiplexer {
    fn handle_frame(&mut self, mut frame: Value, now: Instant) -> FrameDisposition {
        let Some(channel) = self.route_of(&frame) else {
            return self.drop_unrouted("missing or unknown discriminator");
        };
        let active = self
            .routes
            .get(&channel)
            .is_some_and(|handler| handler.is_active());
        if !active {
            return self.drop_unrouted("no active subscriber");
        }
        let payload = if frame.get("data").is_some_and(Value::is_object) {
            frame["data"].take()
        } else {
            frame
        };
        match self.routes.get_mut(&channel) {
            Some(handler) => handler.handle_frame(payload, now),
            None => self.drop_unrouted("no active subscriber"),
        }
    }

    fn is_active(&self) -> bool {
        self.routes.values().any(|handler| handler.is_active())
    }
}
