use std::fmt;

use crate::sample::ChannelKind;

pub const DEFAULT_TELEMETRY_PORT: u16 = 8838;

#[derive(Debug, Clone, PartialEq, Eq)]
/// WebSocket URL of one telemetry stream.
pub struct TelemetryEndpoint {
    url: String,
}

impl TelemetryEndpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// `host` may carry a scheme or trailing slash; both are stripped.
    pub fn from_host(host: &str, port: u16, path: &str) -> Self {
        let host = host
            .trim()
            .trim_start_matches("http://")
            .trim_start_matches("https://")
            .trim_start_matches("ws://")
            .trim_start_matches("wss://")
            .trim_end_matches('/');
        let path = path.trim();
        let separator = if path.starts_with('/') { "" } else { "/" };
        Self::new(format!("ws://{host}:{port}{separator}{path}"))
    }

    pub fn for_channel(host: &str, channel: ChannelKind) -> Self {
        Self::from_host(
            host,
            DEFAULT_TELEMETRY_PORT,
            &format!("/ws/{}", channel.as_str()),
        )
    }

    pub fn multiplexed(host: &str) -> Self {
        Self::from_host(host, DEFAULT_TELEMETRY_PORT, "/ws")
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for TelemetryEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::TelemetryEndpoint;
    use crate::sample::ChannelKind;

    #[test]
    fn unit_endpoint_is_derived_from_host_and_fixed_port() {
        assert_eq!(
            TelemetryEndpoint::for_channel("192.168.225.1", ChannelKind::Latency).url(),
            "ws://192.168.225.1:8838/ws/ping"
        );
        assert_eq!(
            TelemetryEndpoint::multiplexed("http://modem.local/").url(),
            "ws://modem.local:8838/ws"
        );
        assert_eq!(
            TelemetryEndpoint::from_host("10.0.0.1", 9000, "stream").to_string(),
            "ws://10.0.0.1:9000/stream"
        );
    }
}
