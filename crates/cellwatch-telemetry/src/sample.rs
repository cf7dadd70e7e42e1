//! Telemetry sample schemas, one per channel, and their aggregation metrics.

use std::{fmt, str::FromStr};

use chrono::DateTime;
use serde::{
    de::{DeserializeOwned, Error as _},
    Deserialize, Deserializer, Serialize,
};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Enumerates the telemetry channels the device streams.
pub enum ChannelKind {
    #[serde(rename = "ping", alias = "latency")]
    Latency,
    Memory,
    Bandwidth,
    Speed,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 4] = [
        ChannelKind::Latency,
        ChannelKind::Memory,
        ChannelKind::Bandwidth,
        ChannelKind::Speed,
    ];

    /// Wire discriminator and cache key fragment.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Latency => "ping",
            Self::Memory => "memory",
            Self::Bandwidth => "bandwidth",
            Self::Speed => "speed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "ping" | "latency" => Some(Self::Latency),
            "memory" => Some(Self::Memory),
            "bandwidth" => Some(Self::Bandwidth),
            "speed" => Some(Self::Speed),
            _ => None,
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::parse(raw).ok_or_else(|| format!("unknown telemetry channel `{raw}`"))
    }
}

/// Schema contract every per-channel sample type fulfils.
pub trait TelemetrySample:
    Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const CHANNEL: ChannelKind;

    /// Returns the sample when `frame` matches this channel's shape.
    fn validate(frame: &Value) -> Option<Self> {
        let sample = Self::deserialize(frame).ok()?;
        sample.is_plausible().then_some(sample)
    }

    fn is_plausible(&self) -> bool {
        true
    }

    fn timestamp_ms(&self) -> u64;

    /// Named numeric values the rolling window aggregates.
    fn metrics(&self) -> Vec<(&'static str, f64)>;
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

fn float_to_u64(value: f64) -> Option<u64> {
    (value.is_finite() && value >= 0.0 && value < u64::MAX as f64).then(|| value.trunc() as u64)
}

fn timestamp_from_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64().or_else(|| number.as_f64().and_then(float_to_u64)),
        Value::String(raw) => {
            let raw = raw.trim();
            if let Ok(parsed) = raw.parse::<f64>() {
                return float_to_u64(parsed);
            }
            let parsed = DateTime::parse_from_rfc3339(raw).ok()?;
            u64::try_from(parsed.timestamp_millis()).ok()
        }
        _ => None,
    }
}

/// Integer, float, numeric-string or RFC 3339 timestamps; anything else is the receive time.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(timestamp_from_value(&value).unwrap_or_else(now_ms))
}

/// Byte counts sent as integers or floats such as `1.0e9`; fractions are truncated.
fn deserialize_byte_count<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    value
        .as_u64()
        .or_else(|| value.as_f64().and_then(float_to_u64))
        .ok_or_else(|| D::Error::custom(format!("invalid byte count `{value}`")))
}

fn non_negative(value: f64) -> bool {
    value.is_finite() && value >= 0.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingSample {
    #[serde(default = "now_ms", deserialize_with = "deserialize_timestamp")]
    pub timestamp: u64,
    pub host: String,
    pub latency_ms: Option<f64>,
    #[serde(default)]
    pub packet_loss_pct: f64,
    pub ok: bool,
}

impl TelemetrySample for PingSample {
    const CHANNEL: ChannelKind = ChannelKind::Latency;

    fn is_plausible(&self) -> bool {
        self.latency_ms.map_or(true, non_negative)
            && non_negative(self.packet_loss_pct)
            && self.packet_loss_pct <= 100.0
    }

    fn timestamp_ms(&self) -> u64 {
        self.timestamp
    }

    fn metrics(&self) -> Vec<(&'static str, f64)> {
        let mut metrics = Vec::with_capacity(2);
        if let Some(latency_ms) = self.latency_ms {
            metrics.push(("latency_ms", latency_ms));
        }
        metrics.push(("packet_loss_pct", self.packet_loss_pct));
        metrics
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySample {
    #[serde(default = "now_ms", deserialize_with = "deserialize_timestamp")]
    pub timestamp: u64,
    #[serde(deserialize_with = "deserialize_byte_count")]
    pub total_bytes: u64,
    #[serde(deserialize_with = "deserialize_byte_count")]
    pub used_bytes: u64,
    #[serde(deserialize_with = "deserialize_byte_count")]
    pub available_bytes: u64,
}

impl MemorySample {
    pub fn used_pct(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.used_bytes as f64 * 100.0 / self.total_bytes as f64
    }
}

impl TelemetrySample for MemorySample {
    const CHANNEL: ChannelKind = ChannelKind::Memory;

    fn is_plausible(&self) -> bool {
        self.used_bytes <= self.total_bytes && self.available_bytes <= self.total_bytes
    }

    fn timestamp_ms(&self) -> u64 {
        self.timestamp
    }

    fn metrics(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("used_bytes", self.used_bytes as f64),
            ("available_bytes", self.available_bytes as f64),
            ("used_pct", self.used_pct()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandwidthSample {
    #[serde(default = "now_ms", deserialize_with = "deserialize_timestamp")]
    pub timestamp: u64,
    pub download_bps: f64,
    pub upload_bps: f64,
}

impl TelemetrySample for BandwidthSample {
    const CHANNEL: ChannelKind = ChannelKind::Bandwidth;

    fn is_plausible(&self) -> bool {
        non_negative(self.download_bps) && non_negative(self.upload_bps)
    }

    fn timestamp_ms(&self) -> u64 {
        self.timestamp
    }

    fn metrics(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("download_bps", self.download_bps),
            ("upload_bps", self.upload_bps),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedSample {
    #[serde(default = "now_ms", deserialize_with = "deserialize_timestamp")]
    pub timestamp: u64,
    pub download_kbps: f64,
    pub upload_kbps: f64,
    pub interface_name: String,
}

impl TelemetrySample for SpeedSample {
    const CHANNEL: ChannelKind = ChannelKind::Speed;

    fn is_plausible(&self) -> bool {
        non_negative(self.download_kbps)
            && non_negative(self.upload_kbps)
            && !self.interface_name.trim().is_empty()
    }

    fn timestamp_ms(&self) -> u64 {
        self.timestamp
    }

    fn metrics(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("download_kbps", self.download_kbps),
            ("upload_kbps", self.upload_kbps),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
/// Any telemetry sample, tagged by the channel it belongs to.
pub enum Sample {
    #[serde(rename = "ping")]
    Ping(PingSample),
    Memory(MemorySample),
    Bandwidth(BandwidthSample),
    Speed(SpeedSample),
}

impl Sample {
    pub fn parse(channel: ChannelKind, frame: &Value) -> Option<Self> {
        match channel {
            ChannelKind::Latency => PingSample::validate(frame).map(Self::Ping),
            ChannelKind::Memory => MemorySample::validate(frame).map(Self::Memory),
            ChannelKind::Bandwidth => BandwidthSample::validate(frame).map(Self::Bandwidth),
            ChannelKind::Speed => SpeedSample::validate(frame).map(Self::Speed),
        }
    }

    pub fn channel(&self) -> ChannelKind {
        match self {
            Self::Ping(_) => ChannelKind::Latency,
            Self::Memory(_) => ChannelKind::Memory,
            Self::Bandwidth(_) => ChannelKind::Bandwidth,
            Self::Speed(_) => ChannelKind::Speed,
        }
    }

    pub fn timestamp_ms(&self) -> u64 {
        match self {
            Self::Ping(sample) => sample.timestamp_ms(),
            Self::Memory(sample) => sample.timestamp_ms(),
            Self::Bandwidth(sample) => sample.timestamp_ms(),
            Self::Speed(sample) => sample.timestamp_ms(),
        }
    }

    pub fn metrics(&self) -> Vec<(&'static str, f64)> {
        match self {
            Self::Ping(sample) => sample.metrics(),
            Self::Memory(sample) => sample.metrics(),
            Self::Bandwidth(sample) => sample.metrics(),
            Self::Speed(sample) => sample.metrics(),
        }
    }
}
