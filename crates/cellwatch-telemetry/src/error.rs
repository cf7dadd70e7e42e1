use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
/// Enumerates supported `TelemetryError` values.
pub enum TelemetryError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("connection was not established within {seconds}s")]
    HandshakeTimeout { seconds: u64 },
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("gave up after {attempts} reconnect attempts; manual reconnect required")]
    ReconnectExhausted { attempts: u32 },
}

impl TelemetryError {
    /// Only attempt exhaustion needs a human to recover.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ReconnectExhausted { .. })
    }
}
