//! Connection lifecycle state machine.
//!
//! `ConnectionController` is transport-free: every event returns the
//! `Directive`s the driver must execute (open/close the socket, arm/cancel
//! timers). It also mirrors which timers are armed and whether a socket handle
//! is live, so teardown guarantees can be checked without a network.

use std::{collections::BTreeSet, time::Duration};

use serde::Serialize;

use crate::{backoff::ReconnectPolicy, error::TelemetryError};

pub const NORMAL_CLOSURE: u16 = 1000;
pub const NO_STATUS_CLOSURE: u16 = 1005;
pub const ABNORMAL_CLOSURE: u16 = 1006;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    AwaitingManualReconnect,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::AwaitingManualReconnect => "awaiting-manual-reconnect",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub reconnect_attempts: u32,
    pub last_error: Option<TelemetryError>,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            reconnect_attempts: 0,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKind {
    HandshakeDeadline,
    Keepalive,
    ReconnectBackoff,
    ManualReconnect,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    OpenSocket,
    /// Drop the socket; `graceful` sends a normal close frame first.
    CloseSocket { graceful: bool },
    SendKeepalive,
    ArmTimer { timer: TimerKind, delay: Duration },
    CancelTimer(TimerKind),
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Timing and retry knobs for one managed connection.
pub struct LifecycleConfig {
    pub reconnect: ReconnectPolicy,
    pub handshake_timeout: Duration,
    pub keepalive_interval: Duration,
    pub manual_reconnect_delay: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            handshake_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(30),
            manual_reconnect_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SocketPhase {
    Idle,
    Opening,
    Open,
}

#[derive(Debug, Clone)]
pub struct ConnectionController {
    config: LifecycleConfig,
    state: ConnectionState,
    armed: BTreeSet<TimerKind>,
    socket: SocketPhase,
}

impl ConnectionController {
    pub fn new(config: LifecycleConfig) -> Self {
        Self {
            config,
            state: ConnectionState::default(),
            armed: BTreeSet::new(),
            socket: SocketPhase::Idle,
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn pending_timers(&self) -> Vec<TimerKind> {
        self.armed.iter().copied().collect()
    }

    pub fn has_live_connection(&self) -> bool {
        self.socket != SocketPhase::Idle
    }

    pub fn connect(&mut self) -> Vec<Directive> {
        match self.state.status {
            ConnectionStatus::Connecting | ConnectionStatus::Connected => return Vec::new(),
            ConnectionStatus::AwaitingManualReconnect => {
                tracing::debug!("connect ignored while awaiting manual reconnect");
                return Vec::new();
            }
            ConnectionStatus::Disconnected | ConnectionStatus::Reconnecting => {}
        }
        let mut directives = Vec::new();
        self.cancel(TimerKind::ReconnectBackoff, &mut directives);
        self.cancel(TimerKind::ManualReconnect, &mut directives);
        if self.socket != SocketPhase::Idle {
            directives.push(Directive::CloseSocket { graceful: false });
        }
        self.state.status = ConnectionStatus::Connecting;
        self.socket = SocketPhase::Opening;
        directives.push(Directive::OpenSocket);
        self.arm(
            TimerKind::HandshakeDeadline,
            self.config.handshake_timeout,
            &mut directives,
        );
        directives
    }

    pub fn on_open(&mut self) -> Vec<Directive> {
        if self.socket != SocketPhase::Opening {
            return Vec::new();
        }
        let mut directives = Vec::new();
        self.socket = SocketPhase::Open;
        self.state.status = ConnectionStatus::Connected;
        self.state.reconnect_attempts = 0;
        self.state.last_error = None;
        self.cancel(TimerKind::HandshakeDeadline, &mut directives);
        self.arm(
            TimerKind::Keepalive,
            self.config.keepalive_interval,
            &mut directives,
        );
        directives
    }

    /// A failed handshake behaves like an abnormal close.
    pub fn on_open_failed(&mut self, error: TelemetryError) -> Vec<Directive> {
        if self.socket != SocketPhase::Opening {
            return Vec::new();
        }
        self.state.last_error = Some(error);
        self.on_close(ABNORMAL_CLOSURE, "handshake failed")
    }

    pub fn on_close(&mut self, code: u16, reason: &str) -> Vec<Directive> {
        if self.socket == SocketPhase::Idle {
            return Vec::new();
        }
        let mut directives = Vec::new();
        self.socket = SocketPhase::Idle;
        self.cancel(TimerKind::HandshakeDeadline, &mut directives);
        self.cancel(TimerKind::Keepalive, &mut directives);
        self.state.status = ConnectionStatus::Disconnected;
        tracing::debug!(code, reason, "telemetry connection closed");
        if code == NORMAL_CLOSURE {
            return directives;
        }
        self.schedule_reconnect(&mut directives);
        directives
    }

    /// Non-fatal; the close that follows drives the transition.
    pub fn on_error(&mut self, error: TelemetryError) {
        tracing::debug!(error = %error, "telemetry connection error");
        self.state.last_error = Some(error);
    }

    pub fn on_timer(&mut self, timer: TimerKind) -> Vec<Directive> {
        if !self.armed.remove(&timer) {
            return Vec::new();
        }
        match timer {
            TimerKind::HandshakeDeadline => {
                let mut directives = vec![Directive::CloseSocket { graceful: false }];
                self.state.last_error = Some(TelemetryError::HandshakeTimeout {
                    seconds: self.config.handshake_timeout.as_secs(),
                });
                directives.extend(self.on_close(ABNORMAL_CLOSURE, "handshake timed out"));
                directives
            }
            TimerKind::Keepalive => {
                if self.socket != SocketPhase::Open {
                    return Vec::new();
                }
                let mut directives = vec![Directive::SendKeepalive];
                self.arm(
                    TimerKind::Keepalive,
                    self.config.keepalive_interval,
                    &mut directives,
                );
                directives
            }
            TimerKind::ReconnectBackoff => self.connect(),
            TimerKind::ManualReconnect => {
                self.state.reconnect_attempts = 0;
                self.state.status = ConnectionStatus::Disconnected;
                self.connect()
            }
        }
    }

    /// Tears everything down and leaves nothing scheduled.
    pub fn disconnect(&mut self) -> Vec<Directive> {
        let directives = self.teardown();
        self.state.status = ConnectionStatus::Disconnected;
        directives
    }

    /// Manual retry: teardown, short pause, then a fresh attempt budget.
    pub fn reconnect(&mut self) -> Vec<Directive> {
        let mut directives = self.teardown();
        self.state.status = ConnectionStatus::Reconnecting;
        self.arm(
            TimerKind::ManualReconnect,
            self.config.manual_reconnect_delay,
            &mut directives,
        );
        directives
    }

    fn teardown(&mut self) -> Vec<Directive> {
        let mut directives = self
            .armed
            .iter()
            .copied()
            .map(Directive::CancelTimer)
            .collect::<Vec<_>>();
        self.armed.clear();
        if self.socket != SocketPhase::Idle {
            directives.push(Directive::CloseSocket {
                graceful: self.socket == SocketPhase::Open,
            });
            self.socket = SocketPhase::Idle;
        }
        directives
    }

    fn schedule_reconnect(&mut self, directives: &mut Vec<Directive>) {
        let policy = &self.config.reconnect;
        if !policy.auto_reconnect {
            return;
        }
        let attempts = self.state.reconnect_attempts;
        if policy.allows_attempt(attempts) {
            let delay = policy.delay_for_attempt(attempts);
            self.state.reconnect_attempts = attempts.saturating_add(1);
            self.state.status = ConnectionStatus::Reconnecting;
            tracing::debug!(
                attempt = self.state.reconnect_attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "scheduling telemetry reconnect"
            );
            self.arm(TimerKind::ReconnectBackoff, delay, directives);
            return;
        }
        tracing::warn!(attempts, "telemetry reconnect attempts exhausted");
        self.state.status = ConnectionStatus::AwaitingManualReconnect;
        self.state.last_error = Some(TelemetryError::ReconnectExhausted { attempts });
    }

    fn arm(&mut self, timer: TimerKind, delay: Duration, directives: &mut Vec<Directive>) {
        self.armed.insert(timer);
        directives.push(Directive::ArmTimer { timer, delay });
    }

    fn cancel(&mut self, timer: TimerKind, directives: &mut Vec<Directive>) {
        if self.armed.remove(&timer) {
            directives.push(Directive::CancelTimer(timer));
        }
    }
}
