//! Telemetry stream manager: a handle plus one driver task per connection.
//!
//! The driver owns the socket, the timers and the frame handler. It feeds
//! socket, timer and command events into [`ConnectionController`] and
//! executes the directives it returns, so every lifecycle decision lives in
//! the transport-free state machine.

use std::{future::Future, pin::Pin, time::Duration};

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{Instant, Sleep},
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        protocol::{frame::coding::CloseCode, CloseFrame},
        Error as WsError, Message,
    },
    MaybeTlsStream, WebSocketStream,
};

use crate::{
    cache::PersistenceCache,
    connection::{
        ConnectionController, ConnectionState, Directive, LifecycleConfig, TimerKind,
        ABNORMAL_CLOSURE, NO_STATUS_CLOSURE,
    },
    endpoint::TelemetryEndpoint,
    error::TelemetryError,
    pipeline::{ChannelConfig, FrameHandler, SamplePipeline, WindowSnapshot},
    sample::TelemetrySample,
};

pub const KEEPALIVE_FRAME: &str = "ping";
const GRACEFUL_CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingOpen = Pin<Box<dyn Future<Output = Result<WsStream, WsError>> + Send>>;
type TimerSlot = Option<Pin<Box<Sleep>>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    pub endpoint: TelemetryEndpoint,
    pub lifecycle: LifecycleConfig,
}

impl StreamConfig {
    pub fn new(endpoint: TelemetryEndpoint) -> Self {
        Self {
            endpoint,
            lifecycle: LifecycleConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamCommand {
    Connect,
    Disconnect,
    Reconnect,
    Shutdown,
}

/// Handle to one managed telemetry connection.
///
/// Dropping the handle aborts the driver task, which drops the socket and
/// every timer with it.
#[derive(Debug)]
pub struct TelemetryStreamManager {
    commands: mpsc::UnboundedSender<StreamCommand>,
    state_rx: watch::Receiver<ConnectionState>,
    task: Option<JoinHandle<()>>,
}

impl TelemetryStreamManager {
    /// Spawns the driver on the current tokio runtime. The connection stays
    /// closed until [`connect`](Self::connect).
    pub fn spawn<H: FrameHandler>(config: StreamConfig, handler: H) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::default());
        let driver = StreamDriver {
            url: config.endpoint.url().to_string(),
            controller: ConnectionController::new(config.lifecycle),
            handler,
            commands: command_rx,
            state_tx,
            pending_open: None,
            socket: None,
            timers: TimerSlots::default(),
        };
        let task = tokio::spawn(driver.run());
        Self {
            commands,
            state_rx,
            task: Some(task),
        }
    }

    /// One channel on its own connection, with its window pre-seeded from `cache`.
    pub fn for_channel<S: TelemetrySample>(
        config: StreamConfig,
        channel: ChannelConfig,
        cache: PersistenceCache,
    ) -> (Self, watch::Receiver<WindowSnapshot<S>>) {
        let pipeline = SamplePipeline::<S>::new(channel, cache);
        let snapshots = pipeline.subscribe();
        (Self::spawn(config, pipeline), snapshots)
    }

    pub fn connect(&self) {
        self.send(StreamCommand::Connect);
    }

    pub fn disconnect(&self) {
        self.send(StreamCommand::Disconnect);
    }

    pub fn reconnect(&self) {
        self.send(StreamCommand::Reconnect);
    }

    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Disconnects and waits for the driver task to finish.
    pub async fn shutdown(mut self) {
        self.send(StreamCommand::Shutdown);
        if let Some(task) = self.task.take() {
            if let Err(error) = task.await {
                tracing::debug!(error = %error, "telemetry driver task ended abnormally");
            }
        }
    }

    fn send(&self, command: StreamCommand) {
        if self.commands.send(command).is_err() {
            tracing::debug!(?command, "telemetry driver already stopped");
        }
    }
}

impl Drop for TelemetryStreamManager {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[derive(Default)]
struct TimerSlots {
    handshake: TimerSlot,
    keepalive: TimerSlot,
    backoff: TimerSlot,
    manual: TimerSlot,
}

impl TimerSlots {
    fn slot_mut(&mut self, timer: TimerKind) -> &mut TimerSlot {
        match timer {
            TimerKind::HandshakeDeadline => &mut self.handshake,
            TimerKind::Keepalive => &mut self.keepalive,
            TimerKind::ReconnectBackoff => &mut self.backoff,
            TimerKind::ManualReconnect => &mut self.manual,
        }
    }
}

enum DriverEvent {
    Command(Option<StreamCommand>),
    Opened(Result<WsStream, WsError>),
    Message(Option<Result<Message, WsError>>),
    Timer(TimerKind),
}

struct StreamDriver<H> {
    url: String,
    controller: ConnectionController,
    handler: H,
    commands: mpsc::UnboundedReceiver<StreamCommand>,
    state_tx: watch::Sender<ConnectionState>,
    pending_open: Option<PendingOpen>,
    socket: Option<WsStream>,
    timers: TimerSlots,
}

impl<H: FrameHandler> StreamDriver<H> {
    async fn run(mut self) {
        loop {
            let event = tokio::select! {
                command = self.commands.recv() => DriverEvent::Command(command),
                opened = finish_open(&mut self.pending_open) => DriverEvent::Opened(opened),
                message = next_message(&mut self.socket) => DriverEvent::Message(message),
                _ = fire(&mut self.timers.handshake) => {
                    DriverEvent::Timer(TimerKind::HandshakeDeadline)
                }
                _ = fire(&mut self.timers.keepalive) => DriverEvent::Timer(TimerKind::Keepalive),
                _ = fire(&mut self.timers.backoff) => {
                    DriverEvent::Timer(TimerKind::ReconnectBackoff)
                }
                _ = fire(&mut self.timers.manual) => DriverEvent::Timer(TimerKind::ManualReconnect),
            };

            let directives = match event {
                DriverEvent::Command(None)
                | DriverEvent::Command(Some(StreamCommand::Shutdown)) => {
                    let directives = self.controller.disconnect();
                    self.execute(directives).await;
                    self.publish_state();
                    break;
                }
                DriverEvent::Command(Some(StreamCommand::Connect)) => self.controller.connect(),
                DriverEvent::Command(Some(StreamCommand::Disconnect)) => {
                    self.controller.disconnect()
                }
                DriverEvent::Command(Some(StreamCommand::Reconnect)) => self.controller.reconnect(),
                DriverEvent::Opened(result) => {
                    self.pending_open = None;
                    match result {
                        Ok(stream) => {
                            tracing::debug!(url = %self.url, "telemetry connection opened");
                            self.socket = Some(stream);
                            self.controller.on_open()
                        }
                        Err(error) => self
                            .controller
                            .on_open_failed(TelemetryError::Transport(error.to_string())),
                    }
                }
                DriverEvent::Message(Some(Ok(message))) => self.on_message(message),
                DriverEvent::Message(Some(Err(error))) => {
                    self.socket = None;
                    self.controller
                        .on_error(TelemetryError::Transport(error.to_string()));
                    self.controller.on_close(ABNORMAL_CLOSURE, "transport error")
                }
                DriverEvent::Message(None) => {
                    self.socket = None;
                    self.controller.on_close(ABNORMAL_CLOSURE, "stream ended")
                }
                DriverEvent::Timer(timer) => {
                    *self.timers.slot_mut(timer) = None;
                    self.controller.on_timer(timer)
                }
            };
            self.execute(directives).await;
            self.publish_state();
        }
        tracing::debug!(url = %self.url, "telemetry driver stopped");
    }

    fn on_message(&mut self, message: Message) -> Vec<Directive> {
        match message {
            Message::Text(text) => {
                self.dispatch_text(text.as_str());
                Vec::new()
            }
            Message::Binary(bytes) => {
                match std::str::from_utf8(&bytes) {
                    Ok(text) => self.dispatch_text(text),
                    Err(error) => {
                        let error =
                            TelemetryError::Protocol(format!("binary frame is not utf-8: {error}"));
                        tracing::debug!(error = %error, "discarded telemetry frame");
                    }
                }
                Vec::new()
            }
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Vec::new(),
            Message::Close(frame) => {
                self.socket = None;
                let (code, reason) = match frame {
                    Some(frame) => (u16::from(frame.code), frame.reason.to_string()),
                    None => (NO_STATUS_CLOSURE, String::new()),
                };
                self.controller.on_close(code, &reason)
            }
        }
    }

    fn dispatch_text(&mut self, text: &str) {
        if is_keepalive_echo(text) {
            return;
        }
        let frame = match serde_json::from_str::<Value>(text) {
            Ok(frame) => frame,
            Err(error) => {
                let error = TelemetryError::Protocol(error.to_string());
                tracing::debug!(error = %error, "discarded non-json telemetry frame");
                return;
            }
        };
        if is_keepalive_json(&frame) {
            return;
        }
        let disposition = self.handler.handle_frame(frame, Instant::now());
        tracing::trace!(?disposition, "handled telemetry frame");
    }

    async fn execute(&mut self, directives: Vec<Directive>) {
        for directive in directives {
            match directive {
                Directive::OpenSocket => {
                    let url = self.url.clone();
                    tracing::debug!(url = %url, "opening telemetry connection");
                    self.pending_open = Some(Box::pin(async move {
                        connect_async(url).await.map(|(stream, _response)| stream)
                    }));
                }
                Directive::CloseSocket { graceful } => {
                    self.pending_open = None;
                    if let Some(socket) = self.socket.take() {
                        if graceful {
                            close_gracefully(socket).await;
                        }
                    }
                }
                Directive::SendKeepalive => {
                    if let Some(socket) = self.socket.as_mut() {
                        if let Err(error) = socket
                            .send(Message::Text(KEEPALIVE_FRAME.to_string().into()))
                            .await
                        {
                            self.controller
                                .on_error(TelemetryError::Transport(error.to_string()));
                        }
                    }
                }
                Directive::ArmTimer { timer, delay } => {
                    *self.timers.slot_mut(timer) = Some(Box::pin(tokio::time::sleep(delay)));
                }
                Directive::CancelTimer(timer) => {
                    *self.timers.slot_mut(timer) = None;
                }
            }
        }
    }

    fn publish_state(&self) {
        let state = self.controller.state();
        self.state_tx.send_if_modified(|current| {
            if *current == *state {
                return false;
            }
            *current = state.clone();
            true
        });
    }
}

async fn close_gracefully(mut socket: WsStream) {
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: "client disconnect".to_string().into(),
    };
    match tokio::time::timeout(GRACEFUL_CLOSE_TIMEOUT, socket.close(Some(frame))).await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => tracing::debug!(error = %error, "telemetry close handshake failed"),
        Err(_) => tracing::debug!("telemetry close handshake timed out"),
    }
}

async fn finish_open(pending: &mut Option<PendingOpen>) -> Result<WsStream, WsError> {
    match pending.as_mut() {
        Some(open) => open.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn next_message(socket: &mut Option<WsStream>) -> Option<Result<Message, WsError>> {
    match socket.as_mut() {
        Some(socket) => socket.next().await,
        None => std::future::pending().await,
    }
}

async fn fire(slot: &mut TimerSlot) {
    match slot.as_mut() {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

fn is_keepalive_echo(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.eq_ignore_ascii_case("ping") || trimmed.eq_ignore_ascii_case("pong")
}

/// A `{"type":"ping"|"pong"}` control frame with no payload beyond an optional timestamp.
fn is_keepalive_json(frame: &Value) -> bool {
    let Some(object) = frame.as_object() else {
        return false;
    };
    let is_control_type = object
        .get("type")
        .and_then(Value::as_str)
        .is_some_and(is_keepalive_echo);
    is_control_type && object.keys().all(|key| key == "type" || key == "timestamp")
}
