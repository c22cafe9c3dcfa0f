//! WebSocket link to the relay controller.
//!
//! Drives the pure [`ConnectionState`] machine from `relaymesh-core` and
//! performs the I/O its actions ask for: opening the socket, the heartbeat
//! ping, reconnect timers and fan-out to subscribers. Every timer runs in its
//! own task guarded by a [`CancellationToken`].

use super::{EventHandler, Subscribers, Transport, TransportError, TransportEvent};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use mesh_core::{Action, ConnectionState, Event, LinkEvent, LinkStatus, ReconnectPolicy};
use mesh_types::{Command, Inbound, Outbound};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport with heartbeat and linear reconnect backoff.
pub struct WsTransport {
    inner: Arc<Inner>,
}

struct Inner {
    url: String,
    policy: ReconnectPolicy,
    state: Mutex<ConnectionState>,
    subscribers: Subscribers,
    writer: tokio::sync::Mutex<Option<SplitSink<WsStream, Message>>>,
    timers: Mutex<Timers>,
    last_error: Mutex<Option<String>>,
}

#[derive(Clone, Copy)]
enum Timer {
    Socket,
    Heartbeat,
    Reconnect,
}

#[derive(Default)]
struct Timers {
    socket: Option<CancellationToken>,
    heartbeat: Option<CancellationToken>,
    reconnect: Option<CancellationToken>,
}

impl Timers {
    fn slot(&mut self, which: Timer) -> &mut Option<CancellationToken> {
        match which {
            Timer::Socket => &mut self.socket,
            Timer::Heartbeat => &mut self.heartbeat,
            Timer::Reconnect => &mut self.reconnect,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl WsTransport {
    /// Create a transport for `url` (e.g. `ws://192.168.4.1:81/ws`).
    ///
    /// Nothing happens until [`Transport::connect`] is called.
    pub fn new(url: impl Into<String>, policy: ReconnectPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                url: url.into(),
                policy,
                state: Mutex::new(ConnectionState::new()),
                subscribers: Subscribers::default(),
                writer: tokio::sync::Mutex::new(None),
                timers: Mutex::new(Timers::default()),
                last_error: Mutex::new(None),
            }),
        }
    }

    /// Endpoint this transport connects to.
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Internal connection state, mostly for diagnostics.
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.state()
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        for which in [Timer::Socket, Timer::Heartbeat, Timer::Reconnect] {
            self.inner.disarm(which);
        }
    }
}

impl Inner {
    fn state(&self) -> ConnectionState {
        lock(&self.state).clone()
    }

    fn step(&self, event: Event) -> Vec<Action> {
        let mut state = lock(&self.state);
        let (next, actions) = state.clone().on_event(event, &self.policy);
        *state = next;
        actions
    }

    fn arm(&self, which: Timer) -> CancellationToken {
        let token = CancellationToken::new();
        let previous = lock(&self.timers).slot(which).replace(token.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }
        token
    }

    fn disarm(&self, which: Timer) {
        let previous = lock(&self.timers).slot(which).take();
        if let Some(previous) = previous {
            previous.cancel();
        }
    }

    /// Feed one event to the state machine and carry out everything it asks for.
    async fn dispatch(self: &Arc<Self>, event: Event) {
        let mut pending: VecDeque<Action> = self.step(event).into();
        while let Some(action) = pending.pop_front() {
            match action {
                Action::OpenSocket => {
                    let follow = match self.open().await {
                        Ok(()) => Event::Opened,
                        Err(reason) => {
                            *lock(&self.last_error) = Some(reason.clone());
                            Event::Closed { reason }
                        }
                    };
                    let opened = matches!(follow, Event::Opened);
                    pending.extend(self.step(follow));
                    // A disconnect raced the open
                    if opened && !self.state().is_connected() {
                        self.close_socket().await;
                    }
                }
                Action::CloseSocket => self.close_socket().await,
                Action::StartHeartbeat { interval } => self.start_heartbeat(interval),
                Action::StopHeartbeat => self.disarm(Timer::Heartbeat),
                Action::ScheduleReconnect {
                    attempt,
                    delay,
                    reason,
                } => {
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        %reason,
                        "link down, scheduling reconnect"
                    );
                    self.schedule_reconnect(delay);
                }
                Action::CancelReconnect => self.disarm(Timer::Reconnect),
                Action::Emit(LinkEvent::StatusChanged(status)) => {
                    info!(url = %self.url, %status, "link status changed");
                    self.subscribers
                        .emit(&TransportEvent::StatusChanged(status));
                }
                Action::Emit(LinkEvent::ConnectionFailed { attempts, reason }) => {
                    error!(url = %self.url, attempts, %reason, "giving up on controller link");
                    self.subscribers
                        .emit(&TransportEvent::ConnectionFailed { attempts, reason });
                }
            }
        }
    }

    async fn open(self: &Arc<Self>) -> Result<(), String> {
        debug!(url = %self.url, "opening websocket");
        let (stream, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| e.to_string())?;
        let (sink, source) = stream.split();
        *self.writer.lock().await = Some(sink);
        let token = self.arm(Timer::Socket);
        self.spawn_reader(source, token);
        Ok(())
    }

    async fn close_socket(&self) {
        self.disarm(Timer::Socket);
        let sink = self.writer.lock().await.take();
        if let Some(mut sink) = sink {
            if let Err(e) = sink.close().await {
                debug!(error = %e, "error while closing websocket");
            }
        }
    }

    fn spawn_reader(self: &Arc<Self>, mut source: SplitStream<WsStream>, token: CancellationToken) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let reason = loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    frame = source.next() => match frame {
                        Some(Ok(Message::Text(text))) => inner.deliver(&text),
                        Some(Ok(Message::Close(frame))) => {
                            break frame
                                .map(|f| f.reason.to_string())
                                .filter(|r| !r.is_empty())
                                .unwrap_or_else(|| "closed by controller".to_string());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => break e.to_string(),
                        None => break "stream ended".to_string(),
                    }
                }
            };
            // close() got here first
            if token.is_cancelled() {
                return;
            }
            token.cancel();
            inner.writer.lock().await.take();
            inner.dispatch(Event::Closed { reason }).await;
        });
    }

    fn deliver(&self, text: &str) {
        match Inbound::from_json(text) {
            Ok(message) => {
                debug!(msg_type = message.message_type(), "inbound message");
                self.subscribers.emit(&TransportEvent::Message(message));
            }
            Err(e) => warn!(error = %e, "dropping unparseable frame"),
        }
    }

    fn start_heartbeat(self: &Arc<Self>, interval: Duration) {
        let token = self.arm(Timer::Heartbeat);
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = inner.write(&Outbound::local(Command::Heartbeat)).await {
                            debug!(error = %e, "heartbeat not sent");
                        }
                    }
                }
            }
        });
    }

    fn schedule_reconnect(self: &Arc<Self>, delay: Duration) {
        let token = self.arm(Timer::Reconnect);
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => inner.dispatch(Event::ReconnectTimer).await,
            }
        });
    }

    async fn write(&self, message: &Outbound) -> Result<(), TransportError> {
        let text = message.to_json()?;
        let mut writer = self.writer.lock().await;
        match writer.as_mut() {
            Some(sink) => sink
                .send(Message::Text(text))
                .await
                .map_err(|e| TransportError::SendFailed(e.to_string())),
            None => Err(TransportError::NotConnected),
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        self.inner.dispatch(Event::ConnectRequested).await;
        match self.inner.state() {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Failed { attempts } => {
                Err(TransportError::RetriesExhausted { attempts })
            }
            _ => Err(TransportError::ConnectionFailed(
                lock(&self.inner.last_error)
                    .clone()
                    .unwrap_or_else(|| "connection not established".to_string()),
            )),
        }
    }

    async fn send(&self, message: Outbound) -> Result<(), TransportError> {
        if !self.inner.state().is_connected() {
            return Err(TransportError::NotConnected);
        }
        debug!(
            msg_type = message.command.message_type(),
            target = %message.target(),
            "sending command"
        );
        self.inner.write(&message).await
    }

    fn on_event(&self, handler: EventHandler) {
        self.inner.subscribers.add(handler);
    }

    fn status(&self) -> LinkStatus {
        self.inner.state().status()
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.inner.dispatch(Event::DisconnectRequested).await;
        Ok(())
    }
}
