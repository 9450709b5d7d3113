//! Reconnecting WebSocket client for the realtime gateway.
//!
//! One `connect` call spawns a driver task that owns the socket for the
//! whole session: it dials, retries with exponential backoff, answers
//! transport pings, requests a sync after a resumed connection and fans
//! received envelopes out to subscribers. The client handle itself is
//! cheap to clone and share.

use crate::error::Error;
use crate::subscription::{Callback, EventKind, Subscribers, Subscription};
use chrono::Utc;
use events::protocol::{ClientMessage, EventEnvelope, ServerMessage, SyncPayload};
use futures_util::future::FutureExt;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use log::*;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Sink = SplitSink<Socket, WsMessage>;

pub const DEFAULT_RECONNECT_MIN: Duration = Duration::from_secs(1);
pub const DEFAULT_RECONNECT_MAX: Duration = Duration::from_secs(30);

/// Events delivered to subscribers: the server's data-bearing messages
/// plus locally synthesized lifecycle notifications.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Sale(EventEnvelope),
    Inventory(EventEnvelope),
    Notification(EventEnvelope),
    ActiveUsers {
        count: u64,
    },
    ConnectionStatus {
        connected: bool,
        reason: Option<String>,
    },
    ConnectionError {
        error: String,
    },
    Reconnecting {
        attempt: u32,
    },
    Reconnected {
        attempts: u32,
    },
}

impl ClientEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ClientEvent::Sale(_) => EventKind::SaleUpdate,
            ClientEvent::Inventory(_) => EventKind::InventoryUpdate,
            ClientEvent::Notification(_) => EventKind::Notification,
            ClientEvent::ActiveUsers { .. } => EventKind::ActiveUsersUpdate,
            ClientEvent::ConnectionStatus { .. } => EventKind::ConnectionStatus,
            ClientEvent::ConnectionError { .. } => EventKind::ConnectionError,
            ClientEvent::Reconnecting { .. } => EventKind::Reconnecting,
            ClientEvent::Reconnected { .. } => EventKind::Reconnected,
        }
    }

    /// The wrapped envelope for the data-bearing variants.
    pub fn envelope(&self) -> Option<&EventEnvelope> {
        match self {
            ClientEvent::Sale(envelope)
            | ClientEvent::Inventory(envelope)
            | ClientEvent::Notification(envelope) => Some(envelope),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Point-in-time view of the session.
#[derive(Debug, Clone)]
pub struct ClientStatus {
    pub state: ConnectionState,
    pub reconnect_attempts: u32,
    pub last_event_id: Option<String>,
}

impl Default for ClientStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            reconnect_attempts: 0,
            last_event_id: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Gateway endpoint, e.g. `ws://localhost:4000/ws`.
    pub url: String,
    pub reconnect_min: Duration,
    pub reconnect_max: Duration,
}

impl ClientOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_min: DEFAULT_RECONNECT_MIN,
            reconnect_max: DEFAULT_RECONNECT_MAX,
        }
    }
}

#[derive(Default)]
struct Shared {
    status: Mutex<ClientStatus>,
    outbound: Mutex<Option<mpsc::UnboundedSender<ClientMessage>>>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
}

#[derive(Clone)]
pub struct RealtimeClient {
    options: ClientOptions,
    pub(crate) subscribers: Subscribers,
    shared: Arc<Shared>,
}

impl RealtimeClient {
    pub fn new(options: ClientOptions) -> Self {
        Self {
            options,
            subscribers: Subscribers::new(),
            shared: Arc::new(Shared::default()),
        }
    }

    /// Registers a subscriber for one event kind. The registration lives
    /// until the returned handle is dropped, `unsubscribe` is called, or
    /// the client disconnects.
    pub fn on<F>(&self, kind: EventKind, callback: F) -> Subscription
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.subscribers.subscribe(kind, Arc::new(callback))
    }

    /// Like [`RealtimeClient::on`] but takes an already shared callback,
    /// so the same `Arc` can be registered for several kinds (or
    /// re-registered without duplication).
    pub fn on_shared(&self, kind: EventKind, callback: Callback) -> Subscription {
        self.subscribers.subscribe(kind, callback)
    }

    /// Starts the session. The token travels in the handshake query
    /// string, never as a post-connect message. Calling `connect` while a
    /// session is already running is a warned no-op.
    pub fn connect(&self, token: &str) -> Result<(), Error> {
        let token = token.trim();
        if token.is_empty() {
            return Err(Error::MissingCredential);
        }

        {
            let mut status = crate::lock(&self.shared.status);
            if status.state != ConnectionState::Disconnected {
                warn!("connect() called while a session is active; ignoring");
                return Ok(());
            }
            status.state = ConnectionState::Connecting;
            status.reconnect_attempts = 0;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *crate::lock(&self.shared.shutdown) = Some(shutdown_tx);

        let driver = Driver {
            options: self.options.clone(),
            subscribers: self.subscribers.clone(),
            shared: self.shared.clone(),
            url: format!("{}?token={}", self.options.url, token),
            shutdown: shutdown_rx,
        };
        tokio::spawn(driver.run());
        Ok(())
    }

    /// Tears the session down: closes the socket, drops every subscriber
    /// registration and forgets the replay cursor. Safe to call when
    /// already disconnected.
    pub fn disconnect(&self) {
        if let Some(shutdown) = crate::lock(&self.shared.shutdown).take() {
            let _ = shutdown.send(true);
        }
        *crate::lock(&self.shared.outbound) = None;
        self.subscribers.clear();

        let mut status = crate::lock(&self.shared.status);
        status.state = ConnectionState::Disconnected;
        status.reconnect_attempts = 0;
        status.last_event_id = None;
    }

    pub fn join_room(&self, room: impl Into<String>) {
        self.send(ClientMessage::JoinRoom { room: room.into() });
    }

    pub fn leave_room(&self, room: impl Into<String>) {
        self.send(ClientMessage::LeaveRoom { room: room.into() });
    }

    /// Application-level ping; the server answers with a `pong` message.
    pub fn ping(&self) {
        self.send(ClientMessage::Ping);
    }

    /// Asks the server to replay everything after the last seen event.
    pub fn request_sync(&self) {
        let last_event_id = crate::lock(&self.shared.status).last_event_id.clone();
        self.send(ClientMessage::RequestSync {
            last_event_id,
            last_update: Utc::now(),
        });
    }

    pub fn status(&self) -> ClientStatus {
        crate::lock(&self.shared.status).clone()
    }

    pub fn is_connected(&self) -> bool {
        self.status().state == ConnectionState::Connected
    }

    pub fn is_reconnecting(&self) -> bool {
        self.status().state == ConnectionState::Reconnecting
    }

    /// Queues a message for the driver. Silently dropped while no socket
    /// is up; room membership is server-side state, so callers re-join
    /// after a reconnect.
    fn send(&self, message: ClientMessage) {
        let outbound = crate::lock(&self.shared.outbound);
        match outbound.as_ref() {
            Some(tx) => {
                if tx.send(message).is_err() {
                    debug!("Driver gone; dropping outbound message");
                }
            }
            None => debug!("Not connected; dropping outbound message"),
        }
    }

    #[cfg(test)]
    pub(crate) fn dispatch_for_test(&self, event: &ClientEvent) {
        self.subscribers.dispatch(event);
    }

    #[cfg(test)]
    pub(crate) fn set_state_for_test(&self, state: ConnectionState) {
        crate::lock(&self.shared.status).state = state;
    }

    #[cfg(test)]
    pub(crate) fn has_shutdown_handle(&self) -> bool {
        crate::lock(&self.shared.shutdown).is_some()
    }
}

enum PumpEnd {
    Shutdown,
    Dropped(String),
}

enum Flow {
    Continue,
    Ended(String),
}

struct Driver {
    options: ClientOptions,
    subscribers: Subscribers,
    shared: Arc<Shared>,
    url: String,
    shutdown: watch::Receiver<bool>,
}

impl Driver {
    async fn run(mut self) {
        let mut attempt: u32 = 0;
        let mut ever_connected = false;

        loop {
            if *self.shutdown.borrow() {
                return;
            }

            // Pre-connection failures keep the state at Connecting; only a
            // previously established session reports Reconnecting.
            if ever_connected && attempt > 0 {
                self.set_state(ConnectionState::Reconnecting, attempt);
                self.subscribers
                    .dispatch(&ClientEvent::Reconnecting { attempt });
            }

            match connect_async(self.url.as_str()).await {
                Ok((socket, _response)) => {
                    // disconnect() may have landed while the dial was in
                    // flight; the session must not resurrect as Connected.
                    if *self.shutdown.borrow() {
                        return;
                    }

                    let resumed = ever_connected;
                    let attempts_used = attempt;
                    ever_connected = true;
                    attempt = 0;

                    self.set_state(ConnectionState::Connected, 0);
                    info!("Realtime connection established");
                    self.subscribers.dispatch(&ClientEvent::ConnectionStatus {
                        connected: true,
                        reason: None,
                    });
                    if resumed {
                        self.subscribers.dispatch(&ClientEvent::Reconnected {
                            attempts: attempts_used,
                        });
                    }

                    let (tx, rx) = mpsc::unbounded_channel();
                    if resumed {
                        if let Some(last_event_id) = self.last_event_id() {
                            // Catch up on whatever we missed while away.
                            let _ = tx.send(ClientMessage::RequestSync {
                                last_event_id: Some(last_event_id),
                                last_update: Utc::now(),
                            });
                        }
                    }
                    *crate::lock(&self.shared.outbound) = Some(tx);

                    let outcome = self.pump(socket, rx).await;
                    *crate::lock(&self.shared.outbound) = None;

                    match outcome {
                        PumpEnd::Shutdown => {
                            self.set_state(ConnectionState::Disconnected, 0);
                            return;
                        }
                        PumpEnd::Dropped(reason) => {
                            warn!("Realtime connection lost: {reason}");
                            self.subscribers.dispatch(&ClientEvent::ConnectionStatus {
                                connected: false,
                                reason: Some(reason),
                            });
                        }
                    }
                }
                Err(e) => {
                    debug!("Realtime connect attempt failed: {e}");
                    self.subscribers.dispatch(&ClientEvent::ConnectionError {
                        error: e.to_string(),
                    });
                }
            }

            attempt = attempt.saturating_add(1);
            let delay = backoff_delay(
                self.options.reconnect_min,
                self.options.reconnect_max,
                attempt,
            );
            let mut shutdown = self.shutdown.clone();
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Owns one live socket: pumps queued outbound messages, ingests
    /// inbound frames (batching whatever is already buffered so a burst is
    /// reordered as a unit) and reacts to shutdown.
    async fn pump(&self, socket: Socket, mut rx: mpsc::UnboundedReceiver<ClientMessage>) -> PumpEnd {
        let (mut sink, mut read) = socket.split();
        let mut shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        let _ = sink.send(WsMessage::Close(None)).await;
                        return PumpEnd::Shutdown;
                    }
                }

                outbound = rx.recv() => match outbound {
                    Some(message) => match serde_json::to_string(&message) {
                        Ok(text) => {
                            if let Err(e) = sink.send(WsMessage::Text(text)).await {
                                return PumpEnd::Dropped(e.to_string());
                            }
                        }
                        Err(e) => error!("Failed to serialize outbound message: {e}"),
                    },
                    None => return PumpEnd::Dropped("outbound channel closed".to_string()),
                },

                frame = read.next() => {
                    let mut batch = Vec::new();
                    let mut flow = self.ingest(frame, &mut batch, &mut sink).await;
                    // Frames already buffered on the stream arrived together;
                    // slurp them so the whole burst is ordered as one unit.
                    while matches!(flow, Flow::Continue) {
                        match read.next().now_or_never() {
                            Some(pending) => {
                                flow = self.ingest(pending, &mut batch, &mut sink).await;
                            }
                            None => break,
                        }
                    }
                    self.drain(&mut batch);
                    if let Flow::Ended(reason) = flow {
                        return PumpEnd::Dropped(reason);
                    }
                }
            }
        }
    }

    async fn ingest(
        &self,
        frame: Option<Result<WsMessage, tokio_tungstenite::tungstenite::Error>>,
        batch: &mut Vec<ClientEvent>,
        sink: &mut Sink,
    ) -> Flow {
        match frame {
            Some(Ok(WsMessage::Text(text))) => {
                self.handle_text(&text, batch);
                Flow::Continue
            }
            Some(Ok(WsMessage::Ping(payload))) => {
                let _ = sink.send(WsMessage::Pong(payload)).await;
                Flow::Continue
            }
            Some(Ok(WsMessage::Close(_))) => Flow::Ended("closed by server".to_string()),
            Some(Ok(_)) => Flow::Continue,
            Some(Err(e)) => Flow::Ended(e.to_string()),
            None => Flow::Ended("stream ended".to_string()),
        }
    }

    fn handle_text(&self, text: &str, batch: &mut Vec<ClientEvent>) {
        match serde_json::from_str::<ServerMessage>(text) {
            Ok(ServerMessage::Connected { user_id, .. }) => {
                debug!("Server acknowledged session for {user_id}");
            }
            Ok(ServerMessage::Pong { .. }) => trace!("Application pong received"),
            Ok(ServerMessage::SaleUpdate(envelope)) => batch.push(ClientEvent::Sale(envelope)),
            Ok(ServerMessage::InventoryUpdate(envelope)) => {
                batch.push(ClientEvent::Inventory(envelope));
            }
            Ok(ServerMessage::Notification(envelope)) => {
                batch.push(ClientEvent::Notification(envelope));
            }
            Ok(ServerMessage::ActiveUsersUpdate { count }) => {
                self.subscribers.dispatch(&ClientEvent::ActiveUsers { count });
            }
            Ok(ServerMessage::SyncData(payload)) => self.replay(payload, batch),
            Ok(ServerMessage::SyncError { message }) => {
                // No automatic retry; the consumer can call request_sync.
                warn!("Sync failed server-side: {message}");
            }
            Err(e) => warn!("Discarding unparseable server frame: {e}"),
        }
    }

    /// Replayed envelopes flow through the same batch path as live ones,
    /// so ordering and cursor advancement behave identically.
    fn replay(&self, payload: SyncPayload, batch: &mut Vec<ClientEvent>) {
        batch.extend(payload.sales.into_iter().map(ClientEvent::Sale));
        batch.extend(
            payload
                .inventory_updates
                .into_iter()
                .map(ClientEvent::Inventory),
        );
        batch.extend(
            payload
                .notifications
                .into_iter()
                .map(ClientEvent::Notification),
        );
    }

    fn drain(&self, batch: &mut Vec<ClientEvent>) {
        order_batch(batch);
        for event in batch.drain(..) {
            if let Some(envelope) = event.envelope() {
                crate::lock(&self.shared.status).last_event_id = Some(envelope.event_id.clone());
            }
            self.subscribers.dispatch(&event);
        }
    }

    fn set_state(&self, state: ConnectionState, attempts: u32) {
        let mut status = crate::lock(&self.shared.status);
        status.state = state;
        status.reconnect_attempts = attempts;
    }

    fn last_event_id(&self) -> Option<String> {
        crate::lock(&self.shared.status).last_event_id.clone()
    }
}

/// Orders a received burst by server timestamp, breaking ties with the
/// hub's per-process sequence number. Lifecycle events carry no envelope
/// and sort ahead unchanged (the sort is stable).
fn order_batch(batch: &mut [ClientEvent]) {
    batch.sort_by(|a, b| {
        let key = |event: &ClientEvent| event.envelope().map(|e| (e.timestamp, e.seq));
        key(a).cmp(&key(b))
    });
}

/// Exponential backoff: `min * 2^(attempt-1)`, capped at `max`.
fn backoff_delay(min: Duration, max: Duration, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(16);
    min.saturating_mul(1u32 << shift).min(max)
}
