//! Venue connection: one background tokio task per venue.
//!
//! - Connect with timeout through a [`Connector`]
//! - Auth frame, resubscribe and replay flush right after every handshake
//! - Application-level heartbeat with an ack deadline
//! - Exponential backoff reconnection, `Failed` after the configured ceiling
//! - Bounded replay queue for outbound messages while not connected
//! - State/health snapshots over `watch`, lifecycle events over `broadcast`

use std::future::Future;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::ConnectionError;
use crate::router::MessageRouter;
use crate::shared::{Channel, VenueId};
use crate::ws::replay::ReplayQueue;
use crate::ws::subscriptions::{SubscribeParams, SubscriptionSet};
use crate::ws::transport::{Connector, CredentialsProvider, Frame, FrameSink, FrameStream};
use crate::ws::{
    ConnectionConfig, ConnectionEvent, ConnectionHealth, ConnectionState, ConnectionStatus,
    MessageOut, RawEnvelope, AUTH_FAILED_CODE,
};

const COMMAND_BUFFER: usize = 1024;

// ─── Commands from the handle to the task ────────────────────────────────────

enum Command {
    Send(MessageOut),
    Reconnect,
    Disconnect,
}

/// How a connected session ended.
enum Exit {
    UserRequested,
    /// Caller asked for a fresh connection.
    Restart,
    Lost(ConnectionError),
    Fatal(ConnectionError),
}

/// Result of waiting on something while still serving commands.
enum Interrupt<T> {
    Done(T),
    Reconnect,
    Disconnect,
}

// ─── Background task state ───────────────────────────────────────────────────

struct TaskState {
    venue: VenueId,
    url: String,
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    credentials: Option<Arc<dyn CredentialsProvider>>,
    router: MessageRouter,
    cmd_rx: mpsc::Receiver<Command>,
    event_tx: broadcast::Sender<ConnectionEvent>,
    status_tx: watch::Sender<ConnectionStatus>,
    health_tx: watch::Sender<ConnectionHealth>,
    subscriptions: SubscriptionSet,
    replay: ReplayQueue,
    attempt: u32,
    auth_failures: u32,
    nonce: u64,
}

impl TaskState {
    fn emit(&self, event: ConnectionEvent) {
        // No observers is fine; the status watch still carries the state.
        let _ = self.event_tx.send(event);
    }

    fn set_state(&self, next: ConnectionState, error: Option<ConnectionError>) {
        let venue = &self.venue;
        self.status_tx.send_modify(|status| {
            if status.state != next {
                tracing::info!(venue = %venue, from = ?status.state, to = ?next, "Connection state changed");
            }
            status.state = next;
            if error.is_some() || next == ConnectionState::Connected {
                status.last_error = error;
            }
        });
    }

    /// Record an outbound message while not connected. Venue subscriptions
    /// are tracked for resubscribe; heartbeat and auth are regenerated.
    fn enqueue(&mut self, msg: MessageOut) {
        match msg {
            MessageOut::Subscribe { params } => {
                self.subscriptions.add(&params);
            }
            MessageOut::Unsubscribe { params } => {
                self.subscriptions.remove(&params);
            }
            MessageOut::Auth { .. } | MessageOut::Heartbeat { .. } => {}
            publish @ MessageOut::Publish { .. } => {
                if let Some(dropped_total) = self.replay.push(publish) {
                    self.emit(ConnectionEvent::ReplayOverflow { dropped_total });
                }
            }
        }
    }

    fn track(&mut self, msg: &MessageOut) {
        match msg {
            MessageOut::Subscribe { params } => {
                self.subscriptions.add(params);
            }
            MessageOut::Unsubscribe { params } => {
                self.subscriptions.remove(params);
            }
            _ => {}
        }
    }

    /// Await `fut`, queueing sends that arrive meanwhile.
    async fn drive<F: Future>(&mut self, fut: F) -> Interrupt<F::Output> {
        tokio::pin!(fut);
        loop {
            tokio::select! {
                out = &mut fut => return Interrupt::Done(out),
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Send(msg)) => self.enqueue(msg),
                    Some(Command::Reconnect) => return Interrupt::Reconnect,
                    Some(Command::Disconnect) | None => return Interrupt::Disconnect,
                },
            }
        }
    }

    /// Back off and decide whether to try again. Returns `false` when the
    /// task should stop.
    async fn recover(&mut self, error: ConnectionError) -> bool {
        if self.attempt >= self.config.max_reconnect_attempts {
            let reason = format!(
                "gave up after {} reconnect attempts, last error: {}",
                self.attempt, error
            );
            return self.fail(ConnectionError::Failed { reason }).await;
        }

        let delay = self.config.reconnect.delay_for_attempt(self.attempt);
        self.attempt += 1;
        let delay_ms = delay.as_millis() as u64;

        tracing::info!(
            venue = %self.venue,
            attempt = self.attempt,
            max_attempts = self.config.max_reconnect_attempts,
            delay_ms,
            error = %error,
            "Reconnect scheduled"
        );
        self.set_state(ConnectionState::Reconnecting, Some(error));
        self.emit(ConnectionEvent::Reconnecting {
            attempt: self.attempt,
            delay_ms,
        });

        match self.drive(tokio::time::sleep(delay)).await {
            Interrupt::Done(()) => true,
            Interrupt::Reconnect => {
                self.attempt = 0;
                true
            }
            Interrupt::Disconnect => false,
        }
    }

    /// Enter `Failed` and park until the caller intervenes.
    async fn fail(&mut self, error: ConnectionError) -> bool {
        let reason = match &error {
            ConnectionError::Failed { reason } => reason.clone(),
            other => other.to_string(),
        };
        tracing::error!(venue = %self.venue, %reason, "Connection failed");
        self.set_state(ConnectionState::Failed, Some(error));
        self.emit(ConnectionEvent::Failed { reason });

        loop {
            match self.cmd_rx.recv().await {
                Some(Command::Send(msg)) => self.enqueue(msg),
                Some(Command::Reconnect) => {
                    tracing::info!(venue = %self.venue, "Reconnect requested after failure");
                    self.attempt = 0;
                    self.auth_failures = 0;
                    return true;
                }
                Some(Command::Disconnect) | None => return false,
            }
        }
    }

    /// Auth, resubscribe, then flush the replay queue in order.
    async fn on_open(&mut self, sink: &mut FrameSink) -> Result<(), ConnectionError> {
        if let Some(token) = self.credentials.as_ref().and_then(|c| c.token()) {
            send_msg(sink, &MessageOut::Auth { token }).await?;
        }

        let subs: Vec<SubscribeParams> = self.subscriptions.iter().cloned().collect();
        if !subs.is_empty() {
            tracing::info!(venue = %self.venue, count = subs.len(), "Resubscribing");
        }
        for params in subs {
            send_msg(sink, &MessageOut::Subscribe { params }).await?;
        }

        let queued = self.replay.drain();
        if !queued.is_empty() {
            tracing::info!(venue = %self.venue, count = queued.len(), "Flushing replay queue");
        }
        let mut queued = queued.into_iter();
        while let Some(msg) = queued.next() {
            if let Err(e) = send_msg(sink, &msg).await {
                let unsent: Vec<MessageOut> = std::iter::once(msg).chain(queued).collect();
                for msg in unsent.into_iter().rev() {
                    self.replay.requeue_front(msg);
                }
                return Err(e);
            }
        }
        Ok(())
    }
}

// ─── Public handle ───────────────────────────────────────────────────────────

/// Builder for a [`VenueConnection`].
pub struct ConnectionBuilder {
    venue: VenueId,
    url: String,
    config: ConnectionConfig,
    connector: Option<Arc<dyn Connector>>,
    router: Option<MessageRouter>,
    credentials: Option<Arc<dyn CredentialsProvider>>,
}

impl ConnectionBuilder {
    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Router that inbound envelopes are dispatched to.
    pub fn router(mut self, router: MessageRouter) -> Self {
        self.router = Some(router);
        self
    }

    pub fn credentials(mut self, credentials: Arc<dyn CredentialsProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Validate the config and spawn the connection task.
    ///
    /// Returns as soon as the task is running; the handshake happens in the
    /// background. Watch [`VenueConnection::state`] or
    /// [`VenueConnection::events`] for progress.
    pub fn connect(self) -> Result<VenueConnection, ConnectionError> {
        validate(&self.url, &self.config)?;

        let connector = match self.connector {
            Some(c) => c,
            None => default_connector()?,
        };
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| ConnectionError::InvalidConfig("no tokio runtime".into()))?;

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let (event_tx, _) = broadcast::channel(self.config.event_buffer.max(1));
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::default());
        let (health_tx, health_rx) = watch::channel(ConnectionHealth::default());
        let dropped = Arc::new(AtomicU64::new(0));
        let router = self.router.unwrap_or_default();

        let state = TaskState {
            venue: self.venue.clone(),
            url: self.url,
            replay: ReplayQueue::with_counter(
                self.config.replay_queue_capacity,
                Arc::clone(&dropped),
            ),
            config: self.config,
            connector,
            credentials: self.credentials,
            router: router.clone(),
            cmd_rx,
            event_tx: event_tx.clone(),
            status_tx,
            health_tx,
            subscriptions: SubscriptionSet::new(),
            attempt: 0,
            auth_failures: 0,
            nonce: 0,
        };

        let task_handle = runtime.spawn(run_task(state));

        Ok(VenueConnection {
            venue: self.venue,
            cmd_tx,
            status_rx,
            health_rx,
            event_tx,
            dropped,
            router,
            task_handle: Some(task_handle),
        })
    }
}

#[cfg(feature = "ws-native")]
fn default_connector() -> Result<Arc<dyn Connector>, ConnectionError> {
    Ok(Arc::new(crate::ws::native::TungsteniteConnector))
}

#[cfg(not(feature = "ws-native"))]
fn default_connector() -> Result<Arc<dyn Connector>, ConnectionError> {
    Err(ConnectionError::InvalidConfig(
        "no connector supplied and `ws-native` is disabled".into(),
    ))
}

fn validate(url: &str, config: &ConnectionConfig) -> Result<(), ConnectionError> {
    let invalid = |msg: &str| Err(ConnectionError::InvalidConfig(msg.to_string()));
    if url.trim().is_empty() {
        return invalid("url is empty");
    }
    if config.connect_timeout_ms == 0 {
        return invalid("connect_timeout_ms must be positive");
    }
    if config.heartbeat_interval_ms == 0 || config.heartbeat_timeout_ms == 0 {
        return invalid("heartbeat interval and timeout must be positive");
    }
    if config.replay_queue_capacity == 0 {
        return invalid("replay_queue_capacity must be positive");
    }
    if config.max_auth_failures == 0 {
        return invalid("max_auth_failures must be positive");
    }
    if config.reconnect.backoff_factor < 1.0 {
        return invalid("reconnect.backoff_factor must be >= 1");
    }
    Ok(())
}

/// Owned handle to one venue's streaming connection.
///
/// Dropping the handle aborts the background task; [`disconnect`](Self::disconnect)
/// closes it gracefully.
pub struct VenueConnection {
    venue: VenueId,
    cmd_tx: mpsc::Sender<Command>,
    status_rx: watch::Receiver<ConnectionStatus>,
    health_rx: watch::Receiver<ConnectionHealth>,
    event_tx: broadcast::Sender<ConnectionEvent>,
    dropped: Arc<AtomicU64>,
    router: MessageRouter,
    task_handle: Option<JoinHandle<()>>,
}

impl VenueConnection {
    pub fn builder(venue: impl Into<VenueId>, url: impl Into<String>) -> ConnectionBuilder {
        ConnectionBuilder {
            venue: venue.into(),
            url: url.into(),
            config: ConnectionConfig::default(),
            connector: None,
            router: None,
            credentials: None,
        }
    }

    pub fn venue(&self) -> &VenueId {
        &self.venue
    }

    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    /// Queue a message for the venue. Sent immediately when connected,
    /// otherwise held in the replay queue.
    pub fn send(&self, msg: MessageOut) -> Result<(), ConnectionError> {
        self.command(Command::Send(msg))
    }

    pub fn subscribe(&self, params: SubscribeParams) -> Result<(), ConnectionError> {
        self.send(MessageOut::Subscribe { params })
    }

    pub fn unsubscribe(&self, params: SubscribeParams) -> Result<(), ConnectionError> {
        self.send(MessageOut::Unsubscribe { params })
    }

    pub fn publish(&self, channel: Channel, data: serde_json::Value) -> Result<(), ConnectionError> {
        self.send(MessageOut::Publish { channel, data })
    }

    /// Force a fresh connection attempt with the backoff counter reset.
    /// This is the way out of `Failed`.
    pub fn reconnect(&self) -> Result<(), ConnectionError> {
        tracing::info!(venue = %self.venue, "Manual reconnection requested");
        self.command(Command::Reconnect)
    }

    /// Close gracefully and wait for the task to finish.
    pub async fn disconnect(mut self) {
        let _ = self.cmd_tx.send(Command::Disconnect).await;
        if let Some(handle) = self.task_handle.take() {
            if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
                tracing::warn!(venue = %self.venue, "Connection task did not stop in time");
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.status_rx.borrow().state
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status_rx.borrow().clone()
    }

    pub fn health(&self) -> ConnectionHealth {
        self.health_rx.borrow().clone()
    }

    /// Lifecycle events emitted after this call.
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.event_tx.subscribe()
    }

    /// State snapshots; always holds the latest value.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    /// Messages dropped from the replay queue since creation.
    pub fn dropped_messages(&self) -> u64 {
        self.dropped.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub async fn wait_for_state(&self, target: ConnectionState) -> Result<(), ConnectionError> {
        let mut rx = self.status_rx.clone();
        rx.wait_for(|s| s.state == target)
            .await
            .map(|_| ())
            .map_err(|_| ConnectionError::NotConnected)
    }

    fn command(&self, cmd: Command) -> Result<(), ConnectionError> {
        self.cmd_tx.try_send(cmd).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                ConnectionError::SendFailed("Command channel full".into())
            }
            mpsc::error::TrySendError::Closed(_) => ConnectionError::NotConnected,
        })
    }
}

impl std::fmt::Debug for VenueConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VenueConnection")
            .field("venue", &self.venue)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for VenueConnection {
    fn drop(&mut self) {
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

// ─── Background task ─────────────────────────────────────────────────────────

async fn run_task(mut state: TaskState) {
    loop {
        // ── 1. Attempt connection ────────────────────────────────────────
        state.set_state(ConnectionState::Connecting, None);
        let connector = Arc::clone(&state.connector);
        let url = state.url.clone();
        let timeout_ms = state.config.connect_timeout_ms;
        let attempt = tokio::time::timeout(Duration::from_millis(timeout_ms), connector.connect(&url));

        let failure = match state.drive(attempt).await {
            Interrupt::Done(Ok(Ok((sink, stream)))) => {
                // ── 2. Connected ─────────────────────────────────────────
                state.attempt = 0;
                state.set_state(ConnectionState::Connected, None);
                state.emit(ConnectionEvent::Connected);
                if state.router.reset_on_reconnect() {
                    state.router.reset_sequences();
                }

                match run_connected(&mut state, sink, stream).await {
                    Exit::UserRequested => break,
                    Exit::Restart => {
                        state.attempt = 0;
                        continue;
                    }
                    Exit::Lost(e) => e,
                    Exit::Fatal(e) => {
                        if state.fail(e).await {
                            continue;
                        }
                        break;
                    }
                }
            }
            Interrupt::Done(Ok(Err(e))) => {
                tracing::warn!(venue = %state.venue, error = %e, "Connect attempt failed");
                e
            }
            Interrupt::Done(Err(_elapsed)) => {
                tracing::warn!(venue = %state.venue, timeout_ms, "Connect attempt timed out");
                ConnectionError::ConnectTimeout(timeout_ms)
            }
            Interrupt::Reconnect => {
                state.attempt = 0;
                continue;
            }
            Interrupt::Disconnect => break,
        };

        // ── 3. Backoff before the next attempt ───────────────────────────
        if !state.recover(failure).await {
            break;
        }
    }

    state.set_state(ConnectionState::Disconnected, None);
    tracing::info!(venue = %state.venue, "Connection task stopped");
}

/// The connected loop. Runs until the connection breaks or is closed.
async fn run_connected(state: &mut TaskState, mut sink: FrameSink, mut stream: FrameStream) -> Exit {
    if let Err(e) = state.on_open(&mut sink).await {
        state.emit(ConnectionEvent::Disconnected {
            code: None,
            reason: e.to_string(),
        });
        return Exit::Lost(e);
    }

    let hb_interval = Duration::from_millis(state.config.heartbeat_interval_ms);
    let hb_timeout = Duration::from_millis(state.config.heartbeat_timeout_ms);

    let mut heartbeat = tokio::time::interval(hb_interval);
    heartbeat.reset(); // skip immediate first tick

    // (nonce, sent_at) of the oldest unacknowledged heartbeat
    let mut pending: Option<(u64, Instant)> = None;

    let far_future = Instant::now() + Duration::from_secs(86400);
    let ack_sleep = tokio::time::sleep_until(far_future);
    tokio::pin!(ack_sleep);

    let mut frames_in: u64 = 0;
    let mut window_start = Instant::now();

    loop {
        tokio::select! {
            // ── a) Incoming frame ────────────────────────────────────────
            frame = stream.next() => {
                match frame {
                    Some(Ok(Frame::Text(text))) => {
                        frames_in += 1;
                        let envelope = match RawEnvelope::parse(&text) {
                            Ok(envelope) => envelope,
                            Err(e) => {
                                tracing::warn!(venue = %state.venue, error = %e, "Discarding malformed frame");
                                state.emit(ConnectionEvent::Diagnostic(e));
                                continue;
                            }
                        };

                        if envelope.channel == Channel::Heartbeat {
                            if let Some((nonce, sent_at)) = pending {
                                let acked = envelope.payload.get("nonce").and_then(|n| n.as_u64());
                                if acked.map_or(true, |n| n >= nonce) {
                                    pending = None;
                                    ack_sleep.as_mut().reset(far_future);
                                    state.auth_failures = 0;
                                    let latency_ms = sent_at.elapsed().as_millis() as u64;
                                    state.health_tx.send_modify(|h| {
                                        h.latency_ms = Some(latency_ms);
                                        h.last_heartbeat_at = Some(Utc::now());
                                    });
                                }
                            }
                        } else if envelope.error_code() == Some(AUTH_FAILED_CODE) {
                            state.auth_failures += 1;
                            let message = envelope
                                .payload
                                .get("message")
                                .and_then(|m| m.as_str())
                                .unwrap_or("authentication rejected")
                                .to_string();
                            tracing::warn!(
                                venue = %state.venue,
                                failures = state.auth_failures,
                                max = state.config.max_auth_failures,
                                %message,
                                "Venue rejected authentication"
                            );
                            let _ = sink.close().await;
                            let error = ConnectionError::AuthRejected(message);
                            state.emit(ConnectionEvent::Disconnected {
                                code: None,
                                reason: error.to_string(),
                            });
                            if state.auth_failures >= state.config.max_auth_failures {
                                return Exit::Fatal(error);
                            }
                            return Exit::Lost(error);
                        }

                        state.router.dispatch(&envelope);
                    }
                    Some(Ok(Frame::Close { code, reason })) => {
                        tracing::info!(venue = %state.venue, code, %reason, "Venue closed the connection");
                        state.emit(ConnectionEvent::Disconnected {
                            code: Some(code),
                            reason: reason.clone(),
                        });
                        return Exit::Lost(ConnectionError::Closed { code: Some(code), reason });
                    }
                    Some(Err(e)) => {
                        tracing::error!(venue = %state.venue, error = %e, "Connection error");
                        state.emit(ConnectionEvent::Disconnected {
                            code: None,
                            reason: e.to_string(),
                        });
                        return Exit::Lost(e);
                    }
                    None => {
                        state.emit(ConnectionEvent::Disconnected {
                            code: None,
                            reason: "Stream ended".into(),
                        });
                        return Exit::Lost(ConnectionError::Closed {
                            code: None,
                            reason: "Stream ended".into(),
                        });
                    }
                }
            }

            // ── b) Command from the handle ───────────────────────────────
            cmd = state.cmd_rx.recv() => {
                match cmd {
                    Some(Command::Send(msg)) => {
                        state.track(&msg);
                        if let Err(e) = send_msg(&mut sink, &msg).await {
                            tracing::warn!(venue = %state.venue, error = %e, "Send failed");
                            if !msg.is_control() {
                                if let Some(dropped_total) = state.replay.requeue_front(msg) {
                                    state.emit(ConnectionEvent::ReplayOverflow { dropped_total });
                                }
                            }
                            state.emit(ConnectionEvent::Disconnected {
                                code: None,
                                reason: e.to_string(),
                            });
                            return Exit::Lost(e);
                        }
                    }
                    Some(Command::Reconnect) => {
                        let reason = "Client reconnect".to_string();
                        let _ = sink.send(Frame::Close { code: 1000, reason: reason.clone() }).await;
                        state.emit(ConnectionEvent::Disconnected { code: Some(1000), reason });
                        return Exit::Restart;
                    }
                    Some(Command::Disconnect) | None => {
                        let reason = "Client disconnect".to_string();
                        let _ = sink.send(Frame::Close { code: 1000, reason: reason.clone() }).await;
                        state.emit(ConnectionEvent::Disconnected { code: Some(1000), reason });
                        return Exit::UserRequested;
                    }
                }
            }

            // ── c) Heartbeat interval ────────────────────────────────────
            _ = heartbeat.tick() => {
                let elapsed = window_start.elapsed().as_secs_f64();
                let rate = if elapsed > 0.0 { frames_in as f64 / elapsed } else { 0.0 };
                frames_in = 0;
                window_start = Instant::now();
                state.health_tx.send_modify(|h| h.message_rate_per_sec = rate);

                state.nonce += 1;
                let nonce = state.nonce;
                if let Err(e) = send_msg(&mut sink, &MessageOut::Heartbeat { nonce }).await {
                    tracing::warn!(venue = %state.venue, error = %e, "Failed to send heartbeat");
                    state.emit(ConnectionEvent::Disconnected { code: None, reason: e.to_string() });
                    return Exit::Lost(e);
                }
                if pending.is_none() {
                    let sent_at = Instant::now();
                    pending = Some((nonce, sent_at));
                    ack_sleep.as_mut().reset(sent_at + hb_timeout);
                }
            }

            // ── d) Heartbeat ack timeout ─────────────────────────────────
            () = &mut ack_sleep, if pending.is_some() => {
                tracing::warn!(
                    venue = %state.venue,
                    timeout_ms = state.config.heartbeat_timeout_ms,
                    "Heartbeat timeout"
                );
                state.emit(ConnectionEvent::Disconnected {
                    code: None,
                    reason: "Heartbeat timeout".into(),
                });
                let _ = sink.close().await;
                return Exit::Lost(ConnectionError::HeartbeatTimeout(state.config.heartbeat_timeout_ms));
            }
        }
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// Serialize and send a MessageOut over the sink.
async fn send_msg(sink: &mut FrameSink, msg: &MessageOut) -> Result<(), ConnectionError> {
    let json = serde_json::to_string(msg).map_err(|e| ConnectionError::SendFailed(e.to_string()))?;
    sink.send(Frame::Text(json)).await
}
