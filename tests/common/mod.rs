//! In-memory venue for integration tests.
//!
//! [`MockVenue`] is a [`Connector`] whose connections are plain channels. Each
//! accepted connection hands its server half to the test through
//! [`MockVenue::accept`], so a test can read what the client sent and push
//! frames back.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::timeout;

use venue_session::error::ConnectionError;
use venue_session::ws::{ConnectionEvent, Connector, Frame, FrameSink, FrameStream};

pub const TEST_TIMEOUT: Duration = Duration::from_secs(120);

type Inbound = Result<Frame, ConnectionError>;

/// The venue's side of one accepted connection.
pub struct ServerConn {
    outbound: mpsc::UnboundedReceiver<Frame>,
    inbound: mpsc::UnboundedSender<Inbound>,
}

impl ServerConn {
    /// Next frame the client sent, parsed as JSON. Heartbeats are skipped.
    pub async fn recv(&mut self) -> Value {
        loop {
            let value = self.recv_any().await;
            if value["type"] != "heartbeat" {
                return value;
            }
        }
    }

    /// Next frame the client sent, heartbeats included.
    pub async fn recv_any(&mut self) -> Value {
        let frame = timeout(TEST_TIMEOUT, self.outbound.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client dropped the connection");
        match frame {
            Frame::Text(text) => serde_json::from_str(&text).expect("client sent invalid JSON"),
            Frame::Close { code, reason } => json!({"type": "close", "code": code, "reason": reason}),
        }
    }

    pub fn send(&self, envelope: Value) {
        let _ = self.inbound.send(Ok(Frame::Text(envelope.to_string())));
    }

    pub fn send_raw(&self, text: &str) {
        let _ = self.inbound.send(Ok(Frame::Text(text.to_string())));
    }

    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.inbound.send(Ok(Frame::Close {
            code,
            reason: reason.to_string(),
        }));
    }

    /// Answer a heartbeat the client sent.
    pub fn ack_heartbeat(&self, heartbeat: &Value, sequence: u64) {
        self.send(envelope(
            "heartbeat_ack",
            "HEARTBEAT",
            sequence,
            0,
            json!({"nonce": heartbeat["nonce"]}),
        ));
    }
}

#[derive(Clone)]
pub struct MockVenue {
    inner: Arc<MockInner>,
}

struct MockInner {
    refusing: AtomicBool,
    attempts: AtomicU32,
    accepted_tx: mpsc::UnboundedSender<ServerConn>,
    accepted_rx: Mutex<mpsc::UnboundedReceiver<ServerConn>>,
}

impl MockVenue {
    pub fn new() -> Self {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(MockInner {
                refusing: AtomicBool::new(false),
                attempts: AtomicU32::new(0),
                accepted_tx,
                accepted_rx: Mutex::new(accepted_rx),
            }),
        }
    }

    /// Refuse every connect attempt until told otherwise.
    pub fn refusing() -> Self {
        let venue = Self::new();
        venue.set_refusing(true);
        venue
    }

    pub fn set_refusing(&self, refusing: bool) {
        self.inner.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Connect attempts seen so far, refused ones included.
    pub fn attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(self.clone())
    }

    /// Wait for the client to open its next connection.
    pub async fn accept(&self) -> ServerConn {
        let mut rx = self.inner.accepted_rx.lock().await;
        timeout(TEST_TIMEOUT, rx.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("mock venue closed")
    }
}

#[async_trait]
impl Connector for MockVenue {
    async fn connect(&self, _url: &str) -> Result<(FrameSink, FrameStream), ConnectionError> {
        self.inner.attempts.fetch_add(1, Ordering::SeqCst);
        if self.inner.refusing.load(Ordering::SeqCst) {
            return Err(ConnectionError::ConnectionFailed("connection refused".into()));
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel::<Frame>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<Inbound>();

        let sink = futures_util::sink::unfold(out_tx, |tx, frame: Frame| async move {
            tx.send(frame)
                .map_err(|_| ConnectionError::SendFailed("server went away".into()))?;
            Ok::<_, ConnectionError>(tx)
        });
        let stream = futures_util::stream::unfold(in_rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });

        let _ = self.inner.accepted_tx.send(ServerConn {
            outbound: out_rx,
            inbound: in_tx,
        });
        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

/// Route `tracing` output through the test harness. `RUST_LOG` filters it.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Build an inbound envelope.
pub fn envelope(kind: &str, channel: &str, sequence: u64, timestamp_ms: i64, data: Value) -> Value {
    json!({
        "type": kind,
        "channel": channel,
        "sequence": sequence,
        "timestamp": timestamp_ms,
        "data": data,
    })
}

/// Wait for the next event that matches the predicate, ignoring others.
pub async fn next_matching(
    events: &mut broadcast::Receiver<ConnectionEvent>,
    predicate: impl Fn(&ConnectionEvent) -> bool,
) -> ConnectionEvent {
    timeout(TEST_TIMEOUT, async {
        loop {
            match events.recv().await {
                Ok(ev) if predicate(&ev) => return ev,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => {
                    panic!("event stream ended without a matching event")
                }
            }
        }
    })
    .await
    .expect("timed out waiting for matching event")
}
