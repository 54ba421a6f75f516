//! Streaming layer: envelopes, control frames, connection state, events.
//!
//! The connection event loop lives in [`connection`] and is transport-agnostic:
//! it talks to the venue through a [`Connector`]. The production connector is
//! compile-time gated:
//! - `ws-native` feature → `tokio-tungstenite` (native.rs)
//!
//! This module defines the shared message/event types.

pub mod connection;
pub mod replay;
pub mod subscriptions;
pub mod transport;

#[cfg(feature = "ws-native")]
pub mod native;

use crate::error::{ConnectionError, ProtocolError};
use crate::retry::BackoffConfig;
use crate::shared::{serde_util, Channel};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub use connection::{ConnectionBuilder, VenueConnection};
pub use subscriptions::{SubscribeParams, SubscriptionSet};
pub use transport::{Connector, CredentialsProvider, Frame, FrameSink, FrameStream, StaticToken};

/// Error code a venue puts on an `ERROR` frame when it rejects the auth frame.
pub const AUTH_FAILED_CODE: &str = "AUTH_FAILED";

// ─── Outbound messages ───────────────────────────────────────────────────────

/// Messages sent from client to venue.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageOut {
    /// Sent once right after every successful handshake.
    Auth { token: String },
    Heartbeat { nonce: u64 },
    Subscribe { params: SubscribeParams },
    Unsubscribe { params: SubscribeParams },
    /// Application-level request on a channel. Queued for replay while disconnected.
    Publish {
        channel: Channel,
        data: serde_json::Value,
    },
}

impl MessageOut {
    /// Control frames are regenerated on reconnect rather than replayed.
    pub fn is_control(&self) -> bool {
        !matches!(self, MessageOut::Publish { .. })
    }
}

// ─── Inbound messages ────────────────────────────────────────────────────────

/// Inbound JSON envelope `{type, channel, sequence, timestamp, data}`.
///
/// `T` defaults to raw JSON; [`MessageEnvelope::decode`] produces a typed copy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageEnvelope<T = serde_json::Value> {
    #[serde(rename = "type")]
    pub kind: String,
    pub channel: Channel,
    pub sequence: u64,
    #[serde(with = "serde_util::timestamp_ms")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "data")]
    pub payload: T,
}

/// An envelope whose payload has not been decoded yet.
pub type RawEnvelope = MessageEnvelope<serde_json::Value>;

impl RawEnvelope {
    /// Parse a text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Decode the payload into a typed envelope.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<MessageEnvelope<T>, ProtocolError> {
        let payload = T::deserialize(&self.payload).map_err(|e| {
            ProtocolError::UnexpectedPayload {
                channel: self.channel,
                detail: e.to_string(),
            }
        })?;
        Ok(MessageEnvelope {
            kind: self.kind.clone(),
            channel: self.channel,
            sequence: self.sequence,
            timestamp: self.timestamp,
            payload,
        })
    }

    /// `ERROR` frame code, if this is one.
    pub fn error_code(&self) -> Option<&str> {
        if self.channel != Channel::Error {
            return None;
        }
        self.payload.get("code").and_then(|c| c.as_str())
    }
}

// ─── Connection state ────────────────────────────────────────────────────────

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Terminal until `reconnect()` is called.
    Failed,
}

/// Snapshot of the connection status.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub last_error: Option<ConnectionError>,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            last_error: None,
        }
    }
}

/// Derived connection health, recomputed every heartbeat interval.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectionHealth {
    /// Round trip of the last acknowledged heartbeat.
    pub latency_ms: Option<u64>,
    /// Inbound frames per second over the last heartbeat interval.
    pub message_rate_per_sec: f64,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
}

// ─── ConnectionEvent ─────────────────────────────────────────────────────────

/// Lifecycle events broadcast to every observer of a connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Handshake succeeded; auth, resubscribe and replay flush follow.
    Connected,
    /// The connection dropped.
    Disconnected { code: Option<u16>, reason: String },
    /// A reconnect attempt is scheduled after `delay_ms`.
    Reconnecting { attempt: u32, delay_ms: u64 },
    /// Terminal until `reconnect()`.
    Failed { reason: String },
    /// The replay queue was full and dropped its oldest entry.
    ReplayOverflow { dropped_total: u64 },
    /// A discarded inbound frame.
    Diagnostic(ProtocolError),
}

/// Configuration for a venue connection.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub connect_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub reconnect: BackoffConfig,
    pub max_reconnect_attempts: u32,
    pub replay_queue_capacity: usize,
    /// Consecutive auth rejections before the connection is marked Failed.
    pub max_auth_failures: u32,
    pub event_buffer: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            heartbeat_interval_ms: 15_000,
            heartbeat_timeout_ms: 5_000,
            reconnect: BackoffConfig::default(),
            max_reconnect_attempts: 10,
            replay_queue_capacity: 256,
            max_auth_failures: 3,
            event_buffer: 256,
        }
    }
}
