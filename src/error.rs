//! Unified session error types.
//!
//! Every error maps onto one [`ErrorKind`] so the presentation layer can decide
//! between a transient "reconnecting" indicator and a blocking error.

use crate::risk::RiskViolation;
use crate::shared::{Channel, CommandId, Decimal, MarketKey, Side};
use serde::Serialize;
use thiserror::Error;

// ─── Taxonomy ────────────────────────────────────────────────────────────────

/// Error taxonomy shared by every layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Timeouts, resets, disconnects. Absorbed by backoff up to its ceiling.
    Transient,
    /// Malformed frame, sequence gap, stale update. Message discarded.
    Protocol,
    /// Destination circuit is open. Fail fast with a retry-after hint.
    CircuitOpen,
    /// Bad command parameters or risk violation. Never retried.
    Validation,
    /// Requires explicit caller intervention.
    Fatal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Protocol => "protocol",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::Validation => "validation",
            ErrorKind::Fatal => "fatal",
        };
        f.write_str(s)
    }
}

/// Presentation-ready error: kind + human message + retryable flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

// ─── SessionError ────────────────────────────────────────────────────────────

/// Top-level session error.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Connection(e) => e.kind(),
            SessionError::Command(e) => e.kind(),
            SessionError::Protocol(_) => ErrorKind::Protocol,
            SessionError::Config(_) => ErrorKind::Validation,
            SessionError::Serde(_) => ErrorKind::Protocol,
        }
    }

    pub fn report(&self) -> ErrorReport {
        let kind = self.kind();
        ErrorReport {
            kind,
            message: self.to_string(),
            retryable: matches!(kind, ErrorKind::Transient | ErrorKind::CircuitOpen),
        }
    }
}

// ─── ConnectionError ─────────────────────────────────────────────────────────

/// Streaming connection errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectionError {
    #[error("Invalid venue config: {0}")]
    InvalidConfig(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connect timed out after {0}ms")]
    ConnectTimeout(u64),

    #[error("Heartbeat ack not received within {0}ms")]
    HeartbeatTimeout(u64),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Connection closed: code={code:?} reason={reason}")]
    Closed { code: Option<u16>, reason: String },

    #[error("Authentication rejected: {0}")]
    AuthRejected(String),

    #[error("Connection failed permanently: {reason}")]
    Failed { reason: String },
}

impl ConnectionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConnectionError::InvalidConfig(_) => ErrorKind::Validation,
            ConnectionError::AuthRejected(_) | ConnectionError::Failed { .. } => ErrorKind::Fatal,
            _ => ErrorKind::Transient,
        }
    }
}

// ─── ProtocolError ───────────────────────────────────────────────────────────

/// Inbound message problems. The offending message is discarded and the error
/// is surfaced as a diagnostic; processing continues.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(String),

    #[error("Unexpected payload on {channel}: {detail}")]
    UnexpectedPayload { channel: Channel, detail: String },

    #[error("Sequence gap on {channel}: expected {expected}, received {received}")]
    SequenceGap {
        channel: Channel,
        expected: u64,
        received: u64,
    },

    #[error("Out-of-order message on {channel}: sequence {sequence} <= last {last}")]
    OutOfOrder {
        channel: Channel,
        sequence: u64,
        last: u64,
    },

    #[error("Stale update for {key}: {age_ms}ms older than latest (threshold {threshold_ms}ms)")]
    Stale {
        key: MarketKey,
        age_ms: i64,
        threshold_ms: u64,
    },

    #[error("Delta for {0} received before any snapshot")]
    MissingSnapshot(MarketKey),

    #[error("Book {0} awaiting a fresh snapshot after a sequence gap")]
    ResyncPending(MarketKey),

    #[error("Trade for {key} belongs to sealed window starting {window_start}")]
    LateTrade { key: MarketKey, window_start: i64 },

    #[error("Invalid {side:?} level for {key}: price {price}, size {size}")]
    InvalidLevel {
        key: MarketKey,
        side: Side,
        price: Decimal,
        size: Decimal,
    },

    #[error("Invalid trade for {key}: price {price}, size {size}")]
    InvalidTrade {
        key: MarketKey,
        price: Decimal,
        size: Decimal,
    },
}

// ─── CommandError ────────────────────────────────────────────────────────────

/// Outbound command errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    #[error("Circuit open for {destination} (retry after {retry_after_ms}ms)")]
    CircuitOpen {
        destination: String,
        retry_after_ms: u64,
    },

    #[error("Invalid command: {0}")]
    Validation(String),

    #[error("Risk check failed: {0}")]
    Risk(#[from] RiskViolation),

    #[error("Command timed out after {0}ms")]
    Timeout(u64),

    #[error("Server error {status}: {body}")]
    ServerError { status: u16, body: String },

    #[error("Rate limited (retry after {retry_after_ms:?}ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Connection reset: {0}")]
    ConnectionReset(String),

    #[error("Rejected by venue: {0}")]
    Rejected(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Unknown command: {0}")]
    NotFound(CommandId),

    #[error("Cancelled before dispatch")]
    Cancelled,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },
}

impl CommandError {
    /// Transient failures are the only ones retried and the only ones that
    /// count against a destination's circuit.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CommandError::Timeout(_)
                | CommandError::ServerError { .. }
                | CommandError::RateLimited { .. }
                | CommandError::ConnectionReset(_)
                | CommandError::MaxRetriesExceeded { .. }
        )
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CommandError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            CommandError::Validation(_)
            | CommandError::Risk(_)
            | CommandError::Rejected(_)
            | CommandError::NotFound(_)
            | CommandError::Cancelled => ErrorKind::Validation,
            CommandError::Unauthorized | CommandError::Transport(_) => ErrorKind::Fatal,
            _ => ErrorKind::Transient,
        }
    }

    pub fn report(&self) -> ErrorReport {
        let kind = self.kind();
        ErrorReport {
            kind,
            message: self.to_string(),
            retryable: matches!(kind, ErrorKind::Transient | ErrorKind::CircuitOpen),
        }
    }
}

// ─── ConfigError ─────────────────────────────────────────────────────────────

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid config value `{field}`: {reason}")]
    Invalid { field: String, reason: String },

    #[error("Unknown venue: {0}")]
    UnknownVenue(String),
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_error_transient_classification() {
        assert!(CommandError::Timeout(500).is_transient());
        assert!(CommandError::ServerError {
            status: 503,
            body: String::new()
        }
        .is_transient());
        assert!(CommandError::ConnectionReset("reset".into()).is_transient());
        assert!(!CommandError::Validation("bad price".into()).is_transient());
        assert!(!CommandError::Rejected("insufficient funds".into()).is_transient());
    }

    #[test]
    fn test_report_flags() {
        let open = CommandError::CircuitOpen {
            destination: "drift".into(),
            retry_after_ms: 1500,
        }
        .report();
        assert_eq!(open.kind, ErrorKind::CircuitOpen);
        assert!(open.retryable);
        assert!(open.message.contains("1500ms"));

        let fatal = SessionError::from(ConnectionError::Failed {
            reason: "max retries".into(),
        })
        .report();
        assert_eq!(fatal.kind, ErrorKind::Fatal);
        assert!(!fatal.retryable);

        let invalid = CommandError::Validation("size must be positive".into()).report();
        assert_eq!(invalid.kind, ErrorKind::Validation);
        assert!(!invalid.retryable);
    }

    #[test]
    fn test_connection_error_kinds() {
        assert_eq!(ConnectionError::HeartbeatTimeout(10).kind(), ErrorKind::Transient);
        assert_eq!(
            ConnectionError::AuthRejected("bad token".into()).kind(),
            ErrorKind::Fatal
        );
        assert_eq!(
            ConnectionError::InvalidConfig("url".into()).kind(),
            ErrorKind::Validation
        );
    }
}
