//! Wire types for command responses and `ORDER_UPDATE` messages.

use super::{Acknowledgement, OrderStatus};
use crate::error::CommandError;
use crate::shared::{serde_util, CommandId, Decimal};
use serde::{Deserialize, Serialize};

// ─── Command transport envelope ──────────────────────────────────────────────

/// Response shape of every command call: `{success, data|null, error|null}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(default)]
    pub error: Option<CommandFailure>,
}

/// Error body of a failed command response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandFailure {
    #[serde(default)]
    pub code: Option<String>,
    pub message: String,
    #[serde(default)]
    pub retryable: bool,
}

impl<T> CommandResponse<T> {
    /// Collapse the envelope into a typed result.
    ///
    /// A failure flagged `retryable` by the venue maps to a transient error;
    /// anything else is a rejection. `success` with no data is a protocol
    /// violation, reported as a rejection rather than assumed to be fine.
    pub fn into_result(self) -> Result<T, CommandError> {
        match (self.success, self.data, self.error) {
            (true, Some(data), _) => Ok(data),
            (true, None, _) => Err(CommandError::Rejected(
                "success response without data".into(),
            )),
            (false, _, Some(err)) if err.retryable => Err(CommandError::ServerError {
                status: 503,
                body: err.message,
            }),
            (false, _, Some(err)) => Err(CommandError::Rejected(match err.code {
                Some(code) => format!("{}: {}", code, err.message),
                None => err.message,
            })),
            (false, _, None) => Err(CommandError::Rejected("unspecified failure".into())),
        }
    }
}

/// Body of a cancel request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CancelBody {
    pub command_id: CommandId,
}

/// Data of a successful cancel response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CancelData {
    pub cancelled: bool,
}

// ─── ORDER_UPDATE ────────────────────────────────────────────────────────────

/// Order lifecycle update pushed on the `ORDER_UPDATE` channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderUpdate {
    pub command_id: CommandId,
    #[serde(default)]
    pub venue_order_id: Option<String>,
    pub status: OrderStatus,
    #[serde(default, with = "serde_util::decimal_opt")]
    pub filled_size: Option<Decimal>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl From<&Acknowledgement> for OrderUpdate {
    fn from(ack: &Acknowledgement) -> Self {
        Self {
            command_id: ack.command_id.clone(),
            venue_order_id: ack.venue_order_id.clone(),
            status: ack.status,
            filled_size: ack.filled_size,
            reason: None,
        }
    }
}
