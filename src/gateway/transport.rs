//! Command transport seam.

use crate::domain::order::{Acknowledgement, OrderCommand};
use crate::error::CommandError;
use crate::shared::CommandId;
use async_trait::async_trait;

/// Delivers commands to one venue.
///
/// Implementations must treat `command.id` as an idempotency key: the gateway
/// resends the same id on every retry.
#[async_trait]
pub trait CommandTransport: Send + Sync + 'static {
    async fn submit(&self, command: &OrderCommand) -> Result<Acknowledgement, CommandError>;

    /// Returns whether the venue cancelled anything.
    async fn cancel(&self, id: &CommandId) -> Result<bool, CommandError>;
}
