//! Transport seam between the connection event loop and a concrete socket.

use crate::error::ConnectionError;
use async_trait::async_trait;
use futures_util::{Sink, Stream};
use std::pin::Pin;

/// A transport-level frame. Binary and ping/pong frames never reach the
/// event loop; the socket layer handles them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Close { code: u16, reason: String },
}

/// Outbound half of an established connection.
pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = ConnectionError> + Send>>;

/// Inbound half of an established connection.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, ConnectionError>> + Send>>;

/// Opens a bidirectional frame connection to a venue.
///
/// The event loop applies its own connect timeout around this call.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<(FrameSink, FrameStream), ConnectionError>;
}

/// Supplies the token for the auth frame. Consulted on every (re)connect so a
/// refreshed token is picked up without rebuilding the connection.
pub trait CredentialsProvider: Send + Sync + 'static {
    fn token(&self) -> Option<String>;
}

/// A fixed token.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

impl CredentialsProvider for StaticToken {
    fn token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}
