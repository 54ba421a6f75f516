//! # venue-session
//!
//! Client-side trading session engine: keeps streaming connections to one or
//! more venues alive, turns their message firehose into sequenced, exact
//! market state, and gates outbound orders behind risk checks and a
//! per-venue circuit breaker.
//!
//! ## Architecture
//!
//! The crate is organized in layers:
//!
//! 1. **Core**: Newtypes, decimal serde, errors, config, backoff
//! 2. **Domain**: Order books, candles, trades, orders, portfolio
//! 3. **Validation + aggregation**: Pre-trade risk gate, market data aggregator
//! 4. **Streaming**: Connection manager (`tokio-tungstenite` behind `ws-native`) and message router
//! 5. **Commands**: Circuit-broken gateway with a `reqwest` transport behind `rest`
//! 6. **Session**: `TradingSession` wiring all of the above per venue
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use venue_session::prelude::*;
//!
//! let config = SessionConfig::load("session.toml")?;
//! let (session, mut events) = TradingSession::builder(config)
//!     .portfolio(|| PortfolioState::new(dec!(10_000)))
//!     .start()?;
//!
//! while let Some(event) = events.recv().await {
//!     if let SessionEvent::Book(book) = event {
//!         println!("{} best bid {:?}", book.trading_pair, book.best_bid());
//!     }
//! }
//! ```

// ── Layer 1: Core ────────────────────────────────────────────────────────────

/// Shared newtypes and serde helpers used across all domains.
pub mod shared;

/// Unified error taxonomy.
pub mod error;

/// Session and per-venue configuration.
pub mod config;

/// Exponential backoff.
pub mod retry;

// ── Layer 2: Domain ──────────────────────────────────────────────────────────

/// Domain modules (vertical slices): types, wire types, state.
pub mod domain;

// ── Layer 3: Validation + aggregation ────────────────────────────────────────

/// Pre-trade risk validation.
pub mod risk;

/// Market data aggregation: books, depth, candles, tickers.
pub mod market;

// ── Layer 4: Streaming ───────────────────────────────────────────────────────

/// Venue connections: envelopes, lifecycle, heartbeat, replay.
pub mod ws;

/// Channel routing with dedup, gap detection and batching.
pub mod router;

// ── Layer 5: Commands ────────────────────────────────────────────────────────

/// Command gateway: circuit breaker, retries, transports.
pub mod gateway;

// ── Layer 6: Session ─────────────────────────────────────────────────────────

/// `TradingSession`, the primary entry point.
pub mod session;

// ── Prelude ──────────────────────────────────────────────────────────────────

pub mod prelude {
    // Shared newtypes
    pub use crate::shared::{
        CandleInterval, Channel, CommandId, Decimal, MarketKey, Side, TradingPair, VenueId,
    };

    // Domain types
    pub use crate::domain::candle::Candle;
    pub use crate::domain::order::{Acknowledgement, OrderCommand, OrderStatus, OrderType};
    pub use crate::domain::orderbook::{
        MarketDepthPoint, OrderBook, OrderBookLevel, OrderBookSnapshot, Ticker,
    };
    pub use crate::domain::portfolio::{PortfolioState, Position};
    pub use crate::domain::trade::{Trade, TradeHistory};

    // Errors
    pub use crate::error::{
        CommandError, ConfigError, ConnectionError, ErrorKind, ErrorReport, ProtocolError,
        SessionError,
    };

    // Config
    pub use crate::config::{SessionConfig, VenueConfig};
    pub use crate::retry::BackoffConfig;

    // Risk + market data
    pub use crate::market::{MarketDataAggregator, MarketDataConfig};
    pub use crate::risk::{RiskLimit, RiskLimits, RiskViolation};

    // Streaming
    pub use crate::router::{
        ContinuityBreak, HandlerError, MessageRouter, RouterConfig, RouterSignal,
        SubscribeOptions, SubscriptionHandle,
    };
    pub use crate::ws::{
        ConnectionConfig, ConnectionEvent, ConnectionHealth, ConnectionState, Connector,
        CredentialsProvider, MessageEnvelope, MessageOut, RawEnvelope, StaticToken,
        SubscribeParams, VenueConnection,
    };

    // Commands
    pub use crate::gateway::{
        CancelOutcome, CircuitBreakerConfig, CircuitState, CommandGateway, CommandTransport,
        GatewayConfig, InFlightSubmit, PortfolioSource,
    };
    #[cfg(feature = "rest")]
    pub use crate::gateway::RestTransport;

    // Session
    pub use crate::session::{SessionEvent, TradingSession};
}
