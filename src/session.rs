//! Trading session: one connection, router and aggregator per venue plus a
//! shared command gateway.
//!
//! Router handlers run on each venue's connection task, so market state for a
//! channel is updated in accepted-sequence order. Everything observable leaves
//! through a single [`SessionEvent`] channel.

use crate::config::{SessionConfig, VenueConfig};
use crate::domain::candle::Candle;
use crate::domain::order::wire::OrderUpdate;
use crate::domain::order::{Acknowledgement, OrderCommand, OrderStatus};
use crate::domain::orderbook::{MarketDepthPoint, OrderBookSnapshot, Ticker};
use crate::domain::trade::TradeUpdate;
use crate::error::{CommandError, ConfigError, ConnectionError, ProtocolError, SessionError};
use crate::gateway::{CommandGateway, CommandTransport, InFlightSubmit, PortfolioSource};
use crate::market::MarketDataAggregator;
use crate::router::{
    ContinuityBreak, HandlerError, MessageRouter, RouterSignal, SubscribeOptions, SubscriptionHandle,
};
use crate::shared::{Channel, CommandId, MarketKey, TradingPair, VenueId};
use crate::ws::{
    ConnectionEvent, ConnectionHealth, ConnectionState, Connector, CredentialsProvider, RawEnvelope,
    SubscribeParams, VenueConnection,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// Everything a session reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connection {
        venue: VenueId,
        event: ConnectionEvent,
    },
    Book(OrderBookSnapshot),
    Candle {
        key: MarketKey,
        current: Candle,
        sealed: Option<Candle>,
    },
    Ticker(Ticker),
    /// A fill on the trade stream that belongs to one of our commands.
    Fill {
        venue: VenueId,
        command_id: CommandId,
        trade: TradeUpdate,
    },
    OrderUpdated {
        venue: VenueId,
        update: OrderUpdate,
        status: Option<OrderStatus>,
    },
    /// Books were invalidated and fresh snapshots requested.
    ResyncRequested {
        venue: VenueId,
        books: Vec<MarketKey>,
    },
    /// An inbound message was rejected and discarded.
    Diagnostic {
        venue: VenueId,
        error: ProtocolError,
    },
    Router {
        venue: VenueId,
        signal: RouterSignal,
    },
    /// A venue `ERROR` frame that the connection did not act on itself.
    VenueError {
        venue: VenueId,
        code: Option<String>,
        message: String,
    },
}

#[derive(Clone)]
struct EventSink {
    tx: mpsc::Sender<SessionEvent>,
}

impl EventSink {
    fn emit(&self, event: SessionEvent) {
        if let Err(mpsc::error::TrySendError::Full(event)) = self.tx.try_send(event) {
            tracing::warn!(?event, "Session event buffer full, dropping event");
        }
    }
}

type SharedMarket = Arc<Mutex<MarketDataAggregator>>;

fn lock(market: &SharedMarket) -> MutexGuard<'_, MarketDataAggregator> {
    market.lock().unwrap_or_else(|p| p.into_inner())
}

struct VenueSession {
    connection: Arc<VenueConnection>,
    market: SharedMarket,
    subscriptions: Vec<SubscriptionHandle>,
    tasks: Vec<JoinHandle<()>>,
}

/// A running session. Dropping it aborts every connection task.
pub struct TradingSession {
    venues: BTreeMap<VenueId, VenueSession>,
    gateway: Option<CommandGateway>,
}

impl std::fmt::Debug for TradingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradingSession")
            .field("venues", &self.venues.keys().collect::<Vec<_>>())
            .field("gateway", &self.gateway)
            .finish()
    }
}

impl TradingSession {
    pub fn builder(config: SessionConfig) -> SessionBuilder {
        SessionBuilder {
            config,
            connector: None,
            credentials: None,
            portfolio: None,
            transports: HashMap::new(),
            event_buffer: 1024,
        }
    }

    pub fn venues(&self) -> impl Iterator<Item = &VenueId> {
        self.venues.keys()
    }

    pub fn connection(&self, venue: &VenueId) -> Option<&VenueConnection> {
        self.venues.get(venue).map(|v| v.connection.as_ref())
    }

    pub fn state(&self, venue: &VenueId) -> Option<ConnectionState> {
        self.connection(venue).map(VenueConnection::state)
    }

    pub fn health(&self, venue: &VenueId) -> Option<ConnectionHealth> {
        self.connection(venue).map(VenueConnection::health)
    }

    // ── Market data ──────────────────────────────────────────────────────

    pub fn book(&self, key: &MarketKey) -> Option<OrderBookSnapshot> {
        let venue = self.venues.get(&key.venue)?;
        lock(&venue.market).snapshot(key)
    }

    pub fn depth(&self, key: &MarketKey, max_levels: usize) -> Vec<MarketDepthPoint> {
        self.venues
            .get(&key.venue)
            .map(|v| lock(&v.market).get_depth(key, max_levels))
            .unwrap_or_default()
    }

    pub fn candles(&self, key: &MarketKey, limit: usize) -> Vec<Candle> {
        self.venues
            .get(&key.venue)
            .map(|v| lock(&v.market).candles(key, limit))
            .unwrap_or_default()
    }

    pub fn ticker(&self, key: &MarketKey) -> Option<Ticker> {
        let venue = self.venues.get(&key.venue)?;
        lock(&venue.market).ticker(key).cloned()
    }

    /// Ask a venue to stream `channel` for specific pairs.
    pub fn subscribe_pairs(
        &self,
        venue: &VenueId,
        channel: Channel,
        pairs: Vec<TradingPair>,
    ) -> Result<(), SessionError> {
        let session = self.venue(venue)?;
        Ok(session.connection.subscribe(SubscribeParams::new(channel, pairs))?)
    }

    // ── Commands ─────────────────────────────────────────────────────────

    pub fn gateway(&self) -> Option<&CommandGateway> {
        self.gateway.as_ref()
    }

    pub async fn submit(&self, command: OrderCommand) -> Result<Acknowledgement, SessionError> {
        Ok(self.require_gateway()?.submit(command).await?)
    }

    pub fn submit_cancellable(&self, command: OrderCommand) -> Result<InFlightSubmit, SessionError> {
        Ok(self.require_gateway()?.submit_cancellable(command)?)
    }

    pub async fn cancel(&self, venue: &VenueId, id: &CommandId) -> Result<bool, SessionError> {
        Ok(self.require_gateway()?.cancel(venue, id).await?)
    }

    /// Close every connection gracefully.
    pub async fn shutdown(mut self) {
        let venues = std::mem::take(&mut self.venues);
        for (id, venue) in venues {
            for task in &venue.tasks {
                task.abort();
            }
            for task in venue.tasks {
                let _ = task.await;
            }
            for sub in venue.subscriptions {
                sub.unsubscribe();
            }
            match Arc::try_unwrap(venue.connection) {
                Ok(connection) => connection.disconnect().await,
                Err(_) => tracing::warn!(venue = %id, "Connection still shared at shutdown, aborting"),
            }
        }
        tracing::info!("Session shut down");
    }

    fn venue(&self, venue: &VenueId) -> Result<&VenueSession, SessionError> {
        self.venues
            .get(venue)
            .ok_or_else(|| ConfigError::UnknownVenue(venue.to_string()).into())
    }

    fn require_gateway(&self) -> Result<&CommandGateway, CommandError> {
        self.gateway
            .as_ref()
            .ok_or_else(|| CommandError::Validation("no command transport configured".into()))
    }
}

impl Drop for TradingSession {
    fn drop(&mut self) {
        for venue in self.venues.values() {
            for task in &venue.tasks {
                task.abort();
            }
        }
    }
}

// ─── Builder ─────────────────────────────────────────────────────────────────

pub struct SessionBuilder {
    config: SessionConfig,
    connector: Option<Arc<dyn Connector>>,
    credentials: Option<Arc<dyn CredentialsProvider>>,
    portfolio: Option<Arc<dyn PortfolioSource>>,
    transports: HashMap<VenueId, Arc<dyn CommandTransport>>,
    event_buffer: usize,
}

impl SessionBuilder {
    /// Stream transport for every venue (defaults to tokio-tungstenite).
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn credentials(mut self, credentials: Arc<dyn CredentialsProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn portfolio(mut self, source: impl PortfolioSource) -> Self {
        self.portfolio = Some(Arc::new(source));
        self
    }

    /// Command transport for one venue, overriding its `rest_url`.
    pub fn transport(mut self, venue: impl Into<VenueId>, transport: Arc<dyn CommandTransport>) -> Self {
        self.transports.insert(venue.into(), transport);
        self
    }

    pub fn event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity.max(1);
        self
    }

    /// Validate, connect every venue and start routing.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(mut self) -> Result<(TradingSession, mpsc::Receiver<SessionEvent>), SessionError> {
        self.config.validate()?;
        let (tx, rx) = mpsc::channel(self.event_buffer);
        let sink = EventSink { tx };

        let gateway = self.build_gateway()?;
        let mut venues = BTreeMap::new();
        for (id, venue_config) in &self.config.venues {
            let venue_id = VenueId::from(id.as_str());
            let session = start_venue(
                venue_id.clone(),
                venue_config,
                self.connector.clone(),
                self.credentials.clone(),
                gateway.clone(),
                sink.clone(),
            )?;
            tracing::info!(venue = %venue_id, url = %venue_config.ws_url, "Venue started");
            venues.insert(venue_id, session);
        }

        Ok((TradingSession { venues, gateway }, rx))
    }

    fn build_gateway(&mut self) -> Result<Option<CommandGateway>, SessionError> {
        let mut builder = CommandGateway::builder().risk_limits(self.config.risk.clone());
        let mut any = false;

        for (id, venue) in &self.config.venues {
            let venue_id = VenueId::from(id.as_str());
            let transport = match self.transports.remove(&venue_id) {
                Some(t) => Some(t),
                None => self.rest_transport(venue)?,
            };
            if let Some(transport) = transport {
                builder = builder.venue(venue_id, transport, venue.gateway.clone());
                any = true;
            }
        }
        if let Some(venue) = self.transports.keys().next() {
            return Err(ConfigError::UnknownVenue(venue.to_string()).into());
        }
        if !any {
            return Ok(None);
        }

        let portfolio = self.portfolio.clone().ok_or_else(|| {
            ConfigError::invalid("portfolio", "a portfolio source is required to place orders")
        })?;
        builder = builder.portfolio(move || portfolio.snapshot());
        Ok(Some(builder.build()?))
    }

    #[cfg(feature = "rest")]
    fn rest_transport(
        &self,
        venue: &VenueConfig,
    ) -> Result<Option<Arc<dyn CommandTransport>>, SessionError> {
        let Some(url) = &venue.rest_url else {
            return Ok(None);
        };
        let timeout = std::time::Duration::from_millis(venue.gateway.request_timeout_ms);
        let mut transport = crate::gateway::RestTransport::new(url, timeout)?;
        if let Some(credentials) = &self.credentials {
            transport = transport.with_credentials(Arc::clone(credentials));
        }
        Ok(Some(Arc::new(transport)))
    }

    #[cfg(not(feature = "rest"))]
    fn rest_transport(
        &self,
        venue: &VenueConfig,
    ) -> Result<Option<Arc<dyn CommandTransport>>, SessionError> {
        if venue.rest_url.is_some() {
            tracing::warn!("rest_url configured but the `rest` feature is disabled");
        }
        Ok(None)
    }
}

// ─── Per-venue wiring ────────────────────────────────────────────────────────

fn start_venue(
    venue: VenueId,
    config: &VenueConfig,
    connector: Option<Arc<dyn Connector>>,
    credentials: Option<Arc<dyn CredentialsProvider>>,
    gateway: Option<CommandGateway>,
    sink: EventSink,
) -> Result<VenueSession, ConnectionError> {
    let router = MessageRouter::new(config.router.clone());
    let market: SharedMarket = Arc::new(Mutex::new(MarketDataAggregator::new(config.market.clone())));
    let subscriptions = register_handlers(&router, &venue, config, &market, gateway, &sink);
    invalidate_books_on_continuity_break(&router, &venue, &market, &sink);

    let mut builder = VenueConnection::builder(venue.clone(), config.ws_url.clone())
        .config(config.connection.clone())
        .router(router.clone());
    if let Some(connector) = connector {
        builder = builder.connector(connector);
    }
    if let Some(credentials) = credentials {
        builder = builder.credentials(credentials);
    }
    let connection = Arc::new(builder.connect()?);

    for channel in &config.channels {
        connection.subscribe(SubscribeParams::channel(*channel))?;
    }

    let tasks = vec![
        tokio::spawn(forward_connection_events(
            venue.clone(),
            connection.events(),
            sink.clone(),
        )),
        tokio::spawn(handle_router_signals(
            venue,
            router.signals(),
            Arc::clone(&connection),
            sink,
        )),
    ];

    Ok(VenueSession {
        connection,
        market,
        subscriptions,
        tasks,
    })
}

fn register_handlers(
    router: &MessageRouter,
    venue: &VenueId,
    config: &VenueConfig,
    market: &SharedMarket,
    gateway: Option<CommandGateway>,
    sink: &EventSink,
) -> Vec<SubscriptionHandle> {
    let mut subs = Vec::new();

    {
        let (venue, market, sink) = (venue.clone(), market.clone(), sink.clone());
        subs.push(router.subscribe(
            Channel::OrderBook,
            move |env: &RawEnvelope| {
                match lock(&market).apply_book_update(&venue, env) {
                    Ok(snapshot) => sink.emit(SessionEvent::Book(snapshot)),
                    Err(error) => sink.emit(diagnostic(&venue, error)),
                }
                Ok(())
            },
            SubscribeOptions::new(),
        ));
    }

    {
        let (venue, market, sink) = (venue.clone(), market.clone(), sink.clone());
        subs.push(router.subscribe(
            Channel::TradeUpdate,
            move |env: &RawEnvelope| {
                let result = lock(&market).apply_trade_detailed(&venue, env);
                match result {
                    Ok(update) if !update.duplicate => {
                        let trade = env.decode::<TradeUpdate>().map(|t| t.payload);
                        if let Ok(trade) = trade {
                            let key = MarketKey::new(venue.clone(), trade.trading_pair.clone());
                            if let Some(command_id) = trade.command_id.clone() {
                                sink.emit(SessionEvent::Fill {
                                    venue: venue.clone(),
                                    command_id,
                                    trade,
                                });
                            }
                            sink.emit(SessionEvent::Candle {
                                key,
                                current: update.current,
                                sealed: update.sealed,
                            });
                        }
                    }
                    Ok(_) => {}
                    Err(error) => sink.emit(diagnostic(&venue, error)),
                }
                Ok(())
            },
            SubscribeOptions::new(),
        ));
    }

    {
        let (venue, market, sink) = (venue.clone(), market.clone(), sink.clone());
        let mut options = SubscribeOptions::new();
        if let Some(ms) = config.market.ticker_batch_ms {
            options = options.batch_interval_ms(ms);
        }
        subs.push(router.subscribe(
            Channel::MarketData,
            move |env: &RawEnvelope| {
                match lock(&market).apply_ticker(&venue, env) {
                    Ok(ticker) => sink.emit(SessionEvent::Ticker(ticker)),
                    Err(error) => sink.emit(diagnostic(&venue, error)),
                }
                Ok(())
            },
            options,
        ));
    }

    {
        let (venue, sink) = (venue.clone(), sink.clone());
        subs.push(router.subscribe(
            Channel::OrderUpdate,
            move |env: &RawEnvelope| {
                let update = match env.decode::<OrderUpdate>() {
                    Ok(typed) => typed.payload,
                    Err(error) => {
                        sink.emit(diagnostic(&venue, error));
                        return Ok(());
                    }
                };
                let status = gateway.as_ref().and_then(|g| g.apply_order_update(&update));
                sink.emit(SessionEvent::OrderUpdated {
                    venue: venue.clone(),
                    update,
                    status,
                });
                Ok(())
            },
            SubscribeOptions::new(),
        ));
    }

    {
        let (venue, sink) = (venue.clone(), sink.clone());
        subs.push(router.subscribe(
            Channel::Error,
            move |env: &RawEnvelope| {
                let message = env
                    .payload
                    .get("message")
                    .and_then(|m| m.as_str())
                    .ok_or_else(|| HandlerError::new("ERROR frame without message"))?;
                sink.emit(SessionEvent::VenueError {
                    venue: venue.clone(),
                    code: env.error_code().map(str::to_string),
                    message: message.to_string(),
                });
                Ok(())
            },
            SubscribeOptions::new(),
        ));
    }

    subs
}

fn diagnostic(venue: &VenueId, error: ProtocolError) -> SessionEvent {
    SessionEvent::Diagnostic {
        venue: venue.clone(),
        error,
    }
}

/// Invalidate the venue's books the moment continuity breaks. Runs on the
/// connection task, so no frame from after the break can be applied to a
/// book that is not yet marked.
///
/// A reset fires on every new connection (deltas were missed while down). An
/// order-book gap fires before the gapped delta is handed to the book handler.
fn invalidate_books_on_continuity_break(
    router: &MessageRouter,
    venue: &VenueId,
    market: &SharedMarket,
    sink: &EventSink,
) {
    let (venue, market, sink) = (venue.clone(), market.clone(), sink.clone());
    router.on_continuity_break(move |event| {
        match event {
            ContinuityBreak::Gap {
                channel: Channel::OrderBook,
                expected,
                received,
            } => {
                tracing::warn!(venue = %venue, expected, received, "Order book gap, invalidating books");
            }
            ContinuityBreak::Gap { .. } => return,
            ContinuityBreak::Reset => {}
        }
        let books = lock(&market).mark_resync(&venue);
        if !books.is_empty() {
            sink.emit(SessionEvent::ResyncRequested {
                venue: venue.clone(),
                books,
            });
        }
    });
}

/// Forward lifecycle events.
async fn forward_connection_events(
    venue: VenueId,
    mut events: broadcast::Receiver<ConnectionEvent>,
    sink: EventSink,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(venue = %venue, skipped, "Session lagged behind connection events");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        sink.emit(SessionEvent::Connection {
            venue: venue.clone(),
            event,
        });
    }
}

/// Forward router signals. An order-book gap also re-requests the channel so
/// the venue sends fresh snapshots; the books themselves were already
/// invalidated on the dispatching task.
async fn handle_router_signals(
    venue: VenueId,
    mut signals: broadcast::Receiver<RouterSignal>,
    connection: Arc<VenueConnection>,
    sink: EventSink,
) {
    loop {
        let signal = match signals.recv().await {
            Ok(signal) => signal,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(venue = %venue, skipped, "Session lagged behind router signals");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        if let RouterSignal::SequenceGap {
            channel: Channel::OrderBook,
            ..
        } = &signal
        {
            if let Err(e) = connection.subscribe(SubscribeParams::channel(Channel::OrderBook)) {
                tracing::error!(venue = %venue, error = %e, "Failed to request order book resync");
            }
        }
        sink.emit(SessionEvent::Router {
            venue: venue.clone(),
            signal,
        });
    }
}
