//! Command gateway: validated, risk-checked, circuit-broken order dispatch.
//!
//! Every submit runs, in order:
//! 1. parameter validation and notional bounds
//! 2. the pre-trade risk check against a fresh portfolio snapshot
//! 3. the destination's in-flight limit (a semaphore permit)
//! 4. the destination's circuit breaker
//! 5. the transport, retried on transient errors with the same command id
//!
//! A failure at steps 1, 2 or 4 never reaches the network.

pub mod breaker;
pub mod transport;

#[cfg(feature = "rest")]
pub mod rest;

pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState};
pub use transport::CommandTransport;

#[cfg(feature = "rest")]
pub use rest::RestTransport;

use crate::domain::order::state::TrackedOrder;
use crate::domain::order::wire::OrderUpdate;
use crate::domain::order::{Acknowledgement, OrderCommand, OrderStatus, OrderTracker};
use crate::domain::portfolio::PortfolioState;
use crate::error::{CommandError, ConfigError};
use crate::retry::BackoffConfig;
use crate::risk::{self, RiskLimits};
use crate::shared::{serde_util, CommandId, Decimal, VenueId};
use breaker::Admission;
use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Bound on each attempt's round trip.
    pub request_timeout_ms: u64,
    /// Attempts per command, including the first.
    pub max_attempts: u32,
    pub retry: BackoffConfig,
    pub breaker: CircuitBreakerConfig,
    /// Concurrent commands per destination.
    pub max_in_flight: usize,
    #[serde(with = "serde_util::decimal_opt")]
    pub min_order_value: Option<Decimal>,
    #[serde(with = "serde_util::decimal_opt")]
    pub max_order_value: Option<Decimal>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 500,
            max_attempts: 3,
            retry: BackoffConfig::command(),
            breaker: CircuitBreakerConfig::default(),
            max_in_flight: 50,
            min_order_value: Some(Decimal::from(10)),
            max_order_value: Some(Decimal::from(100_000)),
        }
    }
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::invalid("gateway.request_timeout_ms", "must be > 0"));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("gateway.max_attempts", "must be > 0"));
        }
        if self.max_in_flight == 0 {
            return Err(ConfigError::invalid("gateway.max_in_flight", "must be > 0"));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::invalid(
                "gateway.breaker.failure_threshold",
                "must be > 0",
            ));
        }
        if self.retry.backoff_factor < 1.0 {
            return Err(ConfigError::invalid("gateway.retry.backoff_factor", "must be >= 1"));
        }
        if let (Some(min), Some(max)) = (self.min_order_value, self.max_order_value) {
            if min > max {
                return Err(ConfigError::invalid(
                    "gateway.min_order_value",
                    format!("{} exceeds max_order_value {}", min, max),
                ));
            }
        }
        Ok(())
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    fn check_notional(&self, command: &OrderCommand) -> Result<(), CommandError> {
        let Some(notional) = command.notional() else {
            return Ok(());
        };
        if let Some(min) = self.min_order_value {
            if notional < min {
                return Err(CommandError::Validation(format!(
                    "order value {} below minimum {}",
                    notional, min
                )));
            }
        }
        if let Some(max) = self.max_order_value {
            if notional > max {
                return Err(CommandError::Validation(format!(
                    "order value {} above maximum {}",
                    notional, max
                )));
            }
        }
        Ok(())
    }
}

// ─── Portfolio source ────────────────────────────────────────────────────────

/// Supplies the portfolio snapshot each risk check runs against.
pub trait PortfolioSource: Send + Sync + 'static {
    fn snapshot(&self) -> PortfolioState;
}

impl<F> PortfolioSource for F
where
    F: Fn() -> PortfolioState + Send + Sync + 'static,
{
    fn snapshot(&self) -> PortfolioState {
        self()
    }
}

impl PortfolioSource for PortfolioState {
    fn snapshot(&self) -> PortfolioState {
        self.clone()
    }
}

// ─── Destinations ────────────────────────────────────────────────────────────

struct Destination {
    venue: VenueId,
    config: GatewayConfig,
    transport: Arc<dyn CommandTransport>,
    breaker: Mutex<CircuitBreaker>,
    permits: Arc<Semaphore>,
}

impl Destination {
    fn breaker(&self) -> MutexGuard<'_, CircuitBreaker> {
        self.breaker.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn admit(&self) -> Result<BreakerCall<'_>, CommandError> {
        match self.breaker().try_acquire(Instant::now()) {
            Ok(admission) => Ok(BreakerCall {
                dest: self,
                admission,
                settled: false,
            }),
            Err(retry_after_ms) => {
                tracing::warn!(venue = %self.venue, retry_after_ms, "Circuit open, failing fast");
                Err(CommandError::CircuitOpen {
                    destination: self.venue.to_string(),
                    retry_after_ms,
                })
            }
        }
    }
}

/// An admitted call. Reports its outcome to the breaker exactly once; a call
/// dropped before settling releases a HalfOpen trial slot.
struct BreakerCall<'a> {
    dest: &'a Destination,
    admission: Admission,
    settled: bool,
}

impl BreakerCall<'_> {
    /// Only transient errors count as failures; a venue rejection proves the
    /// destination is reachable.
    fn settle<T>(mut self, result: &Result<T, CommandError>) {
        let mut breaker = self.dest.breaker();
        match result {
            Err(e) if e.is_transient() => breaker.record_failure(self.admission, Instant::now()),
            _ => breaker.record_success(self.admission),
        }
        self.settled = true;
    }
}

impl Drop for BreakerCall<'_> {
    fn drop(&mut self) {
        if !self.settled && self.admission.is_trial() {
            self.dest.breaker().abandon_trial(self.admission);
        }
    }
}

// ─── Gateway ─────────────────────────────────────────────────────────────────

struct GatewayInner {
    limits: RiskLimits,
    portfolio: Arc<dyn PortfolioSource>,
    destinations: HashMap<VenueId, Arc<Destination>>,
    orders: Mutex<OrderTracker>,
}

/// Dispatches order commands to registered venues. Cheap to clone.
#[derive(Clone)]
pub struct CommandGateway {
    inner: Arc<GatewayInner>,
}

impl std::fmt::Debug for CommandGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut venues: Vec<_> = self.inner.destinations.keys().collect();
        venues.sort();
        f.debug_struct("CommandGateway")
            .field("venues", &venues)
            .field("limits", &self.inner.limits)
            .finish()
    }
}

impl CommandGateway {
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::default()
    }

    /// Place an order. Resolves with the venue's acknowledgement.
    pub async fn submit(&self, command: OrderCommand) -> Result<Acknowledgement, CommandError> {
        let dest = self.prepare(&command)?;
        let _permit = dest
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| CommandError::Cancelled)?;
        self.dispatch(&dest, &command).await
    }

    /// Like [`submit`](Self::submit), but returns a handle that can withdraw
    /// the command while it is still queued for an in-flight slot.
    pub fn submit_cancellable(&self, command: OrderCommand) -> Result<InFlightSubmit, CommandError> {
        let dest = self.prepare(&command)?;
        let phase = Arc::new(AtomicU8::new(PHASE_QUEUED));
        let (withdraw_tx, mut withdraw_rx) = oneshot::channel::<()>();

        let id = command.id.clone();
        let venue = command.venue.clone();
        let gateway = self.clone();
        let task_phase = phase.clone();
        let handle = tokio::spawn(async move {
            let permit = tokio::select! {
                Ok(()) = &mut withdraw_rx => return Err(CommandError::Cancelled),
                permit = dest.permits.clone().acquire_owned() => permit,
            };
            let _permit = permit.map_err(|_| CommandError::Cancelled)?;
            if task_phase
                .compare_exchange(PHASE_QUEUED, PHASE_DISPATCHED, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return Err(CommandError::Cancelled);
            }
            gateway.dispatch(&dest, &command).await
        });

        Ok(InFlightSubmit {
            id,
            venue,
            gateway: self.clone(),
            phase,
            withdraw: Some(withdraw_tx),
            handle,
        })
    }

    /// Cancel a previously submitted command on its venue.
    pub async fn cancel(&self, venue: &VenueId, id: &CommandId) -> Result<bool, CommandError> {
        let dest = self.destination(venue)?;
        let _permit = dest
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| CommandError::Cancelled)?;

        let call = dest.admit()?;
        let transport = dest.transport.clone();
        let result = with_retry(&dest.config, "cancel", id, || {
            let transport = transport.clone();
            let id = id.clone();
            async move { transport.cancel(&id).await }
        })
        .await;
        call.settle(&result);

        if let Ok(true) = result {
            tracing::info!(venue = %venue, command_id = %id, "Order cancelled");
            self.apply_order_update(&OrderUpdate {
                command_id: id.clone(),
                venue_order_id: None,
                status: OrderStatus::Cancelled,
                filled_size: None,
                reason: Some("cancelled by client".into()),
            });
        }
        result
    }

    /// Fold an `ORDER_UPDATE` into the order table.
    pub fn apply_order_update(&self, update: &OrderUpdate) -> Option<OrderStatus> {
        self.orders().apply(update)
    }

    pub fn order(&self, id: &CommandId) -> Option<TrackedOrder> {
        self.orders().get(id).cloned()
    }

    pub fn open_orders(&self) -> Vec<TrackedOrder> {
        self.orders().open_orders().cloned().collect()
    }

    pub fn circuit(&self, venue: &VenueId) -> Option<CircuitSnapshot> {
        self.inner
            .destinations
            .get(venue)
            .map(|d| d.breaker().snapshot())
    }

    pub fn has_venue(&self, venue: &VenueId) -> bool {
        self.inner.destinations.contains_key(venue)
    }

    // ── Internals ────────────────────────────────────────────────────────

    fn orders(&self) -> MutexGuard<'_, OrderTracker> {
        self.inner.orders.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn destination(&self, venue: &VenueId) -> Result<Arc<Destination>, CommandError> {
        self.inner
            .destinations
            .get(venue)
            .cloned()
            .ok_or_else(|| CommandError::Validation(format!("no transport for venue {}", venue)))
    }

    /// Steps that never touch the network.
    fn prepare(&self, command: &OrderCommand) -> Result<Arc<Destination>, CommandError> {
        command.validate()?;
        let dest = self.destination(&command.venue)?;
        dest.config.check_notional(command)?;

        let portfolio = self.inner.portfolio.snapshot();
        if let Err(violation) = risk::validate(command, &portfolio, &self.inner.limits) {
            tracing::warn!(
                venue = %command.venue,
                command_id = %command.id,
                limit = %violation.limit,
                "Risk check rejected command"
            );
            return Err(violation.into());
        }
        Ok(dest)
    }

    async fn dispatch(
        &self,
        dest: &Destination,
        command: &OrderCommand,
    ) -> Result<Acknowledgement, CommandError> {
        let call = dest.admit()?;
        self.orders().insert_pending(command);

        let transport = dest.transport.clone();
        let result = with_retry(&dest.config, "submit", &command.id, || {
            let transport = transport.clone();
            async move { transport.submit(command).await }
        })
        .await;
        call.settle(&result);

        match &result {
            Ok(ack) => {
                tracing::info!(
                    venue = %dest.venue,
                    command_id = %command.id,
                    status = ?ack.status,
                    "Command acknowledged"
                );
                self.orders().acknowledge(ack);
            }
            Err(e) => {
                tracing::error!(venue = %dest.venue, command_id = %command.id, error = %e, "Command failed");
                self.orders().fail(&command.id, e.to_string());
            }
        }
        result
    }
}

/// Run `op` with a per-attempt timeout, retrying transient failures.
async fn with_retry<T, F, Fut>(
    config: &GatewayConfig,
    operation: &str,
    id: &CommandId,
    mut op: F,
) -> Result<T, CommandError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CommandError>>,
{
    let max_attempts = config.max_attempts.max(1);
    let timeout = config.request_timeout();
    let mut attempt = 0;

    loop {
        let result = match tokio::time::timeout(timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(CommandError::Timeout(config.request_timeout_ms)),
        };
        attempt += 1;

        let err = match result {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => e,
        };
        if attempt >= max_attempts {
            return Err(CommandError::MaxRetriesExceeded {
                attempts: attempt,
                last_error: err.to_string(),
            });
        }

        let delay = match &err {
            CommandError::RateLimited {
                retry_after_ms: Some(ms),
            } => Duration::from_millis(*ms).min(config.retry.max_delay()),
            _ => config.retry.delay_for_attempt(attempt - 1),
        };
        tracing::debug!(
            operation,
            command_id = %id,
            attempt,
            max = max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Retrying command"
        );
        tokio::time::sleep(delay).await;
    }
}

// ─── Builder ─────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct GatewayBuilder {
    config: GatewayConfig,
    limits: RiskLimits,
    portfolio: Option<Arc<dyn PortfolioSource>>,
    transports: Vec<(VenueId, Arc<dyn CommandTransport>, Option<GatewayConfig>)>,
}

impl GatewayBuilder {
    /// Config applied to venues registered without their own.
    pub fn config(mut self, config: GatewayConfig) -> Self {
        self.config = config;
        self
    }

    pub fn risk_limits(mut self, limits: RiskLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn portfolio(mut self, source: impl PortfolioSource) -> Self {
        self.portfolio = Some(Arc::new(source));
        self
    }

    pub fn transport(mut self, venue: impl Into<VenueId>, transport: Arc<dyn CommandTransport>) -> Self {
        self.transports.push((venue.into(), transport, None));
        self
    }

    pub fn venue(
        mut self,
        venue: impl Into<VenueId>,
        transport: Arc<dyn CommandTransport>,
        config: GatewayConfig,
    ) -> Self {
        self.transports.push((venue.into(), transport, Some(config)));
        self
    }

    pub fn build(self) -> Result<CommandGateway, ConfigError> {
        let portfolio = self
            .portfolio
            .ok_or_else(|| ConfigError::invalid("gateway.portfolio", "a portfolio source is required"))?;

        let mut destinations = HashMap::new();
        for (venue, transport, config) in self.transports {
            let config = config.unwrap_or_else(|| self.config.clone());
            config.validate()?;
            let dest = Destination {
                venue: venue.clone(),
                breaker: Mutex::new(CircuitBreaker::new(config.breaker.clone())),
                permits: Arc::new(Semaphore::new(config.max_in_flight)),
                transport,
                config,
            };
            if destinations.insert(venue.clone(), Arc::new(dest)).is_some() {
                return Err(ConfigError::invalid(
                    "gateway.venues",
                    format!("venue {} registered twice", venue),
                ));
            }
        }

        Ok(CommandGateway {
            inner: Arc::new(GatewayInner {
                limits: self.limits,
                portfolio,
                destinations,
                orders: Mutex::new(OrderTracker::new()),
            }),
        })
    }
}

// ─── In-flight submits ───────────────────────────────────────────────────────

const PHASE_QUEUED: u8 = 0;
const PHASE_DISPATCHED: u8 = 1;
const PHASE_WITHDRAWN: u8 = 2;

/// Result of cancelling an [`InFlightSubmit`].
#[derive(Debug, Clone, PartialEq)]
pub enum CancelOutcome {
    /// Withdrawn before any bytes were sent.
    Withdrawn,
    /// Already dispatched; a venue cancel was issued. Carries whether the
    /// venue cancelled anything.
    CancelIssued(bool),
    /// The submit was definitively rejected, so there was nothing to cancel.
    NotPlaced(CommandError),
}

/// A submit running on its own task.
#[must_use = "dropping the handle detaches the submit"]
pub struct InFlightSubmit {
    id: CommandId,
    venue: VenueId,
    gateway: CommandGateway,
    phase: Arc<AtomicU8>,
    withdraw: Option<oneshot::Sender<()>>,
    handle: JoinHandle<Result<Acknowledgement, CommandError>>,
}

impl InFlightSubmit {
    pub fn id(&self) -> &CommandId {
        &self.id
    }

    /// Wait for the acknowledgement.
    pub async fn wait(self) -> Result<Acknowledgement, CommandError> {
        join(self.handle).await
    }

    /// Withdraw if still queued, otherwise wait for the outcome and cancel on
    /// the venue. A submit that timed out may still have landed, so it is
    /// cancelled too.
    pub async fn cancel(mut self) -> Result<CancelOutcome, CommandError> {
        let withdrawn = self
            .phase
            .compare_exchange(PHASE_QUEUED, PHASE_WITHDRAWN, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if withdrawn {
            if let Some(tx) = self.withdraw.take() {
                let _ = tx.send(());
            }
            tracing::info!(venue = %self.venue, command_id = %self.id, "Submit withdrawn before dispatch");
            self.gateway.orders().fail(&self.id, "withdrawn before dispatch");
            return Ok(CancelOutcome::Withdrawn);
        }

        match join(self.handle).await {
            Ok(_) => {}
            Err(e) if e.is_transient() => {}
            Err(e) => return Ok(CancelOutcome::NotPlaced(e)),
        }
        let cancelled = self.gateway.cancel(&self.venue, &self.id).await?;
        Ok(CancelOutcome::CancelIssued(cancelled))
    }
}

impl std::fmt::Debug for InFlightSubmit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlightSubmit")
            .field("id", &self.id)
            .field("venue", &self.venue)
            .field("phase", &self.phase.load(Ordering::Acquire))
            .finish()
    }
}

async fn join(
    handle: JoinHandle<Result<Acknowledgement, CommandError>>,
) -> Result<Acknowledgement, CommandError> {
    match handle.await {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => Err(CommandError::Cancelled),
        Err(e) => Err(CommandError::Transport(format!("submit task panicked: {}", e))),
    }
}
