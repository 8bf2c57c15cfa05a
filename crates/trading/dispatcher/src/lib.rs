//! Parallel child-order submission, retry, and reconciliation (`spec.md` §4.8).
//!
//! Given a [`router::RoutingPlan`], the [`Dispatcher`] submits every child
//! order to its assigned venue concurrently, retrying transient venue errors
//! with exponential backoff and jitter. Terminal errors (`OrderRejected`,
//! `InsufficientBalance`) fail the child immediately. A failed child never
//! unwinds its siblings: the parent's fill state is whatever the children
//! collectively achieved.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use common::{Decimal, OrderStatus, Side, VenueError};
use dashmap::DashMap;
use router::{ChildOrder, RoutingPlan};

/// A venue's acknowledgement of a submitted (or queried) order.
#[derive(Debug, Clone, PartialEq)]
pub struct VenueAck {
    /// Venue-assigned order identifier.
    pub venue_order_id: String,
    /// Current status as reported by the venue.
    pub status: OrderStatus,
    /// Cumulative filled quantity as reported by the venue.
    pub filled_quantity: Decimal,
    /// Volume-weighted average fill price as reported by the venue.
    pub avg_fill_price: Decimal,
}

/// Static venue metadata (`spec.md` §6 `info()`).
#[derive(Debug, Clone, PartialEq)]
pub struct VenueInfo {
    /// Venue name, e.g. `"binance"`.
    pub name: String,
    /// `true` for a sandbox/testnet endpoint.
    pub testnet: bool,
    /// Canonical symbols this venue supports.
    pub supported_symbols: Vec<String>,
}

/// Abstraction over a single venue connection. Real connectors (Binance,
/// Zerodha, ...) are out of scope; implementors perform whatever I/O a venue
/// requires and translate its failures into [`VenueError`]. Streaming
/// subscriptions (`subscribe_market_data`/`subscribe_user_data`) aren't part
/// of this trait: this workspace has no async runtime, so market and user
/// data instead arrive as direct calls into [`market_state::MarketState`]
/// and [`position::PositionTracker`] from whatever feed handler owns the
/// venue connection.
pub trait VenueAdapter: Send + Sync {
    /// Submit a new order. `NetworkTimeout`'s payload should carry whatever
    /// reference the venue gave for this attempt (if any), so a caller can
    /// later call [`VenueAdapter::query_status`] with it.
    fn submit(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
        limit_price: Option<Decimal>,
    ) -> Result<VenueAck, VenueError>;

    /// Query a previously submitted order by venue-assigned reference.
    fn query_status(&self, venue_order_id: &str) -> Result<VenueAck, VenueError>;

    /// Cancel a previously submitted order.
    fn cancel(&self, symbol: &str, venue_order_id: &str) -> Result<(), VenueError>;

    /// Static venue metadata.
    fn info(&self) -> VenueInfo;
}

/// Exponential backoff with jitter for transient venue errors.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of submission attempts per child (including the first).
    pub max_attempts: u32,
    /// Backoff delay after the first failed attempt.
    pub base_delay: Duration,
    /// Backoff delay is capped here regardless of attempt count.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 5, base_delay: Duration::from_millis(50), max_delay: Duration::from_secs(2) }
    }
}

impl RetryPolicy {
    /// Backoff delay before attempt `attempt` (1-indexed retry count, i.e.
    /// called with `1` before the second submission attempt), jittered by
    /// up to ±25% so concurrently retrying children don't lock-step.
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(1u32 << attempt.min(16));
        let capped = exp.min(self.max_delay);
        let jitter = 1.0 + (rand::random::<f64>() - 0.5) * 0.5;
        capped.mul_f64(jitter.max(0.0))
    }
}

/// How one child order's dispatch attempt concluded.
#[derive(Debug, Clone, PartialEq)]
pub enum ChildOutcome {
    /// The venue accepted (and possibly filled) the order.
    Ack(VenueAck),
    /// Every attempt failed; terminal errors fail on the first attempt.
    Failed(String),
}

impl ChildOutcome {
    /// `true` if the venue acknowledged the order at all (not necessarily
    /// fully filled).
    #[must_use]
    pub fn is_ack(&self) -> bool {
        matches!(self, Self::Ack(_))
    }
}

/// The result of dispatching one child order.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildDispatch {
    /// The child order as planned.
    pub child: ChildOrder,
    /// How it concluded.
    pub outcome: ChildOutcome,
    /// Number of submission attempts made (including the first).
    pub attempts: u32,
}

/// Aggregate result of dispatching a [`RoutingPlan`]'s children.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchReport {
    /// Parent order quantity the plan was meant to satisfy.
    pub parent_quantity: Decimal,
    /// Per-child results, in the same order as the plan's children.
    pub children: Vec<ChildDispatch>,
}

impl DispatchReport {
    /// Count of children the venue acknowledged.
    #[must_use]
    pub fn filled_count(&self) -> usize {
        self.children.iter().filter(|c| c.outcome.is_ack()).count()
    }

    /// Count of children that exhausted retries or hit a terminal error.
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.children.len() - self.filled_count()
    }

    /// `true` only if every child was acknowledged by its venue.
    #[must_use]
    pub fn is_fully_dispatched(&self) -> bool {
        self.failed_count() == 0
    }

    /// Sum of filled quantity across acknowledged children. Does not imply
    /// the parent is fully filled: a venue may acknowledge an order without
    /// an immediate fill.
    #[must_use]
    pub fn total_filled_quantity(&self) -> Decimal {
        self.children
            .iter()
            .filter_map(|c| match &c.outcome {
                ChildOutcome::Ack(ack) => Some(ack.filled_quantity),
                ChildOutcome::Failed(_) => None,
            })
            .fold(Decimal::ZERO, |acc, q| acc + q)
    }
}

/// Errors raised registering or looking up a venue.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DispatchError {
    /// A child referenced a venue with no registered adapter.
    #[error("no adapter registered for venue {0}")]
    VenueNotRegistered(String),
    /// The venue rejected a cancel request.
    #[error("cancel failed: {0}")]
    CancelFailed(String),
}

/// Submits a [`RoutingPlan`]'s children in parallel, one thread per child,
/// retrying transient venue errors per `retry`.
pub struct Dispatcher {
    adapters: DashMap<String, Arc<dyn VenueAdapter>>,
    retry: RetryPolicy,
}

impl Dispatcher {
    /// Build a dispatcher with the given retry policy.
    #[must_use]
    pub fn new(retry: RetryPolicy) -> Self {
        Self { adapters: DashMap::new(), retry }
    }

    /// Register (or replace) the adapter used for `venue`.
    pub fn register_venue(&self, venue: &str, adapter: Arc<dyn VenueAdapter>) {
        self.adapters.insert(venue.to_string(), adapter);
    }

    /// Cancel a previously submitted order on `venue`.
    pub fn cancel(&self, venue: &str, symbol: &str, venue_order_id: &str) -> Result<(), DispatchError> {
        let Some(adapter) = self.adapters.get(venue).map(|a| Arc::clone(a.value())) else {
            return Err(DispatchError::VenueNotRegistered(venue.to_string()));
        };
        match adapter.cancel(symbol, venue_order_id) {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!(venue, error = %e, "cancel request failed");
                Err(DispatchError::CancelFailed(e.to_string()))
            }
        }
    }

    /// Submit every child in `plan` concurrently and wait for all of them to
    /// conclude (success, terminal failure, or retry exhaustion).
    #[must_use]
    pub fn dispatch(&self, plan: &RoutingPlan, symbol: &str, side: Side) -> DispatchReport {
        let results: Vec<ChildDispatch> = std::thread::scope(|scope| {
            let handles: Vec<_> = plan
                .children
                .iter()
                .map(|child| scope.spawn(|| self.submit_child(child, symbol, side)))
                .collect();
            handles.into_iter().map(|h| h.join().expect("dispatch worker thread panicked")).collect()
        });
        DispatchReport { parent_quantity: plan.parent_quantity, children: results }
    }

    fn submit_child(&self, child: &ChildOrder, symbol: &str, side: Side) -> ChildDispatch {
        let Some(adapter) = self.adapters.get(&child.venue).map(|a| Arc::clone(a.value())) else {
            return ChildDispatch {
                child: child.clone(),
                outcome: ChildOutcome::Failed(DispatchError::VenueNotRegistered(child.venue.clone()).to_string()),
                attempts: 0,
            };
        };

        let mut last_error = String::new();
        for attempt in 1..=self.retry.max_attempts {
            match adapter.submit(symbol, side, child.quantity, child.limit_price) {
                Ok(ack) => return ChildDispatch { child: child.clone(), outcome: ChildOutcome::Ack(ack), attempts: attempt },
                Err(VenueError::NetworkTimeout(reference)) => {
                    // No response within bound: check whether the order actually
                    // landed before treating this attempt as a failure.
                    if let Ok(ack) = adapter.query_status(&reference) {
                        return ChildDispatch { child: child.clone(), outcome: ChildOutcome::Ack(ack), attempts: attempt };
                    }
                    last_error = VenueError::NetworkTimeout(reference).to_string();
                }
                Err(e) if e.is_transient() => {
                    last_error = e.to_string();
                }
                Err(e) => {
                    tracing::warn!(venue = %child.venue, error = %e, "terminal venue error, not retrying");
                    return ChildDispatch { child: child.clone(), outcome: ChildOutcome::Failed(e.to_string()), attempts: attempt };
                }
            }
            if attempt < self.retry.max_attempts {
                std::thread::sleep(self.retry.delay_for(attempt));
            }
        }
        tracing::warn!(venue = %child.venue, attempts = self.retry.max_attempts, "retries exhausted");
        ChildDispatch { child: child.clone(), outcome: ChildOutcome::Failed(last_error), attempts: self.retry.max_attempts }
    }
}
