//! Messages routed to a shard worker (`spec.md` §5): every cross-thread
//! request, including configuration changes, is a value processed on the
//! target shard's own thread so no reader ever observes a torn update.

use crossbeam::channel::Sender;

use common::{Decimal, MarketKind, OrderType, Side, TimeInForce};
use dispatcher::DispatchReport;
use router::{RoutingOptions, RoutingPlan};

use crate::errors::CoreError;

/// A parent order submitted by a strategy or the CLI.
#[derive(Debug, Clone)]
pub struct SubmitOrderRequest {
    /// Caller-supplied id, unique per account.
    pub client_id: String,
    /// Account submitting the order.
    pub account_id: String,
    /// Canonical symbol, e.g. `BTC/USDT`.
    pub symbol: String,
    /// Buy or sell.
    pub side: Side,
    /// Order type; only limit-family types require `price`.
    pub order_type: OrderType,
    /// Time-in-force instruction, forwarded to venue adapters.
    pub time_in_force: TimeInForce,
    /// Limit/reference price; required for limit-family `order_type`s.
    pub price: Option<Decimal>,
    /// Requested quantity.
    pub quantity: Decimal,
    /// Market kind; leverage is only checked for `Futures`.
    pub market_kind: MarketKind,
    /// Venues eligible for this order.
    pub venues: Vec<String>,
    /// Routing constraints; `None` applies the engine's configured defaults.
    pub routing: Option<RoutingOptions>,
}

/// Successful outcome of [`SubmitOrderRequest`] processing.
#[derive(Debug, Clone)]
pub struct SubmitOrderOutcome {
    /// Engine-assigned id, unique for the process lifetime.
    pub engine_id: u64,
    /// The plan the router produced.
    pub plan: RoutingPlan,
    /// Per-child dispatch results.
    pub dispatch: DispatchReport,
}

/// A cancellation request for a previously dispatched child order.
#[derive(Debug, Clone)]
pub struct CancelRequest {
    /// Account the order was submitted under.
    pub account_id: String,
    /// Venue the child order was sent to.
    pub venue: String,
    /// Venue-assigned order identifier.
    pub venue_order_id: String,
}

pub(crate) enum Command {
    SubmitOrder { request: SubmitOrderRequest, reply: Sender<Result<SubmitOrderOutcome, CoreError>> },
    Cancel { request: CancelRequest, reply: Sender<Result<(), CoreError>> },
    Shutdown { ack: Sender<()> },
}
