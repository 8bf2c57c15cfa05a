//! Pinned shard workers (`spec.md` §5): each shard owns a `crossbeam`
//! inbox and processes every command for the accounts hashed onto it on its
//! own thread, so within one `(account, venue, symbol)` submissions, fills,
//! protective evaluations, and journal appends preserve program order.

use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{Receiver, Sender};
use rustc_hash::FxHasher;

use common::{Decimal, MarketKind, OrderStatus, Side, Ts, ValidationError};
use journal::{Event, EventKind};
use position::PositionKey;
use protective::{ProtectiveKindTag, ProtectiveOrder};
use risk::RiskOrderRequest;

use crate::command::{CancelRequest, Command, SubmitOrderOutcome, SubmitOrderRequest};
use crate::errors::CoreError;
use crate::Shared;

/// Route `account_id` onto one of `shard_count` shards. Stable across calls
/// for the same account so all its traffic lands on the same worker thread.
#[must_use]
pub fn shard_for(account_id: &str, shard_count: usize) -> usize {
    let mut hasher = FxHasher::default();
    account_id.hash(&mut hasher);
    (hasher.finish() as usize) % shard_count.max(1)
}

pub(crate) struct ShardHandle {
    pub(crate) tx: Sender<Command>,
    pub(crate) join: Option<JoinHandle<()>>,
}

pub(crate) fn spawn(shard_id: usize, inbox_capacity: usize, shared: Arc<Shared>) -> ShardHandle {
    let (tx, rx) = crossbeam::channel::bounded(inbox_capacity);
    let join = std::thread::Builder::new()
        .name(format!("engine-shard-{shard_id}"))
        .spawn(move || run(shard_id, rx, shared))
        .expect("spawn engine shard thread");
    ShardHandle { tx, join: Some(join) }
}

fn run(shard_id: usize, rx: Receiver<Command>, shared: Arc<Shared>) {
    tracing::info!(shard_id, "engine shard started");
    for cmd in rx.iter() {
        match cmd {
            Command::SubmitOrder { request, reply } => {
                let outcome = process_submit(shard_id, &shared, request);
                let _ = reply.send(outcome);
            }
            Command::Cancel { request, reply } => {
                let outcome = process_cancel(&shared, request);
                let _ = reply.send(outcome);
            }
            Command::Shutdown { ack } => {
                tracing::info!(shard_id, "engine shard draining for shutdown");
                let _ = ack.send(());
                break;
            }
        }
    }
    tracing::info!(shard_id, "engine shard stopped");
}

fn validate(shared: &Shared, request: &SubmitOrderRequest) -> Result<(), ValidationError> {
    if request.quantity.is_zero() || request.quantity.is_neg() {
        return Err(ValidationError::NonPositiveQuantity(request.quantity.to_string()));
    }
    let needs_price = matches!(
        request.order_type,
        common::OrderType::Limit
            | common::OrderType::StopLimit
            | common::OrderType::TakeProfitLimit
            | common::OrderType::LimitMaker
    );
    if needs_price && request.price.is_none() {
        return Err(ValidationError::MissingPrice);
    }
    let Some(info) = shared.symbols.get(&request.symbol) else {
        return Err(ValidationError::BadSymbol(request.symbol.clone()));
    };
    if let Some(price) = request.price {
        if info.round_price(price) != price {
            return Err(ValidationError::TickViolation(price.to_string(), info.tick_size.to_string()));
        }
        let notional = request.quantity.mul(price);
        if notional.cmp_value(info.min_notional) == std::cmp::Ordering::Less {
            return Err(ValidationError::MinNotionalViolation(notional.to_string(), info.min_notional.to_string()));
        }
    }
    if info.round_qty(request.quantity) != request.quantity {
        return Err(ValidationError::StepViolation(request.quantity.to_string(), info.step_size.to_string()));
    }
    Ok(())
}

fn process_submit(shard_id: usize, shared: &Shared, request: SubmitOrderRequest) -> Result<SubmitOrderOutcome, CoreError> {
    let now = Ts::now();
    validate(shared, &request)?;

    shared.journal.append(Event {
        kind: EventKind::Order,
        venue: request.venues.first().cloned().unwrap_or_default(),
        symbol: request.symbol.clone(),
        timestamp: now.as_nanos(),
        data: serde_json::json!({
            "client_id": request.client_id,
            "account_id": request.account_id,
            "side": format!("{:?}", request.side),
            "quantity": request.quantity.to_string(),
            "shard": shard_id,
        }),
    })?;

    let reference_price = request.price.or_else(|| {
        request.venues.first().and_then(|v| shared.market.mid_price(v, &request.symbol))
    });
    let decision = shared.risk.check_order(&RiskOrderRequest {
        account_id: request.account_id.clone(),
        venue: request.venues.first().cloned().unwrap_or_default(),
        symbol: request.symbol.clone(),
        side: request.side,
        price: reference_price.unwrap_or(Decimal::ZERO),
        quantity: request.quantity,
        market_kind: request.market_kind,
    });
    if !decision.passed {
        let reason = decision.rejection_reason.expect("rejected decision carries a reason");
        return Err(CoreError::RiskRejected(reason));
    }

    let config = shared.config.load();
    let options = request.routing.unwrap_or_else(|| {
        config.routing_defaults.to_options(if request.venues.is_empty() { None } else { Some(request.venues.clone()) })
    });
    let plan = shared.router.plan(
        &request.symbol,
        request.side,
        request.quantity,
        &request.venues,
        &options,
        config.assumed_monthly_volume,
    )?;

    let engine_id = shared.order_seq.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    let report = shared.dispatcher.dispatch(&plan, &request.symbol, request.side);

    for disp in &report.children {
        let dispatcher::ChildOutcome::Ack(ack) = &disp.outcome else { continue };
        if ack.filled_quantity.is_zero() {
            continue;
        }
        let venue = &disp.child.venue;
        let key = PositionKey::new(request.account_id.clone(), venue.clone(), request.symbol.clone());
        shared.positions.apply_fill(&key, request.side, ack.filled_quantity, ack.avg_fill_price, now);
        let signed = match request.side {
            Side::Buy => ack.filled_quantity,
            Side::Sell => ack.filled_quantity.neg(),
        };
        shared.risk.update_position(&request.account_id, venue, &request.symbol, signed);

        let _ = shared.journal.append(Event {
            kind: EventKind::Position,
            venue: venue.clone(),
            symbol: request.symbol.clone(),
            timestamp: now.as_nanos(),
            data: serde_json::json!({
                "account_id": request.account_id,
                "engine_id": engine_id,
                "side": format!("{:?}", request.side),
                "status": format!("{:?}", ack.status),
                "filled_quantity": ack.filled_quantity.to_string(),
                "avg_fill_price": ack.avg_fill_price.to_string(),
            }),
        });

        if ack.status == OrderStatus::Filled || ack.status == OrderStatus::PartiallyFilled {
            let triggered = shared.protective.on_price_update(&request.account_id, &request.symbol, ack.avg_fill_price, now);
            for order in &triggered {
                tracing::warn!(account = %request.account_id, symbol = %request.symbol, kind = ?order.kind.tag(), "protective order triggered");
                close_protective_order(shared, order, venue, now);
            }
        }
    }

    if !report.is_fully_dispatched() {
        tracing::warn!(
            account = %request.account_id,
            symbol = %request.symbol,
            filled = report.filled_count(),
            total = report.children.len(),
            "order only partially dispatched"
        );
    }

    Ok(SubmitOrderOutcome { engine_id, plan, dispatch: report })
}

/// Flatten a triggered protective order: build its reduce-only closing
/// order, run it through the same risk-check/route/dispatch path as a live
/// submission, and record the real outcome (`Retired` on a full fill,
/// `RetiredFailed` on a risk rejection, routing failure, or partial
/// dispatch) rather than assuming success.
fn close_protective_order(shared: &Shared, order: &ProtectiveOrder, venue: &str, now: Ts) {
    let symbol = order.symbol.clone();
    let closing_engine_id = shared.order_seq.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    let closing = order.closing_order(closing_engine_id, now);
    let side = closing.side;
    let quantity = closing.quantity;
    let venues = vec![venue.to_string()];

    let decision = shared.risk.check_order(&RiskOrderRequest {
        account_id: order.account_id.clone(),
        venue: venue.to_string(),
        symbol: symbol.clone(),
        side,
        price: order.stop_price,
        quantity,
        market_kind: MarketKind::Spot,
    });
    if !decision.passed {
        tracing::warn!(account = %order.account_id, symbol = %symbol, kind = ?order.kind.tag(), "protective close rejected by risk");
        shared.protective.record_dispatch(&order.account_id, &symbol, order.kind.tag(), false);
        return;
    }

    let config = shared.config.load();
    let options = config.routing_defaults.to_options(Some(venues.clone()));
    let plan = match shared.router.plan(&symbol, side, quantity, &venues, &options, config.assumed_monthly_volume) {
        Ok(plan) => plan,
        Err(e) => {
            tracing::warn!(account = %order.account_id, symbol = %symbol, error = %e, "protective close routing failed");
            shared.protective.record_dispatch(&order.account_id, &symbol, order.kind.tag(), false);
            return;
        }
    };

    let report = shared.dispatcher.dispatch(&plan, &symbol, side);
    for disp in &report.children {
        let dispatcher::ChildOutcome::Ack(ack) = &disp.outcome else { continue };
        if ack.filled_quantity.is_zero() {
            continue;
        }
        let key = PositionKey::new(order.account_id.clone(), disp.child.venue.clone(), symbol.clone());
        shared.positions.apply_fill(&key, side, ack.filled_quantity, ack.avg_fill_price, now);
        let signed = match side {
            Side::Buy => ack.filled_quantity,
            Side::Sell => ack.filled_quantity.neg(),
        };
        shared.risk.update_position(&order.account_id, &disp.child.venue, &symbol, signed);

        let _ = shared.journal.append(Event {
            kind: EventKind::Position,
            venue: disp.child.venue.clone(),
            symbol: symbol.clone(),
            timestamp: now.as_nanos(),
            data: serde_json::json!({
                "account_id": order.account_id,
                "engine_id": closing_engine_id,
                "side": format!("{:?}", side),
                "status": format!("{:?}", ack.status),
                "filled_quantity": ack.filled_quantity.to_string(),
                "avg_fill_price": ack.avg_fill_price.to_string(),
                "protective_kind": format!("{:?}", order.kind.tag()),
            }),
        });
    }

    if !report.is_fully_dispatched() {
        tracing::warn!(account = %order.account_id, symbol = %symbol, kind = ?order.kind.tag(), "protective close only partially dispatched");
    }
    shared.protective.record_dispatch(&order.account_id, &symbol, order.kind.tag(), report.is_fully_dispatched());
}

fn process_cancel(shared: &Shared, request: CancelRequest) -> Result<(), CoreError> {
    match shared.dispatcher.cancel(&request.venue, "", &request.venue_order_id) {
        Ok(()) => {
            tracing::info!(account = %request.account_id, venue = %request.venue, "cancel request sent");
            Ok(())
        }
        Err(e) => {
            tracing::warn!(account = %request.account_id, venue = %request.venue, error = %e, "cancel failed");
            Err(CoreError::DispatchIncomplete { filled: 0, total: 1 })
        }
    }
}

/// Discriminant for the one active protective order per `(account, symbol,
/// kind)`; re-exported so callers building [`CancelRequest`]s for protective
/// closes don't need to depend on `protective` directly.
pub type ProtectiveTag = ProtectiveKindTag;
