//! Pre-trade risk decision engine (`spec.md` §4.5), the hardest component in
//! the system. `check_order` runs a short-circuit procedure against
//! snapshot state held in sharded concurrent maps so no two accounts
//! contend on the same lock.
//!
//! Global scalars (`current_exposure`, `daily_pnl`) are guarded by
//! `parking_lot::RwLock` rather than raw atomics: unlike the fixed-point
//! `i64` quantities this design grew out of, [`Decimal`] doesn't fit a CPU
//! register, so the snapshot is a short read/write-locked cell instead of a
//! single atomic load.

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use common::{Account, Decimal, LimitKind, MarketKind, Side, TriggerAction, Ts};
use dashmap::DashMap;
use parking_lot::RwLock;

/// Reason a [`RiskDecision`] rejected an order.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectionReason {
    /// Account is not registered.
    UnknownAccount,
    /// Account is registered but not active.
    AccountInactive,
    /// `notional > max_order_value`.
    OrderValueExceeded,
    /// `|new_qty| > max_position_size`.
    PositionSizeExceeded,
    /// `leverage > max_leverage` (futures only).
    LeverageExceeded,
    /// Daily loss cap breached in strict mode.
    DailyLossExceeded,
    /// `current_exposure + notional > max_exposure`.
    ExposureExceeded,
    /// An account-specific limit's escalation ladder hit `Restrict`/`CloseAll`.
    AccountLimit(LimitKind),
}

/// Metrics consulted while reaching a [`RiskDecision`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DecisionSnapshot {
    /// `price * quantity` of the candidate order.
    pub notional: Decimal,
    /// Post-trade position size, signed (positive long, negative short).
    pub new_position_qty: Decimal,
    /// Computed leverage, zero outside futures.
    pub leverage: Decimal,
    /// Account/global daily P&L at decision time.
    pub daily_pnl: Decimal,
    /// Aggregate exposure at decision time, including this order's notional.
    pub current_exposure: Decimal,
}

/// Outcome of [`RiskEngine::check_order`].
#[derive(Debug, Clone, PartialEq)]
pub struct RiskDecision {
    /// Whether the order may proceed.
    pub passed: bool,
    /// Why it was rejected, if `!passed`.
    pub rejection_reason: Option<RejectionReason>,
    /// Non-blocking warnings attached along the way.
    pub warnings: Vec<String>,
    /// The metrics consulted to reach this decision.
    pub snapshot: DecisionSnapshot,
}

impl RiskDecision {
    fn pass(snapshot: DecisionSnapshot, warnings: Vec<String>) -> Self {
        Self { passed: true, rejection_reason: None, warnings, snapshot }
    }

    fn reject(reason: RejectionReason, snapshot: DecisionSnapshot, warnings: Vec<String>) -> Self {
        Self { passed: false, rejection_reason: Some(reason), warnings, snapshot }
    }
}

/// Candidate order submitted to [`RiskEngine::check_order`].
#[derive(Debug, Clone)]
pub struct RiskOrderRequest {
    /// Account submitting the order.
    pub account_id: String,
    /// Venue the order would be sent to.
    pub venue: String,
    /// Canonical symbol.
    pub symbol: String,
    /// Buy or sell.
    pub side: Side,
    /// Limit or reference price used for value/leverage computation.
    pub price: Decimal,
    /// Order quantity.
    pub quantity: Decimal,
    /// Market kind; leverage is only checked for `Futures`.
    pub market_kind: MarketKind,
}

/// Global (non-account-scoped) limit configuration.
#[derive(Debug, Clone, Copy)]
pub struct GlobalLimits {
    /// Maximum notional value of a single order.
    pub max_order_value: Decimal,
    /// Maximum absolute post-trade position size.
    pub max_position_size: Decimal,
    /// Maximum leverage, futures only.
    pub max_leverage: Decimal,
    /// Maximum daily loss before the engine rejects (strict mode) or warns.
    pub max_daily_loss: Decimal,
    /// Maximum aggregate exposure across all accounts.
    pub max_exposure: Decimal,
    /// Whether breaching `max_daily_loss` rejects outright instead of warning.
    pub strict_daily_loss: bool,
}

impl Default for GlobalLimits {
    fn default() -> Self {
        Self {
            max_order_value: Decimal::from_i64(1_000_000),
            max_position_size: Decimal::from_i64(100_000),
            max_leverage: Decimal::from_i64(20),
            max_daily_loss: Decimal::from_i64(50_000),
            max_exposure: Decimal::from_i64(10_000_000),
            strict_daily_loss: false,
        }
    }
}

/// Lifetime and same-day counters, updated with atomic fetch-adds.
#[derive(Default)]
pub struct RiskMetrics {
    /// Orders checked since process start.
    pub orders_checked: AtomicU64,
    /// Orders rejected since process start.
    pub orders_rejected: AtomicU64,
    /// Sum of processing time, nanoseconds, since process start.
    pub processing_time_ns_sum: AtomicU64,
    /// Orders checked since the last daily reset.
    pub daily_orders_checked: AtomicU64,
    /// Orders rejected since the last daily reset.
    pub daily_orders_rejected: AtomicU64,
}

impl RiskMetrics {
    /// Average processing time across the engine's lifetime, nanoseconds.
    #[must_use]
    pub fn avg_processing_time_ns(&self) -> u64 {
        let checked = self.orders_checked.load(Ordering::Relaxed);
        if checked == 0 {
            return 0;
        }
        self.processing_time_ns_sum.load(Ordering::Relaxed) / checked
    }
}

type PositionKey = (String, String, String);

/// The pre-trade risk engine.
pub struct RiskEngine {
    enabled: AtomicBool,
    limits: RwLock<GlobalLimits>,
    current_exposure: RwLock<Decimal>,
    daily_pnl: RwLock<Decimal>,
    accounts: DashMap<String, Account>,
    positions: DashMap<PositionKey, Decimal>,
    balances: DashMap<PositionKey, Decimal>,
    metrics: RiskMetrics,
}

impl RiskEngine {
    /// New engine, enabled, with default global limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(GlobalLimits::default())
    }

    /// New engine, enabled, with the given global limits.
    #[must_use]
    pub fn with_limits(limits: GlobalLimits) -> Self {
        Self {
            enabled: AtomicBool::new(true),
            limits: RwLock::new(limits),
            current_exposure: RwLock::new(Decimal::ZERO),
            daily_pnl: RwLock::new(Decimal::ZERO),
            accounts: DashMap::new(),
            positions: DashMap::new(),
            balances: DashMap::new(),
            metrics: RiskMetrics::default(),
        }
    }

    /// Enable or disable the engine. While disabled, every order passes with
    /// no checks performed.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Register or replace an account's configuration.
    pub fn register_account(&self, account: Account) {
        self.accounts.insert(account.id.clone(), account);
    }

    /// Update the tracked signed position quantity for `(account, venue, symbol)`.
    pub fn update_position(&self, account_id: &str, venue: &str, symbol: &str, signed_qty: Decimal) {
        self.positions.insert(key(account_id, venue, symbol), signed_qty);
    }

    /// Update the tracked available margin/balance for `(account, venue, asset)`.
    pub fn update_balance(&self, account_id: &str, venue: &str, asset: &str, balance: Decimal) {
        self.balances.insert(key(account_id, venue, asset), balance);
    }

    /// Available margin/balance for `(account, venue)`, for callers (the
    /// Risk Monitor) that need it outside a `check_order` decision.
    #[must_use]
    pub fn margin_for(&self, account_id: &str, venue: &str) -> Decimal {
        self.available_margin(account_id, venue)
    }

    /// Snapshot of an account's configured limits, for the Risk Monitor's
    /// periodic usage refresh. `None` if the account is unregistered.
    #[must_use]
    pub fn account_limits(&self, account_id: &str) -> Option<Vec<common::RiskLimit>> {
        self.accounts.get(account_id).map(|a| a.limits.values().cloned().collect())
    }

    /// Push a freshly computed usage value into one of an account's limits.
    /// Returns `false` if the account or limit kind isn't configured.
    pub fn update_limit_usage(&self, account_id: &str, kind: LimitKind, current_used: Decimal) -> bool {
        let Some(mut account) = self.accounts.get_mut(account_id) else { return false };
        let Some(limit) = account.limits.get_mut(&kind) else { return false };
        limit.current_used = current_used;
        true
    }

    /// Add `delta` to the global aggregate exposure.
    pub fn adjust_exposure(&self, delta: Decimal) {
        *self.current_exposure.write() = *self.current_exposure.read() + delta;
    }

    /// Add `delta` to the global daily P&L.
    pub fn adjust_daily_pnl(&self, delta: Decimal) {
        *self.daily_pnl.write() = *self.daily_pnl.read() + delta;
    }

    /// Zero `daily_pnl` and the same-day counters at a configured local-time
    /// boundary. Positions and aggregate exposure are untouched.
    pub fn reset_daily(&self) {
        *self.daily_pnl.write() = Decimal::ZERO;
        self.metrics.daily_orders_checked.store(0, Ordering::Relaxed);
        self.metrics.daily_orders_rejected.store(0, Ordering::Relaxed);
    }

    /// Read-only access to lifetime/daily counters.
    #[must_use]
    pub fn metrics(&self) -> &RiskMetrics {
        &self.metrics
    }

    fn position_qty(&self, account_id: &str, venue: &str, symbol: &str) -> Decimal {
        self.positions.get(&key(account_id, venue, symbol)).map_or(Decimal::ZERO, |v| *v)
    }

    fn available_margin(&self, account_id: &str, venue: &str) -> Decimal {
        self.balances.get(&key(account_id, venue, "MARGIN")).map_or(Decimal::ZERO, |v| *v)
    }

    /// Run the short-circuit decision procedure against `order`.
    pub fn check_order(&self, order: &RiskOrderRequest) -> RiskDecision {
        let start = Ts::now();
        let mut snapshot = DecisionSnapshot::default();

        if !self.enabled.load(Ordering::Acquire) {
            return RiskDecision::pass(snapshot, Vec::new());
        }

        let decision = self.check_order_inner(order, &mut snapshot);

        let elapsed = Ts::now().elapsed_since(start);
        self.metrics.orders_checked.fetch_add(1, Ordering::Relaxed);
        self.metrics.daily_orders_checked.fetch_add(1, Ordering::Relaxed);
        self.metrics.processing_time_ns_sum.fetch_add(elapsed, Ordering::Relaxed);
        if !decision.passed {
            self.metrics.orders_rejected.fetch_add(1, Ordering::Relaxed);
            self.metrics.daily_orders_rejected.fetch_add(1, Ordering::Relaxed);
        }
        decision
    }

    fn check_order_inner(&self, order: &RiskOrderRequest, snapshot: &mut DecisionSnapshot) -> RiskDecision {
        let mut warnings = Vec::new();

        let Some(account) = self.accounts.get(&order.account_id) else {
            return RiskDecision::reject(RejectionReason::UnknownAccount, *snapshot, warnings);
        };
        if !account.active {
            return RiskDecision::reject(RejectionReason::AccountInactive, *snapshot, warnings);
        }

        let limits = *self.limits.read();

        // 2. Order value.
        let notional = order.price.mul(order.quantity);
        snapshot.notional = notional;
        if notional > limits.max_order_value {
            return RiskDecision::reject(RejectionReason::OrderValueExceeded, *snapshot, warnings);
        }

        // 3. Post-trade position.
        let current_qty = self.position_qty(&order.account_id, &order.venue, &order.symbol);
        let signed_delta = match order.side {
            Side::Buy => order.quantity,
            Side::Sell => order.quantity.neg(),
        };
        let new_qty = current_qty + signed_delta;
        snapshot.new_position_qty = new_qty;
        if new_qty.abs() > limits.max_position_size {
            return RiskDecision::reject(RejectionReason::PositionSizeExceeded, *snapshot, warnings);
        }

        // 4. Leverage, futures only.
        if order.market_kind == MarketKind::Futures {
            let margin = self.available_margin(&order.account_id, &order.venue);
            if !margin.is_zero() {
                let leverage = new_qty.abs().mul(order.price).div_default(margin).unwrap_or(Decimal::ZERO);
                snapshot.leverage = leverage;
                if leverage > limits.max_leverage {
                    return RiskDecision::reject(RejectionReason::LeverageExceeded, *snapshot, warnings);
                }
            }
        }

        // 5. Daily loss.
        let daily_pnl = *self.daily_pnl.read();
        snapshot.daily_pnl = daily_pnl;
        if daily_pnl.is_neg() && daily_pnl.abs() > limits.max_daily_loss {
            if limits.strict_daily_loss {
                return RiskDecision::reject(RejectionReason::DailyLossExceeded, *snapshot, warnings);
            }
            warnings.push("daily loss limit breached (warning mode)".to_string());
        }

        // 6. Aggregate exposure.
        let current_exposure = *self.current_exposure.read();
        let projected_exposure = current_exposure + notional;
        snapshot.current_exposure = projected_exposure;
        if projected_exposure > limits.max_exposure {
            return RiskDecision::reject(RejectionReason::ExposureExceeded, *snapshot, warnings);
        }

        // 7. Account limit ladder.
        for limit in account.limits.values().filter(|l| l.enabled) {
            let projected = limit.current_used + notional;
            let usage = limit.usage_fraction(projected);
            match limit.action_for_usage(usage) {
                Some(TriggerAction::Restrict | TriggerAction::CloseAll) => {
                    return RiskDecision::reject(RejectionReason::AccountLimit(limit.kind), *snapshot, warnings);
                }
                Some(TriggerAction::Warn) => {
                    warnings.push(format!("{:?} limit at {:?} usage", limit.kind, usage));
                }
                None => {}
            }
        }

        RiskDecision::pass(*snapshot, warnings)
    }
}

impl Default for RiskEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn key(account_id: &str, venue: &str, third: &str) -> PositionKey {
    (account_id.to_string(), venue.to_string(), third.to_string())
}

/// `(balance * risk_pct) / stop_distance / max(leverage, 1)`, clamped to
/// `[min_qty, max_qty]` and rounded down to `step_size`.
#[must_use]
pub fn position_size(
    balance: Decimal,
    risk_pct: Decimal,
    stop_distance: Decimal,
    leverage: Decimal,
    min_qty: Decimal,
    max_qty: Decimal,
    step_size: Decimal,
) -> Decimal {
    if stop_distance.is_zero() {
        return Decimal::ZERO;
    }
    let effective_leverage = leverage.max(Decimal::ONE);
    let risk_amount = balance.mul(risk_pct);
    let raw = risk_amount
        .div_default(stop_distance)
        .unwrap_or(Decimal::ZERO)
        .div_default(effective_leverage)
        .unwrap_or(Decimal::ZERO);
    let clamped = raw.max(min_qty).min(max_qty);
    clamped.floor_to_step(step_size)
}


#[cfg(test)]
mod properties {
    use super::*;
    use common::{AccountType, Permissions};
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn active_account(id: &str) -> Account {
        Account {
            id: id.to_string(),
            account_type: AccountType::Main,
            parent_id: None,
            permissions: Permissions { spot: true, futures: true, margin: true },
            limits: HashMap::new(),
            rate_limits: HashMap::new(),
            active: true,
            strategy_tag: None,
        }
    }

    fn order(price: i64, quantity: i64) -> RiskOrderRequest {
        RiskOrderRequest {
            account_id: "acct".to_string(),
            venue: "binance".to_string(),
            symbol: "BTC/USDT".to_string(),
            side: Side::Buy,
            price: Decimal::from_i64(price),
            quantity: Decimal::from_i64(quantity),
            market_kind: MarketKind::Spot,
        }
    }

    proptest! {
        // P4: identical inputs against identical engine state always produce
        // an identical decision. `check_order` only reads shared state
        // (`limits`, `current_exposure`, `daily_pnl`, positions, accounts);
        // none of it is mutated by a check, so two back-to-back calls must
        // agree exactly.
        #[test]
        fn check_order_is_deterministic_for_identical_inputs(price in 1i64..1_000, quantity in 1i64..1_000) {
            let engine = RiskEngine::new();
            engine.register_account(active_account("acct"));
            let req = order(price, quantity);
            let a = engine.check_order(&req);
            let b = engine.check_order(&req);
            prop_assert_eq!(a, b);
        }

        // P7: when several checks would independently fail, `check_order`
        // reports the reason belonging to whichever check runs first in the
        // ladder (order value, then position size, then exposure), never a
        // later one — proof the later checks are never reached once an
        // earlier one has already rejected.
        #[test]
        fn check_order_short_circuits_at_the_first_failing_check(
            price in 1i64..1_000,
            quantity in 1i64..1_000,
            max_order_value in 1i64..500_000,
            max_position_size in 1i64..500_000,
            max_exposure in 1i64..500_000,
        ) {
            let limits = GlobalLimits {
                max_order_value: Decimal::from_i64(max_order_value),
                max_position_size: Decimal::from_i64(max_position_size),
                max_leverage: Decimal::from_i64(1_000_000),
                max_daily_loss: Decimal::from_i64(1_000_000),
                max_exposure: Decimal::from_i64(max_exposure),
                strict_daily_loss: false,
            };
            let engine = RiskEngine::with_limits(limits);
            engine.register_account(active_account("acct"));

            let notional = Decimal::from_i64(price).mul(Decimal::from_i64(quantity));
            let order_value_fails = notional > limits.max_order_value;
            let position_size_fails = Decimal::from_i64(quantity) > limits.max_position_size;
            let exposure_fails = notional > limits.max_exposure;

            let decision = engine.check_order(&order(price, quantity));

            let expected = if order_value_fails {
                Some(RejectionReason::OrderValueExceeded)
            } else if position_size_fails {
                Some(RejectionReason::PositionSizeExceeded)
            } else if exposure_fails {
                Some(RejectionReason::ExposureExceeded)
            } else {
                None
            };
            prop_assert_eq!(decision.rejection_reason, expected);
        }
    }
}
