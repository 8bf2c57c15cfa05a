//! Stop-loss and time-based protective order management (`spec.md` §4.6).
//!
//! At most one active protective order of each kind is kept per
//! `(account, symbol)`. Trailing stops tighten monotonically: the watermark
//! only moves in the favorable direction, and the stop only moves in the
//! direction that tightens it (P3).

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use common::{Decimal, Order, OrderTag, OrderType, PositionSide, Side, Symbol, TimeInForce, Ts};
use dashmap::DashMap;

/// Per-kind configuration for a protective order.
#[derive(Debug, Clone)]
pub enum ProtectiveKind {
    /// Stop a fixed percentage or absolute offset from entry.
    Fixed {
        /// Fractional offset from entry, e.g. `0.05` for 5%.
        pct: Option<Decimal>,
        /// Absolute price offset from entry, used when `pct` is `None`.
        offset: Option<Decimal>,
    },
    /// Stop that tightens as price moves favorably.
    Trailing {
        /// Fractional trailing distance from the watermark.
        trailing_pct: Decimal,
    },
    /// Stop set a multiple of ATR away from entry; ATR is caller-supplied.
    Volatility {
        /// ATR multiplier.
        atr_multiplier: Decimal,
        /// Caller-supplied average true range for the configured period.
        atr: Decimal,
    },
    /// No price trigger; fires after a fixed duration.
    Time {
        /// Nanoseconds after `created_at` at which this fires.
        time_limit_nanos: u64,
    },
}

/// Discriminant used to enforce "one active order per kind" per symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtectiveKindTag {
    /// [`ProtectiveKind::Fixed`].
    Fixed,
    /// [`ProtectiveKind::Trailing`].
    Trailing,
    /// [`ProtectiveKind::Volatility`].
    Volatility,
    /// [`ProtectiveKind::Time`].
    Time,
}

impl ProtectiveKind {
    /// The kind's tag, for map keying.
    #[must_use]
    pub const fn tag(&self) -> ProtectiveKindTag {
        match self {
            Self::Fixed { .. } => ProtectiveKindTag::Fixed,
            Self::Trailing { .. } => ProtectiveKindTag::Trailing,
            Self::Volatility { .. } => ProtectiveKindTag::Volatility,
            Self::Time { .. } => ProtectiveKindTag::Time,
        }
    }
}

/// Lifecycle state of a protective order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectiveStatus {
    /// Watching price/time, not yet triggered.
    Armed,
    /// Trigger condition met; closing order emitted, awaiting dispatch.
    Triggered,
    /// Closing order dispatched successfully.
    Retired,
    /// Closing order dispatch failed.
    RetiredFailed,
}

/// A single protective order.
#[derive(Debug, Clone)]
pub struct ProtectiveOrder {
    /// Owning account.
    pub account_id: String,
    /// Protected symbol.
    pub symbol: String,
    /// Side of the position being protected.
    pub side: PositionSide,
    /// Kind-specific configuration.
    pub kind: ProtectiveKind,
    /// Entry price of the protected position.
    pub entry_price: Decimal,
    /// Quantity to close when triggered.
    pub quantity: Decimal,
    /// Current stop-trigger price.
    pub stop_price: Decimal,
    /// High-water (long) or low-water (short) mark for trailing stops.
    pub watermark: Option<Decimal>,
    /// When this order was armed.
    pub created_at: Ts,
    /// Current lifecycle state.
    pub status: ProtectiveStatus,
}

impl ProtectiveOrder {
    /// Whether the trigger condition is met at `price`/`now`, independent of
    /// state (callers check `status == Armed` before acting on this).
    #[must_use]
    pub fn is_triggered(&self, price: Decimal, now: Ts) -> bool {
        if let ProtectiveKind::Time { time_limit_nanos } = &self.kind {
            return now.elapsed_since(self.created_at) > *time_limit_nanos;
        }
        match self.side {
            PositionSide::Short => price >= self.stop_price,
            _ => price <= self.stop_price,
        }
    }

    /// Build the reduce-only closing order to emit on trigger.
    #[must_use]
    pub fn closing_order(&self, engine_id: u64, ts: Ts) -> Order {
        let side = match self.side {
            PositionSide::Short => Side::Buy,
            _ => Side::Sell,
        };
        let symbol = Symbol::normalize(&self.symbol, None).unwrap_or_else(|_| Symbol::new(&self.symbol, ""));
        Order {
            client_id: format!("protective-{}-{}-{:?}", self.account_id, self.symbol, self.kind.tag()),
            engine_id: Some(engine_id),
            venue_id: None,
            symbol,
            side,
            order_type: OrderType::Market,
            time_in_force: TimeInForce::IOC,
            price: None,
            stop_price: Some(self.stop_price),
            quantity: self.quantity,
            filled_quantity: Decimal::ZERO,
            avg_fill_price: Decimal::ZERO,
            status: common::OrderStatus::New,
            position_side: self.side,
            reduce_only: true,
            post_only: false,
            created_at: ts,
            updated_at: ts,
            tag: OrderTag { account_id: self.account_id.clone(), strategy_id: None },
        }
    }
}

fn initial_stop(side: PositionSide, entry_price: Decimal, kind: &ProtectiveKind) -> (Decimal, Option<Decimal>) {
    match kind {
        ProtectiveKind::Fixed { pct, offset } => {
            let stop = fixed_offset(side, entry_price, *pct, *offset);
            (stop, None)
        }
        ProtectiveKind::Trailing { trailing_pct } => {
            let stop = match side {
                PositionSide::Short => entry_price.mul(Decimal::ONE + *trailing_pct),
                _ => entry_price.mul(Decimal::ONE - *trailing_pct),
            };
            (stop, Some(entry_price))
        }
        ProtectiveKind::Volatility { atr_multiplier, atr } => {
            let delta = atr_multiplier.mul(*atr);
            let stop = match side {
                PositionSide::Short => entry_price + delta,
                _ => entry_price - delta,
            };
            (stop, None)
        }
        ProtectiveKind::Time { .. } => (entry_price, None),
    }
}

fn fixed_offset(side: PositionSide, entry_price: Decimal, pct: Option<Decimal>, offset: Option<Decimal>) -> Decimal {
    if let Some(pct) = pct {
        return match side {
            PositionSide::Short => entry_price.mul(Decimal::ONE + pct),
            _ => entry_price.mul(Decimal::ONE - pct),
        };
    }
    let offset = offset.unwrap_or(Decimal::ZERO);
    match side {
        PositionSide::Short => entry_price + offset,
        _ => entry_price - offset,
    }
}

/// Error raised arming a protective order.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtectiveError {
    /// An active order of the same kind already exists for this symbol.
    #[error("a {0:?} protective order is already active for this account/symbol")]
    AlreadyActive(ProtectiveKindTag),
}

type ProtectiveKey = (String, String, ProtectiveKindTag);

/// Manages protective orders across accounts and symbols.
#[derive(Default)]
pub struct ProtectiveManager {
    orders: DashMap<ProtectiveKey, ProtectiveOrder>,
}

impl ProtectiveManager {
    /// Empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self { orders: DashMap::new() }
    }

    /// Arm a new protective order. Fails if one of the same kind is already
    /// active (`Armed` or `Triggered`) for this `(account, symbol)`.
    pub fn arm(
        &self,
        account_id: &str,
        symbol: &str,
        side: PositionSide,
        kind: ProtectiveKind,
        entry_price: Decimal,
        quantity: Decimal,
        now: Ts,
    ) -> Result<(), ProtectiveError> {
        let tag = kind.tag();
        let key = (account_id.to_string(), symbol.to_string(), tag);
        if let Some(existing) = self.orders.get(&key) {
            if matches!(existing.status, ProtectiveStatus::Armed | ProtectiveStatus::Triggered) {
                return Err(ProtectiveError::AlreadyActive(tag));
            }
        }
        let (stop_price, watermark) = initial_stop(side, entry_price, &kind);
        self.orders.insert(
            key,
            ProtectiveOrder {
                account_id: account_id.to_string(),
                symbol: symbol.to_string(),
                side,
                kind,
                entry_price,
                quantity,
                stop_price,
                watermark,
                created_at: now,
                status: ProtectiveStatus::Armed,
            },
        );
        Ok(())
    }

    /// Update one order's trailing watermark/stop for a new price. No-op for
    /// non-trailing kinds.
    fn update_trailing(order: &mut ProtectiveOrder, price: Decimal) {
        let ProtectiveKind::Trailing { trailing_pct } = &order.kind else { return };
        let trailing_pct = *trailing_pct;
        let Some(watermark) = order.watermark else { return };
        match order.side {
            PositionSide::Short => {
                if price < watermark {
                    order.watermark = Some(price);
                    let candidate = price.mul(Decimal::ONE + trailing_pct);
                    if candidate < order.stop_price {
                        order.stop_price = candidate;
                    }
                }
            }
            _ => {
                if price > watermark {
                    order.watermark = Some(price);
                    let candidate = price.mul(Decimal::ONE - trailing_pct);
                    if candidate > order.stop_price {
                        order.stop_price = candidate;
                    }
                }
            }
        }
    }

    /// Feed a new price for `(account, symbol)` to every armed order there,
    /// returning those that just triggered.
    pub fn on_price_update(&self, account_id: &str, symbol: &str, price: Decimal, now: Ts) -> Vec<ProtectiveOrder> {
        let mut triggered = Vec::new();
        for tag in [ProtectiveKindTag::Fixed, ProtectiveKindTag::Trailing, ProtectiveKindTag::Volatility, ProtectiveKindTag::Time] {
            let key = (account_id.to_string(), symbol.to_string(), tag);
            let Some(mut entry) = self.orders.get_mut(&key) else { continue };
            if entry.status != ProtectiveStatus::Armed {
                continue;
            }
            Self::update_trailing(&mut entry, price);
            if entry.is_triggered(price, now) {
                entry.status = ProtectiveStatus::Triggered;
                triggered.push(entry.clone());
            }
        }
        triggered
    }

    /// Apply price updates to every tracked symbol in deterministic
    /// (sorted) symbol order, for reproducible replay.
    pub fn batch_update_prices(&self, account_id: &str, updates: &BTreeMap<String, Decimal>, now: Ts) -> Vec<ProtectiveOrder> {
        let mut triggered = Vec::new();
        for (symbol, price) in updates {
            triggered.extend(self.on_price_update(account_id, symbol, *price, now));
        }
        triggered
    }

    /// Record the outcome of dispatching a triggered order's closing order.
    pub fn record_dispatch(&self, account_id: &str, symbol: &str, tag: ProtectiveKindTag, success: bool) {
        let key = (account_id.to_string(), symbol.to_string(), tag);
        if let Some(mut entry) = self.orders.get_mut(&key) {
            entry.status = if success { ProtectiveStatus::Retired } else { ProtectiveStatus::RetiredFailed };
        }
    }

    /// Snapshot of one tracked order, if any.
    #[must_use]
    pub fn get(&self, account_id: &str, symbol: &str, tag: ProtectiveKindTag) -> Option<ProtectiveOrder> {
        self.orders.get(&(account_id.to_string(), symbol.to_string(), tag)).map(|e| e.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::parse(s).unwrap()
    }

    #[test]
    fn fixed_stop_is_below_entry_for_long() {
        let manager = ProtectiveManager::new();
        manager
            .arm("acct", "BTC/USDT", PositionSide::Long, ProtectiveKind::Fixed { pct: Some(dec("0.1")), offset: None }, dec("100"), dec("1"), Ts::from_nanos(1))
            .unwrap();
        let order = manager.get("acct", "BTC/USDT", ProtectiveKindTag::Fixed).unwrap();
        assert_eq!(order.stop_price, dec("90"));
    }

    #[test]
    fn duplicate_active_kind_is_rejected() {
        let manager = ProtectiveManager::new();
        manager
            .arm("acct", "BTC/USDT", PositionSide::Long, ProtectiveKind::Fixed { pct: Some(dec("0.1")), offset: None }, dec("100"), dec("1"), Ts::from_nanos(1))
            .unwrap();
        let err = manager
            .arm("acct", "BTC/USDT", PositionSide::Long, ProtectiveKind::Fixed { pct: Some(dec("0.2")), offset: None }, dec("100"), dec("1"), Ts::from_nanos(2))
            .unwrap_err();
        assert_eq!(err, ProtectiveError::AlreadyActive(ProtectiveKindTag::Fixed));
    }

    #[test]
    fn trailing_stop_only_tightens_for_a_long() {
        let manager = ProtectiveManager::new();
        manager
            .arm("acct", "BTC/USDT", PositionSide::Long, ProtectiveKind::Trailing { trailing_pct: dec("0.1") }, dec("100"), dec("1"), Ts::from_nanos(1))
            .unwrap();
        let initial = manager.get("acct", "BTC/USDT", ProtectiveKindTag::Trailing).unwrap();
        assert_eq!(initial.stop_price, dec("90"));

        manager.on_price_update("acct", "BTC/USDT", dec("110"), Ts::from_nanos(2));
        let after_rise = manager.get("acct", "BTC/USDT", ProtectiveKindTag::Trailing).unwrap();
        assert_eq!(after_rise.stop_price, dec("99"));

        manager.on_price_update("acct", "BTC/USDT", dec("105"), Ts::from_nanos(3));
        let after_pullback = manager.get("acct", "BTC/USDT", ProtectiveKindTag::Trailing).unwrap();
        assert_eq!(after_pullback.stop_price, dec("99"), "stop must never loosen on a pullback");
    }

    #[test]
    fn trailing_stop_triggers_when_price_falls_through() {
        let manager = ProtectiveManager::new();
        manager
            .arm("acct", "BTC/USDT", PositionSide::Long, ProtectiveKind::Trailing { trailing_pct: dec("0.1") }, dec("100"), dec("1"), Ts::from_nanos(1))
            .unwrap();
        manager.on_price_update("acct", "BTC/USDT", dec("110"), Ts::from_nanos(2));
        let triggered = manager.on_price_update("acct", "BTC/USDT", dec("98"), Ts::from_nanos(3));
        assert_eq!(triggered.len(), 1);
        assert_eq!(triggered[0].status, ProtectiveStatus::Triggered);
    }

    #[test]
    fn time_stop_triggers_after_limit_regardless_of_price() {
        let manager = ProtectiveManager::new();
        manager
            .arm("acct", "BTC/USDT", PositionSide::Long, ProtectiveKind::Time { time_limit_nanos: 1_000 }, dec("100"), dec("1"), Ts::from_nanos(0))
            .unwrap();
        let none_yet = manager.on_price_update("acct", "BTC/USDT", dec("100"), Ts::from_nanos(500));
        assert!(none_yet.is_empty());
        let triggered = manager.on_price_update("acct", "BTC/USDT", dec("100"), Ts::from_nanos(2_000));
        assert_eq!(triggered.len(), 1);
    }

    #[test]
    fn closing_order_is_reduce_only_and_opposite_side() {
        let manager = ProtectiveManager::new();
        manager
            .arm("acct", "BTC/USDT", PositionSide::Long, ProtectiveKind::Fixed { pct: Some(dec("0.1")), offset: None }, dec("100"), dec("2"), Ts::from_nanos(1))
            .unwrap();
        let order = manager.get("acct", "BTC/USDT", ProtectiveKindTag::Fixed).unwrap();
        let closing = order.closing_order(1, Ts::from_nanos(2));
        assert!(closing.reduce_only);
        assert_eq!(closing.side, Side::Sell);
        assert_eq!(closing.quantity, dec("2"));
    }

    #[test]
    fn batch_update_visits_symbols_in_sorted_order() {
        let manager = ProtectiveManager::new();
        manager
            .arm("acct", "ETH/USDT", PositionSide::Long, ProtectiveKind::Fixed { pct: Some(dec("0.5")), offset: None }, dec("10"), dec("1"), Ts::from_nanos(1))
            .unwrap();
        manager
            .arm("acct", "BTC/USDT", PositionSide::Long, ProtectiveKind::Fixed { pct: Some(dec("0.5")), offset: None }, dec("10"), dec("1"), Ts::from_nanos(1))
            .unwrap();
        let mut updates = BTreeMap::new();
        updates.insert("ETH/USDT".to_string(), dec("1"));
        updates.insert("BTC/USDT".to_string(), dec("1"));
        let triggered = manager.batch_update_prices("acct", &updates, Ts::from_nanos(2));
        assert_eq!(triggered.len(), 2);
        assert_eq!(triggered[0].symbol, "BTC/USDT");
        assert_eq!(triggered[1].symbol, "ETH/USDT");
    }
}
