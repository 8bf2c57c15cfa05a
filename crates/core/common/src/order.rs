//! Order, fill, and lifecycle types shared across the CORE.

use decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::symbol::Symbol;
use crate::ts::Ts;

/// Buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Buy.
    Buy,
    /// Sell.
    Sell,
}

impl Side {
    /// `+1` for `Buy`, `-1` for `Sell` — the sign convention used when
    /// projecting a position delta.
    #[must_use]
    pub const fn sign(self) -> i8 {
        match self {
            Self::Buy => 1,
            Self::Sell => -1,
        }
    }

    /// The opposite side.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    /// Market order.
    Market,
    /// Limit order.
    Limit,
    /// Stop (market) order.
    Stop,
    /// Stop-limit order.
    StopLimit,
    /// Take-profit (market) order.
    TakeProfit,
    /// Take-profit limit order.
    TakeProfitLimit,
    /// Limit order that must land as a post-only maker.
    LimitMaker,
}

/// Time-in-force instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Good till canceled.
    GTC,
    /// Immediate or cancel.
    IOC,
    /// Fill or kill.
    FOK,
    /// Good till crossing (post-only).
    GTX,
}

/// Order status, per the lifecycle in `spec.md` §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Admitted, not yet filled.
    New,
    /// Partially filled.
    PartiallyFilled,
    /// Fully filled.
    Filled,
    /// Canceled before full fill.
    Canceled,
    /// Rejected by risk or a venue.
    Rejected,
    /// Expired (deadline or time-in-force).
    Expired,
}

impl OrderStatus {
    /// Whether the order can still receive fills or be canceled.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Canceled | Self::Rejected | Self::Expired)
    }
}

/// Futures position side; `Both` is used for one-way (non-hedge) mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionSide {
    /// Long leg (hedge mode).
    Long,
    /// Short leg (hedge mode).
    Short,
    /// Single net position (one-way mode).
    Both,
}

/// Opaque caller context carried on every order: who submitted it and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct OrderTag {
    /// Account identifier.
    pub account_id: String,
    /// Strategy identifier, if the order originated from a strategy.
    pub strategy_id: Option<String>,
}

/// A trading order at any point in its lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Caller-supplied id, unique per account.
    pub client_id: String,
    /// Assigned on admission into the CORE.
    pub engine_id: Option<u64>,
    /// Assigned on dispatch to a venue.
    pub venue_id: Option<String>,
    /// Canonical symbol.
    pub symbol: Symbol,
    /// Buy or sell.
    pub side: Side,
    /// Order type.
    pub order_type: OrderType,
    /// Time-in-force.
    pub time_in_force: TimeInForce,
    /// Limit price, required for limit-family order types.
    pub price: Option<Decimal>,
    /// Stop trigger price, required for stop-family order types.
    pub stop_price: Option<Decimal>,
    /// Requested quantity.
    pub quantity: Decimal,
    /// Cumulative filled quantity.
    pub filled_quantity: Decimal,
    /// Volume-weighted average fill price.
    pub avg_fill_price: Decimal,
    /// Current status.
    pub status: OrderStatus,
    /// Futures position side; `Both` for spot/one-way.
    pub position_side: PositionSide,
    /// May only reduce an existing position.
    pub reduce_only: bool,
    /// Must land as a maker order or be rejected.
    pub post_only: bool,
    /// Admission time.
    pub created_at: Ts,
    /// Last status-changing update.
    pub updated_at: Ts,
    /// Caller context.
    pub tag: OrderTag,
}

impl Order {
    /// `true` once `filled_quantity` reaches `quantity`.
    #[must_use]
    pub fn is_fully_filled(&self) -> bool {
        self.filled_quantity.cmp_value(self.quantity) == std::cmp::Ordering::Equal
    }

    /// Remaining unfilled quantity.
    #[must_use]
    pub fn remaining_quantity(&self) -> Decimal {
        self.quantity.sub(self.filled_quantity)
    }

    /// Notional at the limit price, if one is set (`quantity * price`).
    #[must_use]
    pub fn notional(&self) -> Option<Decimal> {
        self.price.map(|p| self.quantity.mul(p))
    }

    /// Apply a fill, recomputing `filled_quantity`, `avg_fill_price`, and
    /// `status`. Callers are responsible for the position-side effects;
    /// this only updates the order's own bookkeeping.
    pub fn apply_fill(&mut self, fill_qty: Decimal, fill_price: Decimal, ts: Ts) {
        let prior_notional = self.filled_quantity.mul(self.avg_fill_price);
        let new_filled = self.filled_quantity.add(fill_qty);
        if !new_filled.is_zero() {
            self.avg_fill_price = prior_notional
                .add(fill_qty.mul(fill_price))
                .div_default(new_filled)
                .unwrap_or(self.avg_fill_price);
        }
        self.filled_quantity = new_filled;
        self.status = if self.is_fully_filled() {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        self.updated_at = ts;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_order() -> Order {
        Order {
            client_id: "c1".into(),
            engine_id: None,
            venue_id: None,
            symbol: Symbol::new("BTC", "USDT"),
            side: Side::Buy,
            order_type: OrderType::Limit,
            time_in_force: TimeInForce::GTC,
            price: Some(Decimal::parse("40000").unwrap()),
            stop_price: None,
            quantity: Decimal::parse("1").unwrap(),
            filled_quantity: Decimal::ZERO,
            avg_fill_price: Decimal::ZERO,
            status: OrderStatus::New,
            position_side: PositionSide::Both,
            reduce_only: false,
            post_only: false,
            created_at: Ts::from_nanos(0),
            updated_at: Ts::from_nanos(0),
            tag: OrderTag { account_id: "acct-1".into(), strategy_id: None },
        }
    }

    #[test]
    fn fill_updates_avg_price_and_status() {
        let mut order = base_order();
        order.apply_fill(Decimal::parse("0.4").unwrap(), Decimal::parse("40000").unwrap(), Ts::from_nanos(1));
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        order.apply_fill(Decimal::parse("0.6").unwrap(), Decimal::parse("40010").unwrap(), Ts::from_nanos(2));
        assert_eq!(order.status, OrderStatus::Filled);
        assert!(order.is_fully_filled());
        // avg = 0.4*40000 + 0.6*40010 = 40006
        assert_eq!(order.avg_fill_price, Decimal::parse("40006").unwrap());
    }

    #[test]
    fn filled_status_requires_terminal() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(!OrderStatus::PartiallyFilled.is_terminal());
    }

    #[test]
    fn side_sign_and_opposite() {
        assert_eq!(Side::Buy.sign(), 1);
        assert_eq!(Side::Sell.sign(), -1);
        assert_eq!(Side::Buy.opposite(), Side::Sell);
    }
}
