//! Per-`(account, venue, symbol)` position and P&L tracking (`spec.md` §4.4).
//!
//! Quantity is kept as an unsigned magnitude with an explicit [`PositionSide`]
//! rather than a signed quantity, so the spec's `qty · (mark − avg_cost) ·
//! direction` formula and its same/opposing-fill transition read literally
//! without double-counting sign.

#![forbid(unsafe_code)]

use common::{Decimal, PositionSide, Side, Ts};
use dashmap::DashMap;
use market_state::MarketState;
use parking_lot::RwLock;

/// Key identifying one tracked position.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PositionKey {
    /// Owning account.
    pub account_id: String,
    /// Venue the position is held at.
    pub venue: String,
    /// Canonical symbol.
    pub symbol: String,
}

impl PositionKey {
    /// Build a key.
    pub fn new(account_id: impl Into<String>, venue: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self { account_id: account_id.into(), venue: venue.into(), symbol: symbol.into() }
    }
}

/// One account's position in one symbol at one venue.
#[derive(Debug, Clone)]
pub struct Position {
    /// Long or short; meaningless while `quantity` is zero.
    pub side: PositionSide,
    /// Magnitude of the open position.
    pub quantity: Decimal,
    /// Volume-weighted average entry price of the open quantity.
    pub avg_cost: Decimal,
    /// Realized P&L accumulated by closing fills.
    pub realized_pnl: Decimal,
    /// Timestamp of the last applied fill or mark update.
    pub updated_at: Ts,
}

impl Default for Position {
    fn default() -> Self {
        Self {
            side: PositionSide::Both,
            quantity: Decimal::ZERO,
            avg_cost: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            updated_at: Ts::default(),
        }
    }
}

impl Position {
    fn direction(&self) -> Decimal {
        match self.side {
            PositionSide::Short => Decimal::from_i64(-1),
            _ => Decimal::ONE,
        }
    }

    /// Whether a fill on `fill_side` increases this position (same direction
    /// as the existing side, or opens a new position from flat).
    fn increases_position(&self, fill_side: Side) -> bool {
        if self.quantity.is_zero() {
            return true;
        }
        matches!(
            (self.side, fill_side),
            (PositionSide::Long, Side::Buy) | (PositionSide::Short, Side::Sell)
        )
    }

    /// Apply one fill, implementing the same/opposing-fill transition.
    pub fn apply_fill(&mut self, fill_side: Side, fill_qty: Decimal, fill_price: Decimal, ts: Ts) {
        if self.increases_position(fill_side) {
            let new_qty = self.quantity + fill_qty;
            self.avg_cost = if self.quantity.is_zero() {
                fill_price
            } else {
                ((self.quantity.mul(self.avg_cost)) + fill_qty.mul(fill_price))
                    .div_default(new_qty)
                    .unwrap_or(fill_price)
            };
            if self.quantity.is_zero() {
                self.side = if fill_side == Side::Buy { PositionSide::Long } else { PositionSide::Short };
            }
            self.quantity = new_qty;
        } else {
            let direction = self.direction();
            let closing = self.quantity.min(fill_qty);
            let pnl = (fill_price - self.avg_cost).mul(closing).mul(direction);
            self.realized_pnl = self.realized_pnl + pnl;

            if fill_qty <= self.quantity {
                self.quantity = self.quantity - fill_qty;
                if self.quantity.is_zero() {
                    self.avg_cost = Decimal::ZERO;
                    self.side = PositionSide::Both;
                }
            } else {
                let remainder = fill_qty - self.quantity;
                self.quantity = remainder;
                self.avg_cost = fill_price;
                self.side = if fill_side == Side::Buy { PositionSide::Long } else { PositionSide::Short };
            }
        }
        self.updated_at = ts;
    }

    /// `qty · (mark − avg_cost) · direction`.
    #[must_use]
    pub fn unrealized_pnl(&self, mark: Decimal) -> Decimal {
        if self.quantity.is_zero() {
            return Decimal::ZERO;
        }
        (mark - self.avg_cost).mul(self.quantity).mul(self.direction())
    }

    /// Notional value of the open quantity at `mark`.
    #[must_use]
    pub fn notional(&self, mark: Decimal) -> Decimal {
        self.quantity.mul(mark)
    }
}

/// Net/gross exposure and P&L rollup across every position of an account.
#[derive(Debug, Clone, Default)]
pub struct AccountSummary {
    /// Net exposure: long notional minus short notional.
    pub net_exposure: Decimal,
    /// Gross exposure: long notional plus short notional.
    pub gross_exposure: Decimal,
    /// Sum of realized P&L across all positions.
    pub realized_pnl: Decimal,
    /// Sum of unrealized P&L across all positions, marked at current state.
    pub unrealized_pnl: Decimal,
    /// Number of open (non-zero quantity) positions.
    pub open_positions: u64,
}

/// Tracks every account's positions, keyed by `(account, venue, symbol)`.
#[derive(Default)]
pub struct PositionTracker {
    positions: DashMap<PositionKey, RwLock<Position>>,
}

impl PositionTracker {
    /// Empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self { positions: DashMap::new() }
    }

    /// Apply a fill, creating the position entry if this is the first fill
    /// for `key`.
    pub fn apply_fill(&self, key: &PositionKey, fill_side: Side, fill_qty: Decimal, fill_price: Decimal, ts: Ts) {
        let entry = self.positions.entry(key.clone()).or_default();
        entry.write().apply_fill(fill_side, fill_qty, fill_price, ts);
    }

    /// Snapshot of one position, if it has ever received a fill.
    #[must_use]
    pub fn get(&self, key: &PositionKey) -> Option<Position> {
        self.positions.get(key).map(|p| p.read().clone())
    }

    /// All positions for an account across every venue/symbol.
    #[must_use]
    pub fn positions_for_account(&self, account_id: &str) -> Vec<(PositionKey, Position)> {
        self.positions
            .iter()
            .filter(|e| e.key().account_id == account_id)
            .map(|e| (e.key().clone(), e.value().read().clone()))
            .collect()
    }

    /// Aggregate view across venues for one `(account, symbol)` pair: sums
    /// quantity-weighted state into a single synthetic position.
    #[must_use]
    pub fn aggregate(&self, account_id: &str, symbol: &str) -> Position {
        let mut net_qty = Decimal::ZERO;
        let mut cost_basis = Decimal::ZERO;
        let mut realized = Decimal::ZERO;
        for entry in self.positions.iter() {
            if entry.key().account_id != account_id || entry.key().symbol != symbol {
                continue;
            }
            let pos = entry.value().read();
            let signed_qty = match pos.side {
                PositionSide::Short => pos.quantity.neg(),
                _ => pos.quantity,
            };
            net_qty = net_qty + signed_qty;
            cost_basis = cost_basis + pos.quantity.mul(pos.avg_cost);
            realized = realized + pos.realized_pnl;
        }
        let quantity = net_qty.abs();
        let side = if net_qty.is_neg() { PositionSide::Short } else if quantity.is_zero() { PositionSide::Both } else { PositionSide::Long };
        let avg_cost = if quantity.is_zero() { Decimal::ZERO } else { cost_basis.div_default(quantity).unwrap_or(Decimal::ZERO) };
        Position { side, quantity, avg_cost, realized_pnl: realized, updated_at: Ts::now() }
    }

    /// Per-account rollup: net/gross exposure, realized/unrealized P&L, and
    /// open-position count, marked against `market`.
    #[must_use]
    pub fn summary(&self, account_id: &str, market: &MarketState) -> AccountSummary {
        let mut summary = AccountSummary::default();
        for entry in self.positions.iter() {
            if entry.key().account_id != account_id {
                continue;
            }
            let pos = entry.value().read();
            if pos.quantity.is_zero() {
                continue;
            }
            let mark = market.mid_price(&entry.key().venue, &entry.key().symbol).unwrap_or(pos.avg_cost);
            let notional = pos.notional(mark);
            let signed_notional = match pos.side {
                PositionSide::Short => notional.neg(),
                _ => notional,
            };
            summary.net_exposure = summary.net_exposure + signed_notional;
            summary.gross_exposure = summary.gross_exposure + notional;
            summary.realized_pnl = summary.realized_pnl + pos.realized_pnl;
            summary.unrealized_pnl = summary.unrealized_pnl + pos.unrealized_pnl(mark);
            summary.open_positions += 1;
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::parse(s).unwrap()
    }

    #[test]
    fn same_direction_fill_weights_average_cost() {
        let mut pos = Position::default();
        pos.apply_fill(Side::Buy, dec("1"), dec("100"), Ts::from_nanos(1));
        pos.apply_fill(Side::Buy, dec("1"), dec("110"), Ts::from_nanos(2));
        assert_eq!(pos.quantity, dec("2"));
        assert_eq!(pos.avg_cost, dec("105"));
        assert_eq!(pos.side, PositionSide::Long);
    }

    #[test]
    fn opposing_fill_within_size_realizes_pnl_and_keeps_avg_cost() {
        let mut pos = Position::default();
        pos.apply_fill(Side::Buy, dec("2"), dec("100"), Ts::from_nanos(1));
        pos.apply_fill(Side::Sell, dec("1"), dec("110"), Ts::from_nanos(2));
        assert_eq!(pos.quantity, dec("1"));
        assert_eq!(pos.avg_cost, dec("100"));
        assert_eq!(pos.realized_pnl, dec("10"));
    }

    #[test]
    fn opposing_fill_exceeding_size_flips_position() {
        let mut pos = Position::default();
        pos.apply_fill(Side::Buy, dec("1"), dec("100"), Ts::from_nanos(1));
        pos.apply_fill(Side::Sell, dec("3"), dec("90"), Ts::from_nanos(2));
        assert_eq!(pos.side, PositionSide::Short);
        assert_eq!(pos.quantity, dec("2"));
        assert_eq!(pos.avg_cost, dec("90"));
        assert_eq!(pos.realized_pnl, dec("-10"));
    }

    #[test]
    fn closing_fill_exactly_zeroes_position() {
        let mut pos = Position::default();
        pos.apply_fill(Side::Buy, dec("1"), dec("100"), Ts::from_nanos(1));
        pos.apply_fill(Side::Sell, dec("1"), dec("120"), Ts::from_nanos(2));
        assert_eq!(pos.quantity, Decimal::ZERO);
        assert_eq!(pos.avg_cost, Decimal::ZERO);
        assert_eq!(pos.realized_pnl, dec("20"));
    }

    #[test]
    fn unrealized_pnl_is_negative_for_a_short_marked_up() {
        let mut pos = Position::default();
        pos.apply_fill(Side::Sell, dec("1"), dec("100"), Ts::from_nanos(1));
        assert_eq!(pos.unrealized_pnl(dec("110")), dec("-10"));
    }

    #[test]
    fn tracker_aggregates_across_venues() {
        let tracker = PositionTracker::new();
        let key_a = PositionKey::new("acct", "binance", "BTC/USDT");
        let key_b = PositionKey::new("acct", "okx", "BTC/USDT");
        tracker.apply_fill(&key_a, Side::Buy, dec("1"), dec("100"), Ts::from_nanos(1));
        tracker.apply_fill(&key_b, Side::Buy, dec("2"), dec("110"), Ts::from_nanos(2));
        let aggregate = tracker.aggregate("acct", "BTC/USDT");
        assert_eq!(aggregate.quantity, dec("3"));
        assert_eq!(aggregate.side, PositionSide::Long);
    }

    #[test]
    fn summary_marks_against_current_market_state() {
        let tracker = PositionTracker::new();
        let market = MarketState::new();
        market.update_ticker(
            "binance",
            "BTC/USDT",
            market_state::Ticker { bid: Some(dec("100")), ask: Some(dec("100")), ..Default::default() },
            Ts::from_nanos(1),
        );
        let key = PositionKey::new("acct", "binance", "BTC/USDT");
        tracker.apply_fill(&key, Side::Buy, dec("1"), dec("90"), Ts::from_nanos(1));
        let summary = tracker.summary("acct", &market);
        assert_eq!(summary.open_positions, 1);
        assert_eq!(summary.unrealized_pnl, dec("10"));
        assert_eq!(summary.net_exposure, dec("100"));
    }
}
