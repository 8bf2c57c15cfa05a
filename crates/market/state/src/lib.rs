//! Per-`(venue, symbol)` market state: latest ticker, bounded depth snapshot,
//! and last trade. Each stream publishes through a single writer that swaps
//! an atomic pointer, so concurrent readers never block on it and never see
//! a torn snapshot (`spec.md` §4.3).

#![forbid(unsafe_code)]

use std::sync::Arc;

use arc_swap::ArcSwap;
use common::{Decimal, Ts};
use dashmap::DashMap;

/// Default bound on depth levels retained per side.
pub const DEFAULT_DEPTH_LEVELS: usize = 1_000;

/// One price/quantity level of an order book side.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthLevel {
    /// Price at this level.
    pub price: Decimal,
    /// Aggregate resting quantity at this level.
    pub quantity: Decimal,
}

/// Bounded order book depth for one stream.
#[derive(Debug, Clone, Default)]
pub struct MarketDepth {
    /// Bid levels, best (highest) price first.
    pub bids: Vec<DepthLevel>,
    /// Ask levels, best (lowest) price first.
    pub asks: Vec<DepthLevel>,
}

impl MarketDepth {
    /// Sum of resting quantity on `side` at or better than `price_level`.
    #[must_use]
    pub fn depth_at(&self, side: common::Side, price_level: Decimal) -> Decimal {
        let levels = match side {
            common::Side::Buy => &self.bids,
            common::Side::Sell => &self.asks,
        };
        let better_or_equal = |level: &&DepthLevel| match side {
            common::Side::Buy => level.price >= price_level,
            common::Side::Sell => level.price <= price_level,
        };
        levels
            .iter()
            .filter(better_or_equal)
            .fold(Decimal::ZERO, |acc, level| acc + level.quantity)
    }
}

/// Rolling 24h stats attached to a ticker.
#[derive(Debug, Clone, Copy, Default)]
pub struct DailyStats {
    /// 24h high.
    pub high: Option<Decimal>,
    /// 24h low.
    pub low: Option<Decimal>,
    /// 24h base-asset volume.
    pub volume: Decimal,
}

/// Most recent top-of-book and trade for a stream.
#[derive(Debug, Clone, Default)]
pub struct Ticker {
    /// Best bid price, if any resting liquidity.
    pub bid: Option<Decimal>,
    /// Best bid quantity.
    pub bid_qty: Decimal,
    /// Best ask price, if any resting liquidity.
    pub ask: Option<Decimal>,
    /// Best ask quantity.
    pub ask_qty: Decimal,
    /// Last traded price.
    pub last: Option<Decimal>,
    /// Last traded quantity.
    pub last_qty: Decimal,
    /// 24h rolling statistics.
    pub daily: DailyStats,
}

impl Ticker {
    /// `(bid + ask) / 2` when both sides exist, else the last trade price.
    #[must_use]
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) => (bid + ask).div_default(Decimal::from_i64(2)).ok(),
            _ => self.last,
        }
    }
}

/// Immutable point-in-time view of one `(venue, symbol)` stream.
#[derive(Debug, Clone, Default)]
pub struct StreamSnapshot {
    /// Latest ticker.
    pub ticker: Ticker,
    /// Latest depth snapshot.
    pub depth: MarketDepth,
    /// When this snapshot was published.
    pub updated_at: Ts,
}

struct Stream {
    snapshot: ArcSwap<StreamSnapshot>,
}

impl Default for Stream {
    fn default() -> Self {
        Self { snapshot: ArcSwap::from_pointee(StreamSnapshot::default()) }
    }
}

/// Holds live market state for every `(venue, symbol)` the engine tracks.
#[derive(Default)]
pub struct MarketState {
    streams: DashMap<(String, String), Arc<Stream>>,
    depth_levels: usize,
}

impl MarketState {
    /// Create empty state, retaining up to [`DEFAULT_DEPTH_LEVELS`] per side.
    #[must_use]
    pub fn new() -> Self {
        Self { streams: DashMap::new(), depth_levels: DEFAULT_DEPTH_LEVELS }
    }

    /// Create empty state with a custom per-side depth bound.
    #[must_use]
    pub fn with_depth_levels(depth_levels: usize) -> Self {
        Self { streams: DashMap::new(), depth_levels }
    }

    fn stream(&self, venue: &str, symbol: &str) -> Arc<Stream> {
        Arc::clone(
            &self
                .streams
                .entry((venue.to_string(), symbol.to_string()))
                .or_default(),
        )
    }

    /// Publish a new ticker for `(venue, symbol)`. The previous snapshot's
    /// depth is carried forward untouched.
    pub fn update_ticker(&self, venue: &str, symbol: &str, ticker: Ticker, ts: Ts) {
        let stream = self.stream(venue, symbol);
        let previous = stream.snapshot.load();
        stream.snapshot.store(Arc::new(StreamSnapshot {
            ticker,
            depth: previous.depth.clone(),
            updated_at: ts,
        }));
    }

    /// Publish a new depth snapshot for `(venue, symbol)`, truncated to the
    /// configured per-side level bound. The previous ticker is carried
    /// forward untouched.
    pub fn update_depth(&self, venue: &str, symbol: &str, mut depth: MarketDepth, ts: Ts) {
        depth.bids.truncate(self.depth_levels);
        depth.asks.truncate(self.depth_levels);
        let stream = self.stream(venue, symbol);
        let previous = stream.snapshot.load();
        stream.snapshot.store(Arc::new(StreamSnapshot {
            ticker: previous.ticker.clone(),
            depth,
            updated_at: ts,
        }));
    }

    /// Current snapshot for `(venue, symbol)`, if the stream has ever been
    /// updated.
    #[must_use]
    pub fn snapshot(&self, venue: &str, symbol: &str) -> Option<Arc<StreamSnapshot>> {
        self.streams.get(&(venue.to_string(), symbol.to_string())).map(|s| s.snapshot.load_full())
    }

    /// `(bid + ask) / 2` when both sides exist, else the last trade price.
    #[must_use]
    pub fn mid_price(&self, venue: &str, symbol: &str) -> Option<Decimal> {
        self.snapshot(venue, symbol).and_then(|s| s.ticker.mid_price())
    }

    /// Aggregate resting quantity on `side` at or better than `price_level`.
    #[must_use]
    pub fn depth_at(&self, venue: &str, symbol: &str, side: common::Side, price_level: Decimal) -> Decimal {
        self.snapshot(venue, symbol).map_or(Decimal::ZERO, |s| s.depth.depth_at(side, price_level))
    }

    /// Whether the stream's last update is older than `max_age_nanos`.
    #[must_use]
    pub fn is_stale(&self, venue: &str, symbol: &str, now: Ts, max_age_nanos: u64) -> bool {
        match self.snapshot(venue, symbol) {
            Some(s) => now.elapsed_since(s.updated_at) > max_age_nanos,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::parse(s).unwrap()
    }

    #[test]
    fn mid_price_averages_bid_and_ask() {
        let state = MarketState::new();
        let ticker = Ticker { bid: Some(dec("100")), ask: Some(dec("102")), ..Ticker::default() };
        state.update_ticker("binance", "BTC/USDT", ticker, Ts::from_nanos(1));
        assert_eq!(state.mid_price("binance", "BTC/USDT"), Some(dec("101")));
    }

    #[test]
    fn mid_price_falls_back_to_last_trade() {
        let state = MarketState::new();
        let ticker = Ticker { last: Some(dec("99.5")), ..Ticker::default() };
        state.update_ticker("binance", "BTC/USDT", ticker, Ts::from_nanos(1));
        assert_eq!(state.mid_price("binance", "BTC/USDT"), Some(dec("99.5")));
    }

    #[test]
    fn unknown_stream_has_no_mid_price() {
        let state = MarketState::new();
        assert_eq!(state.mid_price("binance", "ETH/USDT"), None);
    }

    #[test]
    fn depth_at_sums_levels_at_or_better_than_price() {
        let state = MarketState::new();
        let depth = MarketDepth {
            bids: vec![
                DepthLevel { price: dec("100"), quantity: dec("1") },
                DepthLevel { price: dec("99"), quantity: dec("2") },
                DepthLevel { price: dec("98"), quantity: dec("4") },
            ],
            asks: vec![],
        };
        state.update_depth("binance", "BTC/USDT", depth, Ts::from_nanos(1));
        assert_eq!(state.depth_at("binance", "BTC/USDT", common::Side::Buy, dec("99")), dec("3"));
    }

    #[test]
    fn ticker_update_preserves_existing_depth() {
        let state = MarketState::new();
        let depth = MarketDepth {
            bids: vec![DepthLevel { price: dec("100"), quantity: dec("1") }],
            asks: vec![],
        };
        state.update_depth("binance", "BTC/USDT", depth, Ts::from_nanos(1));
        state.update_ticker(
            "binance",
            "BTC/USDT",
            Ticker { last: Some(dec("101")), ..Ticker::default() },
            Ts::from_nanos(2),
        );
        let snapshot = state.snapshot("binance", "BTC/USDT").unwrap();
        assert_eq!(snapshot.depth.bids.len(), 1);
        assert_eq!(snapshot.ticker.last, Some(dec("101")));
    }

    #[test]
    fn depth_truncated_to_configured_levels() {
        let state = MarketState::with_depth_levels(2);
        let depth = MarketDepth {
            bids: vec![
                DepthLevel { price: dec("100"), quantity: dec("1") },
                DepthLevel { price: dec("99"), quantity: dec("1") },
                DepthLevel { price: dec("98"), quantity: dec("1") },
            ],
            asks: vec![],
        };
        state.update_depth("binance", "BTC/USDT", depth, Ts::from_nanos(1));
        assert_eq!(state.snapshot("binance", "BTC/USDT").unwrap().depth.bids.len(), 2);
    }

    #[test]
    fn staleness_uses_last_update_timestamp() {
        let state = MarketState::new();
        state.update_ticker("binance", "BTC/USDT", Ticker::default(), Ts::from_nanos(1_000));
        assert!(!state.is_stale("binance", "BTC/USDT", Ts::from_nanos(1_500), 1_000));
        assert!(state.is_stale("binance", "BTC/USDT", Ts::from_nanos(5_000), 1_000));
    }

    #[test]
    fn unknown_stream_is_stale() {
        let state = MarketState::new();
        assert!(state.is_stale("binance", "XRP/USDT", Ts::now(), 1_000));
    }
}
