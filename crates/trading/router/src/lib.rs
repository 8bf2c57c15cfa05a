//! Multi-venue smart order routing (`spec.md` §4.7).
//!
//! Given a parent order and live [`MarketState`], the [`Router`] plans child
//! orders using one of six strategies, ranks candidate venues by
//! fee-adjusted effective cost, and scans for cross-venue arbitrage.

#![forbid(unsafe_code)]

use std::sync::Arc;

use common::{Decimal, Side, Ts};
use dashmap::DashMap;
use market_state::MarketState;

/// Selects which planning strategy [`Router::plan`] prefers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionType {
    /// Route to the venue with the best effective price.
    BestPrice,
    /// Route proportional to available liquidity across venues.
    BestLiquidity,
    /// Route to the venue with the lowest fee-adjusted cost.
    LowestFee,
    /// Spread execution evenly across a time window.
    Twap,
}

/// Caller-supplied planning constraints.
#[derive(Debug, Clone)]
pub struct RoutingOptions {
    /// Preferred execution style.
    pub execution_type: ExecutionType,
    /// Maximum tolerated slippage vs. a venue's current best price.
    pub max_slippage: Decimal,
    /// Venues eligible for this order; `None` means all tracked venues.
    pub allowed_venues: Option<Vec<String>>,
    /// Upper bound on the number of child orders a split may produce.
    pub max_splits: usize,
    /// Smallest child quantity a split is allowed to produce.
    pub min_split_size: Decimal,
    /// Whether fee-adjusted cost should influence venue selection.
    pub include_fees: bool,
}

impl Default for RoutingOptions {
    fn default() -> Self {
        Self {
            execution_type: ExecutionType::BestPrice,
            max_slippage: Decimal::parse("0.005").unwrap_or(Decimal::ZERO),
            allowed_venues: None,
            max_splits: 5,
            min_split_size: Decimal::ZERO,
            include_fees: true,
        }
    }
}

/// Which of the six planning strategies produced a [`RoutingPlan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingStrategy {
    /// Whole order routed to a single venue.
    SingleVenue,
    /// `N` equal-sized child slices.
    FixedSplit,
    /// Explicit percentage-weighted slices.
    PercentageSplit,
    /// Time-spaced slices over a duration.
    Twap,
    /// Slices proportional to each venue's available liquidity.
    LiquiditySplit,
    /// Chosen by the volatility/concentration/spread scoring table.
    Optimal,
}

/// One planned child order.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildOrder {
    /// Venue this child routes to.
    pub venue: String,
    /// Child quantity.
    pub quantity: Decimal,
    /// Limit price, if the strategy pins one.
    pub limit_price: Option<Decimal>,
    /// Scheduled execution time, for TWAP-style slices.
    pub execute_at: Option<Ts>,
}

/// The result of a planning call.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingPlan {
    /// Strategy that produced this plan.
    pub strategy: RoutingStrategy,
    /// Parent order quantity; always equals the sum of `children` quantities.
    pub parent_quantity: Decimal,
    /// Planned child orders.
    pub children: Vec<ChildOrder>,
}

/// Errors raised while planning a route.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RoutingError {
    /// No venue in the eligible set has live market data.
    #[error("no venues available for this symbol")]
    NoVenuesAvailable,
    /// Percentage-split weights did not sum to one.
    #[error("percentage split weights must sum to 1, got {0}")]
    InvalidWeights(Decimal),
    /// A split count of zero was requested.
    #[error("split count must be at least 1")]
    InvalidSplitCount,
    /// A venue's depth could not cover `min_split_size` for any slice.
    #[error("quantity too small to satisfy min_split_size across any venue")]
    MinSplitSizeUnreachable,
    /// The cheapest eligible venue's price deviates from the best quoted
    /// price across eligible venues by more than `max_slippage`.
    #[error("venue price deviates {0} from best quote, exceeding max_slippage")]
    SlippageExceeded(Decimal),
}

/// One monthly-volume fee bracket. `volume_threshold` is the minimum monthly
/// volume required to qualify; the largest qualifying tier wins.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeeTier {
    /// Minimum monthly volume to qualify for this tier.
    pub volume_threshold: Decimal,
    /// Maker fee in basis points; negative means a rebate.
    pub maker_bp: Decimal,
    /// Taker fee in basis points.
    pub taker_bp: Decimal,
}

/// A venue's tiered fee schedule, ordered ascending by `volume_threshold`.
#[derive(Debug, Clone, Default)]
pub struct FeeSchedule {
    /// Volume brackets, ascending.
    pub tiers: Vec<FeeTier>,
}

impl FeeSchedule {
    /// The signed fee rate (fraction of notional, negative for a rebate) for
    /// `monthly_volume` at this venue. Zero if no tier qualifies.
    #[must_use]
    pub fn signed_fee_rate(&self, monthly_volume: Decimal, is_maker: bool) -> Decimal {
        let tier = self
            .tiers
            .iter()
            .filter(|t| monthly_volume.cmp_value(t.volume_threshold) != std::cmp::Ordering::Less)
            .last();
        let Some(tier) = tier else { return Decimal::ZERO };
        let bp = if is_maker { tier.maker_bp } else { tier.taker_bp };
        bp.div_default(Decimal::from_i64(10_000)).unwrap_or(Decimal::ZERO)
    }
}

/// A detected cross-venue arbitrage opportunity.
#[derive(Debug, Clone, PartialEq)]
pub struct ArbitrageOpportunity {
    /// Symbol this opportunity exists in.
    pub symbol: String,
    /// Venue to buy from (lower ask).
    pub buy_venue: String,
    /// Venue to sell into (higher bid).
    pub sell_venue: String,
    /// Profit as a fraction of the buy price.
    pub profit_pct: Decimal,
    /// Maximum executable quantity, limited by the thinner side.
    pub max_quantity: Decimal,
}

struct VenueQuote {
    venue: String,
    price: Decimal,
    quantity: Decimal,
}

/// Multi-venue smart order router.
pub struct Router {
    market: Arc<MarketState>,
    fee_schedules: DashMap<String, FeeSchedule>,
}

impl Router {
    /// Build a router reading live quotes from `market`.
    #[must_use]
    pub fn new(market: Arc<MarketState>) -> Self {
        Self { market, fee_schedules: DashMap::new() }
    }

    /// Install (or replace) a venue's fee schedule.
    pub fn set_fee_schedule(&self, venue: &str, schedule: FeeSchedule) {
        self.fee_schedules.insert(venue.to_string(), schedule);
    }

    fn fee_rate(&self, venue: &str, monthly_volume: Decimal, is_maker: bool) -> Decimal {
        self.fee_schedules
            .get(venue)
            .map_or(Decimal::ZERO, |s| s.signed_fee_rate(monthly_volume, is_maker))
    }

    /// Best quoted price and size on `side` for `(venue, symbol)`, if known.
    fn quote(&self, venue: &str, symbol: &str, side: Side) -> Option<VenueQuote> {
        let snapshot = self.market.snapshot(venue, symbol)?;
        // A buy order lifts the venue's ask; a sell order hits the bid.
        let (price, quantity) = match side {
            Side::Buy => (snapshot.ticker.ask?, snapshot.ticker.ask_qty),
            Side::Sell => (snapshot.ticker.bid?, snapshot.ticker.bid_qty),
        };
        Some(VenueQuote { venue: venue.to_string(), price, quantity })
    }

    fn eligible_quotes(&self, symbol: &str, side: Side, venues: &[String]) -> Vec<VenueQuote> {
        venues.iter().filter_map(|v| self.quote(v, symbol, side)).collect()
    }

    /// `notional * (1 + signed_fee_rate) + slippage_estimate`, where slippage
    /// is priced as the distance of the venue's quote from `reference_price`.
    /// `include_fees` lets a caller rank on raw execution cost alone.
    fn effective_cost(
        &self,
        venue: &str,
        quote_price: Decimal,
        quantity: Decimal,
        monthly_volume: Decimal,
        reference_price: Decimal,
        include_fees: bool,
    ) -> Decimal {
        let notional = quote_price.mul(quantity);
        let fee_rate = if include_fees { self.fee_rate(venue, monthly_volume, false) } else { Decimal::ZERO };
        let fee_adjusted = notional.mul(Decimal::ONE + fee_rate);
        let slippage = quote_price.sub(reference_price).abs().mul(quantity);
        fee_adjusted + slippage
    }

    /// Rank eligible venues by effective cost, ascending.
    #[must_use]
    pub fn rank_routes(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
        venues: &[String],
        monthly_volume: Decimal,
        include_fees: bool,
    ) -> Vec<(String, Decimal)> {
        let quotes = self.eligible_quotes(symbol, side, venues);
        let reference = quotes
            .iter()
            .fold(Decimal::ZERO, |acc, q| acc + q.price)
            .div_default(Decimal::from_i64(i64::try_from(quotes.len().max(1)).unwrap_or(1)))
            .unwrap_or(Decimal::ZERO);
        let mut ranked: Vec<(String, Decimal)> = quotes
            .iter()
            .map(|q| {
                let cost = self.effective_cost(&q.venue, q.price, quantity, monthly_volume, reference, include_fees);
                (q.venue.clone(), cost)
            })
            .collect();
        ranked.sort_by(|a, b| a.1.cmp_value(b.1).then_with(|| a.0.cmp(&b.0)));
        ranked
    }

    /// Whole order to the single best-effective-price venue, provided that
    /// venue's top-of-book liquidity covers `quantity` and its quoted price
    /// does not deviate from the best quote across eligible venues by more
    /// than `max_slippage`.
    pub fn plan_single_venue(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
        venues: &[String],
        monthly_volume: Decimal,
        max_slippage: Decimal,
        include_fees: bool,
    ) -> Result<RoutingPlan, RoutingError> {
        let ranked = self.rank_routes(symbol, side, quantity, venues, monthly_volume, include_fees);
        let quotes = self.eligible_quotes(symbol, side, venues);
        let best = ranked
            .into_iter()
            .find(|(venue, _)| {
                quotes.iter().any(|q| &q.venue == venue && q.quantity.cmp_value(quantity) != std::cmp::Ordering::Less)
            })
            .ok_or(RoutingError::NoVenuesAvailable)?;
        let best_quote = quotes.iter().find(|q| q.venue == best.0).expect("ranked venue has a quote");
        let reference_price = match side {
            Side::Buy => quotes.iter().map(|q| q.price).fold(best_quote.price, Decimal::min),
            Side::Sell => quotes.iter().map(|q| q.price).fold(best_quote.price, Decimal::max),
        };
        if !reference_price.is_zero() {
            let deviation = best_quote
                .price
                .sub(reference_price)
                .abs()
                .div_default(reference_price)
                .unwrap_or(Decimal::ZERO);
            if deviation.cmp_value(max_slippage) == std::cmp::Ordering::Greater {
                return Err(RoutingError::SlippageExceeded(deviation));
            }
        }
        Ok(RoutingPlan {
            strategy: RoutingStrategy::SingleVenue,
            parent_quantity: quantity,
            children: vec![ChildOrder { venue: best.0, quantity, limit_price: None, execute_at: None }],
        })
    }

    /// `N` equal child slices, round-robined across `venues`; the last slice
    /// absorbs any remainder so the total is preserved exactly.
    pub fn plan_fixed_split(
        &self,
        quantity: Decimal,
        splits: usize,
        venues: &[String],
    ) -> Result<RoutingPlan, RoutingError> {
        if splits == 0 || venues.is_empty() {
            return Err(RoutingError::InvalidSplitCount);
        }
        let n = Decimal::from_i64(i64::try_from(splits).unwrap_or(i64::MAX));
        let per_slice = quantity.div_default(n).unwrap_or(Decimal::ZERO);
        let mut children = Vec::with_capacity(splits);
        let mut allocated = Decimal::ZERO;
        for i in 0..splits {
            let venue = venues[i % venues.len()].clone();
            let qty = if i + 1 == splits { quantity.sub(allocated) } else { per_slice };
            allocated = allocated + qty;
            children.push(ChildOrder { venue, quantity: qty, limit_price: None, execute_at: None });
        }
        Ok(RoutingPlan { strategy: RoutingStrategy::FixedSplit, parent_quantity: quantity, children })
    }

    /// Explicit `(venue, weight)` slices; weights must sum to exactly one.
    /// The last slice absorbs the rounding remainder.
    pub fn plan_percentage_split(
        &self,
        quantity: Decimal,
        weights: &[(String, Decimal)],
    ) -> Result<RoutingPlan, RoutingError> {
        let total_weight = weights.iter().fold(Decimal::ZERO, |acc, (_, w)| acc + *w);
        if total_weight != Decimal::ONE {
            return Err(RoutingError::InvalidWeights(total_weight));
        }
        let mut children = Vec::with_capacity(weights.len());
        let mut allocated = Decimal::ZERO;
        for (i, (venue, weight)) in weights.iter().enumerate() {
            let qty = if i + 1 == weights.len() {
                quantity.sub(allocated)
            } else {
                quantity.mul(*weight)
            };
            allocated = allocated + qty;
            children.push(ChildOrder { venue: venue.clone(), quantity: qty, limit_price: None, execute_at: None });
        }
        Ok(RoutingPlan { strategy: RoutingStrategy::PercentageSplit, parent_quantity: quantity, children })
    }

    /// `N` time-spaced slices over `[start, start + (n-1)*interval]`, all
    /// routed to `venue`.
    pub fn plan_twap(
        &self,
        quantity: Decimal,
        splits: usize,
        venue: &str,
        start: Ts,
        interval_nanos: u64,
    ) -> Result<RoutingPlan, RoutingError> {
        if splits == 0 {
            return Err(RoutingError::InvalidSplitCount);
        }
        let n = Decimal::from_i64(i64::try_from(splits).unwrap_or(i64::MAX));
        let per_slice = quantity.div_default(n).unwrap_or(Decimal::ZERO);
        let mut children = Vec::with_capacity(splits);
        let mut allocated = Decimal::ZERO;
        for i in 0..splits {
            let qty = if i + 1 == splits { quantity.sub(allocated) } else { per_slice };
            allocated = allocated + qty;
            let execute_at = Ts::from_nanos(start.as_nanos() + interval_nanos * i as u64);
            children.push(ChildOrder {
                venue: venue.to_string(),
                quantity: qty,
                limit_price: None,
                execute_at: Some(execute_at),
            });
        }
        Ok(RoutingPlan { strategy: RoutingStrategy::Twap, parent_quantity: quantity, children })
    }

    /// Slices proportional to each venue's top-of-book liquidity, capped at
    /// `max_splits` venues (the deepest venues win ties by venue id). A venue
    /// whose proportional share would fall below `min_split_size` is dropped
    /// and the remainder reallocated across the rest.
    pub fn plan_liquidity_split(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
        venues: &[String],
        max_splits: usize,
        min_split_size: Decimal,
    ) -> Result<RoutingPlan, RoutingError> {
        let mut quotes = self.eligible_quotes(symbol, side, venues);
        if quotes.is_empty() {
            return Err(RoutingError::NoVenuesAvailable);
        }
        quotes.sort_by(|a, b| b.quantity.cmp_value(a.quantity).then_with(|| a.venue.cmp(&b.venue)));
        quotes.truncate(max_splits.max(1));
        let mut total_liquidity = quotes.iter().fold(Decimal::ZERO, |acc, q| acc + q.quantity);
        if total_liquidity.is_zero() {
            return Err(RoutingError::MinSplitSizeUnreachable);
        }
        quotes.retain(|q| {
            let share = quantity.mul(q.quantity).div_default(total_liquidity).unwrap_or(Decimal::ZERO);
            share.cmp_value(min_split_size) != std::cmp::Ordering::Less
        });
        if quotes.is_empty() {
            return Err(RoutingError::MinSplitSizeUnreachable);
        }
        total_liquidity = quotes.iter().fold(Decimal::ZERO, |acc, q| acc + q.quantity);
        let mut children = Vec::with_capacity(quotes.len());
        let mut allocated = Decimal::ZERO;
        for (i, quote) in quotes.iter().enumerate() {
            let qty = if i + 1 == quotes.len() {
                quantity.sub(allocated)
            } else {
                quantity.mul(quote.quantity).div_default(total_liquidity).unwrap_or(Decimal::ZERO)
            };
            allocated = allocated + qty;
            children.push(ChildOrder { venue: quote.venue.clone(), quantity: qty, limit_price: None, execute_at: None });
        }
        Ok(RoutingPlan { strategy: RoutingStrategy::LiquiditySplit, parent_quantity: quantity, children })
    }

    /// Score-based strategy selection: high volatility favors TWAP, a
    /// dominant venue favors single-venue, and a wide spread favors a
    /// liquidity-weighted split. Scores are compared pairwise; the highest
    /// wins, ties broken by venue id ascending (already satisfied by the
    /// deterministic ordering each candidate strategy produces).
    pub fn plan_optimal(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
        venues: &[String],
        volatility: Decimal,
        twap_splits: usize,
        twap_start: Ts,
        twap_interval_nanos: u64,
        monthly_volume: Decimal,
    ) -> Result<RoutingPlan, RoutingError> {
        let quotes = self.eligible_quotes(symbol, side, venues);
        if quotes.is_empty() {
            return Err(RoutingError::NoVenuesAvailable);
        }
        let total_liquidity = quotes.iter().fold(Decimal::ZERO, |acc, q| acc + q.quantity);
        let max_liquidity = quotes.iter().map(|q| q.quantity).fold(Decimal::ZERO, Decimal::max);
        let concentration = if total_liquidity.is_zero() {
            Decimal::ZERO
        } else {
            max_liquidity.div_default(total_liquidity).unwrap_or(Decimal::ZERO)
        };

        let high_volatility = volatility.cmp_value(Decimal::parse("0.03").unwrap()) == std::cmp::Ordering::Greater;
        let dominant_venue = concentration.cmp_value(Decimal::parse("0.6").unwrap()) == std::cmp::Ordering::Greater;

        if high_volatility {
            let dominant = quotes
                .iter()
                .max_by(|a, b| a.quantity.cmp_value(b.quantity).then_with(|| b.venue.cmp(&a.venue)))
                .expect("quotes is non-empty")
                .venue
                .clone();
            return self
                .plan_twap(quantity, twap_splits, &dominant, twap_start, twap_interval_nanos)
                .map(|mut plan| {
                    plan.strategy = RoutingStrategy::Optimal;
                    plan
                });
        }
        if dominant_venue {
            return self
                .plan_single_venue(symbol, side, quantity, venues, monthly_volume, Decimal::ONE, true)
                .map(|mut plan| {
                    plan.strategy = RoutingStrategy::Optimal;
                    plan
                });
        }
        self.plan_liquidity_split(symbol, side, quantity, venues, venues.len(), Decimal::ZERO)
            .map(|mut plan| {
                plan.strategy = RoutingStrategy::Optimal;
                plan
            })
    }

    /// Scan every unordered venue pair for each symbol: an opportunity
    /// exists when `best_bid(a) > best_ask(b) * (1 + min_profit_pct)`.
    /// Results are sorted by profit percentage descending.
    #[must_use]
    pub fn arbitrage_scan(
        &self,
        symbols: &[String],
        venues: &[String],
        min_profit_pct: Decimal,
    ) -> Vec<ArbitrageOpportunity> {
        let mut opportunities = Vec::new();
        for symbol in symbols {
            for i in 0..venues.len() {
                for j in 0..venues.len() {
                    if i == j {
                        continue;
                    }
                    let (venue_a, venue_b) = (&venues[i], &venues[j]);
                    let Some(bid_a) = self.quote(venue_a, symbol, Side::Sell) else { continue };
                    let Some(ask_b) = self.quote(venue_b, symbol, Side::Buy) else { continue };
                    let threshold = ask_b.price.mul(Decimal::ONE + min_profit_pct);
                    if bid_a.price.cmp_value(threshold) != std::cmp::Ordering::Greater {
                        continue;
                    }
                    let profit_pct = bid_a
                        .price
                        .sub(ask_b.price)
                        .div_default(ask_b.price)
                        .unwrap_or(Decimal::ZERO);
                    opportunities.push(ArbitrageOpportunity {
                        symbol: symbol.clone(),
                        buy_venue: venue_b.clone(),
                        sell_venue: venue_a.clone(),
                        profit_pct,
                        max_quantity: bid_a.quantity.min(ask_b.quantity),
                    });
                }
            }
        }
        opportunities.sort_by(|a, b| b.profit_pct.cmp_value(a.profit_pct));
        opportunities
    }

    /// Top-level entry point: dispatches to the strategy implied by
    /// `options.execution_type`, falling back to single-venue whenever the
    /// chosen venue's liquidity already covers the whole order.
    pub fn plan(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
        venues: &[String],
        options: &RoutingOptions,
        monthly_volume: Decimal,
    ) -> Result<RoutingPlan, RoutingError> {
        let eligible: Vec<String> = match &options.allowed_venues {
            Some(allowed) => venues.iter().filter(|v| allowed.contains(v)).cloned().collect(),
            None => venues.to_vec(),
        };
        if eligible.is_empty() {
            return Err(RoutingError::NoVenuesAvailable);
        }
        if let Ok(plan) = self.plan_single_venue(
            symbol,
            side,
            quantity,
            &eligible,
            monthly_volume,
            options.max_slippage,
            options.include_fees,
        ) {
            return Ok(plan);
        }
        match options.execution_type {
            ExecutionType::BestPrice | ExecutionType::LowestFee => self.plan_single_venue(
                symbol,
                side,
                quantity,
                &eligible,
                monthly_volume,
                options.max_slippage,
                options.include_fees,
            ),
            ExecutionType::BestLiquidity => self.plan_liquidity_split(
                symbol,
                side,
                quantity,
                &eligible,
                options.max_splits,
                options.min_split_size,
            ),
            ExecutionType::Twap => {
                let venue = eligible.first().cloned().ok_or(RoutingError::NoVenuesAvailable)?;
                self.plan_twap(quantity, options.max_splits.max(1), &venue, Ts::now(), 60_000_000_000)
            }
        }
    }
}


#[cfg(test)]
mod properties {
    use super::*;
    use market_state::{MarketState, Ticker};
    use proptest::prelude::*;

    fn arb_quantity() -> impl Strategy<Value = i64> {
        1i64..1_000_000
    }

    fn arb_price() -> impl Strategy<Value = i64> {
        1i64..1_000_000
    }

    fn router() -> Router {
        Router::new(Arc::new(MarketState::new()))
    }

    proptest! {
        // P1: a parent order split into children always reconstitutes its
        // exact original quantity, regardless of split count or venue count.
        #[test]
        fn fixed_split_children_sum_to_parent_quantity(
            total in arb_quantity(),
            splits in 1usize..20,
            venue_count in 1usize..6,
        ) {
            let venues: Vec<String> = (0..venue_count).map(|i| format!("venue-{i}")).collect();
            let quantity = Decimal::from_i64(total);
            let plan = router().plan_fixed_split(quantity, splits, &venues).unwrap();
            let sum = plan.children.iter().fold(Decimal::ZERO, |acc, c| acc + c.quantity);
            prop_assert_eq!(sum, quantity);
            prop_assert_eq!(plan.children.len(), splits);
        }

        // P1, TWAP variant: time-spaced slices still preserve the parent
        // quantity bit-exactly.
        #[test]
        fn twap_split_children_sum_to_parent_quantity(
            total in arb_quantity(),
            splits in 1usize..20,
            interval_nanos in 1u64..1_000_000,
        ) {
            let quantity = Decimal::from_i64(total);
            let plan = router().plan_twap(quantity, splits, "binance", Ts::from_nanos(0), interval_nanos).unwrap();
            let sum = plan.children.iter().fold(Decimal::ZERO, |acc, c| acc + c.quantity);
            prop_assert_eq!(sum, quantity);
        }

        // P1, liquidity split variant: quantity is preserved across however
        // many venues survive the `min_split_size` filter.
        #[test]
        fn liquidity_split_children_sum_to_parent_quantity(
            total in arb_quantity(),
            qty_a in arb_quantity(),
            qty_b in arb_quantity(),
        ) {
            let market = Arc::new(MarketState::new());
            market.update_ticker(
                "venue-a",
                "BTC/USDT",
                Ticker { bid: Some(Decimal::from_i64(100)), bid_qty: Decimal::from_i64(qty_a), ..Ticker::default() },
                Ts::from_nanos(1),
            );
            market.update_ticker(
                "venue-b",
                "BTC/USDT",
                Ticker { bid: Some(Decimal::from_i64(101)), bid_qty: Decimal::from_i64(qty_b), ..Ticker::default() },
                Ts::from_nanos(1),
            );
            let router = Router::new(market);
            let venues = vec!["venue-a".to_string(), "venue-b".to_string()];
            let quantity = Decimal::from_i64(total);
            if let Ok(plan) = router.plan_liquidity_split("BTC/USDT", Side::Sell, quantity, &venues, 2, Decimal::ZERO) {
                let sum = plan.children.iter().fold(Decimal::ZERO, |acc, c| acc + c.quantity);
                prop_assert_eq!(sum, quantity);
            }
        }

        // P6: every reported arbitrage opportunity actually clears
        // bid(sell_venue) > ask(buy_venue) * (1 + min_profit_pct); the scan
        // never reports a false positive even as quotes and the profit
        // threshold vary arbitrarily.
        #[test]
        fn arbitrage_scan_never_reports_a_false_opportunity(
            bid_a in arb_price(), ask_a in arb_price(),
            bid_b in arb_price(), ask_b in arb_price(),
            qty_a in arb_quantity(), qty_b in arb_quantity(),
            min_profit_bp in 0i64..500,
        ) {
            let market = Arc::new(MarketState::new());
            market.update_ticker(
                "venue-a",
                "BTC/USDT",
                Ticker {
                    bid: Some(Decimal::from_i64(bid_a)), bid_qty: Decimal::from_i64(qty_a),
                    ask: Some(Decimal::from_i64(ask_a)), ask_qty: Decimal::from_i64(qty_a),
                    ..Ticker::default()
                },
                Ts::from_nanos(1),
            );
            market.update_ticker(
                "venue-b",
                "BTC/USDT",
                Ticker {
                    bid: Some(Decimal::from_i64(bid_b)), bid_qty: Decimal::from_i64(qty_b),
                    ask: Some(Decimal::from_i64(ask_b)), ask_qty: Decimal::from_i64(qty_b),
                    ..Ticker::default()
                },
                Ts::from_nanos(1),
            );
            let router = Router::new(market);
            let min_profit_pct = Decimal::from_i64(min_profit_bp).div_default(Decimal::from_i64(10_000)).unwrap();
            let opportunities = router.arbitrage_scan(
                &["BTC/USDT".to_string()],
                &["venue-a".to_string(), "venue-b".to_string()],
                min_profit_pct,
            );
            for opp in &opportunities {
                let bid = if opp.sell_venue == "venue-a" { Decimal::from_i64(bid_a) } else { Decimal::from_i64(bid_b) };
                let ask = if opp.buy_venue == "venue-a" { Decimal::from_i64(ask_a) } else { Decimal::from_i64(ask_b) };
                let threshold = ask.mul(Decimal::ONE + min_profit_pct);
                prop_assert_eq!(bid.cmp_value(threshold), std::cmp::Ordering::Greater);
                prop_assert_ne!(opp.buy_venue, opp.sell_venue);
            }
        }
    }
}
