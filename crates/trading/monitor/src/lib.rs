//! Periodic risk monitoring and alerting (`spec.md` §4.9).
//!
//! On each tick the [`Monitor`] recomputes every tracked account's exposure,
//! open-position count, and drawdown watermark from [`position::PositionTracker`],
//! pushes the results into the account's [`risk::RiskEngine`] limits, and
//! raises [`RiskAlert`]s for any limit whose usage crosses a configured
//! trigger. Alerts deduplicate on `(kind, account, symbol)` while unresolved
//! and only ever escalate in severity until explicitly [`Monitor::resolve`]d.

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use common::{Decimal, LimitKind, TriggerAction, Ts};
use dashmap::DashMap;
use market_state::MarketState;
use position::PositionTracker;
use risk::RiskEngine;

/// Selectable monitor cadence (`spec.md` §6 `monitor_interval`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorInterval {
    /// 100 ms, for latency-sensitive accounts.
    RealTime,
    /// 1 s, the default.
    OneSecond,
    /// 5 s.
    FiveSeconds,
    /// 30 s, for low-churn accounts.
    ThirtySeconds,
}

impl MonitorInterval {
    /// The wall-clock period this cadence implies.
    #[must_use]
    pub fn as_duration(self) -> Duration {
        match self {
            Self::RealTime => Duration::from_millis(100),
            Self::OneSecond => Duration::from_secs(1),
            Self::FiveSeconds => Duration::from_secs(5),
            Self::ThirtySeconds => Duration::from_secs(30),
        }
    }
}

/// Severity of a raised alert. Escalates monotonically while unresolved;
/// never de-escalates on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlertSeverity {
    /// Usage crossed a `Warn` trigger.
    Warn,
    /// Usage crossed a `Restrict` or `CloseAll` trigger.
    Critical,
}

fn severity_for(action: TriggerAction) -> AlertSeverity {
    match action {
        TriggerAction::Warn => AlertSeverity::Warn,
        TriggerAction::Restrict | TriggerAction::CloseAll => AlertSeverity::Critical,
    }
}

/// One active risk alert.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskAlert {
    /// Account this alert concerns.
    pub account_id: String,
    /// Symbol, if the alert is concentration-scoped.
    pub symbol: Option<String>,
    /// Which limit tripped.
    pub kind: LimitKind,
    /// Current severity.
    pub severity: AlertSeverity,
    /// Usage fraction at the time of the last update.
    pub usage_fraction: Decimal,
    /// Human-readable summary.
    pub message: String,
    /// When this alert was first raised.
    pub raised_at: Ts,
    /// When this alert was last updated (e.g. escalated).
    pub updated_at: Ts,
}

type AlertKey = (LimitKind, String, Option<String>);

/// Informational-only risk metrics (`spec.md` §9 Open Question (a)): these
/// use simplified variance formulas with a placeholder square-root
/// approximation and must never gate a risk decision.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InformationalMetrics {
    /// Simplified parametric 95% VaR over recent equity samples.
    pub var_95: Decimal,
    /// Simplified Sharpe-like ratio over recent equity samples.
    pub sharpe: Decimal,
    /// Consecutive calendar days strictly below the running equity peak;
    /// resets to zero on any day equity closes at or above the peak.
    pub max_drawdown_days: u64,
}

const EQUITY_HISTORY_CAP: usize = 64;
const NANOS_PER_DAY: u64 = 86_400_000_000_000;

#[derive(Debug, Clone)]
struct AccountState {
    peak_equity: Decimal,
    last_sample_day: Option<u64>,
    drawdown_days: u64,
    equity_history: Vec<Decimal>,
}

impl AccountState {
    fn new(initial_equity: Decimal) -> Self {
        Self { peak_equity: initial_equity, last_sample_day: None, drawdown_days: 0, equity_history: Vec::new() }
    }

    fn push_sample(&mut self, equity: Decimal) {
        self.equity_history.push(equity);
        if self.equity_history.len() > EQUITY_HISTORY_CAP {
            self.equity_history.remove(0);
        }
    }
}

/// `sqrt(x)` via a fixed number of Newton iterations on [`Decimal`] — the
/// placeholder approximation the informational metrics are allowed to use.
fn decimal_sqrt_approx(x: Decimal) -> Decimal {
    if x.is_zero() || x.is_neg() {
        return Decimal::ZERO;
    }
    let mut guess = x.max(Decimal::ONE);
    for _ in 0..24 {
        let next = guess.add(x.div_default(guess).unwrap_or(Decimal::ZERO)).div_default(Decimal::from_i64(2)).unwrap_or(guess);
        guess = next;
    }
    guess
}

fn mean(samples: &[Decimal]) -> Decimal {
    if samples.is_empty() {
        return Decimal::ZERO;
    }
    let sum = samples.iter().fold(Decimal::ZERO, |acc, s| acc + *s);
    sum.div_default(Decimal::from_i64(i64::try_from(samples.len()).unwrap_or(i64::MAX))).unwrap_or(Decimal::ZERO)
}

fn std_dev(samples: &[Decimal], avg: Decimal) -> Decimal {
    if samples.len() < 2 {
        return Decimal::ZERO;
    }
    let variance_sum = samples.iter().fold(Decimal::ZERO, |acc, s| {
        let dev = s.sub(avg);
        acc + dev.mul(dev)
    });
    let variance = variance_sum.div_default(Decimal::from_i64(i64::try_from(samples.len()).unwrap_or(i64::MAX))).unwrap_or(Decimal::ZERO);
    decimal_sqrt_approx(variance)
}

/// Periodic risk monitor.
pub struct Monitor {
    risk: Arc<RiskEngine>,
    positions: Arc<PositionTracker>,
    market: Arc<MarketState>,
    interval: MonitorInterval,
    account_state: DashMap<String, AccountState>,
    active_alerts: DashMap<AlertKey, RiskAlert>,
}

impl Monitor {
    /// Build a monitor reading positions from `positions`, marks from
    /// `market`, and writing limit usage/reading configured limits on `risk`.
    #[must_use]
    pub fn new(risk: Arc<RiskEngine>, positions: Arc<PositionTracker>, market: Arc<MarketState>, interval: MonitorInterval) -> Self {
        Self { risk, positions, market, interval, account_state: DashMap::new(), active_alerts: DashMap::new() }
    }

    /// The cadence this monitor was configured with.
    #[must_use]
    pub fn interval(&self) -> MonitorInterval {
        self.interval
    }

    /// Run one evaluation pass over `account_ids`. Returns alerts newly
    /// raised or escalated this tick (not the full active set).
    pub fn tick(&self, account_ids: &[String], now: Ts) -> Vec<RiskAlert> {
        let mut raised = Vec::new();
        for account_id in account_ids {
            self.evaluate_account(account_id, now, &mut raised);
        }
        raised
    }

    fn evaluate_account(&self, account_id: &str, now: Ts, raised: &mut Vec<RiskAlert>) {
        let summary = self.positions.summary(account_id, &self.market);
        let equity = summary.realized_pnl + summary.unrealized_pnl;

        let day = now.as_nanos() / NANOS_PER_DAY;
        {
            let mut state = self.account_state.entry(account_id.to_string()).or_insert_with(|| AccountState::new(equity));
            if state.last_sample_day != Some(day) {
                if equity.cmp_value(state.peak_equity) == std::cmp::Ordering::Less {
                    state.drawdown_days += 1;
                } else {
                    state.drawdown_days = 0;
                }
                state.last_sample_day = Some(day);
            }
            if equity.cmp_value(state.peak_equity) != std::cmp::Ordering::Less {
                state.peak_equity = equity;
            }
            state.push_sample(equity);
        }

        let Some(mut limits) = self.risk.account_limits(account_id) else { return };

        for limit in limits.iter_mut() {
            if !limit.enabled {
                continue;
            }
            let usage_value = match limit.kind {
                LimitKind::MaxExposure => summary.gross_exposure,
                LimitKind::MaxPositions => Decimal::from_i64(i64::try_from(summary.open_positions).unwrap_or(i64::MAX)),
                LimitKind::DailyLoss => summary.unrealized_pnl.add(summary.realized_pnl).abs(),
                LimitKind::MaxDrawdown => {
                    let state = self.account_state.get(account_id).expect("just inserted above");
                    state.peak_equity.sub(equity).max(Decimal::ZERO)
                }
                LimitKind::MaxLoss => summary.realized_pnl.abs(),
                LimitKind::Concentration | LimitKind::Leverage => limit.current_used,
            };
            self.risk.update_limit_usage(account_id, limit.kind, usage_value);

            let usage = limit.usage_fraction(usage_value);
            let key: AlertKey = (limit.kind, account_id.to_string(), None);
            match limit.action_for_usage(usage) {
                Some(action) => {
                    let severity = severity_for(action);
                    let message = format!("{:?} usage at {usage} of configured limit", limit.kind);
                    self.active_alerts
                        .entry(key)
                        .and_modify(|existing| {
                            if severity > existing.severity {
                                existing.severity = severity;
                                existing.updated_at = now;
                                existing.message.clone_from(&message);
                                raised.push(existing.clone());
                            }
                            existing.usage_fraction = usage;
                        })
                        .or_insert_with(|| {
                            let alert = RiskAlert {
                                account_id: account_id.to_string(),
                                symbol: None,
                                kind: limit.kind,
                                severity,
                                usage_fraction: usage,
                                message,
                                raised_at: now,
                                updated_at: now,
                            };
                            raised.push(alert.clone());
                            alert
                        });
                }
                None => {}
            }
        }
    }

    /// Currently active (unresolved) alerts across all accounts.
    #[must_use]
    pub fn active_alerts(&self) -> Vec<RiskAlert> {
        self.active_alerts.iter().map(|e| e.value().clone()).collect()
    }

    /// Clear an alert so the next crossing re-raises it fresh. Returns
    /// `true` if an alert existed for this key.
    pub fn resolve(&self, account_id: &str, kind: LimitKind, symbol: Option<&str>) -> bool {
        self.active_alerts.remove(&(kind, account_id.to_string(), symbol.map(str::to_string))).is_some()
    }

    /// Informational VaR/Sharpe/drawdown-days snapshot for one account. Not
    /// derived from any trigger ladder and never used to reject an order.
    #[must_use]
    pub fn informational_metrics(&self, account_id: &str) -> InformationalMetrics {
        let Some(state) = self.account_state.get(account_id) else { return InformationalMetrics::default() };
        let avg = mean(&state.equity_history);
        let sd = std_dev(&state.equity_history, avg);
        let var_95 = avg.sub(sd.mul(Decimal::parse("1.645").unwrap_or(Decimal::ZERO)));
        let sharpe = if sd.is_zero() { Decimal::ZERO } else { avg.div_default(sd).unwrap_or(Decimal::ZERO) };
        InformationalMetrics { var_95, sharpe, max_drawdown_days: state.drawdown_days }
    }

    /// Run `tick` in a loop at `self.interval()` cadence on a dedicated
    /// thread until `stop` is set, mirroring the engine's pinned-worker
    /// concurrency model.
    pub fn spawn(self: Arc<Self>, account_ids: Vec<String>, stop: Arc<AtomicBool>) -> JoinHandle<()> {
        let period = self.interval.as_duration();
        std::thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                let alerts = self.tick(&account_ids, Ts::now());
                for alert in alerts {
                    tracing::warn!(account = %alert.account_id, kind = ?alert.kind, severity = ?alert.severity, "risk alert");
                }
                std::thread::sleep(period);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Account, AccountType, Permissions, RiskLimit, Side, TriggerPoint};
    use std::collections::HashMap;

    fn dec(s: &str) -> Decimal {
        Decimal::parse(s).unwrap()
    }

    fn limit(kind: LimitKind, value: &str) -> RiskLimit {
        RiskLimit {
            kind,
            value: dec(value),
            current_used: Decimal::ZERO,
            enabled: true,
            triggers: vec![
                TriggerPoint { threshold_fraction: dec("0.5"), action: TriggerAction::Warn, notify: true },
                TriggerPoint { threshold_fraction: dec("0.9"), action: TriggerAction::Restrict, notify: true },
            ],
        }
    }

    fn setup(account_id: &str, limits: Vec<RiskLimit>) -> (Arc<RiskEngine>, Arc<PositionTracker>, Arc<MarketState>) {
        let risk = Arc::new(RiskEngine::new());
        let mut by_kind = HashMap::new();
        for l in limits {
            by_kind.insert(l.kind, l);
        }
        risk.register_account(Account {
            id: account_id.to_string(),
            account_type: AccountType::Main,
            parent_id: None,
            permissions: Permissions { spot: true, futures: true, margin: true },
            limits: by_kind,
            rate_limits: HashMap::new(),
            active: true,
            strategy_tag: None,
        });
        (risk, Arc::new(PositionTracker::new()), Arc::new(MarketState::new()))
    }

    #[test]
    fn warn_alert_raised_and_escalates_to_critical() {
        let (risk, positions, market) = setup("acct-1", vec![limit(LimitKind::MaxExposure, "1000")]);
        positions.apply_fill(
            &position::PositionKey::new("acct-1", "binance", "BTC/USDT"),
            Side::Buy,
            dec("1"),
            dec("600"),
            Ts::from_nanos(1),
        );
        market.update_ticker(
            "binance",
            "BTC/USDT",
            market_state::Ticker { bid: Some(dec("600")), ask: Some(dec("600")), ..market_state::Ticker::default() },
            Ts::from_nanos(1),
        );
        let monitor = Monitor::new(risk.clone(), positions.clone(), market.clone(), MonitorInterval::OneSecond);
        let accounts = vec!["acct-1".to_string()];

        let raised = monitor.tick(&accounts, Ts::from_nanos(1));
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].severity, AlertSeverity::Warn);

        positions.apply_fill(
            &position::PositionKey::new("acct-1", "binance", "BTC/USDT"),
            Side::Buy,
            dec("1"),
            dec("400"),
            Ts::from_nanos(2),
        );
        market.update_ticker(
            "binance",
            "BTC/USDT",
            market_state::Ticker { bid: Some(dec("950")), ask: Some(dec("950")), ..market_state::Ticker::default() },
            Ts::from_nanos(2),
        );
        let raised = monitor.tick(&accounts, Ts::from_nanos(2));
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].severity, AlertSeverity::Critical);
        assert_eq!(monitor.active_alerts().len(), 1);
    }

    #[test]
    fn resolve_clears_alert_so_it_can_reraise() {
        let (risk, positions, market) = setup("acct-2", vec![limit(LimitKind::MaxExposure, "1000")]);
        positions.apply_fill(
            &position::PositionKey::new("acct-2", "binance", "BTC/USDT"),
            Side::Buy,
            dec("1"),
            dec("600"),
            Ts::from_nanos(1),
        );
        market.update_ticker(
            "binance",
            "BTC/USDT",
            market_state::Ticker { bid: Some(dec("600")), ask: Some(dec("600")), ..market_state::Ticker::default() },
            Ts::from_nanos(1),
        );
        let monitor = Monitor::new(risk, positions, market, MonitorInterval::OneSecond);
        let accounts = vec!["acct-2".to_string()];
        monitor.tick(&accounts, Ts::from_nanos(1));
        assert_eq!(monitor.active_alerts().len(), 1);
        assert!(monitor.resolve("acct-2", LimitKind::MaxExposure, None));
        assert!(monitor.active_alerts().is_empty());
        assert!(!monitor.resolve("acct-2", LimitKind::MaxExposure, None));
    }

    #[test]
    fn drawdown_days_resets_on_new_peak() {
        let (risk, positions, market) = setup("acct-3", vec![]);
        let monitor = Monitor::new(risk, positions.clone(), market.clone(), MonitorInterval::OneSecond);
        let accounts = vec!["acct-3".to_string()];
        let one_day = NANOS_PER_DAY;

        positions.apply_fill(&position::PositionKey::new("acct-3", "binance", "BTC/USDT"), Side::Buy, dec("1"), dec("100"), Ts::from_nanos(1));
        market.update_ticker("binance", "BTC/USDT", market_state::Ticker { bid: Some(dec("100")), ask: Some(dec("100")), ..market_state::Ticker::default() }, Ts::from_nanos(1));
        monitor.tick(&accounts, Ts::from_nanos(0));

        // Day 2: price drops, equity below peak (zero P&L baseline vs realized/unrealized).
        market.update_ticker("binance", "BTC/USDT", market_state::Ticker { bid: Some(dec("90")), ask: Some(dec("90")), ..market_state::Ticker::default() }, Ts::from_nanos(one_day));
        monitor.tick(&accounts, Ts::from_nanos(one_day));
        assert_eq!(monitor.informational_metrics("acct-3").max_drawdown_days, 1);

        // Day 3: price recovers above the prior peak equity sample.
        market.update_ticker("binance", "BTC/USDT", market_state::Ticker { bid: Some(dec("200")), ask: Some(dec("200")), ..market_state::Ticker::default() }, Ts::from_nanos(one_day * 2));
        monitor.tick(&accounts, Ts::from_nanos(one_day * 2));
        assert_eq!(monitor.informational_metrics("acct-3").max_drawdown_days, 0);
    }

    #[test]
    fn disabled_limit_is_skipped() {
        let mut l = limit(LimitKind::MaxExposure, "1000");
        l.enabled = false;
        let (risk, positions, market) = setup("acct-4", vec![l]);
        positions.apply_fill(&position::PositionKey::new("acct-4", "binance", "BTC/USDT"), Side::Buy, dec("1"), dec("5000"), Ts::from_nanos(1));
        market.update_ticker("binance", "BTC/USDT", market_state::Ticker { bid: Some(dec("5000")), ask: Some(dec("5000")), ..market_state::Ticker::default() }, Ts::from_nanos(1));
        let monitor = Monitor::new(risk, positions, market, MonitorInterval::OneSecond);
        let raised = monitor.tick(&["acct-4".to_string()], Ts::from_nanos(1));
        assert!(raised.is_empty());
    }
}
