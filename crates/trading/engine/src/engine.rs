//! The sharded engine (`spec.md` §5): owns every CORE component, routes
//! account commands to pinned shard workers, and republishes configuration
//! through an `arc_swap::ArcSwap` so readers never block on a writer.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use dashmap::DashMap;

use common::{Account, SymbolInfo, Ts};
use dispatcher::Dispatcher;
use journal::Journal;
use market_state::MarketState;
use monitor::Monitor;
use position::PositionTracker;
use protective::ProtectiveManager;
use risk::RiskEngine;
use router::Router;

use crate::command::{CancelRequest, Command, SubmitOrderOutcome, SubmitOrderRequest};
use crate::config::EngineConfig;
use crate::errors::CoreError;
use crate::shard::{self, ShardHandle};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Running = 0,
    Draining = 1,
    Stopped = 2,
}

/// The components shared read-only (or internally-synchronized) across
/// every shard. Each is itself a sharded concurrent structure, so accounts
/// on different shards never contend on the same lock.
pub(crate) struct Shared {
    pub(crate) config: ArcSwap<EngineConfig>,
    pub(crate) risk: Arc<RiskEngine>,
    pub(crate) positions: Arc<PositionTracker>,
    pub(crate) protective: Arc<ProtectiveManager>,
    pub(crate) market: Arc<MarketState>,
    pub(crate) router: Arc<Router>,
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) journal: Arc<Journal>,
    pub(crate) symbols: DashMap<String, SymbolInfo>,
    pub(crate) order_seq: AtomicU64,
}

/// Combined view backing the `risk-status` CLI command.
#[derive(Debug, Clone, Default)]
pub struct RiskStatus {
    /// Configured limits and their current usage, if the account is known.
    pub limits: Vec<common::RiskLimit>,
    /// Currently active alerts for this account.
    pub alerts: Vec<monitor::RiskAlert>,
    /// Informational-only VaR/Sharpe/drawdown metrics.
    pub informational: monitor::InformationalMetrics,
}

/// Outcome of [`Engine::shutdown`].
#[derive(Debug, Clone, Default)]
pub struct ShutdownReport {
    /// Shards that acknowledged the stop signal before the deadline.
    pub drained: usize,
    /// Shards still running when the deadline elapsed.
    pub forced: usize,
}

/// Entry point: owns the shard pool and every CORE component.
pub struct Engine {
    shared: Arc<Shared>,
    shards: Vec<ShardHandle>,
    shard_count: usize,
    monitor: Arc<Monitor>,
    monitor_stop: Arc<std::sync::atomic::AtomicBool>,
    state: AtomicU8,
}

impl Engine {
    /// Build an engine from `config`, wiring the journal, risk engine,
    /// market state, protective manager, router, dispatcher, and monitor.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let risk = Arc::new(RiskEngine::with_limits(config.risk_limits.into()));
        let positions = Arc::new(PositionTracker::new());
        let protective = Arc::new(ProtectiveManager::new());
        let market = Arc::new(MarketState::new());
        let router = Arc::new(Router::new(Arc::clone(&market)));
        let dispatcher = Arc::new(Dispatcher::new(dispatcher::RetryPolicy::default()));
        let journal = Arc::new(Journal::open(config.journal_base_dir.clone()));
        let monitor = Arc::new(Monitor::new(
            Arc::clone(&risk),
            Arc::clone(&positions),
            Arc::clone(&market),
            config.monitor_interval.into(),
        ));

        let shard_count = config.shard_count.max(1);
        let inbox_capacity = config.shard_inbox_capacity;
        let shared = Arc::new(Shared {
            config: ArcSwap::from_pointee(config),
            risk,
            positions,
            protective,
            market,
            router,
            dispatcher,
            journal,
            symbols: DashMap::new(),
            order_seq: AtomicU64::new(1),
        });

        let shards = (0..shard_count).map(|id| shard::spawn(id, inbox_capacity, Arc::clone(&shared))).collect();

        Self {
            shared,
            shards,
            shard_count,
            monitor,
            monitor_stop: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            state: AtomicU8::new(RunState::Running as u8),
        }
    }

    /// Publish a new configuration snapshot. Shards pick it up on their next
    /// command; already-enqueued commands finish against the old snapshot.
    pub fn reconfigure(&self, config: EngineConfig) {
        self.shared.config.store(Arc::new(config));
    }

    /// Register (or replace) an account's risk configuration.
    pub fn register_account(&self, account: Account) {
        self.shared.risk.register_account(account);
    }

    /// Register (or replace) a symbol's trading constraints.
    pub fn register_symbol(&self, info: SymbolInfo) {
        self.shared.symbols.insert(info.symbol.to_string(), info);
    }

    /// Register the adapter used to reach `venue`.
    pub fn register_venue(&self, venue: &str, adapter: Arc<dyn dispatcher::VenueAdapter>) {
        self.shared.dispatcher.register_venue(venue, adapter);
    }

    /// Ingest a ticker update for `(venue, symbol)`.
    pub fn ingest_ticker(&self, venue: &str, symbol: &str, ticker: market_state::Ticker, ts: Ts) {
        self.shared.market.update_ticker(venue, symbol, ticker, ts);
    }

    /// Cross-venue arbitrage opportunities for `symbols` restricted to
    /// `venues`, backing the `arbitrage-scan` CLI command.
    #[must_use]
    pub fn arbitrage_scan(&self, symbols: &[String], venues: &[String], min_profit_pct: common::Decimal) -> Vec<router::ArbitrageOpportunity> {
        self.shared.router.arbitrage_scan(symbols, venues, min_profit_pct)
    }

    /// Ingest a depth snapshot for `(venue, symbol)`.
    pub fn ingest_depth(&self, venue: &str, symbol: &str, depth: market_state::MarketDepth, ts: Ts) {
        self.shared.market.update_depth(venue, symbol, depth, ts);
    }

    /// Submit a parent order, routing it to the shard owning `account_id`
    /// and blocking until that shard finishes processing it.
    pub fn submit_order(&self, request: SubmitOrderRequest) -> Result<SubmitOrderOutcome, CoreError> {
        if self.state.load(Ordering::Acquire) != RunState::Running as u8 {
            return Err(CoreError::ShuttingDown);
        }
        let idx = shard::shard_for(&request.account_id, self.shard_count);
        let (tx, rx) = crossbeam::channel::bounded(1);
        self.shards[idx]
            .tx
            .try_send(Command::SubmitOrder { request, reply: tx })
            .map_err(|_| CoreError::ShardUnavailable)?;
        rx.recv().map_err(|_| CoreError::ShardUnavailable)?
    }

    /// Cancel a previously dispatched child order, on the shard owning
    /// `request.account_id`.
    pub fn cancel_order(&self, request: CancelRequest) -> Result<(), CoreError> {
        if self.state.load(Ordering::Acquire) != RunState::Running as u8 {
            return Err(CoreError::ShuttingDown);
        }
        let idx = shard::shard_for(&request.account_id, self.shard_count);
        let (tx, rx) = crossbeam::channel::bounded(1);
        self.shards[idx]
            .tx
            .try_send(Command::Cancel { request, reply: tx })
            .map_err(|_| CoreError::ShardUnavailable)?;
        rx.recv().map_err(|_| CoreError::ShardUnavailable)?
    }

    /// Run one risk-monitor evaluation pass over `account_ids` immediately,
    /// outside the monitor's own background cadence.
    pub fn monitor_tick(&self, account_ids: &[String], now: Ts) -> Vec<monitor::RiskAlert> {
        self.monitor.tick(account_ids, now)
    }

    /// Configured limits, active alerts, and informational VaR/Sharpe/drawdown
    /// metrics for `account_id`, as surfaced by the `risk-status` CLI command.
    #[must_use]
    pub fn risk_status(&self, account_id: &str) -> RiskStatus {
        RiskStatus {
            limits: self.shared.risk.account_limits(account_id).unwrap_or_default(),
            alerts: self.monitor.active_alerts().into_iter().filter(|a| a.account_id == account_id).collect(),
            informational: self.monitor.informational_metrics(account_id),
        }
    }

    /// Start the risk monitor's background loop at its configured cadence.
    pub fn spawn_monitor(&self, account_ids: Vec<String>) -> std::thread::JoinHandle<()> {
        Arc::clone(&self.monitor).spawn(account_ids, Arc::clone(&self.monitor_stop))
    }

    /// Account-wide exposure/P&L rollup, marked against live market state.
    #[must_use]
    pub fn account_summary(&self, account_id: &str) -> position::AccountSummary {
        self.shared.positions.summary(account_id, &self.shared.market)
    }

    /// Every open or historical position held by `account_id`.
    #[must_use]
    pub fn positions(&self, account_id: &str) -> Vec<(position::PositionKey, position::Position)> {
        self.shared.positions.positions_for_account(account_id)
    }

    /// Read the journal's lifetime/backpressure counters.
    #[must_use]
    pub fn journal_stats(&self) -> journal::JournalStats {
        self.shared.journal.stats()
    }

    /// Gracefully stop: broadcast shutdown to every shard, wait up to
    /// `timeout` for each to drain its inbox and acknowledge, then flush the
    /// journal regardless of how many shards forced-closed.
    pub fn shutdown(&mut self, timeout: Duration) -> ShutdownReport {
        self.state.store(RunState::Draining as u8, Ordering::Release);
        self.monitor_stop.store(true, Ordering::Release);

        let deadline = Instant::now() + timeout;
        let mut report = ShutdownReport::default();
        for handle in &mut self.shards {
            let (ack_tx, ack_rx) = crossbeam::channel::bounded(1);
            if handle.tx.send(Command::Shutdown { ack: ack_tx }).is_err() {
                report.forced += 1;
                continue;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            match ack_rx.recv_timeout(remaining) {
                Ok(()) => {
                    if let Some(join) = handle.join.take() {
                        let _ = join.join();
                    }
                    report.drained += 1;
                }
                Err(_) => report.forced += 1,
            }
        }

        self.shared.journal.shutdown();
        self.state.store(RunState::Stopped as u8, Ordering::Release);
        report
    }
}
