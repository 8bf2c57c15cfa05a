//! Thin external shell around the in-process [`engine::Engine`] (`spec.md`
//! §6): no RPC layer, no daemon — each invocation builds an engine, performs
//! one operation, and exits with the configured exit-code taxonomy.

#![forbid(unsafe_code)]

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::Level;

use common::{Account, AccountType, Decimal, MarketKind, OrderType, Permissions, Side, SymbolInfo, SymbolStatus, TimeInForce, Ts};
use engine::{CoreError, Engine, EngineConfig, SubmitOrderRequest};

mod paper;

#[derive(Parser)]
#[command(name = "omscli")]
#[command(about = "Multi-venue cryptocurrency OMS core - command-line shell")]
#[command(version)]
struct Cli {
    /// Path to a JSON-encoded `EngineConfig`. Defaults are used if omitted.
    #[arg(long, global = true)]
    config: Option<String>,
    /// Journal directory, overriding the config's `journal_base_dir`.
    #[arg(long, global = true)]
    journal_dir: Option<String>,
    /// Comma-separated venue names registered with the paper adapter.
    #[arg(long, global = true, default_value = "paper")]
    venues: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a new parent order.
    Submit {
        #[arg(long)]
        account: String,
        #[arg(long)]
        symbol: String,
        #[arg(long, value_enum)]
        side: SideArg,
        #[arg(long, value_enum, default_value = "market")]
        order_type: OrderTypeArg,
        #[arg(long)]
        price: Option<String>,
        #[arg(long)]
        qty: String,
        #[arg(long, value_enum, default_value = "ioc")]
        tif: TifArg,
    },
    /// Cancel a previously dispatched child order.
    Cancel {
        #[arg(long)]
        account: String,
        #[arg(long)]
        venue: String,
        #[arg(long)]
        venue_order_id: String,
    },
    /// List every position held by an account.
    Positions {
        #[arg(long)]
        account: String,
    },
    /// Print an account's exposure/P&L rollup.
    Balance {
        #[arg(long)]
        account: String,
    },
    /// Print an account's configured limits, active alerts, and
    /// informational VaR/Sharpe/drawdown metrics.
    RiskStatus {
        #[arg(long)]
        account: String,
    },
    /// Scan for cross-venue arbitrage opportunities.
    ArbitrageScan {
        #[arg(long, value_delimiter = ',')]
        symbols: Vec<String>,
        #[arg(long, default_value = "0.0005")]
        min_profit_pct: String,
    },
    /// Replay a journaled stream and print every event.
    Replay {
        #[arg(long)]
        venue: String,
        #[arg(long)]
        symbol: String,
        #[arg(long, value_enum, default_value = "order")]
        kind: EventKindArg,
        #[arg(long, default_value_t = 0)]
        start: u64,
        #[arg(long, default_value = "18446744073709551615")]
        end: u64,
    },
}

#[derive(Clone, clap::ValueEnum)]
enum SideArg {
    Buy,
    Sell,
}

impl From<SideArg> for Side {
    fn from(s: SideArg) -> Self {
        match s {
            SideArg::Buy => Self::Buy,
            SideArg::Sell => Self::Sell,
        }
    }
}

#[derive(Clone, clap::ValueEnum)]
enum OrderTypeArg {
    Market,
    Limit,
}

impl From<OrderTypeArg> for OrderType {
    fn from(t: OrderTypeArg) -> Self {
        match t {
            OrderTypeArg::Market => Self::Market,
            OrderTypeArg::Limit => Self::Limit,
        }
    }
}

#[derive(Clone, clap::ValueEnum)]
enum TifArg {
    Gtc,
    Ioc,
    Fok,
    Gtx,
}

impl From<TifArg> for TimeInForce {
    fn from(t: TifArg) -> Self {
        match t {
            TifArg::Gtc => Self::GTC,
            TifArg::Ioc => Self::IOC,
            TifArg::Fok => Self::FOK,
            TifArg::Gtx => Self::GTX,
        }
    }
}

#[derive(Clone, clap::ValueEnum)]
enum EventKindArg {
    OrderBook,
    Trade,
    Ticker,
    Order,
    Position,
}

impl From<EventKindArg> for journal::EventKind {
    fn from(k: EventKindArg) -> Self {
        match k {
            EventKindArg::OrderBook => Self::OrderBook,
            EventKindArg::Trade => Self::Trade,
            EventKindArg::Ticker => Self::Ticker,
            EventKindArg::Order => Self::Order,
            EventKindArg::Position => Self::Position,
        }
    }
}

/// Usage error: bad argument values that `clap` itself can't catch (e.g. a
/// malformed decimal), mapped to exit code 2.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct UsageError(String);

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_max_level(Level::INFO).with_target(true).with_thread_ids(true).init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            if let Some(usage) = err.downcast_ref::<UsageError>() {
                eprintln!("usage error: {usage}");
                return ExitCode::from(2);
            }
            if let Some(core) = err.downcast_ref::<CoreError>() {
                eprintln!("error: {core}");
                return ExitCode::from(exit_code_for(core));
            }
            eprintln!("internal error: {err:#}");
            ExitCode::from(6)
        }
    }
}

/// Maps `spec.md` §6's exit-code taxonomy onto [`CoreError`]. `Routing` and
/// `DispatchIncomplete` both originate on the venue side of the boundary;
/// a message mentioning a timeout (the only signal left once a venue error
/// has been flattened to its display string) is distinguished as exit `5`.
fn exit_code_for(err: &CoreError) -> u8 {
    let message = err.to_string();
    match err {
        CoreError::Validation(_) => 2,
        CoreError::RiskRejected(_) => 3,
        CoreError::Routing(_) | CoreError::DispatchIncomplete { .. } => {
            if message.contains("timeout") {
                5
            } else {
                4
            }
        }
        CoreError::Journal(_) | CoreError::Protective(_) | CoreError::ShuttingDown | CoreError::ShardUnavailable => 6,
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = match &cli.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path).with_context(|| format!("reading config {path}"))?;
            serde_json::from_str::<EngineConfig>(&raw).with_context(|| format!("parsing config {path}"))?
        }
        None => EngineConfig::default(),
    };
    if let Some(dir) = &cli.journal_dir {
        config.journal_base_dir = dir.clone();
    }

    let engine = Engine::new(config);
    let venues: Vec<String> = cli.venues.split(',').map(|v| v.trim().to_string()).filter(|v| !v.is_empty()).collect();
    for venue in &venues {
        engine.register_venue(venue, Arc::new(paper::PaperAdapter::new(venue.clone())));
    }
    bootstrap_demo_symbols(&engine);

    match cli.command {
        Commands::Submit { account, symbol, side, order_type, price, qty, tif } => {
            submit(&engine, &venues, account, symbol, side, order_type, price, qty, tif)
        }
        Commands::Cancel { account, venue, venue_order_id } => cancel(&engine, account, venue, venue_order_id),
        Commands::Positions { account } => positions(&engine, &account),
        Commands::Balance { account } => balance(&engine, &account),
        Commands::RiskStatus { account } => risk_status(&engine, &account),
        Commands::ArbitrageScan { symbols, min_profit_pct } => arbitrage_scan(&engine, &venues, symbols, min_profit_pct),
        Commands::Replay { venue, symbol, kind, start, end } => replay(&cli.journal_dir, venue, symbol, kind, start, end),
    }
}

/// The CLI surface has no account- or symbol-provisioning command of its
/// own (`spec.md` §6 lists only `submit`, `cancel`, `positions`, `balance`,
/// `risk-status`, `arbitrage-scan`, `replay`); every invocation registers a
/// fully-permissioned demo account and a small built-in symbol table so the
/// other commands have something to act on.
fn bootstrap_demo_symbols(engine: &Engine) {
    for (base, quote) in [("BTC", "USDT"), ("ETH", "USDT")] {
        engine.register_symbol(SymbolInfo {
            symbol: common::Symbol::new(base, quote),
            base: base.to_string(),
            quote: quote.to_string(),
            status: SymbolStatus::Trading,
            min_qty: Decimal::parse("0.0001").expect("valid literal"),
            max_qty: Decimal::parse("10000").expect("valid literal"),
            step_size: Decimal::parse("0.0001").expect("valid literal"),
            min_notional: Decimal::parse("10").expect("valid literal"),
            tick_size: Decimal::parse("0.01").expect("valid literal"),
            kind: MarketKind::Spot,
        });
    }
}

fn ensure_account(engine: &Engine, account_id: &str) {
    engine.register_account(Account {
        id: account_id.to_string(),
        account_type: AccountType::Main,
        parent_id: None,
        permissions: Permissions { spot: true, futures: true, margin: true },
        limits: std::collections::HashMap::new(),
        rate_limits: std::collections::HashMap::new(),
        active: true,
        strategy_tag: None,
    });
}

fn parse_decimal(field: &str, raw: &str) -> Result<Decimal> {
    Decimal::parse(raw).map_err(|e| UsageError(format!("invalid {field} {raw:?}: {e}")).into())
}

#[allow(clippy::too_many_arguments)]
fn submit(
    engine: &Engine,
    venues: &[String],
    account: String,
    symbol: String,
    side: SideArg,
    order_type: OrderTypeArg,
    price: Option<String>,
    qty: String,
    tif: TifArg,
) -> Result<ExitCode> {
    ensure_account(engine, &account);
    let quantity = parse_decimal("qty", &qty)?;
    let price = price.map(|p| parse_decimal("price", &p)).transpose()?;

    let request = SubmitOrderRequest {
        client_id: format!("cli-{}", Ts::now().as_nanos()),
        account_id: account,
        symbol,
        side: side.into(),
        order_type: order_type.into(),
        time_in_force: tif.into(),
        price,
        quantity,
        market_kind: MarketKind::Spot,
        venues: venues.to_vec(),
        routing: None,
    };
    let outcome = engine.submit_order(request)?;
    if !outcome.dispatch.is_fully_dispatched() {
        eprintln!(
            "warning: only {}/{} children dispatched",
            outcome.dispatch.filled_count(),
            outcome.dispatch.children.len()
        );
    }
    println!("engine_id={} filled={}/{}", outcome.engine_id, outcome.dispatch.filled_count(), outcome.dispatch.children.len());
    Ok(ExitCode::SUCCESS)
}

fn cancel(engine: &Engine, account: String, venue: String, venue_order_id: String) -> Result<ExitCode> {
    engine.cancel_order(engine::CancelRequest { account_id: account, venue, venue_order_id })?;
    println!("cancel acknowledged");
    Ok(ExitCode::SUCCESS)
}

fn positions(engine: &Engine, account: &str) -> Result<ExitCode> {
    for (key, position) in engine.positions(account) {
        println!("{} {} {:?} qty={} avg_cost={} realized_pnl={}", key.venue, key.symbol, position.side, position.quantity, position.avg_cost, position.realized_pnl);
    }
    Ok(ExitCode::SUCCESS)
}

fn balance(engine: &Engine, account: &str) -> Result<ExitCode> {
    let summary = engine.account_summary(account);
    println!(
        "net_exposure={} gross_exposure={} realized_pnl={} unrealized_pnl={} open_positions={}",
        summary.net_exposure, summary.gross_exposure, summary.realized_pnl, summary.unrealized_pnl, summary.open_positions
    );
    Ok(ExitCode::SUCCESS)
}

fn risk_status(engine: &Engine, account: &str) -> Result<ExitCode> {
    let status = engine.risk_status(account);
    for limit in &status.limits {
        println!("limit kind={:?} used={} cap={} enabled={}", limit.kind, limit.current_used, limit.value, limit.enabled);
    }
    for alert in &status.alerts {
        println!("alert kind={:?} severity={:?} usage={} {}", alert.kind, alert.severity, alert.usage_fraction, alert.message);
    }
    println!(
        "var_95={} sharpe={} max_drawdown_days={}",
        status.informational.var_95, status.informational.sharpe, status.informational.max_drawdown_days
    );
    Ok(ExitCode::SUCCESS)
}

fn arbitrage_scan(engine: &Engine, venues: &[String], symbols: Vec<String>, min_profit_pct: String) -> Result<ExitCode> {
    let min_profit_pct = parse_decimal("min_profit_pct", &min_profit_pct)?;
    for opp in engine.arbitrage_scan(&symbols, venues, min_profit_pct) {
        println!(
            "{} buy={} sell={} profit_pct={} max_qty={}",
            opp.symbol, opp.buy_venue, opp.sell_venue, opp.profit_pct, opp.max_quantity
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn replay(journal_dir: &Option<String>, venue: String, symbol: String, kind: EventKindArg, start: u64, end: u64) -> Result<ExitCode> {
    let base_dir = journal_dir.clone().unwrap_or_else(|| "./journal".to_string());
    let reader = journal::Journal::open(base_dir);
    let mut count = 0u64;
    reader
        .replay(&venue, &symbol, kind.into(), start, end, |event| {
            count += 1;
            println!("{}", event.data);
        })
        .context("replaying journal")?;
    println!("replayed {count} events");
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(dir: &std::path::Path, command: Commands) -> Cli {
        Cli { config: None, journal_dir: Some(dir.to_string_lossy().to_string()), venues: "paper".to_string(), command }
    }

    #[test]
    fn submit_then_positions_round_trips_through_a_fresh_engine_each_time() {
        let dir = tempfile::tempdir().unwrap();

        run(cli(
            dir.path(),
            Commands::Submit {
                account: "acct-1".to_string(),
                symbol: "BTC/USDT".to_string(),
                side: SideArg::Buy,
                order_type: OrderTypeArg::Market,
                price: None,
                qty: "0.01".to_string(),
                tif: TifArg::Ioc,
            },
        ))
        .unwrap();

        // A fresh CLI invocation builds a fresh in-process engine, so the
        // position from the previous `submit` is gone: only `replay` against
        // the shared journal directory sees history across invocations.
        run(cli(dir.path(), Commands::Positions { account: "acct-1".to_string() })).unwrap();

        run(cli(
            dir.path(),
            Commands::Replay { venue: "paper".to_string(), symbol: "BTC/USDT".to_string(), kind: EventKindArg::Position, start: 0, end: u64::MAX },
        ))
        .unwrap();
    }

    #[test]
    fn submit_with_malformed_quantity_is_a_usage_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(cli(
            dir.path(),
            Commands::Submit {
                account: "acct-1".to_string(),
                symbol: "BTC/USDT".to_string(),
                side: SideArg::Buy,
                order_type: OrderTypeArg::Market,
                price: None,
                qty: "not-a-number".to_string(),
                tif: TifArg::Ioc,
            },
        ))
        .unwrap_err();
        assert!(err.downcast_ref::<UsageError>().is_some());
    }

    #[test]
    fn submit_with_off_step_quantity_surfaces_as_validation_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(cli(
            dir.path(),
            Commands::Submit {
                account: "acct-1".to_string(),
                symbol: "BTC/USDT".to_string(),
                side: SideArg::Buy,
                order_type: OrderTypeArg::Market,
                price: None,
                qty: "0.00015".to_string(),
                tif: TifArg::Ioc,
            },
        ))
        .unwrap_err();
        let core = err.downcast_ref::<CoreError>().expect("a CoreError");
        assert_eq!(exit_code_for(core), 2);
    }

    #[test]
    fn balance_and_risk_status_run_clean_on_a_fresh_account() {
        let dir = tempfile::tempdir().unwrap();
        run(cli(dir.path(), Commands::Balance { account: "acct-1".to_string() })).unwrap();
        run(cli(dir.path(), Commands::RiskStatus { account: "acct-1".to_string() })).unwrap();
    }

    #[test]
    fn arbitrage_scan_runs_clean_with_no_quotes_ingested() {
        let dir = tempfile::tempdir().unwrap();
        run(cli(dir.path(), Commands::ArbitrageScan { symbols: vec!["BTC/USDT".to_string()], min_profit_pct: "0.0005".to_string() })).unwrap();
    }
}
