//! Hot-path benchmark for the pre-trade risk decision engine.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use common::{Account, AccountType, Decimal, MarketKind, Permissions, Side};
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use risk::{GlobalLimits, RiskEngine, RiskOrderRequest};
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

fn bench_risk_checks(c: &mut Criterion) {
    let mut group = c.benchmark_group("risk_checks");

    group.bench_function("check_order_pass", |b| {
        let engine = RiskEngine::new();
        engine.register_account(active_account("bench-acct"));
        let req = RiskOrderRequest {
            account_id: "bench-acct".to_string(),
            venue: "binance".to_string(),
            symbol: "BTC/USDT".to_string(),
            side: Side::Buy,
            price: Decimal::from_i64(100),
            quantity: Decimal::from_i64(1),
            market_kind: MarketKind::Spot,
        };

        b.iter(|| {
            let decision = engine.check_order(black_box(&req));
            black_box(decision);
        });
    });

    group.bench_function("check_order_rejected_by_account_limit_ladder", |b| {
        let limits = GlobalLimits { max_order_value: Decimal::from_i64(1_000_000_000), ..GlobalLimits::default() };
        let engine = RiskEngine::with_limits(limits);
        engine.register_account(active_account("bench-acct"));
        let req = RiskOrderRequest {
            account_id: "unknown-acct".to_string(),
            venue: "binance".to_string(),
            symbol: "BTC/USDT".to_string(),
            side: Side::Buy,
            price: Decimal::from_i64(100),
            quantity: Decimal::from_i64(1),
            market_kind: MarketKind::Spot,
        };

        b.iter(|| {
            let decision = engine.check_order(black_box(&req));
            black_box(decision);
        });
    });

    group.finish();
}

criterion_group!(benches, bench_risk_checks);
criterion_main!(benches);
