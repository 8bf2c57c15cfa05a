//! Sharded orchestration wiring the CORE components together
//! (`spec.md` §5): a pinned shard worker per `hash(account_id) %
//! shard_count`, configuration published via `arc_swap::ArcSwap`, and
//! graceful shutdown with a bounded drain.

#![forbid(unsafe_code)]

mod command;
mod config;
#[allow(clippy::module_inception)]
mod engine;
mod errors;
mod shard;

pub use command::{CancelRequest, SubmitOrderOutcome, SubmitOrderRequest};
pub use config::{EngineConfig, ExecutionTypeConfig, MonitorIntervalConfig, RiskLimitsConfig, RoutingDefaultsConfig};
pub use engine::{Engine, RiskStatus, ShutdownReport};
pub use errors::CoreError;
pub use shard::shard_for;

pub use position::{AccountSummary, Position, PositionKey};
pub use router::ArbitrageOpportunity;
