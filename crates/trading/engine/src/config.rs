//! Engine-wide configuration (`spec.md` §6 configuration table).
//!
//! Every knob here is read from an immutable snapshot at shard-init time;
//! operator-initiated changes publish a new [`EngineConfig`] through
//! [`crate::Engine::reconfigure`] rather than mutating fields in place, so no
//! shard ever observes a torn read mid-update.

use serde::{Deserialize, Serialize};

use common::Decimal;
use monitor::MonitorInterval;
use risk::GlobalLimits;
use router::{ExecutionType, RoutingOptions};

/// Serde-friendly mirror of [`risk::GlobalLimits`] (the risk crate's type
/// intentionally carries no serde derive, since its only other caller
/// constructs it as a literal in tests).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskLimitsConfig {
    pub max_order_value: Decimal,
    pub max_position_size: Decimal,
    pub max_leverage: Decimal,
    pub max_daily_loss: Decimal,
    pub max_exposure: Decimal,
    pub strict_daily_loss: bool,
}

impl Default for RiskLimitsConfig {
    fn default() -> Self {
        let d = GlobalLimits::default();
        Self {
            max_order_value: d.max_order_value,
            max_position_size: d.max_position_size,
            max_leverage: d.max_leverage,
            max_daily_loss: d.max_daily_loss,
            max_exposure: d.max_exposure,
            strict_daily_loss: d.strict_daily_loss,
        }
    }
}

impl From<RiskLimitsConfig> for GlobalLimits {
    fn from(c: RiskLimitsConfig) -> Self {
        Self {
            max_order_value: c.max_order_value,
            max_position_size: c.max_position_size,
            max_leverage: c.max_leverage,
            max_daily_loss: c.max_daily_loss,
            max_exposure: c.max_exposure,
            strict_daily_loss: c.strict_daily_loss,
        }
    }
}

/// Serde-friendly mirror of [`router::ExecutionType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionTypeConfig {
    BestPrice,
    BestLiquidity,
    LowestFee,
    Twap,
}

impl From<ExecutionTypeConfig> for ExecutionType {
    fn from(c: ExecutionTypeConfig) -> Self {
        match c {
            ExecutionTypeConfig::BestPrice => Self::BestPrice,
            ExecutionTypeConfig::BestLiquidity => Self::BestLiquidity,
            ExecutionTypeConfig::LowestFee => Self::LowestFee,
            ExecutionTypeConfig::Twap => Self::Twap,
        }
    }
}

/// Serde-friendly mirror of [`router::RoutingOptions`] used as the default
/// applied to a [`crate::command::SubmitOrderRequest`] that doesn't specify
/// its own routing constraints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingDefaultsConfig {
    pub execution_type: ExecutionTypeConfig,
    pub max_slippage: Decimal,
    pub max_splits: usize,
    pub min_split_size: Decimal,
    pub include_fees: bool,
}

impl Default for RoutingDefaultsConfig {
    fn default() -> Self {
        let d = RoutingOptions::default();
        Self {
            execution_type: ExecutionTypeConfig::BestPrice,
            max_slippage: d.max_slippage,
            max_splits: d.max_splits,
            min_split_size: d.min_split_size,
            include_fees: d.include_fees,
        }
    }
}

impl RoutingDefaultsConfig {
    /// Materialize into a [`RoutingOptions`] scoped to `allowed_venues`.
    #[must_use]
    pub fn to_options(&self, allowed_venues: Option<Vec<String>>) -> RoutingOptions {
        RoutingOptions {
            execution_type: self.execution_type.into(),
            max_slippage: self.max_slippage,
            allowed_venues,
            max_splits: self.max_splits,
            min_split_size: self.min_split_size,
            include_fees: self.include_fees,
        }
    }
}

/// Serde-friendly mirror of [`monitor::MonitorInterval`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorIntervalConfig {
    RealTime,
    OneSecond,
    FiveSeconds,
    ThirtySeconds,
}

impl From<MonitorIntervalConfig> for MonitorInterval {
    fn from(c: MonitorIntervalConfig) -> Self {
        match c {
            MonitorIntervalConfig::RealTime => Self::RealTime,
            MonitorIntervalConfig::OneSecond => Self::OneSecond,
            MonitorIntervalConfig::FiveSeconds => Self::FiveSeconds,
            MonitorIntervalConfig::ThirtySeconds => Self::ThirtySeconds,
        }
    }
}

/// Top-level, deserializable engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of pinned shard workers; accounts route to
    /// `hash(account_id) % shard_count`.
    pub shard_count: usize,
    /// Bounded inbox depth per shard before [`crate::CoreError::ShardUnavailable`].
    pub shard_inbox_capacity: usize,
    /// Directory the event journal writes segments under.
    pub journal_base_dir: String,
    /// Cadence the Risk Monitor's background loop ticks at.
    pub monitor_interval: MonitorIntervalConfig,
    /// Default global risk limits, applied at `RiskEngine` construction.
    pub risk_limits: RiskLimitsConfig,
    /// Default routing constraints for orders that don't override them.
    pub routing_defaults: RoutingDefaultsConfig,
    /// Rolling monthly volume assumed for fee-tier lookups absent real
    /// per-account volume tracking.
    pub assumed_monthly_volume: Decimal,
    /// How long `shutdown` waits for shards to drain before forcing closed.
    pub shutdown_drain_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            shard_count: 4,
            shard_inbox_capacity: 4_096,
            journal_base_dir: "./journal".to_string(),
            monitor_interval: MonitorIntervalConfig::OneSecond,
            risk_limits: RiskLimitsConfig::default(),
            routing_defaults: RoutingDefaultsConfig::default(),
            assumed_monthly_volume: Decimal::ZERO,
            shutdown_drain_ms: 5_000,
        }
    }
}
