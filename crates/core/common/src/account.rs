//! Account and risk-limit configuration types.

use std::collections::HashMap;

use decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Account kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountType {
    /// Primary account.
    Main,
    /// Sub-account under a `Main` parent.
    Sub,
    /// Strategy-tagged sub-account, used by the router for rate-limit
    /// distribution.
    Strategy,
}

/// Per-market-kind trading permission bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Permissions {
    /// May trade spot.
    pub spot: bool,
    /// May trade futures.
    pub futures: bool,
    /// May trade on margin.
    pub margin: bool,
}

/// Per-window order-rate quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitQuota {
    /// Maximum orders within the window.
    pub max_orders: u32,
    /// Window length, in milliseconds.
    pub window_ms: u64,
}

/// Kind of risk limit tracked per account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LimitKind {
    /// Cumulative loss cap.
    MaxLoss,
    /// Peak-to-trough drawdown cap.
    MaxDrawdown,
    /// Aggregate open notional cap.
    MaxExposure,
    /// Open position count cap.
    MaxPositions,
    /// Same-day realized+unrealized loss cap.
    DailyLoss,
    /// Single-symbol concentration cap.
    Concentration,
    /// Futures leverage cap.
    Leverage,
}

/// Action taken when a limit's usage crosses a trigger threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerAction {
    /// Attach a warning; do not block the order.
    Warn,
    /// Reject new orders that would increase usage further.
    Restrict,
    /// Reject new orders and flatten all positions.
    CloseAll,
}

/// A single point on a limit's escalation ladder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TriggerPoint {
    /// Usage fraction (0.0-1.0+) at which this trigger applies.
    pub threshold_fraction: Decimal,
    /// Action to take once usage reaches this threshold.
    pub action: TriggerAction,
    /// Whether crossing this threshold should emit a notification.
    pub notify: bool,
}

/// A single configured risk limit on an account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimit {
    /// What this limit tracks.
    pub kind: LimitKind,
    /// Configured cap.
    pub value: Decimal,
    /// Current usage, refreshed by the Risk Monitor.
    pub current_used: Decimal,
    /// Whether this limit is currently enforced.
    pub enabled: bool,
    /// Escalation ladder, ascending by `threshold_fraction`.
    pub triggers: Vec<TriggerPoint>,
}

impl RiskLimit {
    /// Usage fraction of `value`, or zero if the limit's cap is zero.
    #[must_use]
    pub fn usage_fraction(&self, projected: Decimal) -> Decimal {
        if self.value.is_zero() {
            return Decimal::ZERO;
        }
        projected.div_default(self.value).unwrap_or(Decimal::ZERO)
    }

    /// Highest-severity action among triggers at or below `usage`, ascending
    /// order assumed in `triggers`.
    #[must_use]
    pub fn action_for_usage(&self, usage: Decimal) -> Option<TriggerAction> {
        self.triggers
            .iter()
            .filter(|t| usage.cmp_value(t.threshold_fraction) != std::cmp::Ordering::Less)
            .max_by(|a, b| a.threshold_fraction.cmp_value(b.threshold_fraction))
            .map(|t| t.action)
    }
}

/// A trading account or sub-account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Unique account id.
    pub id: String,
    /// Account kind.
    pub account_type: AccountType,
    /// Parent account, for sub-accounts.
    pub parent_id: Option<String>,
    /// Trading permissions.
    pub permissions: Permissions,
    /// Configured risk limits, keyed by kind.
    pub limits: HashMap<LimitKind, RiskLimit>,
    /// Per-venue rate-limit quotas.
    pub rate_limits: HashMap<String, RateLimitQuota>,
    /// Whether the account is currently allowed to trade.
    pub active: bool,
    /// Strategy tag, for sub-accounts used by a single strategy.
    pub strategy_tag: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limit(value: &str) -> RiskLimit {
        RiskLimit {
            kind: LimitKind::MaxExposure,
            value: Decimal::parse(value).unwrap(),
            current_used: Decimal::ZERO,
            enabled: true,
            triggers: vec![
                TriggerPoint { threshold_fraction: Decimal::parse("0.5").unwrap(), action: TriggerAction::Warn, notify: false },
                TriggerPoint { threshold_fraction: Decimal::parse("0.9").unwrap(), action: TriggerAction::Restrict, notify: true },
            ],
        }
    }

    #[test]
    fn action_escalates_with_usage() {
        let l = limit("1000");
        assert_eq!(l.action_for_usage(Decimal::parse("0.3").unwrap()), None);
        assert_eq!(l.action_for_usage(Decimal::parse("0.6").unwrap()), Some(TriggerAction::Warn));
        assert_eq!(l.action_for_usage(Decimal::parse("0.95").unwrap()), Some(TriggerAction::Restrict));
    }

    #[test]
    fn usage_fraction_zero_cap_is_zero() {
        let mut l = limit("1000");
        l.value = Decimal::ZERO;
        assert_eq!(l.usage_fraction(Decimal::parse("50").unwrap()), Decimal::ZERO);
    }
}
