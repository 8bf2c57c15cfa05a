//! Shared domain types for the core OMS: symbols, orders, accounts, and the
//! error taxonomy every other crate in the workspace builds on.

pub mod account;
pub mod errors;
pub mod order;
pub mod symbol;
pub mod ts;

pub use account::{
    Account, AccountType, LimitKind, Permissions, RateLimitQuota, RiskLimit, TriggerAction,
    TriggerPoint,
};
pub use errors::{StateError, ValidationError, VenueError};
pub use order::{Order, OrderStatus, OrderTag, OrderType, PositionSide, Side, TimeInForce};
pub use symbol::{MarketKind, Symbol, SymbolError, SymbolInfo, SymbolStatus};
pub use ts::Ts;

pub use decimal::{Decimal, DecimalError, RoundingMode, Scale};
