//! Shared error taxonomy (`spec.md` §7).

use thiserror::Error;

/// Order validation failures, surfaced immediately and never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Symbol could not be normalized or is unknown.
    #[error("unknown or malformed symbol: {0}")]
    BadSymbol(String),
    /// Quantity was zero or negative.
    #[error("quantity must be positive, got {0}")]
    NonPositiveQuantity(String),
    /// A limit-family order type was missing its price.
    #[error("missing price for limit-family order")]
    MissingPrice,
    /// Quantity is not a multiple of the symbol's step size.
    #[error("quantity {0} violates step size {1}")]
    StepViolation(String, String),
    /// Price is not a multiple of the symbol's tick size.
    #[error("price {0} violates tick size {1}")]
    TickViolation(String, String),
    /// Notional fell below the symbol's minimum.
    #[error("notional {0} below minimum {1}")]
    MinNotionalViolation(String, String),
    /// Referenced account does not exist or is inactive.
    #[error("unknown or inactive account: {0}")]
    UnknownAccount(String),
}

/// Venue-adapter error taxonomy (`spec.md` §6).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VenueError {
    /// Transient: too many requests.
    #[error("rate limited: {0}")]
    RateLimited(String),
    /// Transient: no response within the configured bound.
    #[error("network timeout: {0}")]
    NetworkTimeout(String),
    /// Terminal: the venue rejected the order.
    #[error("order rejected: {0}")]
    OrderRejected(String),
    /// Terminal: not enough balance to cover the order.
    #[error("insufficient balance: {0}")]
    InsufficientBalance(String),
}

impl VenueError {
    /// Transient errors may be retried with backoff; terminal errors must not.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::NetworkTimeout(_))
    }
}

/// State-layer errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    /// The market snapshot consulted was older than the configured threshold.
    #[error("stale market data for {0}, age {1}ms")]
    StaleMarketData(String, u64),
    /// The journal's write queue was full.
    #[error("journal backpressure on stream {0}")]
    JournalBackpressure(String),
}
