//! Top-level error composition (`spec.md` §7): every propagation path a
//! caller can hit funnels into one matchable enum instead of a string.

use thiserror::Error;

use common::ValidationError;
use journal::JournalError;
use risk::RejectionReason;
use router::RoutingError;

/// Errors an [`crate::Engine`] call can return.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Failed admission validation; never retried (`spec.md` §7).
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    /// The pre-trade risk engine rejected the order.
    #[error("rejected by risk engine: {0:?}")]
    RiskRejected(RejectionReason),
    /// The smart router could not produce a plan.
    #[error(transparent)]
    Routing(#[from] RoutingError),
    /// The event journal is backpressured or its writer thread is gone.
    #[error(transparent)]
    Journal(#[from] JournalError),
    /// One or more child orders were never acknowledged by their venue.
    #[error("dispatch incomplete: {filled}/{total} children acknowledged")]
    DispatchIncomplete {
        /// Children the venue acknowledged.
        filled: usize,
        /// Total children in the plan.
        total: usize,
    },
    /// A protective order of the same kind was already active.
    #[error(transparent)]
    Protective(#[from] protective::ProtectiveError),
    /// The engine is past `shutdown` and no longer accepts commands.
    #[error("engine is shutting down")]
    ShuttingDown,
    /// The target shard's inbox was full or its worker has exited.
    #[error("shard worker unavailable")]
    ShardUnavailable,
}
