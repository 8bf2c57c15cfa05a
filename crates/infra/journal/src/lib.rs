//! Append-only, per-`(venue, symbol, kind)` event journal used for crash
//! recovery and deterministic replay (`spec.md` §6).
//!
//! Writers never block: each stream has its own thread and bounded inbox,
//! and a full inbox surfaces as [`JournalError::Backpressure`] rather than
//! stalling the caller. Closed segments are compacted to gzip in place and
//! remain transparently readable through [`Journal::read_range`].

#![forbid(unsafe_code)]

mod index;
mod journal;
mod record;
mod segment;

pub use index::{IndexEntry, StreamIndex};
pub use journal::{Journal, JournalError, JournalStats, DEFAULT_INBOX_CAPACITY};
pub use record::{Event, EventKind};
pub use segment::{RotationPolicy, Segment, SegmentError, DEFAULT_SEGMENT_RECORDS};
