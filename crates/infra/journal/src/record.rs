//! The persisted, bit-exact record format (`spec.md` §6).

use serde::{Deserialize, Serialize};

/// Record kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Order book update.
    OrderBook,
    /// Trade print.
    Trade,
    /// Ticker/top-of-book update.
    Ticker,
    /// Order lifecycle event.
    Order,
    /// Position update.
    Position,
}

/// A single journal record: one line of a segment file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Record kind.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Venue the event originated from.
    pub venue: String,
    /// Canonical symbol, e.g. `BTC/USDT`.
    pub symbol: String,
    /// Nanoseconds since the UNIX epoch.
    pub timestamp: u64,
    /// Opaque, kind-specific payload.
    pub data: serde_json::Value,
}

impl Event {
    /// Serialize to the single-line JSON form written to a segment.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a single line as written by [`Event::to_line`].
    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}
