//! Canonical symbol identifiers and per-symbol trading constraints.
//!
//! The canonical form is `BASE/QUOTE`, uppercased. Each venue adapter owns a
//! bidirectional mapping to its own wire format (`BTCUSDT`, `BTC-USDT`,
//! `KRW-BTC`, ...); this crate only knows the canonical side.

use std::fmt;

use decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Canonical `BASE/QUOTE` symbol.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Symbol {
    /// Base asset, e.g. `BTC`.
    pub base: String,
    /// Quote asset, e.g. `USDT`.
    pub quote: String,
}

/// Error returned when a raw string cannot be normalized to a [`Symbol`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SymbolError {
    /// No recognizable base/quote separator was found.
    #[error("cannot normalize symbol: {0}")]
    Unrecognized(String),
}

impl Symbol {
    /// Build directly from already-known base/quote parts.
    #[must_use]
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into().to_ascii_uppercase(),
            quote: quote.into().to_ascii_uppercase(),
        }
    }

    /// Normalize a venue-native string into canonical form.
    ///
    /// Accepts `BASE/QUOTE`, `BASE-QUOTE`, and concatenated `BASEQUOTE` forms
    /// when `quote` is supplied as a hint (concatenated forms are ambiguous
    /// otherwise, e.g. `BTCUSDT` vs `BTCUSDT` read as `BTCU/SDT`).
    pub fn normalize(raw: &str, quote_hint: Option<&str>) -> Result<Self, SymbolError> {
        let upper = raw.to_ascii_uppercase();
        if let Some((base, quote)) = upper.split_once('/') {
            return Ok(Self::new(base, quote));
        }
        if let Some((base, quote)) = upper.split_once('-') {
            return Ok(Self::new(base, quote));
        }
        if let Some(quote) = quote_hint {
            let quote_upper = quote.to_ascii_uppercase();
            if let Some(base) = upper.strip_suffix(&quote_upper) {
                if !base.is_empty() {
                    return Ok(Self::new(base, quote_upper));
                }
            }
        }
        Err(SymbolError::Unrecognized(raw.to_string()))
    }

    /// Render in a venue's `BASE-QUOTE` dialect.
    #[must_use]
    pub fn to_dashed(&self) -> String {
        format!("{}-{}", self.base, self.quote)
    }

    /// Render in a venue's concatenated `BASEQUOTE` dialect.
    #[must_use]
    pub fn to_concatenated(&self) -> String {
        format!("{}{}", self.base, self.quote)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

/// Market kind a symbol trades under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketKind {
    /// Spot market.
    Spot,
    /// Perpetual/dated futures.
    Futures,
    /// Margin-enabled spot.
    Margin,
}

/// Trading status of a symbol on a venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SymbolStatus {
    /// Trading normally.
    Trading,
    /// Temporarily halted.
    Halted,
    /// Permanently delisted.
    Delisted,
}

/// Per-symbol constraints and metadata, as published by a venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolInfo {
    /// Canonical symbol.
    pub symbol: Symbol,
    /// Base asset.
    pub base: String,
    /// Quote asset.
    pub quote: String,
    /// Trading status.
    pub status: SymbolStatus,
    /// Minimum order quantity.
    pub min_qty: Decimal,
    /// Maximum order quantity.
    pub max_qty: Decimal,
    /// Quantity increment.
    pub step_size: Decimal,
    /// Minimum order notional (price * quantity).
    pub min_notional: Decimal,
    /// Price increment.
    pub tick_size: Decimal,
    /// Market kind.
    pub kind: MarketKind,
}

impl SymbolInfo {
    /// Round a price to this symbol's tick size.
    #[must_use]
    pub fn round_price(&self, price: Decimal) -> Decimal {
        price.round_to_tick(self.tick_size)
    }

    /// Round a quantity to this symbol's step size.
    #[must_use]
    pub fn round_qty(&self, qty: Decimal) -> Decimal {
        qty.round_to_step(self.step_size)
    }

    /// Whether `qty` and `price` together satisfy min/max qty, step size and
    /// minimum notional for this symbol.
    #[must_use]
    pub fn validate_order(&self, qty: Decimal, price: Decimal) -> bool {
        if qty.cmp_value(self.min_qty) == std::cmp::Ordering::Less {
            return false;
        }
        if qty.cmp_value(self.max_qty) == std::cmp::Ordering::Greater {
            return false;
        }
        if self.round_qty(qty) != qty {
            return false;
        }
        let notional = qty.mul(price);
        notional.cmp_value(self.min_notional) != std::cmp::Ordering::Less
    }
}
