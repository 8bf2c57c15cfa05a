//! Fixed-precision decimal arithmetic for the order path.
//!
//! Floating point is forbidden here by construction: the only way to produce
//! a [`Decimal`] is from an integer or from parsing a canonical decimal
//! string. Division uses a configurable quotient scale and rounds
//! half-to-even, matching the platform-wide rounding convention used when
//! snapping prices and quantities to a symbol's tick/step size.

#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use rust_decimal::{Decimal as Inner, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default maximum scale applied to newly constructed values.
pub const DEFAULT_SCALE: u32 = 18;

/// Default quotient scale used by [`Decimal::div`].
pub const DEFAULT_QUOTIENT_SCALE: u32 = 28;

/// Errors produced while constructing or operating on a [`Decimal`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecimalError {
    /// The input string was not a canonical decimal literal.
    #[error("invalid decimal literal: {0}")]
    Parse(String),
    /// An arithmetic operation overflowed the underlying representation.
    #[error("decimal overflow")]
    Overflow,
    /// Division by zero.
    #[error("division by zero")]
    DivByZero,
    /// A requested scale is outside the representable range.
    #[error("scale {0} out of range (0..=28)")]
    ScaleOutOfRange(u32),
}

/// A validated decimal scale in `0..=28`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Scale(u32);

impl Scale {
    /// Build a [`Scale`], rejecting anything rust_decimal cannot represent.
    pub fn new(value: u32) -> Result<Self, DecimalError> {
        if value > 28 {
            return Err(DecimalError::ScaleOutOfRange(value));
        }
        Ok(Self(value))
    }

    /// Raw scale value.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl Default for Scale {
    fn default() -> Self {
        Self(DEFAULT_SCALE)
    }
}

/// Rounding mode applied at tick/step/quotient boundaries.
///
/// Only [`RoundingMode::HalfToEven`] is used on the order path; the others
/// exist so the type is explicit about what it can do rather than hiding a
/// single hard-coded behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundingMode {
    /// Round half away from zero to the nearest even digit (banker's rounding).
    HalfToEven,
    /// Always round toward zero (truncate).
    Down,
    /// Always round away from zero.
    Up,
}

impl RoundingMode {
    const fn strategy(self) -> RoundingStrategy {
        match self {
            Self::HalfToEven => RoundingStrategy::MidpointNearestEven,
            Self::Down => RoundingStrategy::ToZero,
            Self::Up => RoundingStrategy::AwayFromZero,
        }
    }
}

/// Arbitrary-precision signed decimal with a fixed maximum scale.
///
/// Construct only via [`Decimal::from_str`]/[`Decimal::parse`] or
/// [`Decimal::from_i64`]; there is deliberately no `From<f64>` on this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Decimal(Inner);

impl Default for Decimal {
    fn default() -> Self {
        Self::ZERO
    }
}

impl Decimal {
    /// The additive identity.
    pub const ZERO: Self = Self(Inner::ZERO);
    /// The multiplicative identity.
    pub const ONE: Self = Self(Inner::ONE);

    /// Parse a canonical decimal string (e.g. `"40000.125"`, `"-0.5"`).
    ///
    /// This is the only string-based entry point on the order path; it never
    /// goes through binary floating point.
    pub fn parse(s: &str) -> Result<Self, DecimalError> {
        Inner::from_str_exact(s.trim())
            .map(Self)
            .map_err(|_| DecimalError::Parse(s.to_string()))
    }

    /// Build a decimal from an integer (exact, scale 0).
    #[must_use]
    pub const fn from_i64(value: i64) -> Self {
        Self(Inner::new(value, 0))
    }

    /// Zero-cost accessor to the underlying `rust_decimal::Decimal`, for
    /// crates that need to interoperate with other `rust_decimal` consumers.
    #[must_use]
    pub const fn inner(&self) -> Inner {
        self.0
    }

    /// Wrap an existing `rust_decimal::Decimal`.
    #[must_use]
    pub const fn from_inner(inner: Inner) -> Self {
        Self(inner)
    }

    /// `self + other`.
    #[must_use]
    pub fn add(self, other: Self) -> Self {
        Self(self.0 + other.0)
    }

    /// `self - other`.
    #[must_use]
    pub fn sub(self, other: Self) -> Self {
        Self(self.0 - other.0)
    }

    /// `self * other`.
    #[must_use]
    pub fn mul(self, other: Self) -> Self {
        Self(self.0 * other.0)
    }

    /// `self / other`, rounded half-to-even to `scale` fractional digits.
    pub fn div(self, other: Self, scale: Scale) -> Result<Self, DecimalError> {
        if other.0.is_zero() {
            return Err(DecimalError::DivByZero);
        }
        let quotient = self.0.checked_div(other.0).ok_or(DecimalError::Overflow)?;
        Ok(Self(
            quotient.round_dp_with_strategy(scale.value(), RoundingMode::HalfToEven.strategy()),
        ))
    }

    /// `self / other` using [`DEFAULT_QUOTIENT_SCALE`].
    pub fn div_default(self, other: Self) -> Result<Self, DecimalError> {
        self.div(other, Scale::new(DEFAULT_QUOTIENT_SCALE)?)
    }

    /// Round to the nearest multiple of `tick`, half-to-even.
    #[must_use]
    pub fn round_to_tick(self, tick: Self) -> Self {
        self.round_to_increment(tick)
    }

    /// Round to the nearest multiple of `step`, half-to-even.
    #[must_use]
    pub fn round_to_step(self, step: Self) -> Self {
        self.round_to_increment(step)
    }

    fn round_to_increment(self, increment: Self) -> Self {
        if increment.0.is_zero() {
            return self;
        }
        let units = self.0 / increment.0;
        let rounded_units =
            units.round_dp_with_strategy(0, RoundingMode::HalfToEven.strategy());
        Self(rounded_units * increment.0)
    }

    /// Round down (toward zero) to the nearest multiple of `step`. Used
    /// where an allocation must never exceed a computed bound, e.g. sizing
    /// an order to a symbol's `step_size`.
    #[must_use]
    pub fn floor_to_step(self, step: Self) -> Self {
        if step.0.is_zero() {
            return self;
        }
        let units = self.0 / step.0;
        let truncated_units = units.round_dp_with_strategy(0, RoundingMode::Down.strategy());
        Self(truncated_units * step.0)
    }

    /// `true` if exactly zero.
    #[must_use]
    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    /// `true` if strictly negative.
    #[must_use]
    pub fn is_neg(self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    /// Absolute value.
    #[must_use]
    pub fn abs(self) -> Self {
        Self(self.0.abs())
    }

    /// Negate.
    #[must_use]
    pub fn neg(self) -> Self {
        Self(-self.0)
    }

    /// Compare two decimals (total order, no NaN to worry about).
    #[must_use]
    pub fn cmp_value(self, other: Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }

    /// Truncate/round to at most `scale` fractional digits, half-to-even.
    #[must_use]
    pub fn rescale(self, scale: Scale) -> Self {
        Self(self.0.round_dp_with_strategy(scale.value(), RoundingMode::HalfToEven.strategy()))
    }

    /// Minimum of two values.
    #[must_use]
    pub fn min(self, other: Self) -> Self {
        if self.0 <= other.0 { self } else { other }
    }

    /// Maximum of two values.
    #[must_use]
    pub fn max(self, other: Self) -> Self {
        if self.0 >= other.0 { self } else { other }
    }
}

impl FromStr for Decimal {
    type Err = DecimalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Add for Decimal {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::add(self, rhs)
    }
}

impl std::ops::Sub for Decimal {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::sub(self, rhs)
    }
}

impl std::ops::Mul for Decimal {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        Self::mul(self, rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_garbage() {
        assert!(Decimal::parse("abc").is_err());
        assert!(Decimal::parse("1.2.3").is_err());
    }

    #[test]
    fn parse_roundtrip() {
        let d = Decimal::parse("40000.125").unwrap();
        assert_eq!(d.to_string(), "40000.125");
    }

    #[test]
    fn add_sub_mul() {
        let a = Decimal::parse("1.5").unwrap();
        let b = Decimal::parse("2.25").unwrap();
        assert_eq!(a.add(b).to_string(), "3.75");
        assert_eq!(b.sub(a).to_string(), "0.75");
        assert_eq!(a.mul(b).to_string(), "3.3750");
    }

    #[test]
    fn div_half_to_even() {
        // 1 / 8 = 0.125 exactly, no rounding ambiguity here; check a case that
        // lands exactly on a half-to-even boundary at 1 dp: 0.25 -> 0.2
        let a = Decimal::parse("0.25").unwrap();
        let scale = Scale::new(1).unwrap();
        let result = a.div(Decimal::ONE, scale).unwrap();
        assert_eq!(result.to_string(), "0.2");

        let b = Decimal::parse("0.35").unwrap();
        let result = b.div(Decimal::ONE, scale).unwrap();
        assert_eq!(result.to_string(), "0.4");
    }

    #[test]
    fn div_by_zero_errors() {
        let a = Decimal::parse("1").unwrap();
        assert_eq!(
            a.div_default(Decimal::ZERO).unwrap_err(),
            DecimalError::DivByZero
        );
    }

    #[test]
    fn round_to_tick() {
        let price = Decimal::parse("40000.17").unwrap();
        let tick = Decimal::parse("0.05").unwrap();
        assert_eq!(price.round_to_tick(tick).to_string(), "40000.15");
    }

    #[test]
    fn round_to_step_preserves_sum_when_applied_once() {
        let qty = Decimal::parse("0.1234").unwrap();
        let step = Decimal::parse("0.001").unwrap();
        assert_eq!(qty.round_to_step(step).to_string(), "0.123");
    }

    #[test]
    fn abs_and_neg() {
        let a = Decimal::parse("-3.5").unwrap();
        assert!(a.is_neg());
        assert_eq!(a.abs().to_string(), "3.5");
        assert_eq!(a.neg().to_string(), "3.5");
    }

    #[test]
    fn scale_out_of_range_rejected() {
        assert_eq!(Scale::new(29), Err(DecimalError::ScaleOutOfRange(29)));
        assert!(Scale::new(28).is_ok());
    }

    proptest::proptest! {
        #[test]
        fn split_preserves_total(parts in proptest::collection::vec(1i64..1000, 2..10)) {
            let total: i64 = parts.iter().sum();
            let whole = Decimal::from_i64(total);
            let sum: Decimal = parts.iter().fold(Decimal::ZERO, |acc, p| acc.add(Decimal::from_i64(*p)));
            proptest::prop_assert_eq!(whole, sum);
        }
    }
}
