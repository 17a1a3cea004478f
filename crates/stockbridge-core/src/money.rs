//! # Money Module
//!
//! Provides the `Money` type for order and sale totals.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Both platforms send totals as decimal strings ("29.99") or JSON       │
//! │  numbers (29.99). Parsing those into f64 invites 0.1 + 0.2 errors.     │
//! │                                                                         │
//! │  OUR SOLUTION: integer minor units at the platform's native scale      │
//! │    "29.99" at scale 2  → 2999                                          │
//! │    "10.005" at scale 2 → 1000 (half-even)                              │
//! │                                                                         │
//! │  No currency conversion happens anywhere in the engine.                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use stockbridge_core::money::Money;
//!
//! let total = Money::parse_decimal("29.99", 2).unwrap();
//! assert_eq!(total.minor_units(), 2999);
//! assert_eq!(total.format(2), "29.99");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub};

use crate::error::{CoreError, CoreResult};

/// A monetary value in the smallest unit of the source platform's currency.
///
/// The scale (number of decimal places) belongs to the platform, not the
/// value; callers carry it alongside when formatting or persisting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from minor units.
    #[inline]
    pub const fn from_minor(units: i64) -> Self {
        Money(units)
    }

    /// Returns the value in minor units.
    #[inline]
    pub const fn minor_units(&self) -> i64 {
        self.0
    }

    /// Zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Checks if the value is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Parses a decimal string into minor units at the given scale.
    ///
    /// Digits beyond `scale` are rounded half-to-even (Bankers Rounding), so
    /// repeated rounding of many small amounts does not drift upward.
    ///
    /// ## Example
    /// ```rust
    /// use stockbridge_core::money::Money;
    ///
    /// assert_eq!(Money::parse_decimal("10.005", 2).unwrap().minor_units(), 1000);
    /// assert_eq!(Money::parse_decimal("10.015", 2).unwrap().minor_units(), 1002);
    /// assert_eq!(Money::parse_decimal("-5.5", 2).unwrap().minor_units(), -550);
    /// assert_eq!(Money::parse_decimal("7", 0).unwrap().minor_units(), 7);
    /// ```
    pub fn parse_decimal(value: &str, scale: u32) -> CoreResult<Self> {
        let invalid = |reason: &str| CoreError::InvalidAmount {
            value: value.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(invalid("empty"));
        }

        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
        };

        let (whole, fraction) = match digits.split_once('.') {
            Some((w, f)) => (w, f),
            None => (digits, ""),
        };

        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid("no digits"));
        }
        if !whole.chars().all(|c| c.is_ascii_digit())
            || !fraction.chars().all(|c| c.is_ascii_digit())
        {
            return Err(invalid("not a decimal number"));
        }

        let scale_usize = scale as usize;
        let factor = 10_i64
            .checked_pow(scale)
            .ok_or_else(|| invalid("scale too large"))?;

        let whole_units: i64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid("out of range"))?
        };

        // Split the fraction into the kept part and the rounding tail
        let kept: String = fraction
            .chars()
            .chain(std::iter::repeat('0'))
            .take(scale_usize)
            .collect();
        let tail = fraction.get(scale_usize..).unwrap_or("");

        let kept_units: i64 = if kept.is_empty() {
            0
        } else {
            kept.parse().map_err(|_| invalid("out of range"))?
        };

        let mut units = whole_units
            .checked_mul(factor)
            .and_then(|w| w.checked_add(kept_units))
            .ok_or_else(|| invalid("out of range"))?;

        // Half-even rounding on the discarded tail
        let mut tail_chars = tail.chars();
        if let Some(first) = tail_chars.next() {
            let rest_nonzero = tail_chars.any(|c| c != '0');
            let round_up = match first {
                '6'..='9' => true,
                '5' => rest_nonzero || units % 2 == 1,
                _ => false,
            };
            if round_up {
                units = units.checked_add(1).ok_or_else(|| invalid("out of range"))?;
            }
        }

        Ok(Money(if negative { -units } else { units }))
    }

    /// Formats the value as a plain decimal string at the given scale.
    ///
    /// ## Example
    /// ```rust
    /// use stockbridge_core::money::Money;
    ///
    /// assert_eq!(Money::from_minor(1099).format(2), "10.99");
    /// assert_eq!(Money::from_minor(-5).format(2), "-0.05");
    /// assert_eq!(Money::from_minor(42).format(0), "42");
    /// ```
    pub fn format(&self, scale: u32) -> String {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        if scale == 0 {
            return format!("{}{}", sign, abs);
        }
        let factor = 10_u64.pow(scale);
        format!(
            "{}{}.{:0width$}",
            sign,
            abs / factor,
            abs % factor,
            width = scale as usize
        )
    }

    /// Unit price times quantity, or `None` when the line total does not
    /// fit in minor units.
    ///
    /// ```rust
    /// use stockbridge_core::money::Money;
    ///
    /// assert_eq!(Money::from_minor(250).checked_mul(3), Some(Money::from_minor(750)));
    /// assert_eq!(Money::from_minor(10_000_000).checked_mul(i64::MAX), None);
    /// ```
    #[inline]
    pub const fn checked_mul(&self, qty: i64) -> Option<Self> {
        match self.0.checked_mul(qty) {
            Some(units) => Some(Money(units)),
            None => None,
        }
    }

    #[inline]
    pub const fn checked_add(&self, other: Money) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(units) => Some(Money(units)),
            None => None,
        }
    }
}

/// Display uses the default two-decimal scale (debugging and logs only).
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format(crate::DEFAULT_CURRENCY_SCALE))
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}


// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_amounts() {
        assert_eq!(Money::parse_decimal("29.99", 2).unwrap().minor_units(), 2999);
        assert_eq!(Money::parse_decimal("30", 2).unwrap().minor_units(), 3000);
        assert_eq!(Money::parse_decimal("0.5", 2).unwrap().minor_units(), 50);
        assert_eq!(Money::parse_decimal(".25", 2).unwrap().minor_units(), 25);
        assert_eq!(Money::parse_decimal(" 1.10 ", 2).unwrap().minor_units(), 110);
    }

    #[test]
    fn test_parse_rounds_half_even() {
        // 0.125 → 0.12 (2 is even), 0.135 → 0.14 (3 is odd)
        assert_eq!(Money::parse_decimal("0.125", 2).unwrap().minor_units(), 12);
        assert_eq!(Money::parse_decimal("0.135", 2).unwrap().minor_units(), 14);
        // Anything past the half rounds up
        assert_eq!(Money::parse_decimal("0.1251", 2).unwrap().minor_units(), 13);
        assert_eq!(Money::parse_decimal("0.129", 2).unwrap().minor_units(), 13);
    }

    #[test]
    fn test_parse_negative() {
        assert_eq!(Money::parse_decimal("-12.30", 2).unwrap().minor_units(), -1230);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Money::parse_decimal("", 2).is_err());
        assert!(Money::parse_decimal("abc", 2).is_err());
        assert!(Money::parse_decimal("1.2.3", 2).is_err());
        assert!(Money::parse_decimal("-", 2).is_err());
        assert!(Money::parse_decimal("1e5", 2).is_err());
    }

    #[test]
    fn test_format_and_display() {
        assert_eq!(Money::from_minor(2999).format(2), "29.99");
        assert_eq!(Money::from_minor(5).format(3), "0.005");
        assert_eq!(Money::from_minor(-1099).to_string(), "-10.99");
    }

    #[test]
    fn test_arithmetic() {
        let a = Money::from_minor(1000);
        let b = Money::from_minor(250);
        assert_eq!((a + b).minor_units(), 1250);
        assert_eq!((a - b).minor_units(), 750);
        assert_eq!(b.checked_mul(3), Some(Money::from_minor(750)));
        assert_eq!(a.checked_add(b), Some(Money::from_minor(1250)));
    }

    #[test]
    fn test_checked_ops_refuse_overflow() {
        let big = Money::from_minor(i64::MAX - 1);
        assert_eq!(big.checked_add(Money::from_minor(2)), None);
        assert_eq!(big.checked_mul(2), None);
        assert_eq!(Money::from_minor(-3).checked_mul(4), Some(Money::from_minor(-12)));
    }
}
