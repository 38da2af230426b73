//! Exact fixed-point money with two fraction digits.
//!
//! All monetary comparison in this system is policy-bearing: a transfer of
//! exactly 300.00 must not trip a `> 300.00` fraud threshold, so amounts
//! are integer minor units (cents) end to end. Binary floating point never
//! participates in a comparison; the only float handling is a one-time
//! round-to-cent conversion when a JSON client sends a number instead of a
//! decimal string.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A non-negative monetary amount in minor units (cents).
///
/// Displayed and serialized as a canonical decimal string with exactly two
/// fraction digits (`"300.00"`). Ordering and equality are plain integer
/// comparisons on the cent value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(i64);

impl Amount {
    /// Zero amount.
    pub const ZERO: Self = Self(0);

    /// Builds an amount from minor units (cents).
    #[must_use]
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Builds an amount from whole currency units.
    #[must_use]
    pub const fn from_major(units: i64) -> Self {
        Self(units * 100)
    }

    /// Returns the amount in minor units.
    #[must_use]
    pub const fn cents(self) -> i64 {
        self.0
    }

    /// True if the amount is strictly greater than zero.
    #[must_use]
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Checked addition; `None` on overflow.
    #[must_use]
    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    /// Checked subtraction; `None` on overflow.
    #[must_use]
    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

/// Errors from parsing a decimal amount string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseAmountError {
    /// Input was empty or contained non-digit characters outside the
    /// single decimal point.
    #[error("malformed amount '{input}': expected a decimal like 300.00")]
    Malformed {
        /// The rejected input.
        input: String,
    },

    /// More than two fraction digits were supplied.
    #[error("amount '{input}' has more than two fraction digits")]
    TooPrecise {
        /// The rejected input.
        input: String,
    },

    /// The value does not fit in the cent range.
    #[error("amount '{input}' is out of range")]
    OutOfRange {
        /// The rejected input.
        input: String,
    },
}

impl FromStr for Amount {
    type Err = ParseAmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ParseAmountError::Malformed {
            input: s.to_string(),
        };
        let input = s.trim();
        if input.is_empty() {
            return Err(malformed());
        }

        let (whole, frac) = match input.split_once('.') {
            Some((w, f)) => (w, f),
            None => (input, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(malformed());
        }
        if !whole.chars().all(|c| c.is_ascii_digit())
            || !frac.chars().all(|c| c.is_ascii_digit())
        {
            return Err(malformed());
        }
        if frac.len() > 2 {
            return Err(ParseAmountError::TooPrecise {
                input: s.to_string(),
            });
        }

        let whole_units: i64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| ParseAmountError::OutOfRange {
                input: s.to_string(),
            })?
        };
        let mut frac_cents: i64 = if frac.is_empty() {
            0
        } else {
            frac.parse().map_err(|_| malformed())?
        };
        if frac.len() == 1 {
            frac_cents *= 10;
        }

        whole_units
            .checked_mul(100)
            .and_then(|c| c.checked_add(frac_cents))
            .map(Self)
            .ok_or_else(|| ParseAmountError::OutOfRange {
                input: s.to_string(),
            })
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

struct AmountVisitor;

impl Visitor<'_> for AmountVisitor {
    type Value = Amount;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a decimal amount string like \"300.00\" or a number")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Amount, E> {
        v.parse().map_err(de::Error::custom)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Amount, E> {
        i64::try_from(v)
            .ok()
            .and_then(|units| units.checked_mul(100))
            .map(Amount::from_cents)
            .ok_or_else(|| de::Error::custom("amount out of range"))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Amount, E> {
        if v < 0 {
            return Err(de::Error::custom("amount must not be negative"));
        }
        v.checked_mul(100)
            .map(Amount::from_cents)
            .ok_or_else(|| de::Error::custom("amount out of range"))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Amount, E> {
        // One-time conversion to the nearest cent. Rejects values that are
        // not representable with two fraction digits so a client bug does
        // not silently lose sub-cent precision.
        if !v.is_finite() || v < 0.0 || v > 9e15 {
            return Err(de::Error::custom("amount out of range"));
        }
        let scaled = v * 100.0;
        let rounded = scaled.round();
        if (scaled - rounded).abs() > 1e-6 {
            return Err(de::Error::custom(
                "amount has more than two fraction digits",
            ));
        }
        #[allow(clippy::cast_possible_truncation)]
        Ok(Amount::from_cents(rounded as i64))
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(AmountVisitor)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_display_two_fraction_digits() {
        assert_eq!(Amount::from_cents(30000).to_string(), "300.00");
        assert_eq!(Amount::from_cents(30001).to_string(), "300.01");
        assert_eq!(Amount::from_cents(5).to_string(), "0.05");
        assert_eq!(Amount::ZERO.to_string(), "0.00");
    }

    #[test]
    fn test_parse_variants() {
        assert_eq!("300".parse::<Amount>().unwrap(), Amount::from_major(300));
        assert_eq!("300.0".parse::<Amount>().unwrap(), Amount::from_major(300));
        assert_eq!(
            "300.01".parse::<Amount>().unwrap(),
            Amount::from_cents(30001)
        );
        assert_eq!(".50".parse::<Amount>().unwrap(), Amount::from_cents(50));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            "".parse::<Amount>(),
            Err(ParseAmountError::Malformed { .. })
        ));
        assert!(matches!(
            "-5".parse::<Amount>(),
            Err(ParseAmountError::Malformed { .. })
        ));
        assert!(matches!(
            "1.2.3".parse::<Amount>(),
            Err(ParseAmountError::Malformed { .. })
        ));
        assert!(matches!(
            "1.234".parse::<Amount>(),
            Err(ParseAmountError::TooPrecise { .. })
        ));
        assert!(matches!(
            "99999999999999999999".parse::<Amount>(),
            Err(ParseAmountError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_boundary_comparison_is_exact() {
        let threshold = Amount::from_major(300);
        assert!(!("300.00".parse::<Amount>().unwrap() > threshold));
        assert!("300.01".parse::<Amount>().unwrap() > threshold);
    }

    #[test]
    fn test_serde_string_and_number_forms() {
        let from_string: Amount = serde_json::from_str("\"300.01\"").unwrap();
        let from_float: Amount = serde_json::from_str("300.01").unwrap();
        let from_int: Amount = serde_json::from_str("300").unwrap();
        assert_eq!(from_string, Amount::from_cents(30001));
        assert_eq!(from_float, Amount::from_cents(30001));
        assert_eq!(from_int, Amount::from_major(300));

        assert_eq!(
            serde_json::to_string(&Amount::from_cents(30001)).unwrap(),
            "\"300.01\""
        );
    }

    #[test]
    fn test_serde_rejects_sub_cent_float() {
        assert!(serde_json::from_str::<Amount>("300.001").is_err());
        assert!(serde_json::from_str::<Amount>("-1").is_err());
    }

    proptest! {
        #[test]
        fn prop_display_parse_round_trip(cents in 0i64..=1_000_000_000_000) {
            let amount = Amount::from_cents(cents);
            let parsed: Amount = amount.to_string().parse().unwrap();
            prop_assert_eq!(parsed, amount);
        }
    }
}
