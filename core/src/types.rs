//! Identifier newtypes and the fixed-point [`Distance`] used by every service.
//!
//! Distances are carried as a signed count of hundredths of a kilometre. The
//! same type is used for journey contributions, running totals and signed
//! deltas, so totals and threshold comparisons are exact integer arithmetic.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use std::fmt;
use std::ops::{Add, Neg, Sub};
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a new random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID.
            #[must_use]
            pub const fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// The underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Identity of an event envelope; the de-duplication key on every hop.
    EventId
);
uuid_id!(
    /// Identity of a user.
    UserId
);
uuid_id!(
    /// Identity of a journey.
    JourneyId
);
uuid_id!(
    /// Identity of a public share link.
    PublicLinkId
);

/// Calendar-day bucket for a journey: the UTC date of its start time.
#[must_use]
pub fn day_of(start_time: DateTime<Utc>) -> NaiveDate {
    start_time.date_naive()
}

/// Errors produced when parsing a [`Distance`] from text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DistanceParseError {
    /// The input is not a plain decimal number.
    #[error("Invalid distance '{0}': expected a decimal number such as 12.50")]
    Invalid(String),

    /// The input carries non-zero digits beyond two decimal places.
    #[error("Invalid distance '{0}': at most two decimal places are allowed")]
    TooPrecise(String),

    /// The value does not fit the fixed-point representation.
    #[error("Distance '{0}' is out of range")]
    OutOfRange(String),
}

/// Kilometres with exactly two decimal places, stored as hundredths.
///
/// # Examples
///
/// ```
/// use journey_relay_core::types::Distance;
///
/// let d: Distance = "20.01".parse().unwrap();
/// assert_eq!(d.hundredths(), 2001);
/// assert_eq!(d.to_string(), "20.01");
/// assert!(d >= Distance::from_km(20));
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Distance(i64);

impl Distance {
    /// Zero kilometres.
    pub const ZERO: Self = Self(0);

    /// Build from a count of hundredths of a kilometre.
    #[must_use]
    pub const fn from_hundredths(hundredths: i64) -> Self {
        Self(hundredths)
    }

    /// Build from whole kilometres.
    #[must_use]
    pub const fn from_km(km: i64) -> Self {
        Self(km.saturating_mul(100))
    }

    /// The value in hundredths of a kilometre.
    #[must_use]
    pub const fn hundredths(self) -> i64 {
        self.0
    }

    /// `true` when the value is below zero (only deltas can be).
    #[must_use]
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Clamp at zero: totals never go negative.
    #[must_use]
    pub const fn clamp_at_zero(self) -> Self {
        if self.0 < 0 { Self::ZERO } else { self }
    }
}

impl Add for Distance {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl Sub for Distance {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl Neg for Distance {
    type Output = Self;

    fn neg(self) -> Self {
        Self(self.0.saturating_neg())
    }
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl FromStr for Distance {
    type Err = DistanceParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let text = input.trim();
        let (negative, digits) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text.strip_prefix('+').unwrap_or(text)),
        };
        let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));

        let is_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
        if (whole.is_empty() && fraction.is_empty()) || !is_digits(whole) || !is_digits(fraction) {
            return Err(DistanceParseError::Invalid(input.to_string()));
        }

        let (kept, rest) = fraction.split_at(fraction.len().min(2));
        if rest.bytes().any(|b| b != b'0') {
            return Err(DistanceParseError::TooPrecise(input.to_string()));
        }

        let out_of_range = || DistanceParseError::OutOfRange(input.to_string());
        let whole: i64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| out_of_range())?
        };
        let cents: i64 = match kept.len() {
            0 => 0,
            1 => kept.parse::<i64>().map_err(|_| out_of_range())? * 10,
            _ => kept.parse().map_err(|_| out_of_range())?,
        };

        let hundredths = whole
            .checked_mul(100)
            .and_then(|v| v.checked_add(cents))
            .ok_or_else(out_of_range)?;

        Ok(Self(if negative { -hundredths } else { hundredths }))
    }
}

impl Serialize for Distance {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Distance {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct DistanceVisitor;

        impl de::Visitor<'_> for DistanceVisitor {
            type Value = Distance;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a decimal kilometre value with at most two decimal places")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Distance, E> {
                v.parse().map_err(E::custom)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Distance, E> {
                v.checked_mul(100)
                    .map(Distance)
                    .ok_or_else(|| E::custom("distance out of range"))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Distance, E> {
                i64::try_from(v)
                    .map_err(|_| E::custom("distance out of range"))
                    .and_then(|v| self.visit_i64(v))
            }

            // JSON numbers arrive as f64; their shortest decimal rendering is
            // parsed as text so no float arithmetic touches the value.
            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Distance, E> {
                if !v.is_finite() {
                    return Err(E::custom("distance must be finite"));
                }
                v.to_string().parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(DistanceVisitor)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_two_decimal_values() {
        assert_eq!("20.01".parse::<Distance>().unwrap().hundredths(), 2001);
        assert_eq!("19.99".parse::<Distance>().unwrap().hundredths(), 1999);
        assert_eq!("5".parse::<Distance>().unwrap().hundredths(), 500);
        assert_eq!("5.5".parse::<Distance>().unwrap().hundredths(), 550);
        assert_eq!(".25".parse::<Distance>().unwrap().hundredths(), 25);
        assert_eq!("-3.50".parse::<Distance>().unwrap().hundredths(), -350);
        assert_eq!("14.000".parse::<Distance>().unwrap().hundredths(), 1400);
    }

    #[test]
    fn rejects_extra_precision_and_garbage() {
        assert!(matches!(
            "1.005".parse::<Distance>(),
            Err(DistanceParseError::TooPrecise(_))
        ));
        assert!(matches!("abc".parse::<Distance>(), Err(DistanceParseError::Invalid(_))));
        assert!(matches!("1e3".parse::<Distance>(), Err(DistanceParseError::Invalid(_))));
        assert!(matches!(".".parse::<Distance>(), Err(DistanceParseError::Invalid(_))));
    }

    #[test]
    fn displays_with_two_decimals() {
        assert_eq!(Distance::from_hundredths(4001).to_string(), "40.01");
        assert_eq!(Distance::from_hundredths(5).to_string(), "0.05");
        assert_eq!(Distance::from_hundredths(-150).to_string(), "-1.50");
    }

    #[test]
    fn deserializes_from_json_numbers_and_strings() {
        let from_number: Distance = serde_json::from_str("20.01").unwrap();
        let from_string: Distance = serde_json::from_str("\"20.01\"").unwrap();
        let from_int: Distance = serde_json::from_str("14").unwrap();
        assert_eq!(from_number.hundredths(), 2001);
        assert_eq!(from_string, from_number);
        assert_eq!(from_int.hundredths(), 1400);
        assert_eq!(serde_json::to_string(&from_number).unwrap(), "\"20.01\"");
    }

    #[test]
    fn clamp_at_zero_only_affects_negatives() {
        assert_eq!(Distance::from_hundredths(-1).clamp_at_zero(), Distance::ZERO);
        assert_eq!(Distance::from_hundredths(7).clamp_at_zero().hundredths(), 7);
    }

    proptest! {
        #[test]
        fn display_then_parse_is_identity(h in -10_000_000i64..10_000_000i64) {
            let d = Distance::from_hundredths(h);
            prop_assert_eq!(d.to_string().parse::<Distance>().unwrap(), d);
        }
    }
}
