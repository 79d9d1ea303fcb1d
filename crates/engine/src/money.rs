use std::fmt;

use serde::{Deserialize, Serialize};

use crate::EngineError;

/// Signed money amount represented as **integer minor units** (cents).
///
/// Every amount that crosses the engine (transaction amounts, balances,
/// budget limits) uses this type so sums never drift.
///
/// The sign follows the aggregation provider:
/// - positive = money leaving the account (spend)
/// - negative = money entering the account (refunds, income)
///
/// # Examples
///
/// ```rust
/// use engine::MoneyCents;
///
/// let amount = MoneyCents::new(126_44);
/// assert_eq!(amount.cents(), 12644);
/// assert_eq!(amount.to_string(), "126.44");
/// assert_eq!(amount.checked_sub(MoneyCents::new(200_00)), Some(MoneyCents::new(-73_56)));
/// ```
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
#[repr(transparent)]
pub struct MoneyCents(i64);

impl MoneyCents {
    pub const ZERO: MoneyCents = MoneyCents(0);

    /// Creates a new amount from integer cents.
    #[must_use]
    pub const fn new(cents: i64) -> Self {
        Self(cents)
    }

    /// Returns the raw value in cents.
    #[must_use]
    pub const fn cents(self) -> i64 {
        self.0
    }

    /// Returns `true` if the amount is positive.
    #[must_use]
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Checked addition (returns `None` on overflow).
    #[must_use]
    pub fn checked_add(self, rhs: MoneyCents) -> Option<MoneyCents> {
        self.0.checked_add(rhs.0).map(MoneyCents)
    }

    /// Checked subtraction (returns `None` on overflow).
    #[must_use]
    pub fn checked_sub(self, rhs: MoneyCents) -> Option<MoneyCents> {
        self.0.checked_sub(rhs.0).map(MoneyCents)
    }

    /// Converts a decimal amount in major units (as providers send it over
    /// JSON) into cents, rounding half away from zero.
    pub fn from_major(value: f64) -> Result<Self, EngineError> {
        let cents = (value * 100.0).round();
        if !cents.is_finite() || cents.abs() > i64::MAX as f64 {
            return Err(EngineError::Feed(format!("invalid amount: {value}")));
        }
        Ok(Self(cents as i64))
    }
}

impl fmt::Display for MoneyCents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl From<MoneyCents> for i64 {
    fn from(value: MoneyCents) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats_minor_units() {
        assert_eq!(MoneyCents::new(0).to_string(), "0.00");
        assert_eq!(MoneyCents::new(7).to_string(), "0.07");
        assert_eq!(MoneyCents::new(7356).to_string(), "73.56");
        assert_eq!(MoneyCents::new(-2500).to_string(), "-25.00");
    }

    #[test]
    fn from_major_rounds_provider_floats() {
        assert_eq!(MoneyCents::from_major(12.34).unwrap().cents(), 1234);
        assert_eq!(MoneyCents::from_major(-0.1).unwrap().cents(), -10);
        assert_eq!(MoneyCents::from_major(89.4).unwrap().cents(), 8940);
        assert!(MoneyCents::from_major(f64::NAN).is_err());
    }

    #[test]
    fn checked_arithmetic_reports_overflow() {
        let total = MoneyCents::new(500).checked_add(MoneyCents::new(-200));
        assert_eq!(total, Some(MoneyCents::new(300)));
        assert_eq!(MoneyCents::new(i64::MAX).checked_add(MoneyCents::new(1)), None);
        assert_eq!(MoneyCents::new(i64::MIN).checked_sub(MoneyCents::new(1)), None);
    }
}
