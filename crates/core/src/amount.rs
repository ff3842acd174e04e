//! Fixed-point asset amounts.
//!
//! Amounts are held in minor units (hundredths). Two fractional digits is the
//! precision the platform's assets are created with; finer values are rejected
//! rather than silently rounded.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Signed fixed-point amount with [`Amount::SCALE`] fractional digits.
///
/// Transaction amounts are never negative; balances may be compared against
/// negative deltas while computing invariants, hence the signed backing type.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(i64);

impl Amount {
    /// Number of fractional decimal digits.
    pub const SCALE: u32 = 2;
    const FACTOR: i64 = 10i64.pow(Self::SCALE);

    pub const ZERO: Amount = Amount(0);

    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    pub const fn minor(self) -> i64 {
        self.0
    }

    /// Whole units (e.g. `Amount::from_major(50)` is `50.00`).
    pub fn from_major(major: i64) -> Result<Self, DomainError> {
        major
            .checked_mul(Self::FACTOR)
            .map(Self)
            .ok_or_else(|| DomainError::overflow(format!("{major} whole units")))
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    /// Lossy conversion for `real` columns and display-only contexts.
    pub fn to_f64(self) -> f64 {
        self.0 as f64 / Self::FACTOR as f64
    }

    /// Inverse of [`Amount::to_f64`]; rounds to the nearest minor unit.
    pub fn from_f64(value: f64) -> Result<Self, DomainError> {
        if !value.is_finite() {
            return Err(DomainError::invalid_amount(format!("{value} is not a finite number")));
        }
        let minor = (value * Self::FACTOR as f64).round();
        if minor.abs() > i64::MAX as f64 {
            return Err(DomainError::overflow(value.to_string()));
        }
        Ok(Self(minor as i64))
    }

    /// Re-express in a ledger's native base units with `decimals` fractional
    /// digits (e.g. 8 for satoshi-denominated assets).
    pub fn to_base_units(self, decimals: u32) -> Result<i64, DomainError> {
        if decimals < Self::SCALE {
            return Err(DomainError::validation(format!(
                "ledger precision {decimals} is below platform precision {}",
                Self::SCALE
            )));
        }
        10i64
            .checked_pow(decimals - Self::SCALE)
            .and_then(|f| self.0.checked_mul(f))
            .ok_or_else(|| DomainError::overflow(format!("{self} at {decimals} decimals")))
    }

    /// Convert native base units back, rejecting values finer than the platform precision.
    pub fn from_base_units(units: i64, decimals: u32) -> Result<Self, DomainError> {
        if decimals < Self::SCALE {
            return Err(DomainError::validation(format!(
                "ledger precision {decimals} is below platform precision {}",
                Self::SCALE
            )));
        }
        let factor = 10i64
            .checked_pow(decimals - Self::SCALE)
            .ok_or_else(|| DomainError::overflow(format!("{decimals} decimals")))?;
        if units % factor != 0 {
            return Err(DomainError::invalid_amount(format!(
                "ledger amount {units} has more than {} fractional digits",
                Self::SCALE
            )));
        }
        Ok(Self(units / factor))
    }
}

impl core::ops::Neg for Amount {
    type Output = Amount;

    fn neg(self) -> Amount {
        Amount(-self.0)
    }
}

impl core::ops::AddAssign for Amount {
    fn add_assign(&mut self, other: Amount) {
        self.0 += other.0;
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let factor = Self::FACTOR as u64;
        write!(
            f,
            "{sign}{}.{:0width$}",
            abs / factor,
            abs % factor,
            width = Self::SCALE as usize
        )
    }
}

impl FromStr for Amount {
    type Err = DomainError;

    /// Parses plain decimal notation: `50`, `5.5`, `5.50`. Negative values
    /// and more than two fractional digits are rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(DomainError::invalid_amount("empty"));
        }
        if s.starts_with('-') {
            return Err(DomainError::invalid_amount(format!("must not be negative: {s}")));
        }
        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(DomainError::invalid_amount(s.to_string()));
        }
        if frac.len() > Self::SCALE as usize {
            return Err(DomainError::invalid_amount(format!(
                "{s} has more than {} fractional digits",
                Self::SCALE
            )));
        }
        let digits = |part: &str| part.chars().all(|c| c.is_ascii_digit());
        if !digits(whole) || !digits(frac) {
            return Err(DomainError::invalid_amount(s.to_string()));
        }

        let whole: i64 = if whole.is_empty() {
            0
        } else {
            whole
                .parse()
                .map_err(|_| DomainError::overflow(s.to_string()))?
        };
        let mut frac_minor: i64 = if frac.is_empty() { 0 } else { frac.parse().unwrap_or(0) };
        for _ in frac.len()..Self::SCALE as usize {
            frac_minor *= 10;
        }

        whole
            .checked_mul(Self::FACTOR)
            .and_then(|w| w.checked_add(frac_minor))
            .map(Self)
            .ok_or_else(|| DomainError::overflow(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_decimal_notation() {
        assert_eq!("50".parse::<Amount>().unwrap(), Amount::from_minor(5000));
        assert_eq!("5.5".parse::<Amount>().unwrap(), Amount::from_minor(550));
        assert_eq!("0.05".parse::<Amount>().unwrap(), Amount::from_minor(5));
        assert_eq!(".5".parse::<Amount>().unwrap(), Amount::from_minor(50));
    }

    #[test]
    fn rejects_negative_and_overprecise_values() {
        assert!(matches!("-1".parse::<Amount>(), Err(DomainError::InvalidAmount(_))));
        assert!(matches!("1.005".parse::<Amount>(), Err(DomainError::InvalidAmount(_))));
        assert!(matches!(
            "100000000000000000".parse::<Amount>(),
            Err(DomainError::AmountOverflow(_))
        ));
        assert!("1e3".parse::<Amount>().is_err());
        assert!("".parse::<Amount>().is_err());
        assert!(".".parse::<Amount>().is_err());
    }

    #[test]
    fn displays_two_fractional_digits() {
        assert_eq!(Amount::from_minor(4450).to_string(), "44.50");
        assert_eq!(Amount::from_minor(5).to_string(), "0.05");
        assert_eq!(Amount::from_minor(-550).to_string(), "-5.50");
    }

    #[test]
    fn converts_to_satoshi_units() {
        let a: Amount = "5.5".parse().unwrap();
        assert_eq!(a.to_base_units(8).unwrap(), 550_000_000);
        assert_eq!(Amount::from_base_units(550_000_000, 8).unwrap(), a);
        assert!(Amount::from_base_units(1, 8).is_err());
        assert!(a.to_base_units(1).is_err());
    }

    proptest! {
        /// Transactions.Amount is a `real` column; reading it back must not drift.
        #[test]
        fn real_column_conversion_is_exact_at_two_digits(minor in 0i64..1_000_000_000i64) {
            let a = Amount::from_minor(minor);
            prop_assert_eq!(Amount::from_f64(a.to_f64()).unwrap(), a);
        }
    }
}
