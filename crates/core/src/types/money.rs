//! Dual-currency money using decimal arithmetic.
//!
//! Every catalogue price is quoted in both Malaysian Ringgit and US Dollars.
//! The buyer picks a preferred currency at checkout; the other amount is kept
//! for reporting.

use core::fmt;
use core::iter::Sum;
use core::ops::Add;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Supported ISO 4217 currency codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    /// Malaysian Ringgit.
    #[default]
    Myr,
    /// US Dollar.
    Usd,
}

impl Currency {
    /// ISO 4217 code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Myr => "MYR",
            Self::Usd => "USD",
        }
    }

    /// Display symbol.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Myr => "RM",
            Self::Usd => "$",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl std::str::FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MYR" | "RM" => Ok(Self::Myr),
            "USD" => Ok(Self::Usd),
            other => Err(format!("unsupported currency: {other}")),
        }
    }
}

/// An amount quoted in both supported currencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DualPrice {
    /// Amount in Ringgit.
    pub myr: Decimal,
    /// Amount in US Dollars.
    pub usd: Decimal,
}

impl DualPrice {
    /// Create a new dual price.
    #[must_use]
    pub const fn new(myr: Decimal, usd: Decimal) -> Self {
        Self { myr, usd }
    }

    /// The zero amount.
    #[must_use]
    pub const fn zero() -> Self {
        Self {
            myr: Decimal::ZERO,
            usd: Decimal::ZERO,
        }
    }

    /// The amount in the given currency.
    #[must_use]
    pub const fn amount_in(&self, currency: Currency) -> Decimal {
        match currency {
            Currency::Myr => self.myr,
            Currency::Usd => self.usd,
        }
    }

    /// Whether neither amount is negative.
    #[must_use]
    pub fn is_non_negative(&self) -> bool {
        !self.myr.is_sign_negative() && !self.usd.is_sign_negative()
    }

    /// Format the amount in the given currency (e.g., "RM800.00").
    #[must_use]
    pub fn display_in(&self, currency: Currency) -> String {
        format!("{}{:.2}", currency.symbol(), self.amount_in(currency))
    }
}

impl Add for DualPrice {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            myr: self.myr + rhs.myr,
            usd: self.usd + rhs.usd,
        }
    }
}

impl Sum for DualPrice {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), Add::add)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;

    #[test]
    fn test_sum_and_amount_in() {
        let total: DualPrice = [
            DualPrice::new(Decimal::new(800, 0), Decimal::new(17000, 2)),
            DualPrice::new(Decimal::new(450, 0), Decimal::new(9550, 2)),
        ]
        .into_iter()
        .sum();

        assert_eq!(total.amount_in(Currency::Myr), Decimal::new(1250, 0));
        assert_eq!(total.amount_in(Currency::Usd), Decimal::new(26550, 2));
    }

    #[test]
    fn test_display_in() {
        let price = DualPrice::new(Decimal::new(800, 0), Decimal::new(17000, 2));
        assert_eq!(price.display_in(Currency::Myr), "RM800.00");
        assert_eq!(price.display_in(Currency::Usd), "$170.00");
    }

    #[test]
    fn test_non_negative() {
        assert!(DualPrice::zero().is_non_negative());
        assert!(!DualPrice::new(Decimal::new(-1, 0), Decimal::ONE).is_non_negative());
    }

    #[test]
    fn test_currency_parse() {
        assert_eq!("rm".parse::<Currency>().unwrap(), Currency::Myr);
        assert_eq!("USD".parse::<Currency>().unwrap(), Currency::Usd);
        assert!("EUR".parse::<Currency>().is_err());
        assert_eq!(serde_json::to_string(&Currency::Usd).unwrap(), "\"USD\"");
    }
}
