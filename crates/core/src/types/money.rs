//! Money amounts in the store currency.
//!
//! Amounts are exact decimals in major units (pounds, not pence). Every
//! value that reaches a customer or the payment processor is rounded to two
//! places, half away from zero, which matches how the processor rounds
//! minor units.

use core::fmt;
use core::iter::Sum;
use core::ops::Add;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Errors from money arithmetic at the system boundary.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("amount cannot be negative: {0}")]
    Negative(Decimal),
    #[error("amount does not fit in minor units: {0}")]
    Overflow(Decimal),
}

/// A non-rounded decimal amount of money.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Self = Self(Decimal::ZERO);

    #[must_use]
    pub const fn new(amount: Decimal) -> Self {
        Self(amount)
    }

    /// Build from minor units (pence).
    #[must_use]
    pub fn from_minor(minor: i64) -> Self {
        Self(Decimal::new(minor, 2))
    }

    #[must_use]
    pub const fn amount(&self) -> Decimal {
        self.0
    }

    #[must_use]
    pub const fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    /// Round to two decimal places.
    #[must_use]
    pub fn rounded(self) -> Self {
        Self(
            self.0
                .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
        )
    }

    /// Unit price times quantity, unrounded.
    #[must_use]
    pub fn times(self, quantity: u32) -> Self {
        Self(self.0 * Decimal::from(quantity))
    }

    /// `percent` percent of this amount, rounded to two places.
    #[must_use]
    pub fn percent(self, percent: Decimal) -> Self {
        Self(self.0 * percent / Decimal::ONE_HUNDRED).rounded()
    }

    /// The amount after a percentage discount, rounded to two places.
    #[must_use]
    pub fn discounted(self, percent: Decimal) -> Self {
        Self(self.0 * (Decimal::ONE_HUNDRED - percent) / Decimal::ONE_HUNDRED).rounded()
    }

    /// Integer minor units as the payment processor expects them.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyError::Negative`] for negative amounts and
    /// [`MoneyError::Overflow`] when the value does not fit an `i64`.
    pub fn to_minor_units(self) -> Result<i64, MoneyError> {
        if self.is_negative() {
            return Err(MoneyError::Negative(self.0));
        }
        let minor = (self.rounded().0 * Decimal::ONE_HUNDRED).trunc();
        i64::try_from(minor).map_err(|_| MoneyError::Overflow(self.0))
    }
}

impl Add for Money {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

impl From<Decimal> for Money {
    fn from(amount: Decimal) -> Self {
        Self(amount)
    }
}

impl From<Money> for Decimal {
    fn from(money: Money) -> Self {
        money.0
    }
}

/// Always two places, no currency symbol: `21.00`.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.rounded().0)
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Type<sqlx::Postgres> for Money {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <Decimal as sqlx::Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        <Decimal as sqlx::Type<sqlx::Postgres>>::compatible(ty)
    }
}

#[cfg(feature = "postgres")]
impl<'r> sqlx::Decode<'r, sqlx::Postgres> for Money {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        <Decimal as sqlx::Decode<sqlx::Postgres>>::decode(value).map(Self)
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Encode<'_, sqlx::Postgres> for Money {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <Decimal as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.0, buf)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn gbp(s: &str) -> Money {
        Money::new(s.parse().unwrap())
    }

    #[test]
    fn percent_rounds_to_pence() {
        assert_eq!(gbp("20.00").percent(Decimal::from(5)), gbp("1.00"));
        assert_eq!(gbp("10.01").percent(Decimal::from(5)), gbp("0.50"));
        assert_eq!(gbp("10.10").percent(Decimal::from(5)), gbp("0.51"));
    }

    #[test]
    fn line_totals_sum() {
        let total: Money = [gbp("10.00").times(2), gbp("2.50").times(3)]
            .into_iter()
            .sum();
        assert_eq!(total, gbp("27.50"));
    }

    #[test]
    fn discount_applies_percentage() {
        assert_eq!(gbp("40.00").discounted(Decimal::from(25)), gbp("30.00"));
        assert_eq!(gbp("9.99").discounted(Decimal::ZERO), gbp("9.99"));
    }

    #[test]
    fn minor_units() {
        assert_eq!(gbp("21.00").to_minor_units().unwrap(), 2100);
        assert_eq!(gbp("0.005").to_minor_units().unwrap(), 1);
        assert_eq!(Money::from_minor(1999), gbp("19.99"));
        assert!(matches!(
            gbp("-1").to_minor_units(),
            Err(MoneyError::Negative(_))
        ));
    }

    #[test]
    fn displays_two_places() {
        assert_eq!(gbp("21").to_string(), "21.00");
        assert_eq!(gbp("1.5").to_string(), "1.50");
    }
}
