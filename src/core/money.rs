//! Decimal rounding and per-field precision.

use rust_decimal::{Decimal, RoundingStrategy};

/// Places allowed on `Cantidad`, `TasaOCuota`, `TipoCambio` and the upper
/// bound for `Base` and `ValorUnitario`.
pub const MAX_PLACES: u32 = 6;

/// Largest scale a [`Decimal`] can carry.
const MAX_SCALE: u32 = 28;

/// Round to `dp` places, half away from zero (commercial rounding).
pub fn round_half_up(value: Decimal, dp: u32) -> Decimal {
    value.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero)
}

/// Two amounts agree when, rounded half-up to `dp` places, they differ by
/// less than one minor unit. Amounts too far apart to subtract never agree.
pub fn amounts_match(a: Decimal, b: Decimal, dp: u32) -> bool {
    let unit = Decimal::new(1, dp.min(MAX_SCALE));
    round_half_up(a, dp)
        .checked_sub(round_half_up(b, dp))
        .is_some_and(|diff| diff.abs() < unit)
}

/// A recomputed figure fell outside the range of [`Decimal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overflow;

/// Sum without leaving the decimal range.
pub fn checked_sum<I>(values: I) -> Result<Decimal, Overflow>
where
    I: IntoIterator<Item = Decimal>,
{
    values
        .into_iter()
        .try_fold(Decimal::ZERO, |acc, v| acc.checked_add(v).ok_or(Overflow))
}

/// Precision class of a decimal attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    /// SubTotal, Descuento, Total, Importe and the tax totals.
    Amount,
    /// `Base` and `ValorUnitario`.
    Base,
    /// `Cantidad`.
    Quantity,
    /// `TasaOCuota`.
    Rate,
    /// `TipoCambio`.
    ExchangeRate,
}

impl Precision {
    /// Places the value is rendered with when issued.
    pub fn min_places(&self, currency_dp: u32) -> u32 {
        match self {
            Self::Amount | Self::Base => currency_dp,
            Self::Quantity | Self::Rate | Self::ExchangeRate => MAX_PLACES,
        }
    }

    /// Most places the schema accepts.
    pub fn max_places(&self, currency_dp: u32) -> u32 {
        match self {
            Self::Amount => currency_dp,
            Self::Base | Self::Quantity | Self::Rate | Self::ExchangeRate => MAX_PLACES,
        }
    }

    /// Whether `value` carries no more significant places than allowed.
    /// Trailing zeros do not count.
    pub fn fits(&self, value: Decimal, currency_dp: u32) -> bool {
        value.normalize().scale() <= self.max_places(currency_dp)
    }

    /// Rescale to the canonical rendering: trailing zeros dropped, then
    /// padded up to [`min_places`](Self::min_places).
    pub fn canonical(&self, value: Decimal, currency_dp: u32) -> Decimal {
        let mut v = value.normalize();
        let min = self.min_places(currency_dp);
        if v.scale() < min {
            v.rescale(min);
        }
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rounds_half_away_from_zero() {
        assert_eq!(round_half_up(dec!(2.345), 2), dec!(2.35));
        assert_eq!(round_half_up(dec!(2.344), 2), dec!(2.34));
        assert_eq!(round_half_up(dec!(-2.345), 2), dec!(-2.35));
        assert_eq!(round_half_up(dec!(0.5), 0), dec!(1));
    }

    #[test]
    fn match_within_one_minor_unit() {
        assert!(amounts_match(dec!(232.00), dec!(232), 2));
        assert!(amounts_match(dec!(232.004), dec!(232.001), 2));
        assert!(!amounts_match(dec!(232.00), dec!(232.01), 2));
        assert!(!amounts_match(dec!(232), dec!(200), 2));
        assert!(amounts_match(dec!(10.4), dec!(10), 0));
        assert!(!amounts_match(Decimal::MAX, Decimal::MIN, 2));
    }

    #[test]
    fn checked_sum_reports_overflow() {
        assert_eq!(checked_sum([dec!(1.50), dec!(2.25)]), Ok(dec!(3.75)));
        assert_eq!(checked_sum([Decimal::MAX, dec!(1)]), Err(Overflow));
        assert_eq!(checked_sum([]), Ok(Decimal::ZERO));
    }

    #[test]
    fn precision_bounds() {
        assert!(Precision::Amount.fits(dec!(1.10), 2));
        assert!(Precision::Amount.fits(dec!(1.100000), 2), "trailing zeros are free");
        assert!(!Precision::Amount.fits(dec!(1.105), 2));
        assert!(Precision::Base.fits(dec!(1.123456), 2));
        assert!(!Precision::Rate.fits(dec!(0.1600001), 2));
        assert!(!Precision::Amount.fits(dec!(1.5), 0));
    }

    #[test]
    fn canonical_rendering() {
        assert_eq!(Precision::Amount.canonical(dec!(232), 2).to_string(), "232.00");
        assert_eq!(Precision::Amount.canonical(dec!(232.0000), 2).to_string(), "232.00");
        assert_eq!(Precision::Amount.canonical(dec!(5), 0).to_string(), "5");
        assert_eq!(Precision::Base.canonical(dec!(10.125), 2).to_string(), "10.125");
        assert_eq!(Precision::Base.canonical(dec!(10), 2).to_string(), "10.00");
        assert_eq!(Precision::Rate.canonical(dec!(0.16), 2).to_string(), "0.160000");
        assert_eq!(Precision::Quantity.canonical(dec!(2), 2).to_string(), "2.000000");
        assert_eq!(Precision::Amount.canonical(dec!(0), 2).to_string(), "0.00");
    }
}
