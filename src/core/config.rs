use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::currencies;
use super::types::Invoice;

/// Tunable parameters of the validator.
///
/// Defaults follow the SAT rules for CFDI 3.3: MXN as home currency, XXX as
/// the "no currency" code, no amount limit and no exchange-rate bands.
/// Limits that change over time (the total above which a PAC confirmation
/// key is needed, tolerated exchange-rate bands) are supplied by the caller,
/// usually deserialized from the application's own configuration.
///
/// ```
/// use cfdi::core::ValidationConfig;
/// use rust_decimal_macros::dec;
///
/// let config = ValidationConfig::default()
///     .with_total_limit(dec!(2000000000))
///     .with_exchange_rate_range("USD", dec!(15), dec!(25));
/// assert_eq!(config.decimals_for("MXN"), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Currency that never needs `TipoCambio`.
    pub home_currency: String,
    /// Code meaning "no currency"; forbids `TipoCambio`.
    pub no_currency: String,
    /// Overrides for the ISO 4217 minor-unit table.
    pub currency_decimals: HashMap<String, u32>,
    /// Largest total (in home currency) accepted without `Confirmacion`.
    pub total_limit: Option<Decimal>,
    /// Tolerated exchange-rate band per currency. Rates outside need `Confirmacion`.
    pub exchange_rate_ranges: HashMap<String, RateRange>,
}

/// Inclusive exchange-rate band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateRange {
    pub min: Decimal,
    pub max: Decimal,
}

impl RateRange {
    pub fn contains(&self, rate: Decimal) -> bool {
        rate >= self.min && rate <= self.max
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            home_currency: "MXN".to_string(),
            no_currency: "XXX".to_string(),
            currency_decimals: HashMap::new(),
            total_limit: None,
            exchange_rate_ranges: HashMap::new(),
        }
    }
}

impl ValidationConfig {
    pub fn with_total_limit(mut self, limit: Decimal) -> Self {
        self.total_limit = Some(limit);
        self
    }

    pub fn with_exchange_rate_range(
        mut self,
        currency: impl Into<String>,
        min: Decimal,
        max: Decimal,
    ) -> Self {
        self.exchange_rate_ranges
            .insert(currency.into(), RateRange { min, max });
        self
    }

    pub fn with_currency_decimals(mut self, currency: impl Into<String>, places: u32) -> Self {
        self.currency_decimals.insert(currency.into(), places);
        self
    }

    /// Minor-unit places for a currency, honoring overrides.
    pub fn decimals_for(&self, currency: &str) -> u32 {
        self.currency_decimals
            .get(currency)
            .copied()
            .unwrap_or_else(|| currencies::minor_units(currency))
    }

    /// Whether the currency needs an exchange rate.
    pub fn needs_exchange_rate(&self, currency: &str) -> bool {
        currency != self.home_currency && currency != self.no_currency
    }

    /// Whether the total or the exchange rate falls outside the configured
    /// range, which makes `Confirmacion` mandatory. A converted total beyond
    /// the decimal range exceeds any limit.
    pub fn requires_confirmation(&self, invoice: &Invoice) -> bool {
        let rate = invoice.exchange_rate.unwrap_or(Decimal::ONE);
        if let Some(limit) = self.total_limit {
            match invoice.total.checked_mul(rate) {
                Some(converted) if converted <= limit => {}
                _ => return true,
            }
        }
        match (
            invoice.exchange_rate,
            self.exchange_rate_ranges.get(&invoice.currency),
        ) {
            (Some(rate), Some(range)) => !range.contains(rate),
            _ => false,
        }
    }
}
