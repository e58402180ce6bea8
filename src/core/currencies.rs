//! ISO 4217 minor units.
//!
//! c_Moneda fixes the number of decimal places every amount on a CFDI may
//! carry. This table covers the currencies that commonly appear on Mexican
//! invoices; anything missing falls back to two places.

/// Decimal places used when a currency is not in the table.
pub const DEFAULT_MINOR_UNITS: u32 = 2;

/// Number of decimal places for amounts in `code`.
pub fn minor_units(code: &str) -> u32 {
    MINOR_UNITS
        .binary_search_by(|(c, _)| (*c).cmp(code))
        .map(|i| MINOR_UNITS[i].1)
        .unwrap_or(DEFAULT_MINOR_UNITS)
}

/// Sorted by code for binary search.
static MINOR_UNITS: &[(&str, u32)] = &[
    ("ARS", 2), // Argentine Peso
    ("BHD", 3), // Bahraini Dinar
    ("BRL", 2), // Brazilian Real
    ("CAD", 2), // Canadian Dollar
    ("CHF", 2), // Swiss Franc
    ("CLP", 0), // Chilean Peso
    ("CNY", 2), // Chinese Yuan
    ("COP", 2), // Colombian Peso
    ("EUR", 2), // Euro
    ("GBP", 2), // Pound Sterling
    ("GTQ", 2), // Guatemalan Quetzal
    ("JOD", 3), // Jordanian Dinar
    ("JPY", 0), // Japanese Yen
    ("KRW", 0), // South Korean Won
    ("KWD", 3), // Kuwaiti Dinar
    ("MXN", 2), // Mexican Peso
    ("MXV", 2), // Mexican Unidad de Inversion
    ("OMR", 3), // Omani Rial
    ("PEN", 2), // Peruvian Sol
    ("PYG", 0), // Paraguayan Guarani
    ("TND", 3), // Tunisian Dinar
    ("USD", 2), // US Dollar
    ("XXX", 0), // No currency
];
