use chrono::Timelike;
use rust_decimal::Decimal;

use super::catalog::{Catalog, CatalogProvider};
use super::config::ValidationConfig;
use super::error::{CfdiError, ValidationError};
use super::money::{Overflow, Precision, amounts_match, checked_sum, round_half_up};
use super::patterns;
use super::rules::{self, RuleContext, RuleId};
use super::types::*;

/// Validate an invoice against the CFDI 3.3 structural, catalog and
/// arithmetic rules.
///
/// Returns every violation found (not just the first). An empty vector
/// means the invoice may be sealed.
pub fn validate<C: CatalogProvider + ?Sized>(
    invoice: &Invoice,
    catalogs: &C,
    config: &ValidationConfig,
) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let dp = config.decimals_for(&invoice.currency);
    let ctx = RuleContext { invoice, config };

    validate_presence(invoice, &ctx, &mut errors);
    validate_fixed_values(invoice, config, &mut errors);
    validate_patterns(invoice, &mut errors);
    validate_catalogs(invoice, catalogs, &mut errors);
    validate_decimals(invoice, dp, &mut errors);
    errors.extend(validate_arithmetic(invoice, dp));

    errors
}

/// An invoice that passed [`validate`] with zero violations.
///
/// The only way to obtain one is [`ValidatedInvoice::new`], so holding a
/// value proves the content was checked. Every decimal is rescaled to the
/// precision it is rendered with on the wire (amounts to the currency's
/// minor units, rates and quantities to six places).
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedInvoice {
    invoice: Invoice,
    decimals: u32,
}

impl ValidatedInvoice {
    pub fn new<C: CatalogProvider + ?Sized>(
        invoice: Invoice,
        catalogs: &C,
        config: &ValidationConfig,
    ) -> Result<Self, CfdiError> {
        let errors = validate(&invoice, catalogs, config);
        if !errors.is_empty() {
            return Err(CfdiError::Validation(errors));
        }
        let decimals = config.decimals_for(&invoice.currency);
        Ok(Self {
            invoice: canonical_scale(invoice, decimals),
            decimals,
        })
    }

    pub fn invoice(&self) -> &Invoice {
        &self.invoice
    }

    /// Minor-unit places of the invoice currency.
    pub fn decimals(&self) -> u32 {
        self.decimals
    }

    pub fn into_invoice(self) -> Invoice {
        self.invoice
    }
}

fn canonical_scale(mut invoice: Invoice, dp: u32) -> Invoice {
    let amount = |v: Decimal| Precision::Amount.canonical(v, dp);
    let base = |v: Decimal| Precision::Base.canonical(v, dp);
    let rate = |v: Decimal| Precision::Rate.canonical(v, dp);

    invoice.subtotal = amount(invoice.subtotal);
    invoice.discount = invoice.discount.map(amount);
    invoice.total = amount(invoice.total);
    invoice.exchange_rate = invoice
        .exchange_rate
        .map(|v| Precision::ExchangeRate.canonical(v, dp));

    for item in &mut invoice.items {
        item.quantity = Precision::Quantity.canonical(item.quantity, dp);
        item.unit_value = base(item.unit_value);
        item.amount = amount(item.amount);
        item.discount = item.discount.map(amount);
        for line in item
            .taxes
            .transferred
            .iter_mut()
            .chain(item.taxes.withheld.iter_mut())
        {
            line.base = base(line.base);
            line.rate = line.rate.map(rate);
            line.amount = line.amount.map(amount);
        }
    }

    if let Some(summary) = &mut invoice.taxes {
        summary.total_withheld = summary.total_withheld.map(amount);
        summary.total_transferred = summary.total_transferred.map(amount);
        for w in &mut summary.withheld {
            w.amount = amount(w.amount);
        }
        for t in &mut summary.transferred {
            t.rate = rate(t.rate);
            t.amount = amount(t.amount);
        }
    }
    invoice
}

fn validate_presence(invoice: &Invoice, ctx: &RuleContext<'_>, errors: &mut Vec<ValidationError>) {
    rules::check_presence(rules::INVOICE_RULES, invoice, "", ctx, errors);
    rules::check_presence(rules::ISSUER_RULES, &invoice.issuer, "issuer", ctx, errors);
    rules::check_presence(
        rules::RECIPIENT_RULES,
        &invoice.recipient,
        "recipient",
        ctx,
        errors,
    );
    if let Some(related) = &invoice.related {
        rules::check_presence(rules::RELATED_RULES, related, "related", ctx, errors);
    }

    for (i, item) in invoice.items.iter().enumerate() {
        let prefix = format!("items[{i}]");
        rules::check_presence(rules::ITEM_RULES, item, &prefix, ctx, errors);
        for (j, line) in item.taxes.transferred.iter().enumerate() {
            let prefix = format!("items[{i}].taxes.transferred[{j}]");
            rules::check_presence(rules::TAX_LINE_RULES, line, &prefix, ctx, errors);
        }
        for (j, line) in item.taxes.withheld.iter().enumerate() {
            let prefix = format!("items[{i}].taxes.withheld[{j}]");
            if line.factor == FactorType::Exento {
                errors.push(ValidationError::new(
                    format!("{prefix}.factor"),
                    RuleId::Forbidden,
                    "withheld taxes cannot use the Exento factor",
                ));
                continue;
            }
            rules::check_presence(rules::TAX_LINE_RULES, line, &prefix, ctx, errors);
        }
    }

    if let Some(summary) = &invoice.taxes {
        rules::check_presence(rules::SUMMARY_RULES, summary, "taxes", ctx, errors);
        for (k, t) in summary.transferred.iter().enumerate() {
            if t.factor == FactorType::Exento {
                errors.push(ValidationError::new(
                    format!("taxes.transferred[{k}].factor"),
                    RuleId::Forbidden,
                    "exempt taxes are not summarised",
                ));
            }
        }
    }
}

fn validate_fixed_values(
    invoice: &Invoice,
    config: &ValidationConfig,
    errors: &mut Vec<ValidationError>,
) {
    if invoice.version != CFDI_VERSION {
        errors.push(ValidationError::new(
            "version",
            RuleId::FixedValue,
            format!("version must be {CFDI_VERSION}, got '{}'", invoice.version),
        ));
    }
    if invoice.currency == config.home_currency {
        if let Some(rate) = invoice.exchange_rate {
            if rate != Decimal::ONE {
                errors.push(ValidationError::new(
                    "exchange_rate",
                    RuleId::FixedValue,
                    format!(
                        "exchange rate for {} must be 1, got {rate}",
                        config.home_currency
                    ),
                ));
            }
        }
    }
}

fn validate_patterns(invoice: &Invoice, errors: &mut Vec<ValidationError>) {
    if invoice.issued_at.nanosecond() != 0 {
        errors.push(ValidationError::new(
            "issued_at",
            RuleId::Pattern,
            "issue date must not carry fractions of a second",
        ));
    }

    check_text(invoice.series.as_deref(), 25, "series", errors);
    check_text(invoice.folio.as_deref(), 40, "folio", errors);
    check_text(
        invoice.payment_conditions.as_deref(),
        1000,
        "payment_conditions",
        errors,
    );
    check_pattern(
        &invoice.expedition_place,
        patterns::is_postal_code,
        "expedition_place",
        "must be a five-digit postal code",
        errors,
    );
    if let Some(confirmation) = &invoice.confirmation {
        check_pattern(
            confirmation,
            patterns::is_confirmation_key,
            "confirmation",
            "must be five alphanumeric characters",
            errors,
        );
    }

    if let Some(related) = &invoice.related {
        for (k, uuid) in related.uuids.iter().enumerate() {
            check_pattern(
                uuid,
                patterns::is_uuid,
                &format!("related.uuids[{k}]"),
                "must be a UUID",
                errors,
            );
        }
    }

    check_pattern(
        &invoice.issuer.rfc,
        patterns::is_rfc,
        "issuer.rfc",
        "is not a well-formed RFC",
        errors,
    );
    check_text(invoice.issuer.name.as_deref(), 254, "issuer.name", errors);

    let recipient = &invoice.recipient;
    check_pattern(
        &recipient.rfc,
        patterns::is_rfc,
        "recipient.rfc",
        "is not a well-formed RFC",
        errors,
    );
    check_text(recipient.name.as_deref(), 254, "recipient.name", errors);
    check_text(
        recipient.foreign_tax_id.as_deref(),
        40,
        "recipient.foreign_tax_id",
        errors,
    );
    if let Some(country) = &recipient.tax_residence {
        check_pattern(
            country,
            patterns::is_country_code,
            "recipient.tax_residence",
            "must be an ISO 3166-1 alpha-3 code",
            errors,
        );
    }

    for (i, item) in invoice.items.iter().enumerate() {
        check_text(item.sku.as_deref(), 100, &format!("items[{i}].sku"), errors);
        check_text(item.unit.as_deref(), 20, &format!("items[{i}].unit"), errors);
        if !item.description.trim().is_empty() {
            check_text(
                Some(&item.description),
                1000,
                &format!("items[{i}].description"),
                errors,
            );
        }
        for (k, number) in item.customs.iter().enumerate() {
            check_pattern(
                number,
                patterns::is_customs_number,
                &format!("items[{i}].customs[{k}]"),
                "must read 'YY  AA  PPPP  NNNNNNN'",
                errors,
            );
        }
        if let Some(account) = &item.property_account {
            check_pattern(
                account,
                patterns::is_property_account,
                &format!("items[{i}].property_account"),
                "must be 1 to 150 digits",
                errors,
            );
        }
    }
}

/// Blank values are left to the presence rules.
fn check_pattern(
    value: &str,
    matches: fn(&str) -> bool,
    field: &str,
    message: &str,
    errors: &mut Vec<ValidationError>,
) {
    if !value.trim().is_empty() && !matches(value) {
        errors.push(ValidationError::new(
            field,
            RuleId::Pattern,
            format!("'{value}' {message}"),
        ));
    }
}

fn check_text(value: Option<&str>, max: usize, field: &str, errors: &mut Vec<ValidationError>) {
    if let Some(value) = value {
        if !patterns::is_free_text(value, max) {
            errors.push(ValidationError::new(
                field,
                RuleId::Pattern,
                format!("must be 1 to {max} characters without '|' or control characters"),
            ));
        }
    }
}

fn validate_catalogs<C: CatalogProvider + ?Sized>(
    invoice: &Invoice,
    catalogs: &C,
    errors: &mut Vec<ValidationError>,
) {
    let mut check = |catalog: Catalog, code: &str, field: &str| {
        if !code.trim().is_empty() && !catalogs.is_member(catalog, code) {
            errors.push(ValidationError::new(
                field,
                RuleId::Catalog,
                format!("'{code}' is not in {}", catalog.name()),
            ));
        }
    };

    check(Catalog::Moneda, &invoice.currency, "currency");
    check(Catalog::CodigoPostal, &invoice.expedition_place, "expedition_place");
    if let Some(form) = &invoice.payment_form {
        check(Catalog::FormaPago, form, "payment_form");
    }
    if let Some(method) = &invoice.payment_method {
        check(Catalog::MetodoPago, method, "payment_method");
    }
    if let Some(related) = &invoice.related {
        check(Catalog::TipoRelacion, &related.relation_type, "related.relation_type");
    }
    check(Catalog::RegimenFiscal, &invoice.issuer.tax_regime, "issuer.tax_regime");
    check(Catalog::UsoCfdi, &invoice.recipient.cfdi_use, "recipient.cfdi_use");
    if let Some(country) = &invoice.recipient.tax_residence {
        check(Catalog::Pais, country, "recipient.tax_residence");
    }

    for (i, item) in invoice.items.iter().enumerate() {
        check(
            Catalog::ClaveProdServ,
            &item.product_code,
            &format!("items[{i}].product_code"),
        );
        check(
            Catalog::ClaveUnidad,
            &item.unit_code,
            &format!("items[{i}].unit_code"),
        );
        for (j, line) in item.taxes.transferred.iter().enumerate() {
            check(
                Catalog::Impuesto,
                &line.tax,
                &format!("items[{i}].taxes.transferred[{j}].tax"),
            );
        }
        for (j, line) in item.taxes.withheld.iter().enumerate() {
            check(
                Catalog::Impuesto,
                &line.tax,
                &format!("items[{i}].taxes.withheld[{j}].tax"),
            );
        }
    }

    if let Some(summary) = &invoice.taxes {
        for (k, w) in summary.withheld.iter().enumerate() {
            check(Catalog::Impuesto, &w.tax, &format!("taxes.withheld[{k}].tax"));
        }
        for (k, t) in summary.transferred.iter().enumerate() {
            check(Catalog::Impuesto, &t.tax, &format!("taxes.transferred[{k}].tax"));
        }
    }
}

/// Decimal places and non-negativity of every decimal attribute.
fn validate_decimals(invoice: &Invoice, dp: u32, errors: &mut Vec<ValidationError>) {
    let mut check = |value: Decimal, precision: Precision, field: &str| {
        if value < Decimal::ZERO {
            errors.push(ValidationError::new(
                field,
                RuleId::NonNegative,
                format!("must not be negative, got {value}"),
            ));
        }
        if !precision.fits(value, dp) {
            errors.push(ValidationError::new(
                field,
                RuleId::DecimalPlaces,
                format!(
                    "{value} has more than {} decimal places",
                    precision.max_places(dp)
                ),
            ));
        }
    };

    check(invoice.subtotal, Precision::Amount, "subtotal");
    if let Some(discount) = invoice.discount {
        check(discount, Precision::Amount, "discount");
    }
    check(invoice.total, Precision::Amount, "total");
    if let Some(rate) = invoice.exchange_rate {
        check(rate, Precision::ExchangeRate, "exchange_rate");
    }

    for (i, item) in invoice.items.iter().enumerate() {
        check(item.quantity, Precision::Quantity, &format!("items[{i}].quantity"));
        check(item.unit_value, Precision::Base, &format!("items[{i}].unit_value"));
        check(item.amount, Precision::Amount, &format!("items[{i}].amount"));
        if let Some(discount) = item.discount {
            check(discount, Precision::Amount, &format!("items[{i}].discount"));
        }
        let lines = item
            .taxes
            .transferred
            .iter()
            .enumerate()
            .map(|(j, l)| (format!("items[{i}].taxes.transferred[{j}]"), l))
            .chain(
                item.taxes
                    .withheld
                    .iter()
                    .enumerate()
                    .map(|(j, l)| (format!("items[{i}].taxes.withheld[{j}]"), l)),
            );
        for (prefix, line) in lines {
            check(line.base, Precision::Base, &format!("{prefix}.base"));
            if let Some(rate) = line.rate {
                check(rate, Precision::Rate, &format!("{prefix}.rate"));
            }
            if let Some(amount) = line.amount {
                check(amount, Precision::Amount, &format!("{prefix}.amount"));
            }
        }
    }

    if let Some(summary) = &invoice.taxes {
        if let Some(total) = summary.total_withheld {
            check(total, Precision::Amount, "taxes.total_withheld");
        }
        if let Some(total) = summary.total_transferred {
            check(total, Precision::Amount, "taxes.total_transferred");
        }
        for (k, w) in summary.withheld.iter().enumerate() {
            check(w.amount, Precision::Amount, &format!("taxes.withheld[{k}].amount"));
        }
        for (k, t) in summary.transferred.iter().enumerate() {
            check(t.rate, Precision::Rate, &format!("taxes.transferred[{k}].rate"));
            check(t.amount, Precision::Amount, &format!("taxes.transferred[{k}].amount"));
        }
    }
}

/// Validate invoice arithmetic.
///
/// Every derived attribute is compared with a value recomputed from the
/// primary inputs (quantities, unit values, item discounts, tax bases and
/// rates), never from another derived attribute. A single wrong figure
/// therefore produces a single violation, tied to that figure.
///
/// Inputs too large to recompute yield one [`RuleId::Overflow`] on the
/// first field they feed; the checks that depend on it are skipped.
pub fn validate_arithmetic(invoice: &Invoice, dp: u32) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    for (i, item) in invoice.items.iter().enumerate() {
        match item_amount(item, dp) {
            Ok(expected) if !amounts_match(item.amount, expected, dp) => {
                errors.push(ValidationError::new(
                    format!("items[{i}].amount"),
                    RuleId::ItemAmount,
                    format!(
                        "amount {} does not match quantity × unit value {expected}",
                        item.amount
                    ),
                ));
            }
            Ok(_) => {}
            Err(Overflow) => errors.push(overflow(
                format!("items[{i}].amount"),
                "quantity × unit value",
            )),
        }
        if let Some(discount) = item.discount {
            if discount > item.amount {
                errors.push(ValidationError::new(
                    format!("items[{i}].discount"),
                    RuleId::ItemDiscount,
                    format!("discount {discount} exceeds amount {}", item.amount),
                ));
            }
        }

        let lines = item
            .taxes
            .transferred
            .iter()
            .enumerate()
            .map(|(j, l)| (format!("items[{i}].taxes.transferred[{j}]"), l))
            .chain(
                item.taxes
                    .withheld
                    .iter()
                    .enumerate()
                    .map(|(j, l)| (format!("items[{i}].taxes.withheld[{j}]"), l)),
            );
        for (prefix, line) in lines {
            let expected = match tax_amount(line, dp) {
                Ok(Some(expected)) => expected,
                Ok(None) => continue,
                Err(Overflow) => {
                    errors.push(overflow(format!("{prefix}.amount"), "base × rate"));
                    continue;
                }
            };
            let Some(amount) = line.amount else {
                continue;
            };
            if !amounts_match(amount, expected, dp) {
                errors.push(ValidationError::new(
                    format!("{prefix}.amount"),
                    RuleId::TaxLineAmount,
                    format!("tax amount {amount} does not match expected {expected}"),
                ));
            }
        }
    }

    let figures = match Recomputed::from_items(&invoice.items, dp) {
        Ok(figures) => figures,
        Err(field) => {
            if !errors.iter().any(|e| e.rule == RuleId::Overflow) {
                errors.push(overflow(field.to_string(), "recomputed sum"));
            }
            return errors;
        }
    };

    if !amounts_match(invoice.subtotal, figures.subtotal, dp) {
        errors.push(ValidationError::new(
            "subtotal",
            RuleId::SubTotal,
            format!(
                "subtotal {} does not match sum of item amounts {}",
                invoice.subtotal, figures.subtotal
            ),
        ));
    }

    if let Some(actual) = invoice.discount {
        if !amounts_match(actual, figures.discount, dp) {
            errors.push(ValidationError::new(
                "discount",
                RuleId::DiscountSum,
                format!(
                    "discount {actual} does not match sum of item discounts {}",
                    figures.discount
                ),
            ));
        }
    }

    if let Some(summary) = &invoice.taxes {
        check_transferred_summary(summary, &figures.transferred, dp, &mut errors);
        check_withheld_summary(summary, &figures.withheld, dp, &mut errors);

        if let Some(actual) = summary.total_transferred {
            if !figures.transferred.is_empty()
                && !amounts_match(actual, figures.transferred_total, dp)
            {
                errors.push(ValidationError::new(
                    "taxes.total_transferred",
                    RuleId::TotalTransferred,
                    format!(
                        "total transferred {actual} does not match item taxes {}",
                        figures.transferred_total
                    ),
                ));
            }
        }
        if let Some(actual) = summary.total_withheld {
            if !figures.withheld.is_empty() && !amounts_match(actual, figures.withheld_total, dp)
            {
                errors.push(ValidationError::new(
                    "taxes.total_withheld",
                    RuleId::TotalWithheld,
                    format!(
                        "total withheld {actual} does not match item taxes {}",
                        figures.withheld_total
                    ),
                ));
            }
        }
    }

    if !amounts_match(invoice.total, figures.total, dp) {
        errors.push(ValidationError::new(
            "total",
            RuleId::TotalReconciliation,
            format!(
                "total {} does not match subtotal - discount + transferred - withheld = {}",
                invoice.total, figures.total
            ),
        ));
    }

    errors
}

fn overflow(field: String, what: &str) -> ValidationError {
    ValidationError::new(
        field,
        RuleId::Overflow,
        format!("{what} exceeds the decimal range"),
    )
}

fn check_transferred_summary(
    summary: &TaxSummary,
    expected: &[TransferredTax],
    dp: u32,
    errors: &mut Vec<ValidationError>,
) {
    let mut matched = vec![false; expected.len()];
    for (k, entry) in summary.transferred.iter().enumerate() {
        if entry.factor == FactorType::Exento {
            continue;
        }
        let group = expected.iter().position(|g| {
            g.tax == entry.tax && g.factor == entry.factor && g.rate == entry.rate
        });
        match group {
            Some(g) if matched[g] => errors.push(ValidationError::new(
                format!("taxes.transferred[{k}]"),
                RuleId::TransferredSummary,
                format!(
                    "duplicate entry for tax {} {} {}",
                    entry.tax,
                    entry.factor.code(),
                    entry.rate
                ),
            )),
            Some(g) => {
                matched[g] = true;
                if !amounts_match(entry.amount, expected[g].amount, dp) {
                    errors.push(ValidationError::new(
                        format!("taxes.transferred[{k}].amount"),
                        RuleId::TransferredSummary,
                        format!(
                            "amount {} does not match item taxes {}",
                            entry.amount, expected[g].amount
                        ),
                    ));
                }
            }
            None => errors.push(ValidationError::new(
                format!("taxes.transferred[{k}]"),
                RuleId::TransferredSummary,
                format!(
                    "no item transfers tax {} {} {}",
                    entry.tax,
                    entry.factor.code(),
                    entry.rate
                ),
            )),
        }
    }
    for (g, group) in expected.iter().enumerate() {
        if !matched[g] {
            errors.push(ValidationError::new(
                "taxes.transferred",
                RuleId::TransferredSummary,
                format!(
                    "missing entry for tax {} {} {}",
                    group.tax,
                    group.factor.code(),
                    group.rate
                ),
            ));
        }
    }
}

fn check_withheld_summary(
    summary: &TaxSummary,
    expected: &[WithheldTax],
    dp: u32,
    errors: &mut Vec<ValidationError>,
) {
    let mut matched = vec![false; expected.len()];
    for (k, entry) in summary.withheld.iter().enumerate() {
        match expected.iter().position(|g| g.tax == entry.tax) {
            Some(g) if matched[g] => errors.push(ValidationError::new(
                format!("taxes.withheld[{k}]"),
                RuleId::WithheldSummary,
                format!("duplicate entry for tax {}", entry.tax),
            )),
            Some(g) => {
                matched[g] = true;
                if !amounts_match(entry.amount, expected[g].amount, dp) {
                    errors.push(ValidationError::new(
                        format!("taxes.withheld[{k}].amount"),
                        RuleId::WithheldSummary,
                        format!(
                            "amount {} does not match item taxes {}",
                            entry.amount, expected[g].amount
                        ),
                    ));
                }
            }
            None => errors.push(ValidationError::new(
                format!("taxes.withheld[{k}]"),
                RuleId::WithheldSummary,
                format!("no item withholds tax {}", entry.tax),
            )),
        }
    }
    for (g, group) in expected.iter().enumerate() {
        if !matched[g] {
            errors.push(ValidationError::new(
                "taxes.withheld",
                RuleId::WithheldSummary,
                format!("missing entry for tax {}", group.tax),
            ));
        }
    }
}

/// `round(Cantidad × ValorUnitario)`.
pub fn item_amount(item: &LineItem, dp: u32) -> Result<Decimal, Overflow> {
    item.quantity
        .checked_mul(item.unit_value)
        .map(|v| round_half_up(v, dp))
        .ok_or(Overflow)
}

/// Amount a tax line should carry: `round(Base × Tasa)` for Tasa, the
/// quota itself for Cuota, nothing for Exento or a missing rate.
pub fn tax_amount(line: &TaxLine, dp: u32) -> Result<Option<Decimal>, Overflow> {
    let Some(rate) = line.rate else {
        return Ok(None);
    };
    match line.factor {
        FactorType::Tasa => line
            .base
            .checked_mul(rate)
            .map(|v| Some(round_half_up(v, dp)))
            .ok_or(Overflow),
        FactorType::Cuota => Ok(Some(round_half_up(rate, dp))),
        FactorType::Exento => Ok(None),
    }
}

/// Item transfers grouped by (tax, factor, rate) in order of first appearance.
pub fn transferred_groups(items: &[LineItem], dp: u32) -> Result<Vec<TransferredTax>, Overflow> {
    let mut groups: Vec<TransferredTax> = Vec::new();
    for line in items.iter().flat_map(|i| &i.taxes.transferred) {
        let (Some(rate), Some(amount)) = (line.rate, tax_amount(line, dp)?) else {
            continue;
        };
        match groups
            .iter_mut()
            .find(|g| g.tax == line.tax && g.factor == line.factor && g.rate == rate)
        {
            Some(group) => group.amount = group.amount.checked_add(amount).ok_or(Overflow)?,
            None => groups.push(TransferredTax {
                tax: line.tax.clone(),
                factor: line.factor,
                rate,
                amount,
            }),
        }
    }
    Ok(groups)
}

/// Item withholdings grouped by tax in order of first appearance.
pub fn withheld_groups(items: &[LineItem], dp: u32) -> Result<Vec<WithheldTax>, Overflow> {
    let mut groups: Vec<WithheldTax> = Vec::new();
    for line in items.iter().flat_map(|i| &i.taxes.withheld) {
        let Some(amount) = tax_amount(line, dp)? else {
            continue;
        };
        match groups.iter_mut().find(|g| g.tax == line.tax) {
            Some(group) => group.amount = group.amount.checked_add(amount).ok_or(Overflow)?,
            None => groups.push(WithheldTax {
                tax: line.tax.clone(),
                amount,
            }),
        }
    }
    Ok(groups)
}

/// Document-level figures recomputed from the items.
struct Recomputed {
    subtotal: Decimal,
    discount: Decimal,
    transferred: Vec<TransferredTax>,
    withheld: Vec<WithheldTax>,
    transferred_total: Decimal,
    withheld_total: Decimal,
    total: Decimal,
}

impl Recomputed {
    /// Fails with the first field whose figure leaves the decimal range.
    fn from_items(items: &[LineItem], dp: u32) -> Result<Self, &'static str> {
        let amounts = items
            .iter()
            .map(|i| item_amount(i, dp))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| "subtotal")?;
        let subtotal = checked_sum(amounts).map_err(|_| "subtotal")?;
        let discount = checked_sum(items.iter().filter_map(|i| i.discount)).map_err(|_| "discount")?;

        let transferred = transferred_groups(items, dp).map_err(|_| "taxes.total_transferred")?;
        let transferred_total = checked_sum(transferred.iter().map(|t| t.amount))
            .map_err(|_| "taxes.total_transferred")?;
        let withheld = withheld_groups(items, dp).map_err(|_| "taxes.total_withheld")?;
        let withheld_total = checked_sum(withheld.iter().map(|w| w.amount))
            .map_err(|_| "taxes.total_withheld")?;

        let total = subtotal
            .checked_sub(discount)
            .and_then(|v| v.checked_add(transferred_total))
            .and_then(|v| v.checked_sub(withheld_total))
            .ok_or("total")?;

        Ok(Self {
            subtotal,
            discount,
            transferred,
            withheld,
            transferred_total,
            withheld_total,
            total,
        })
    }
}

/// Calculate every derived amount of an invoice (mutates in place).
///
/// Item amounts, tax line amounts, subtotal, discount, the document-level
/// tax summary and the total are recomputed from quantities, unit values,
/// item discounts, tax bases and rates, rounded to `dp` places.
pub fn calculate_totals(invoice: &mut Invoice, dp: u32) -> Result<(), CfdiError> {
    let out_of_range =
        |field: &str| CfdiError::Builder(format!("{field} exceeds the decimal range"));

    for (i, item) in invoice.items.iter_mut().enumerate() {
        item.amount =
            item_amount(item, dp).map_err(|_| out_of_range(&format!("items[{i}].amount")))?;
        for line in item
            .taxes
            .transferred
            .iter_mut()
            .chain(item.taxes.withheld.iter_mut())
        {
            if let Some(amount) =
                tax_amount(line, dp).map_err(|_| out_of_range(&format!("items[{i}] tax")))?
            {
                line.amount = Some(amount);
            }
        }
    }

    let figures = Recomputed::from_items(&invoice.items, dp).map_err(out_of_range)?;

    invoice.subtotal = figures.subtotal;
    invoice.discount = invoice
        .items
        .iter()
        .any(|i| i.discount.is_some())
        .then_some(figures.discount);
    invoice.total = figures.total;

    invoice.taxes = if figures.transferred.is_empty() && figures.withheld.is_empty() {
        None
    } else {
        Some(TaxSummary {
            total_withheld: (!figures.withheld.is_empty()).then_some(figures.withheld_total),
            total_transferred: (!figures.transferred.is_empty())
                .then_some(figures.transferred_total),
            withheld: figures.withheld,
            transferred: figures.transferred,
        })
    };
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StaticCatalog;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn catalogs() -> StaticCatalog {
        StaticCatalog::new()
            .with(Catalog::Moneda, ["MXN", "USD", "XXX"])
            .with(Catalog::CodigoPostal, ["06600"])
            .with(Catalog::FormaPago, ["01", "03", "99"])
            .with(Catalog::MetodoPago, ["PUE", "PPD"])
            .with(Catalog::RegimenFiscal, ["601", "612"])
            .with(Catalog::UsoCfdi, ["G01", "G03", "P01"])
            .with(Catalog::ClaveUnidad, ["H87", "E48"])
            .with(Catalog::Impuesto, ["001", "002", "003"])
            .with(Catalog::Pais, ["USA"])
            .with(Catalog::TipoRelacion, ["01", "04"])
            .accept_all(Catalog::ClaveProdServ)
    }

    fn iva(base: Decimal) -> TaxLine {
        TaxLine {
            base,
            tax: "002".into(),
            factor: FactorType::Tasa,
            rate: Some(dec!(0.16)),
            amount: None,
        }
    }

    fn test_item() -> LineItem {
        LineItem {
            product_code: "84111506".into(),
            sku: None,
            quantity: dec!(2),
            unit_code: "E48".into(),
            unit: None,
            description: "Servicio de consultoría".into(),
            unit_value: dec!(100.00),
            amount: Decimal::ZERO,
            discount: None,
            taxes: ItemTaxes {
                transferred: vec![iva(dec!(200.00))],
                withheld: Vec::new(),
            },
            customs: Vec::new(),
            property_account: None,
            complements: Vec::new(),
        }
    }

    fn test_invoice() -> Invoice {
        let mut invoice = Invoice {
            version: CFDI_VERSION.into(),
            series: Some("A".into()),
            folio: Some("1".into()),
            issued_at: NaiveDate::from_ymd_opt(2024, 3, 1)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
            payment_form: Some("03".into()),
            payment_conditions: None,
            subtotal: Decimal::ZERO,
            discount: None,
            currency: "MXN".into(),
            exchange_rate: None,
            total: Decimal::ZERO,
            document_type: DocumentType::Income,
            payment_method: Some("PUE".into()),
            expedition_place: "06600".into(),
            confirmation: None,
            related: None,
            issuer: Issuer {
                rfc: "EKU9003173C9".into(),
                name: Some("ESCUELA KEMPER URGATE".into()),
                tax_regime: "601".into(),
            },
            recipient: Recipient {
                rfc: "XAXX010101000".into(),
                name: None,
                tax_residence: None,
                foreign_tax_id: None,
                cfdi_use: "G03".into(),
            },
            items: vec![test_item()],
            taxes: None,
        };
        calculate_totals(&mut invoice, 2).unwrap();
        invoice
    }

    fn rules_of(errors: &[ValidationError]) -> Vec<(String, RuleId)> {
        errors.iter().map(|e| (e.field.clone(), e.rule)).collect()
    }

    #[test]
    fn valid_invoice() {
        let invoice = test_invoice();
        let errors = validate(&invoice, &catalogs(), &ValidationConfig::default());
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        assert_eq!(invoice.subtotal, dec!(200.00));
        assert_eq!(invoice.total, dec!(232.00));
    }

    #[test]
    fn calculate_totals_builds_summary() {
        let invoice = test_invoice();
        let taxes = invoice.taxes.unwrap();
        assert_eq!(taxes.total_transferred, Some(dec!(32.00)));
        assert_eq!(taxes.total_withheld, None);
        assert_eq!(taxes.transferred.len(), 1);
        assert_eq!(taxes.transferred[0].amount, dec!(32.00));
        assert_eq!(invoice.items[0].taxes.transferred[0].amount, Some(dec!(32.00)));
    }

    #[test]
    fn wrong_total_is_single_violation() {
        let mut invoice = test_invoice();
        invoice.total = dec!(200.00);
        let errors = validate(&invoice, &catalogs(), &ValidationConfig::default());
        assert_eq!(
            rules_of(&errors),
            vec![("total".to_string(), RuleId::TotalReconciliation)]
        );
    }

    #[test]
    fn wrong_item_amount_is_single_violation() {
        let mut invoice = test_invoice();
        invoice.items[0].amount = dec!(201.00);
        let errors = validate(&invoice, &catalogs(), &ValidationConfig::default());
        assert_eq!(
            rules_of(&errors),
            vec![("items[0].amount".to_string(), RuleId::ItemAmount)]
        );
    }

    #[test]
    fn wrong_summary_entry_is_single_violation() {
        let mut invoice = test_invoice();
        invoice.taxes.as_mut().unwrap().transferred[0].amount = dec!(31.00);
        let errors = validate(&invoice, &catalogs(), &ValidationConfig::default());
        assert_eq!(
            rules_of(&errors),
            vec![(
                "taxes.transferred[0].amount".to_string(),
                RuleId::TransferredSummary
            )]
        );
    }

    #[test]
    fn withholding_reduces_total() {
        let mut invoice = test_invoice();
        invoice.items[0].taxes.withheld.push(TaxLine {
            base: dec!(200.00),
            tax: "001".into(),
            factor: FactorType::Tasa,
            rate: Some(dec!(0.10)),
            amount: None,
        });
        calculate_totals(&mut invoice, 2).unwrap();
        assert_eq!(invoice.total, dec!(212.00));
        let errors = validate(&invoice, &catalogs(), &ValidationConfig::default());
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    }

    #[test]
    fn cuota_amount_is_the_quota() {
        let line = TaxLine {
            base: dec!(10),
            tax: "003".into(),
            factor: FactorType::Cuota,
            rate: Some(dec!(3.5)),
            amount: None,
        };
        assert_eq!(tax_amount(&line, 2), Ok(Some(dec!(3.50))));
    }

    #[test]
    fn exempt_line_carries_no_rate() {
        let mut invoice = test_invoice();
        invoice.items[0].taxes.transferred[0] = TaxLine {
            base: dec!(200.00),
            tax: "002".into(),
            factor: FactorType::Exento,
            rate: Some(dec!(0.16)),
            amount: None,
        };
        calculate_totals(&mut invoice, 2).unwrap();
        assert!(invoice.taxes.is_none());
        let errors = validate(&invoice, &catalogs(), &ValidationConfig::default());
        assert_eq!(
            rules_of(&errors),
            vec![(
                "items[0].taxes.transferred[0].rate".to_string(),
                RuleId::Forbidden
            )]
        );
    }

    #[test]
    fn exempt_withholding_rejected() {
        let mut invoice = test_invoice();
        invoice.items[0].taxes.withheld.push(TaxLine {
            base: dec!(200.00),
            tax: "001".into(),
            factor: FactorType::Exento,
            rate: None,
            amount: None,
        });
        let errors = validate(&invoice, &catalogs(), &ValidationConfig::default());
        assert_eq!(
            rules_of(&errors),
            vec![(
                "items[0].taxes.withheld[0].factor".to_string(),
                RuleId::Forbidden
            )]
        );
    }

    #[test]
    fn discount_needs_document_discount() {
        let mut invoice = test_invoice();
        invoice.items[0].discount = Some(dec!(20.00));
        let errors = validate(&invoice, &catalogs(), &ValidationConfig::default());
        let found = rules_of(&errors);
        assert!(found.contains(&("discount".to_string(), RuleId::ConditionallyRequired)));
        assert!(found.contains(&("total".to_string(), RuleId::TotalReconciliation)));
    }

    #[test]
    fn discount_exceeding_amount() {
        let mut invoice = test_invoice();
        invoice.items[0].discount = Some(dec!(250.00));
        calculate_totals(&mut invoice, 2).unwrap();
        let errors = validate(&invoice, &catalogs(), &ValidationConfig::default());
        assert!(
            errors
                .iter()
                .any(|e| e.rule == RuleId::ItemDiscount && e.field == "items[0].discount")
        );
    }

    #[test]
    fn negative_quantity() {
        let mut invoice = test_invoice();
        invoice.items[0].quantity = dec!(-2);
        calculate_totals(&mut invoice, 2).unwrap();
        let errors = validate(&invoice, &catalogs(), &ValidationConfig::default());
        assert!(
            errors
                .iter()
                .any(|e| e.rule == RuleId::NonNegative && e.field == "items[0].quantity")
        );
    }

    #[test]
    fn too_many_places() {
        let mut invoice = test_invoice();
        invoice.items[0].taxes.transferred[0].rate = Some(dec!(0.1600001));
        let errors = validate(&invoice, &catalogs(), &ValidationConfig::default());
        assert!(errors.iter().any(|e| e.rule == RuleId::DecimalPlaces
            && e.field == "items[0].taxes.transferred[0].rate"));
    }

    #[test]
    fn fixed_values() {
        let mut invoice = test_invoice();
        invoice.version = "4.0".into();
        invoice.exchange_rate = Some(dec!(1.5));
        let errors = validate(&invoice, &catalogs(), &ValidationConfig::default());
        assert_eq!(
            rules_of(&errors),
            vec![
                ("version".to_string(), RuleId::FixedValue),
                ("exchange_rate".to_string(), RuleId::FixedValue),
            ]
        );
    }

    #[test]
    fn sub_second_date_rejected() {
        let mut invoice = test_invoice();
        invoice.issued_at = invoice.issued_at.with_nanosecond(500_000_000).unwrap();
        let errors = validate(&invoice, &catalogs(), &ValidationConfig::default());
        assert_eq!(
            rules_of(&errors),
            vec![("issued_at".to_string(), RuleId::Pattern)]
        );
    }

    #[test]
    fn transfer_document_forbids_payment_fields() {
        let mut invoice = test_invoice();
        invoice.document_type = DocumentType::Transfer;
        let errors = validate(&invoice, &catalogs(), &ValidationConfig::default());
        let found = rules_of(&errors);
        assert!(found.contains(&("payment_form".to_string(), RuleId::Forbidden)));
        assert!(found.contains(&("payment_method".to_string(), RuleId::Forbidden)));
    }

    #[test]
    fn foreign_recipient_fields_pair_up() {
        let mut invoice = test_invoice();
        invoice.recipient.tax_residence = Some("USA".into());
        let errors = validate(&invoice, &catalogs(), &ValidationConfig::default());
        assert_eq!(
            rules_of(&errors),
            vec![(
                "recipient.foreign_tax_id".to_string(),
                RuleId::ConditionallyRequired
            )]
        );
    }

    #[test]
    fn confirmation_above_limit() {
        let invoice = test_invoice();
        let config = ValidationConfig::default().with_total_limit(dec!(100));
        let errors = validate(&invoice, &catalogs(), &config);
        assert_eq!(
            rules_of(&errors),
            vec![("confirmation".to_string(), RuleId::ConditionallyRequired)]
        );
    }

    #[test]
    fn collects_all_errors() {
        let mut invoice = test_invoice();
        invoice.issuer.rfc = String::new();
        invoice.recipient.cfdi_use = "ZZZ".into();
        invoice.expedition_place = "123".into();
        invoice.items[0].unit_code = "XYZ".into();
        let errors = validate(&invoice, &catalogs(), &ValidationConfig::default());
        let found = rules_of(&errors);
        assert!(found.contains(&("issuer.rfc".to_string(), RuleId::Required)));
        assert!(found.contains(&("recipient.cfdi_use".to_string(), RuleId::Catalog)));
        assert!(found.contains(&("expedition_place".to_string(), RuleId::Pattern)));
        assert!(found.contains(&("expedition_place".to_string(), RuleId::Catalog)));
        assert!(found.contains(&("items[0].unit_code".to_string(), RuleId::Catalog)));
    }

    #[test]
    fn validated_invoice_rescales() {
        let validated =
            ValidatedInvoice::new(test_invoice(), &catalogs(), &ValidationConfig::default())
                .unwrap();
        let invoice = validated.invoice();
        assert_eq!(invoice.total.to_string(), "232.00");
        assert_eq!(invoice.items[0].quantity.to_string(), "2.000000");
        assert_eq!(
            invoice.items[0].taxes.transferred[0].rate.unwrap().to_string(),
            "0.160000"
        );
        assert_eq!(validated.decimals(), 2);
    }

    #[test]
    fn validated_invoice_rejects() {
        let mut invoice = test_invoice();
        invoice.total = dec!(1);
        let err = ValidatedInvoice::new(invoice, &catalogs(), &ValidationConfig::default())
            .unwrap_err();
        match err {
            CfdiError::Validation(errors) => assert_eq!(errors.len(), 1),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn huge_quantity_is_one_overflow() {
        let mut invoice = test_invoice();
        invoice.items[0].quantity = Decimal::MAX;
        let errors = validate(&invoice, &catalogs(), &ValidationConfig::default());
        assert_eq!(
            rules_of(&errors),
            vec![("items[0].amount".to_string(), RuleId::Overflow)]
        );
    }

    #[test]
    fn huge_tax_base_is_one_overflow() {
        let mut invoice = test_invoice();
        invoice.items[0].taxes.transferred[0].base = Decimal::MAX;
        let errors = validate(&invoice, &catalogs(), &ValidationConfig::default());
        assert_eq!(
            rules_of(&errors),
            vec![(
                "items[0].taxes.transferred[0].amount".to_string(),
                RuleId::Overflow
            )]
        );
    }

    #[test]
    fn overflowing_subtotal() {
        let mut invoice = test_invoice();
        let item = &mut invoice.items[0];
        item.quantity = Decimal::ONE;
        item.unit_value = Decimal::MAX;
        item.amount = Decimal::MAX;
        invoice.items.push(invoice.items[0].clone());
        let errors = validate(&invoice, &catalogs(), &ValidationConfig::default());
        assert_eq!(
            rules_of(&errors),
            vec![("subtotal".to_string(), RuleId::Overflow)]
        );
    }

    #[test]
    fn calculate_totals_rejects_overflow() {
        let mut invoice = test_invoice();
        invoice.items[0].unit_value = Decimal::MAX;
        let err = calculate_totals(&mut invoice, 2).unwrap_err();
        assert!(matches!(err, CfdiError::Builder(ref m) if m.contains("items[0].amount")));
    }
}
