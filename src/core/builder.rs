use chrono::{NaiveDateTime, Timelike};
use rust_decimal::Decimal;

use super::currencies;
use super::document::XmlNode;
use super::error::CfdiError;
use super::money::round_half_up;
use super::numbering::FolioSequence;
use super::types::*;
use super::validation;

/// Builder for constructing invoices with calculated amounts.
///
/// `build` fills in every derived figure (item amounts, tax amounts,
/// subtotal, discount, tax summary, total). It does not consult the SAT
/// catalogs; run [`validate`](super::validate) or
/// [`ValidatedInvoice::new`](super::ValidatedInvoice::new) before sealing.
///
/// ```
/// use cfdi::core::*;
/// use chrono::NaiveDate;
/// use rust_decimal_macros::dec;
///
/// let issued_at = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(12, 0, 0).unwrap();
/// let invoice = InvoiceBuilder::new(issued_at, "06600")
///     .payment_form("03")
///     .payment_method("PUE")
///     .issuer(IssuerBuilder::new("EKU9003173C9", "601").name("ESCUELA KEMPER URGATE").build())
///     .recipient(RecipientBuilder::new("XAXX010101000", "G03").build())
///     .add_item(LineItemBuilder::new("84111506", dec!(2), "E48", "Consultoría", dec!(100.00))
///         .transferred_rate("002", dec!(0.16)))
///     .build()
///     .unwrap();
///
/// assert_eq!(invoice.total, dec!(232.00));
/// ```
pub struct InvoiceBuilder {
    series: Option<String>,
    folio: Option<String>,
    issued_at: NaiveDateTime,
    payment_form: Option<String>,
    payment_conditions: Option<String>,
    currency: String,
    exchange_rate: Option<Decimal>,
    document_type: DocumentType,
    payment_method: Option<String>,
    expedition_place: String,
    confirmation: Option<String>,
    related: Option<RelatedDocuments>,
    issuer: Option<Issuer>,
    recipient: Option<Recipient>,
    items: Vec<LineItemBuilder>,
    decimals: Option<u32>,
}

impl InvoiceBuilder {
    pub fn new(issued_at: NaiveDateTime, expedition_place: impl Into<String>) -> Self {
        Self {
            series: None,
            folio: None,
            issued_at,
            payment_form: None,
            payment_conditions: None,
            currency: "MXN".to_string(),
            exchange_rate: None,
            document_type: DocumentType::Income,
            payment_method: None,
            expedition_place: expedition_place.into(),
            confirmation: None,
            related: None,
            issuer: None,
            recipient: None,
            items: Vec::new(),
            decimals: None,
        }
    }

    pub fn series(mut self, series: impl Into<String>) -> Self {
        self.series = Some(series.into());
        self
    }

    pub fn folio(mut self, folio: impl Into<String>) -> Self {
        self.folio = Some(folio.into());
        self
    }

    /// Take `Serie` and `Folio` from a sequence.
    pub fn folio_from(mut self, sequence: &mut FolioSequence) -> Self {
        let next = sequence.next_folio();
        self.series = Some(next.series);
        self.folio = Some(next.folio);
        self
    }

    pub fn payment_form(mut self, code: impl Into<String>) -> Self {
        self.payment_form = Some(code.into());
        self
    }

    pub fn payment_conditions(mut self, conditions: impl Into<String>) -> Self {
        self.payment_conditions = Some(conditions.into());
        self
    }

    pub fn payment_method(mut self, code: impl Into<String>) -> Self {
        self.payment_method = Some(code.into());
        self
    }

    pub fn currency(mut self, code: impl Into<String>) -> Self {
        self.currency = code.into();
        self
    }

    pub fn exchange_rate(mut self, rate: Decimal) -> Self {
        self.exchange_rate = Some(rate);
        self
    }

    /// Minor-unit places for derived amounts. Defaults to the ISO 4217
    /// exponent of the currency.
    pub fn decimals(mut self, places: u32) -> Self {
        self.decimals = Some(places);
        self
    }

    pub fn document_type(mut self, document_type: DocumentType) -> Self {
        self.document_type = document_type;
        self
    }

    pub fn confirmation(mut self, key: impl Into<String>) -> Self {
        self.confirmation = Some(key.into());
        self
    }

    pub fn related<I, S>(mut self, relation_type: impl Into<String>, uuids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.related = Some(RelatedDocuments {
            relation_type: relation_type.into(),
            uuids: uuids.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn issuer(mut self, issuer: Issuer) -> Self {
        self.issuer = Some(issuer);
        self
    }

    pub fn recipient(mut self, recipient: Recipient) -> Self {
        self.recipient = Some(recipient);
        self
    }

    pub fn add_item(mut self, item: LineItemBuilder) -> Self {
        self.items.push(item);
        self
    }

    /// Build the invoice, calculating every derived amount.
    ///
    /// Sub-second precision of the issue date is dropped.
    pub fn build(self) -> Result<Invoice, CfdiError> {
        let issuer = self
            .issuer
            .ok_or_else(|| CfdiError::Builder("issuer is required".into()))?;
        let recipient = self
            .recipient
            .ok_or_else(|| CfdiError::Builder("recipient is required".into()))?;

        if self.items.is_empty() {
            return Err(CfdiError::Builder("at least one item is required".into()));
        }
        if self.items.len() > 10_000 {
            return Err(CfdiError::Builder(
                "invoice cannot have more than 10,000 items".into(),
            ));
        }

        let dp = self
            .decimals
            .unwrap_or_else(|| currencies::minor_units(&self.currency));
        let issued_at = self.issued_at.with_nanosecond(0).unwrap_or(self.issued_at);

        let mut invoice = Invoice {
            version: CFDI_VERSION.to_string(),
            series: self.series,
            folio: self.folio,
            issued_at,
            payment_form: self.payment_form,
            payment_conditions: self.payment_conditions,
            subtotal: Decimal::ZERO,
            discount: None,
            currency: self.currency,
            exchange_rate: self.exchange_rate,
            total: Decimal::ZERO,
            document_type: self.document_type,
            payment_method: self.payment_method,
            expedition_place: self.expedition_place,
            confirmation: self.confirmation,
            related: self.related,
            issuer,
            recipient,
            items: self
                .items
                .into_iter()
                .map(|i| i.decimals(dp).build())
                .collect::<Result<_, _>>()?,
            taxes: None,
        };

        validation::calculate_totals(&mut invoice, dp)?;
        Ok(invoice)
    }
}

/// Builder for `cfdi:Emisor`.
pub struct IssuerBuilder {
    rfc: String,
    name: Option<String>,
    tax_regime: String,
}

impl IssuerBuilder {
    pub fn new(rfc: impl Into<String>, tax_regime: impl Into<String>) -> Self {
        Self {
            rfc: rfc.into(),
            name: None,
            tax_regime: tax_regime.into(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn build(self) -> Issuer {
        Issuer {
            rfc: self.rfc,
            name: self.name,
            tax_regime: self.tax_regime,
        }
    }
}

/// Builder for `cfdi:Receptor`.
pub struct RecipientBuilder {
    rfc: String,
    name: Option<String>,
    tax_residence: Option<String>,
    foreign_tax_id: Option<String>,
    cfdi_use: String,
}

impl RecipientBuilder {
    pub fn new(rfc: impl Into<String>, cfdi_use: impl Into<String>) -> Self {
        Self {
            rfc: rfc.into(),
            name: None,
            tax_residence: None,
            foreign_tax_id: None,
            cfdi_use: cfdi_use.into(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Foreign recipient: country of tax residence plus foreign tax id.
    pub fn foreign(mut self, country: impl Into<String>, tax_id: impl Into<String>) -> Self {
        self.tax_residence = Some(country.into());
        self.foreign_tax_id = Some(tax_id.into());
        self
    }

    pub fn build(self) -> Recipient {
        Recipient {
            rfc: self.rfc,
            name: self.name,
            tax_residence: self.tax_residence,
            foreign_tax_id: self.foreign_tax_id,
            cfdi_use: self.cfdi_use,
        }
    }
}

enum PendingTax {
    Transferred(String, FactorType, Option<Decimal>),
    Withheld(String, Decimal),
}

/// Builder for `cfdi:Concepto`.
///
/// Taxes added through the rate helpers take the item amount minus its
/// discount as their base. Explicit [`TaxLine`]s are kept as given.
pub struct LineItemBuilder {
    product_code: String,
    sku: Option<String>,
    quantity: Decimal,
    unit_code: String,
    unit: Option<String>,
    description: String,
    unit_value: Decimal,
    discount: Option<Decimal>,
    pending: Vec<PendingTax>,
    transferred: Vec<TaxLine>,
    withheld: Vec<TaxLine>,
    customs: Vec<String>,
    property_account: Option<String>,
    complements: Vec<XmlNode>,
    decimals: u32,
}

impl LineItemBuilder {
    pub fn new(
        product_code: impl Into<String>,
        quantity: Decimal,
        unit_code: impl Into<String>,
        description: impl Into<String>,
        unit_value: Decimal,
    ) -> Self {
        Self {
            product_code: product_code.into(),
            sku: None,
            quantity,
            unit_code: unit_code.into(),
            unit: None,
            description: description.into(),
            unit_value,
            discount: None,
            pending: Vec::new(),
            transferred: Vec::new(),
            withheld: Vec::new(),
            customs: Vec::new(),
            property_account: None,
            complements: Vec::new(),
            decimals: currencies::DEFAULT_MINOR_UNITS,
        }
    }

    pub fn sku(mut self, sku: impl Into<String>) -> Self {
        self.sku = Some(sku.into());
        self
    }

    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn discount(mut self, discount: Decimal) -> Self {
        self.discount = Some(discount);
        self
    }

    /// Transferred tax at a percentage rate (`Tasa`), e.g. IVA 0.16.
    pub fn transferred_rate(mut self, tax: impl Into<String>, rate: Decimal) -> Self {
        self.pending
            .push(PendingTax::Transferred(tax.into(), FactorType::Tasa, Some(rate)));
        self
    }

    /// Transferred tax at a fixed quota (`Cuota`), e.g. IEPS on fuel.
    pub fn transferred_quota(mut self, tax: impl Into<String>, quota: Decimal) -> Self {
        self.pending
            .push(PendingTax::Transferred(tax.into(), FactorType::Cuota, Some(quota)));
        self
    }

    /// Exempt transfer (`Exento`): base only, no rate or amount.
    pub fn transferred_exempt(mut self, tax: impl Into<String>) -> Self {
        self.pending
            .push(PendingTax::Transferred(tax.into(), FactorType::Exento, None));
        self
    }

    /// Withheld tax at a percentage rate, e.g. ISR 0.10.
    pub fn withheld_rate(mut self, tax: impl Into<String>, rate: Decimal) -> Self {
        self.pending.push(PendingTax::Withheld(tax.into(), rate));
        self
    }

    pub fn transferred(mut self, line: TaxLine) -> Self {
        self.transferred.push(line);
        self
    }

    pub fn withheld(mut self, line: TaxLine) -> Self {
        self.withheld.push(line);
        self
    }

    /// Customs declaration number (`NumeroPedimento`) for imported goods.
    pub fn customs(mut self, number: impl Into<String>) -> Self {
        self.customs.push(number.into());
        self
    }

    pub fn property_account(mut self, number: impl Into<String>) -> Self {
        self.property_account = Some(number.into());
        self
    }

    /// Item complement, written under `cfdi:ComplementoConcepto`.
    pub fn complement(mut self, node: XmlNode) -> Self {
        self.complements.push(node);
        self
    }

    /// Minor-unit places used for the tax base. [`InvoiceBuilder`] sets this
    /// from the invoice currency.
    pub fn decimals(mut self, places: u32) -> Self {
        self.decimals = places;
        self
    }

    /// Build the item. Amounts are left to
    /// [`calculate_totals`](super::calculate_totals).
    pub fn build(self) -> Result<LineItem, CfdiError> {
        let out_of_range = || {
            CfdiError::Builder(format!(
                "item '{}' exceeds the decimal range",
                self.description
            ))
        };
        let amount = self
            .quantity
            .checked_mul(self.unit_value)
            .map(|v| round_half_up(v, self.decimals))
            .ok_or_else(out_of_range)?;
        let base = amount
            .checked_sub(self.discount.unwrap_or(Decimal::ZERO))
            .ok_or_else(out_of_range)?;

        let mut transferred = Vec::new();
        let mut withheld = Vec::new();
        for tax in self.pending {
            match tax {
                PendingTax::Transferred(tax, factor, rate) => transferred.push(TaxLine {
                    base,
                    tax,
                    factor,
                    rate,
                    amount: None,
                }),
                PendingTax::Withheld(tax, rate) => withheld.push(TaxLine {
                    base,
                    tax,
                    factor: FactorType::Tasa,
                    rate: Some(rate),
                    amount: None,
                }),
            }
        }
        transferred.extend(self.transferred);
        withheld.extend(self.withheld);

        Ok(LineItem {
            product_code: self.product_code,
            sku: self.sku,
            quantity: self.quantity,
            unit_code: self.unit_code,
            unit: self.unit,
            description: self.description,
            unit_value: self.unit_value,
            amount,
            discount: self.discount,
            taxes: ItemTaxes {
                transferred,
                withheld,
            },
            customs: self.customs,
            property_account: self.property_account,
            complements: self.complements,
        })
    }
}
