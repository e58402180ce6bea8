//! Cadena original: the pipe-delimited canonical form of a CFDI that the
//! issuer signs.
//!
//! The sequence follows SAT's `cadenaoriginal_3_3` transformation:
//! attributes in schema order, absent optional attributes skipped, every
//! value whitespace-normalised, the whole string framed by `||`.
//! Complements and addenda never contribute.
//!
//! [`CadenaOriginal`] can only be produced from a [`ValidatedInvoice`] or
//! from a sealed [`Cfdi`], so signing input always comes from checked or
//! already-signed content.

use rust_decimal::Decimal;

use crate::core::{
    CfdiError, Cfdi, Invoice, TaxLine, TimbreFiscalDigital, ValidatedInvoice,
};

/// Date format of `Fecha` and `FechaTimbrado`.
pub(crate) const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// The canonical string that is hashed and signed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CadenaOriginal(String);

impl CadenaOriginal {
    /// Cadena original of a sealed document, using the `NoCertificado`
    /// it carries. Decimals keep the scale they were read or issued with.
    pub fn of_sealed(cfdi: &Cfdi) -> Result<Self, CfdiError> {
        let seal = cfdi.seal().ok_or_else(|| {
            CfdiError::CanonicalizationPrecondition(
                "document carries no seal; canonicalize the validated invoice instead".into(),
            )
        })?;
        Ok(render(cfdi.invoice(), &seal.certificate_number))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// UTF-8 bytes fed to the signature.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for CadenaOriginal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<[u8]> for CadenaOriginal {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

/// Cadena original of a validated invoice about to be sealed with the
/// certificate numbered `certificate_number`.
///
/// Pure: the same input always yields the same bytes.
pub fn canonicalize(invoice: &ValidatedInvoice, certificate_number: &str) -> CadenaOriginal {
    render(invoice.invoice(), certificate_number)
}

impl TimbreFiscalDigital {
    /// `||Version|UUID|FechaTimbrado|RfcProvCertif|Leyenda|SelloCFD|NoCertificadoSAT||`,
    /// the string SAT signs into `SelloSAT`.
    pub fn cadena_original(&self) -> CadenaOriginal {
        let mut out = Pipes::new();
        out.required(&self.version);
        out.required(&self.uuid);
        out.required(&self.stamped_at.format(DATE_FORMAT).to_string());
        out.required(&self.provider_rfc);
        out.optional(self.legend.as_deref());
        out.required(&self.cfd_seal);
        out.required(&self.sat_certificate_number);
        out.finish()
    }
}

struct Pipes(String);

impl Pipes {
    fn new() -> Self {
        Self(String::from("|"))
    }

    fn required(&mut self, value: &str) {
        self.0.push('|');
        let mut words = value
            .split([' ', '\t', '\n', '\r'])
            .filter(|w| !w.is_empty());
        if let Some(first) = words.next() {
            self.0.push_str(first);
            for word in words {
                self.0.push(' ');
                self.0.push_str(word);
            }
        }
    }

    fn optional(&mut self, value: Option<&str>) {
        if let Some(value) = value {
            self.required(value);
        }
    }

    fn decimal(&mut self, value: Decimal) {
        self.required(&value.to_string());
    }

    fn optional_decimal(&mut self, value: Option<Decimal>) {
        if let Some(value) = value {
            self.decimal(value);
        }
    }

    fn tax_line(&mut self, line: &TaxLine) {
        self.decimal(line.base);
        self.required(&line.tax);
        self.required(line.factor.code());
        self.optional_decimal(line.rate);
        self.optional_decimal(line.amount);
    }

    fn finish(mut self) -> CadenaOriginal {
        self.0.push_str("||");
        CadenaOriginal(self.0)
    }
}

fn render(invoice: &Invoice, certificate_number: &str) -> CadenaOriginal {
    let mut out = Pipes::new();

    out.required(&invoice.version);
    out.optional(invoice.series.as_deref());
    out.optional(invoice.folio.as_deref());
    out.required(&invoice.issued_at.format(DATE_FORMAT).to_string());
    out.optional(invoice.payment_form.as_deref());
    out.required(certificate_number);
    out.optional(invoice.payment_conditions.as_deref());
    out.decimal(invoice.subtotal);
    out.optional_decimal(invoice.discount);
    out.required(&invoice.currency);
    out.optional_decimal(invoice.exchange_rate);
    out.decimal(invoice.total);
    out.required(invoice.document_type.code());
    out.optional(invoice.payment_method.as_deref());
    out.required(&invoice.expedition_place);
    out.optional(invoice.confirmation.as_deref());

    if let Some(related) = &invoice.related {
        out.required(&related.relation_type);
        for uuid in &related.uuids {
            out.required(uuid);
        }
    }

    let issuer = &invoice.issuer;
    out.required(&issuer.rfc);
    out.optional(issuer.name.as_deref());
    out.required(&issuer.tax_regime);

    let recipient = &invoice.recipient;
    out.required(&recipient.rfc);
    out.optional(recipient.name.as_deref());
    out.optional(recipient.tax_residence.as_deref());
    out.optional(recipient.foreign_tax_id.as_deref());
    out.required(&recipient.cfdi_use);

    for item in &invoice.items {
        out.required(&item.product_code);
        out.optional(item.sku.as_deref());
        out.decimal(item.quantity);
        out.required(&item.unit_code);
        out.optional(item.unit.as_deref());
        out.required(&item.description);
        out.decimal(item.unit_value);
        out.decimal(item.amount);
        out.optional_decimal(item.discount);
        for line in &item.taxes.transferred {
            out.tax_line(line);
        }
        for line in &item.taxes.withheld {
            out.tax_line(line);
        }
        for number in &item.customs {
            out.required(number);
        }
        out.optional(item.property_account.as_deref());
    }

    if let Some(taxes) = &invoice.taxes {
        for w in &taxes.withheld {
            out.required(&w.tax);
            out.decimal(w.amount);
        }
        out.optional_decimal(taxes.total_withheld);
        for t in &taxes.transferred {
            out.required(&t.tax);
            out.required(t.factor.code());
            out.decimal(t.rate);
            out.decimal(t.amount);
        }
        out.optional_decimal(taxes.total_transferred);
    }

    out.finish()
}
