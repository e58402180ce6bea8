use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::document::XmlNode;

/// Schema version written to `Comprobante/@Version`.
pub const CFDI_VERSION: &str = "3.3";

/// `cfdi:Comprobante`: the business content of a CFDI 3.3 invoice.
///
/// The seal attributes (`Sello`, `NoCertificado`, `Certificado`) are not
/// part of this struct; they live on [`Cfdi`](super::Cfdi) once the invoice
/// has been sealed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    /// `Version`: always "3.3".
    pub version: String,
    /// `Serie`: issuer's internal series.
    pub series: Option<String>,
    /// `Folio`: issuer's internal folio.
    pub folio: Option<String>,
    /// `Fecha`: local issue date and time, second precision.
    pub issued_at: NaiveDateTime,
    /// `FormaPago` (c_FormaPago).
    pub payment_form: Option<String>,
    /// `CondicionesDePago`: free-text commercial payment terms.
    pub payment_conditions: Option<String>,
    /// `SubTotal`: sum of item amounts before discounts and taxes.
    pub subtotal: Decimal,
    /// `Descuento`: sum of item discounts.
    pub discount: Option<Decimal>,
    /// `Moneda` (c_Moneda, ISO 4217).
    pub currency: String,
    /// `TipoCambio`: exchange rate to MXN.
    pub exchange_rate: Option<Decimal>,
    /// `Total`.
    pub total: Decimal,
    /// `TipoDeComprobante`.
    pub document_type: DocumentType,
    /// `MetodoPago` (c_MetodoPago, e.g. "PUE", "PPD").
    pub payment_method: Option<String>,
    /// `LugarExpedicion`: postal code of the place of issue.
    pub expedition_place: String,
    /// `Confirmacion`: PAC confirmation key for out-of-range amounts.
    pub confirmation: Option<String>,
    /// `cfdi:CfdiRelacionados`.
    pub related: Option<RelatedDocuments>,
    /// `cfdi:Emisor`.
    pub issuer: Issuer,
    /// `cfdi:Receptor`.
    pub recipient: Recipient,
    /// `cfdi:Conceptos/cfdi:Concepto`.
    pub items: Vec<LineItem>,
    /// `cfdi:Impuestos`: document-level tax summary.
    pub taxes: Option<TaxSummary>,
}

/// `cfdi:Emisor`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issuer {
    /// `Rfc`: Mexican taxpayer registry key.
    pub rfc: String,
    /// `Nombre`: legal name.
    pub name: Option<String>,
    /// `RegimenFiscal` (c_RegimenFiscal).
    pub tax_regime: String,
}

/// `cfdi:Receptor`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    /// `Rfc`.
    pub rfc: String,
    /// `Nombre`.
    pub name: Option<String>,
    /// `ResidenciaFiscal` (c_Pais, ISO 3166-1 alpha-3) for foreign recipients.
    pub tax_residence: Option<String>,
    /// `NumRegIdTrib`: foreign tax identifier.
    pub foreign_tax_id: Option<String>,
    /// `UsoCFDI` (c_UsoCFDI).
    pub cfdi_use: String,
}

/// `cfdi:Concepto`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    /// `ClaveProdServ` (c_ClaveProdServ).
    pub product_code: String,
    /// `NoIdentificacion`: issuer's SKU or part number.
    pub sku: Option<String>,
    /// `Cantidad`.
    pub quantity: Decimal,
    /// `ClaveUnidad` (c_ClaveUnidad).
    pub unit_code: String,
    /// `Unidad`: issuer's own unit label.
    pub unit: Option<String>,
    /// `Descripcion`.
    pub description: String,
    /// `ValorUnitario`.
    pub unit_value: Decimal,
    /// `Importe` = Cantidad × ValorUnitario.
    pub amount: Decimal,
    /// `Descuento`.
    pub discount: Option<Decimal>,
    /// `cfdi:Impuestos` of the item.
    pub taxes: ItemTaxes,
    /// `cfdi:InformacionAduanera/@NumeroPedimento`.
    pub customs: Vec<String>,
    /// `cfdi:CuentaPredial/@Numero`.
    pub property_account: Option<String>,
    /// Children of `cfdi:ComplementoConcepto`, kept as-is. They take no
    /// part in the cadena original.
    #[serde(default)]
    pub complements: Vec<XmlNode>,
}

/// Item-level taxes. One ordered sequence per kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemTaxes {
    /// `cfdi:Traslados/cfdi:Traslado`.
    pub transferred: Vec<TaxLine>,
    /// `cfdi:Retenciones/cfdi:Retencion`.
    pub withheld: Vec<TaxLine>,
}

impl ItemTaxes {
    pub fn is_empty(&self) -> bool {
        self.transferred.is_empty() && self.withheld.is_empty()
    }
}

/// Item-level `Traslado` or `Retencion`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxLine {
    /// `Base`.
    pub base: Decimal,
    /// `Impuesto` (c_Impuesto: "001" ISR, "002" IVA, "003" IEPS).
    pub tax: String,
    /// `TipoFactor`.
    pub factor: FactorType,
    /// `TasaOCuota`: required unless the factor is `Exento`.
    pub rate: Option<Decimal>,
    /// `Importe`: required unless the factor is `Exento`.
    pub amount: Option<Decimal>,
}

/// c_TipoFactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FactorType {
    /// Percentage applied to the base.
    Tasa,
    /// Fixed quota.
    Cuota,
    /// Exempt; carries neither rate nor amount.
    Exento,
}

impl FactorType {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Tasa => "Tasa",
            Self::Cuota => "Cuota",
            Self::Exento => "Exento",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "Tasa" => Some(Self::Tasa),
            "Cuota" => Some(Self::Cuota),
            "Exento" => Some(Self::Exento),
            _ => None,
        }
    }
}

/// c_TipoDeComprobante.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentType {
    /// I: Ingreso.
    Income,
    /// E: Egreso (credit note).
    Expense,
    /// T: Traslado (transport of goods).
    Transfer,
    /// N: Nómina (payroll).
    Payroll,
    /// P: Pago (payment receipt).
    Payment,
}

impl DocumentType {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Income => "I",
            Self::Expense => "E",
            Self::Transfer => "T",
            Self::Payroll => "N",
            Self::Payment => "P",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "I" => Some(Self::Income),
            "E" => Some(Self::Expense),
            "T" => Some(Self::Transfer),
            "N" => Some(Self::Payroll),
            "P" => Some(Self::Payment),
            _ => None,
        }
    }
}

/// `cfdi:Impuestos` at document level.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaxSummary {
    /// `TotalImpuestosRetenidos`.
    pub total_withheld: Option<Decimal>,
    /// `TotalImpuestosTrasladados`.
    pub total_transferred: Option<Decimal>,
    /// `cfdi:Retenciones/cfdi:Retencion`, grouped by tax.
    pub withheld: Vec<WithheldTax>,
    /// `cfdi:Traslados/cfdi:Traslado`, grouped by (tax, factor, rate).
    pub transferred: Vec<TransferredTax>,
}

/// Document-level `Retencion`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithheldTax {
    /// `Impuesto`.
    pub tax: String,
    /// `Importe`.
    pub amount: Decimal,
}

/// Document-level `Traslado`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferredTax {
    /// `Impuesto`.
    pub tax: String,
    /// `TipoFactor`.
    pub factor: FactorType,
    /// `TasaOCuota`.
    pub rate: Decimal,
    /// `Importe`.
    pub amount: Decimal,
}

/// `cfdi:CfdiRelacionados`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedDocuments {
    /// `TipoRelacion` (c_TipoRelacion).
    pub relation_type: String,
    /// `cfdi:CfdiRelacionado/@UUID`, in document order.
    pub uuids: Vec<String>,
}
