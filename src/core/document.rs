use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::error::CfdiError;
use super::patterns;
use super::types::Invoice;

/// Seal attributes of `cfdi:Comprobante`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seal {
    /// `NoCertificado`: 20-digit serial of the issuer's CSD.
    pub certificate_number: String,
    /// `Certificado`: base64 DER of the issuer's CSD.
    pub certificate: String,
    /// `Sello`: base64 RSA/SHA-256 signature over the cadena original.
    pub signature: String,
}

/// Where a [`Cfdi`] came from. Controls which transitions are allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    /// Wrapped locally without a seal, e.g. for inspection.
    Draft,
    /// Sealed by this process.
    Issued,
    /// Parsed from wire bytes.
    Received,
}

/// A CFDI as it travels on the wire: business content plus seal,
/// complements and addenda.
///
/// Fields are private so a sealed document cannot have its business
/// content changed under the seal. Use [`Cfdi::into_draft`] to get an
/// editable [`Invoice`] back; that drops the seal.
///
/// Deserializing always yields a received document, whatever origin the
/// input names.
#[derive(Debug, Clone, Serialize)]
pub struct Cfdi {
    invoice: Invoice,
    seal: Option<Seal>,
    complements: Vec<Complement>,
    addenda: Vec<XmlNode>,
    origin: Origin,
}

/// Origin is bookkeeping, not document content.
impl PartialEq for Cfdi {
    fn eq(&self, other: &Self) -> bool {
        self.invoice == other.invoice
            && self.seal == other.seal
            && self.complements == other.complements
            && self.addenda == other.addenda
    }
}

impl<'de> Deserialize<'de> for Cfdi {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Stored {
            invoice: Invoice,
            seal: Option<Seal>,
            #[serde(default)]
            complements: Vec<Complement>,
            #[serde(default)]
            addenda: Vec<XmlNode>,
        }

        let stored = Stored::deserialize(deserializer)?;
        Ok(Self::received(
            stored.invoice,
            stored.seal,
            stored.complements,
            stored.addenda,
        ))
    }
}

impl Cfdi {
    /// Wrap an invoice without sealing it.
    pub fn unsealed(invoice: Invoice) -> Self {
        Self {
            invoice,
            seal: None,
            complements: Vec::new(),
            addenda: Vec::new(),
            origin: Origin::Draft,
        }
    }

    pub(crate) fn issued(invoice: Invoice, seal: Seal) -> Self {
        Self {
            invoice,
            seal: Some(seal),
            complements: Vec::new(),
            addenda: Vec::new(),
            origin: Origin::Issued,
        }
    }

    pub(crate) fn received(
        invoice: Invoice,
        seal: Option<Seal>,
        complements: Vec<Complement>,
        addenda: Vec<XmlNode>,
    ) -> Self {
        Self {
            invoice,
            seal,
            complements,
            addenda,
            origin: Origin::Received,
        }
    }

    pub fn invoice(&self) -> &Invoice {
        &self.invoice
    }

    pub fn seal(&self) -> Option<&Seal> {
        self.seal.as_ref()
    }

    pub fn is_sealed(&self) -> bool {
        self.seal.is_some()
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn complements(&self) -> &[Complement] {
        &self.complements
    }

    pub fn addenda(&self) -> &[XmlNode] {
        &self.addenda
    }

    /// The PAC stamp, if one has been attached.
    pub fn stamp(&self) -> Option<&TimbreFiscalDigital> {
        self.complements.iter().find_map(|c| match c {
            Complement::Stamp(tfd) => Some(tfd),
            Complement::Opaque(_) => None,
        })
    }

    /// Append a complement that is not a stamp. Complements do not take part
    /// in the cadena original, so this is allowed on sealed documents.
    pub fn push_complement(&mut self, node: XmlNode) {
        self.complements.push(Complement::Opaque(node));
    }

    /// Append an addendum (issuer extension outside the seal).
    pub fn push_addendum(&mut self, node: XmlNode) {
        self.addenda.push(node);
    }

    /// Attach the stamping provider's `TimbreFiscalDigital`.
    ///
    /// The document must be sealed and must not already carry a stamp. The
    /// stamp's `UUID` must be a hyphenated UUID and its `SelloCFD` must equal
    /// the document's `Sello`.
    pub fn attach_stamp(&mut self, stamp: TimbreFiscalDigital) -> Result<(), CfdiError> {
        if !patterns::is_uuid(&stamp.uuid) {
            return Err(CfdiError::Stamp(format!(
                "stamp UUID '{}' is not a UUID",
                stamp.uuid
            )));
        }
        let Some(seal) = &self.seal else {
            return Err(CfdiError::Stamp(
                "a stamp can only be attached to a sealed document".into(),
            ));
        };
        if self.stamp().is_some() {
            return Err(CfdiError::Stamp("document is already stamped".into()));
        }
        if stamp.cfd_seal != seal.signature {
            return Err(CfdiError::Stamp(
                "SelloCFD of the stamp does not match the document seal".into(),
            ));
        }
        self.complements.push(Complement::Stamp(stamp));
        Ok(())
    }

    /// Give back the editable invoice, dropping seal and stamp.
    ///
    /// Received documents are never reopened: they can be verified but not
    /// re-sealed by this process.
    pub fn into_draft(self) -> Result<Invoice, CfdiError> {
        if self.origin == Origin::Received {
            return Err(CfdiError::Reopen(
                "document was received from the wire and cannot be re-sealed".into(),
            ));
        }
        Ok(self.invoice)
    }
}

/// `cfdi:Complemento` children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Complement {
    /// `tfd:TimbreFiscalDigital` 1.1.
    Stamp(TimbreFiscalDigital),
    /// Any complement this crate does not model, kept verbatim.
    Opaque(XmlNode),
}

/// `tfd:TimbreFiscalDigital` version 1.1, returned by the PAC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimbreFiscalDigital {
    /// `Version`: "1.1".
    pub version: String,
    /// `UUID`: folio fiscal assigned by the PAC.
    pub uuid: String,
    /// `FechaTimbrado`.
    pub stamped_at: NaiveDateTime,
    /// `RfcProvCertif`: RFC of the PAC.
    pub provider_rfc: String,
    /// `Leyenda`.
    pub legend: Option<String>,
    /// `SelloCFD`: copy of the document's `Sello`.
    pub cfd_seal: String,
    /// `NoCertificadoSAT`.
    pub sat_certificate_number: String,
    /// `SelloSAT`: signature over the stamp's cadena original.
    pub sat_seal: String,
}

/// Generic XML element, used for opaque complements and addenda.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct XmlNode {
    /// Qualified element name, e.g. "pago10:Pagos".
    pub name: String,
    /// Attributes in document order, including `xmlns` declarations.
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
    /// Text content, trimmed and never empty. Surrounding whitespace does
    /// not survive the wire, so it is not kept here either.
    #[serde(default, deserialize_with = "trimmed_text")]
    text: Option<String>,
}

impl XmlNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    pub fn child(mut self, node: XmlNode) -> Self {
        self.children.push(node);
        self
    }

    /// Set the text content. Surrounding whitespace is dropped and blank
    /// text clears it.
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = normalize_text(text.into());
        self
    }

    pub fn text_content(&self) -> Option<&str> {
        self.text.as_deref()
    }
}

fn normalize_text(text: String) -> Option<String> {
    let trimmed = text.trim();
    match trimmed.len() {
        0 => None,
        n if n == text.len() => Some(text),
        _ => Some(trimmed.to_string()),
    }
}

fn trimmed_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.and_then(normalize_text))
}
