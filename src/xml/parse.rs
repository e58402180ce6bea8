use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::NaiveDateTime;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use rust_decimal::Decimal;

use crate::cadena::DATE_FORMAT;
use crate::core::*;

/// Parse a CFDI 3.3 document.
///
/// All-or-nothing: any malformed element or attribute fails the whole
/// document with [`CfdiError::Parse`], carrying the byte offset of the
/// offending element.
pub fn from_xml(xml: &str) -> Result<Cfdi, CfdiError> {
    let root = read_tree(xml)?;
    into_cfdi(&root)
}

/// Parse a CFDI from raw bytes, which must be UTF-8.
pub fn from_xml_bytes(bytes: &[u8]) -> Result<Cfdi, CfdiError> {
    let xml = std::str::from_utf8(bytes).map_err(|e| CfdiError::Parse {
        position: e.valid_up_to() as u64,
        message: format!("document is not valid UTF-8: {e}"),
    })?;
    from_xml(xml)
}

fn parse_err(position: u64, message: impl Into<String>) -> CfdiError {
    CfdiError::Parse {
        position,
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// Element tree
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Element {
    name: String,
    attrs: Vec<(String, String)>,
    children: Vec<Element>,
    text: Option<String>,
    position: u64,
}

impl Element {
    fn local(&self) -> &str {
        local_name(&self.name)
    }

    fn prefix(&self) -> Option<&str> {
        self.name.split_once(':').map(|(p, _)| p)
    }

    fn err(&self, message: impl std::fmt::Display) -> CfdiError {
        parse_err(self.position, format!("{}: {message}", self.name))
    }

    fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn opt(&self, key: &str) -> Option<String> {
        self.attr(key).map(str::to_string)
    }

    fn required(&self, key: &str) -> Result<String, CfdiError> {
        self.opt(key)
            .ok_or_else(|| self.err(format!("missing attribute {key}")))
    }

    fn opt_decimal(&self, key: &str) -> Result<Option<Decimal>, CfdiError> {
        self.attr(key)
            .map(|v| {
                Decimal::from_str(v)
                    .map_err(|e| self.err(format!("attribute {key}='{v}' is not a decimal: {e}")))
            })
            .transpose()
    }

    fn decimal(&self, key: &str) -> Result<Decimal, CfdiError> {
        self.opt_decimal(key)?
            .ok_or_else(|| self.err(format!("missing attribute {key}")))
    }

    fn date(&self, key: &str) -> Result<NaiveDateTime, CfdiError> {
        let value = self.required(key)?;
        NaiveDateTime::parse_from_str(&value, DATE_FORMAT)
            .map_err(|e| self.err(format!("attribute {key}='{value}' is not a date: {e}")))
    }

    fn factor(&self) -> Result<FactorType, CfdiError> {
        let code = self.required("TipoFactor")?;
        FactorType::from_code(&code)
            .ok_or_else(|| self.err(format!("unknown TipoFactor '{code}'")))
    }

    fn child(&self, local: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.local() == local)
    }

    fn children_named<'a>(&'a self, local: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.local() == local)
    }

    /// Reject children outside `allowed`.
    fn only(&self, allowed: &[&str]) -> Result<(), CfdiError> {
        match self.children.iter().find(|c| !allowed.contains(&c.local())) {
            Some(c) => Err(c.err("unexpected element")),
            None => Ok(()),
        }
    }
}

fn local_name(name: &str) -> &str {
    name.split_once(':').map_or(name, |(_, local)| local)
}

fn position(reader: &Reader<&[u8]>) -> u64 {
    reader.buffer_position() as u64
}

fn start_element(e: &BytesStart<'_>, position: u64) -> Result<Element, CfdiError> {
    let name = std::str::from_utf8(e.name().as_ref())
        .map_err(|err| parse_err(position, format!("element name is not UTF-8: {err}")))?
        .to_string();
    let mut attrs = Vec::new();
    for attr in e.attributes() {
        let attr =
            attr.map_err(|err| parse_err(position, format!("{name}: malformed attribute: {err}")))?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(|err| parse_err(position, format!("{name}: attribute name: {err}")))?
            .to_string();
        let value = attr
            .unescape_value()
            .map_err(|err| parse_err(position, format!("{name}: attribute {key}: {err}")))?
            .into_owned();
        attrs.push((key, value));
    }
    Ok(Element {
        name,
        attrs,
        children: Vec::new(),
        text: None,
        position,
    })
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), CfdiError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_some() => {
            return Err(element.err("document has more than one root element"));
        }
        None => *root = Some(element),
    }
    Ok(())
}

fn push_text(stack: &mut [Element], text: &str, position: u64) -> Result<(), CfdiError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(());
    }
    match stack.last_mut() {
        Some(top) => {
            top.text.get_or_insert_with(String::new).push_str(text);
            Ok(())
        }
        None => Err(parse_err(position, "text outside the root element")),
    }
}

fn read_tree(xml: &str) -> Result<Element, CfdiError> {
    // Whitespace stays in the event stream so each event starts where the
    // previous one ended; `push_text` drops the blank runs.
    let mut reader = Reader::from_str(xml);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let at = position(&reader);
        match reader.read_event() {
            Ok(Event::Start(ref e)) => stack.push(start_element(e, at)?),
            Ok(Event::Empty(ref e)) => {
                let element = start_element(e, at)?;
                attach(&mut stack, &mut root, element)?;
            }
            Ok(Event::End(_)) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| parse_err(at, "closing tag without opening tag"))?;
                attach(&mut stack, &mut root, element)?;
            }
            Ok(Event::Text(ref e)) => {
                let text = e
                    .unescape()
                    .map_err(|err| parse_err(at, format!("malformed text: {err}")))?;
                push_text(&mut stack, &text, at)?;
            }
            Ok(Event::CData(e)) => {
                let text = String::from_utf8(e.into_inner().into_owned())
                    .map_err(|err| parse_err(at, format!("CDATA is not UTF-8: {err}")))?;
                push_text(&mut stack, &text, at)?;
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(parse_err(
                    reader.error_position() as u64,
                    format!("malformed XML: {e}"),
                ));
            }
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(open.err("element is never closed"));
    }
    root.ok_or_else(|| parse_err(0, "document has no root element"))
}

// ---------------------------------------------------------------------------
// Tree to model
// ---------------------------------------------------------------------------

const COMPROBANTE_CHILDREN: &[&str] = &[
    "CfdiRelacionados",
    "Emisor",
    "Receptor",
    "Conceptos",
    "Impuestos",
    "Complemento",
    "Addenda",
];

fn into_cfdi(root: &Element) -> Result<Cfdi, CfdiError> {
    if root.local() != "Comprobante" {
        return Err(root.err("root element must be Comprobante"));
    }
    let version = root.required("Version")?;
    if version != CFDI_VERSION {
        return Err(root.err(format!("unsupported version '{version}'")));
    }
    root.only(COMPROBANTE_CHILDREN)?;

    let document_type = {
        let code = root.required("TipoDeComprobante")?;
        DocumentType::from_code(&code)
            .ok_or_else(|| root.err(format!("unknown TipoDeComprobante '{code}'")))?
    };

    let seal = match (
        root.opt("Sello"),
        root.opt("NoCertificado"),
        root.opt("Certificado"),
    ) {
        (Some(signature), Some(certificate_number), Some(certificate)) => Some(Seal {
            certificate_number,
            certificate,
            signature,
        }),
        (None, None, None) => None,
        _ => {
            return Err(root.err(
                "Sello, NoCertificado and Certificado must be present together",
            ));
        }
    };

    let issuer = root
        .child("Emisor")
        .ok_or_else(|| root.err("missing cfdi:Emisor"))?;
    let recipient = root
        .child("Receptor")
        .ok_or_else(|| root.err("missing cfdi:Receptor"))?;
    let items = root
        .child("Conceptos")
        .ok_or_else(|| root.err("missing cfdi:Conceptos"))?;
    items.only(&["Concepto"])?;

    let invoice = Invoice {
        version,
        series: root.opt("Serie"),
        folio: root.opt("Folio"),
        issued_at: root.date("Fecha")?,
        payment_form: root.opt("FormaPago"),
        payment_conditions: root.opt("CondicionesDePago"),
        subtotal: root.decimal("SubTotal")?,
        discount: root.opt_decimal("Descuento")?,
        currency: root.required("Moneda")?,
        exchange_rate: root.opt_decimal("TipoCambio")?,
        total: root.decimal("Total")?,
        document_type,
        payment_method: root.opt("MetodoPago"),
        expedition_place: root.required("LugarExpedicion")?,
        confirmation: root.opt("Confirmacion"),
        related: root.child("CfdiRelacionados").map(parse_related).transpose()?,
        issuer: Issuer {
            rfc: issuer.required("Rfc")?,
            name: issuer.opt("Nombre"),
            tax_regime: issuer.required("RegimenFiscal")?,
        },
        recipient: Recipient {
            rfc: recipient.required("Rfc")?,
            name: recipient.opt("Nombre"),
            tax_residence: recipient.opt("ResidenciaFiscal"),
            foreign_tax_id: recipient.opt("NumRegIdTrib"),
            cfdi_use: recipient.required("UsoCFDI")?,
        },
        items: items
            .children_named("Concepto")
            .map(|item| parse_item(item, root))
            .collect::<Result<_, _>>()?,
        taxes: root.child("Impuestos").map(parse_summary).transpose()?,
    };

    let complements = match root.child("Complemento") {
        Some(c) => c
            .children
            .iter()
            .map(|child| parse_complement(child, root))
            .collect::<Result<_, _>>()?,
        None => Vec::new(),
    };
    let addenda = match root.child("Addenda") {
        Some(a) => a.children.iter().map(|n| opaque(n, root)).collect(),
        None => Vec::new(),
    };

    Ok(Cfdi::received(invoice, seal, complements, addenda))
}

fn parse_related(el: &Element) -> Result<RelatedDocuments, CfdiError> {
    el.only(&["CfdiRelacionado"])?;
    Ok(RelatedDocuments {
        relation_type: el.required("TipoRelacion")?,
        uuids: el
            .children_named("CfdiRelacionado")
            .map(|c| c.required("UUID"))
            .collect::<Result<_, _>>()?,
    })
}

fn parse_item(el: &Element, root: &Element) -> Result<LineItem, CfdiError> {
    el.only(&[
        "Impuestos",
        "InformacionAduanera",
        "CuentaPredial",
        "ComplementoConcepto",
    ])?;

    let mut taxes = ItemTaxes::default();
    if let Some(imp) = el.child("Impuestos") {
        imp.only(&["Traslados", "Retenciones"])?;
        if let Some(t) = imp.child("Traslados") {
            t.only(&["Traslado"])?;
            taxes.transferred = t
                .children_named("Traslado")
                .map(parse_tax_line)
                .collect::<Result<_, _>>()?;
        }
        if let Some(r) = imp.child("Retenciones") {
            r.only(&["Retencion"])?;
            taxes.withheld = r
                .children_named("Retencion")
                .map(parse_tax_line)
                .collect::<Result<_, _>>()?;
        }
    }

    Ok(LineItem {
        product_code: el.required("ClaveProdServ")?,
        sku: el.opt("NoIdentificacion"),
        quantity: el.decimal("Cantidad")?,
        unit_code: el.required("ClaveUnidad")?,
        unit: el.opt("Unidad"),
        description: el.required("Descripcion")?,
        unit_value: el.decimal("ValorUnitario")?,
        amount: el.decimal("Importe")?,
        discount: el.opt_decimal("Descuento")?,
        taxes,
        customs: el
            .children_named("InformacionAduanera")
            .map(|c| c.required("NumeroPedimento"))
            .collect::<Result<_, _>>()?,
        property_account: el
            .child("CuentaPredial")
            .map(|c| c.required("Numero"))
            .transpose()?,
        complements: el
            .children_named("ComplementoConcepto")
            .flat_map(|c| c.children.iter())
            .map(|c| opaque(c, root))
            .collect(),
    })
}

fn parse_tax_line(el: &Element) -> Result<TaxLine, CfdiError> {
    Ok(TaxLine {
        base: el.decimal("Base")?,
        tax: el.required("Impuesto")?,
        factor: el.factor()?,
        rate: el.opt_decimal("TasaOCuota")?,
        amount: el.opt_decimal("Importe")?,
    })
}

fn parse_summary(el: &Element) -> Result<TaxSummary, CfdiError> {
    el.only(&["Retenciones", "Traslados"])?;
    let mut summary = TaxSummary {
        total_withheld: el.opt_decimal("TotalImpuestosRetenidos")?,
        total_transferred: el.opt_decimal("TotalImpuestosTrasladados")?,
        ..TaxSummary::default()
    };
    if let Some(r) = el.child("Retenciones") {
        r.only(&["Retencion"])?;
        summary.withheld = r
            .children_named("Retencion")
            .map(|c| -> Result<WithheldTax, CfdiError> {
                Ok(WithheldTax {
                    tax: c.required("Impuesto")?,
                    amount: c.decimal("Importe")?,
                })
            })
            .collect::<Result<_, _>>()?;
    }
    if let Some(t) = el.child("Traslados") {
        t.only(&["Traslado"])?;
        summary.transferred = t
            .children_named("Traslado")
            .map(|c| -> Result<TransferredTax, CfdiError> {
                Ok(TransferredTax {
                    tax: c.required("Impuesto")?,
                    factor: c.factor()?,
                    rate: c.decimal("TasaOCuota")?,
                    amount: c.decimal("Importe")?,
                })
            })
            .collect::<Result<_, _>>()?;
    }
    Ok(summary)
}

fn parse_complement(el: &Element, root: &Element) -> Result<Complement, CfdiError> {
    if el.local() != "TimbreFiscalDigital" {
        return Ok(Complement::Opaque(opaque(el, root)));
    }
    Ok(Complement::Stamp(TimbreFiscalDigital {
        version: el.required("Version")?,
        uuid: el.required("UUID")?,
        stamped_at: el.date("FechaTimbrado")?,
        provider_rfc: el.required("RfcProvCertif")?,
        legend: el.opt("Leyenda"),
        cfd_seal: el.required("SelloCFD")?,
        sat_certificate_number: el.required("NoCertificadoSAT")?,
        sat_seal: el.required("SelloSAT")?,
    }))
}

/// Copy an element verbatim. Namespace prefixes the subtree uses but does
/// not declare are declared on the copy from the root's declarations, so the
/// node stays self-contained when written elsewhere.
fn opaque(el: &Element, root: &Element) -> XmlNode {
    let mut node = to_node(el);

    let mut used = BTreeSet::new();
    collect_prefixes(el, &mut used);
    let mut declared: Vec<(String, String)> = Vec::new();
    for prefix in used {
        let key = format!("xmlns:{prefix}");
        if matches!(prefix.as_str(), "xml" | "xmlns" | "cfdi" | "xsi") || el.attr(&key).is_some() {
            continue;
        }
        if let Some(uri) = root.attr(&key) {
            declared.push((key, uri.to_string()));
        }
    }
    declared.extend(node.attributes);
    node.attributes = declared;
    node
}

fn to_node(el: &Element) -> XmlNode {
    let mut node = XmlNode::new(el.name.clone());
    node.attributes = el.attrs.clone();
    node.children = el.children.iter().map(to_node).collect();
    match &el.text {
        Some(text) => node.text(text.clone()),
        None => node,
    }
}

fn collect_prefixes(el: &Element, used: &mut BTreeSet<String>) {
    if let Some(prefix) = el.prefix() {
        used.insert(prefix.to_string());
    }
    for (key, _) in &el.attrs {
        if let Some((prefix, _)) = key.split_once(':') {
            if prefix != "xmlns" {
                used.insert(prefix.to_string());
            }
        }
    }
    for child in &el.children {
        collect_prefixes(child, used);
    }
}
