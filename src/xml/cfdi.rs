use super::writer::{Attrs, XmlWriter};
use super::{CFDI_NS, CFDI_SCHEMA_LOCATION, TFD_NS, TFD_SCHEMA_LOCATION, XSI_NS};
use crate::cadena::DATE_FORMAT;
use crate::core::{Cfdi, CfdiError, Complement, LineItem, TaxLine, TimbreFiscalDigital};

/// Serialize a CFDI to its `cfdi:Comprobante` XML form.
pub fn to_xml(cfdi: &Cfdi) -> Result<String, CfdiError> {
    write_cfdi(cfdi)?.into_string()
}

/// Serialize a CFDI to UTF-8 bytes.
pub fn to_xml_bytes(cfdi: &Cfdi) -> Result<Vec<u8>, CfdiError> {
    Ok(write_cfdi(cfdi)?.into_bytes())
}

fn write_cfdi(cfdi: &Cfdi) -> Result<XmlWriter, CfdiError> {
    let inv = cfdi.invoice();
    let seal = cfdi.seal();
    let mut w = XmlWriter::new()?;

    let mut root = Attrs::new();
    root.set("xmlns:cfdi", CFDI_NS)
        .set("xmlns:xsi", XSI_NS)
        .set("xsi:schemaLocation", CFDI_SCHEMA_LOCATION)
        .set("Version", &inv.version)
        .opt("Serie", inv.series.as_ref())
        .opt("Folio", inv.folio.as_ref())
        .set("Fecha", inv.issued_at.format(DATE_FORMAT))
        .opt("Sello", seal.map(|s| &s.signature))
        .opt("FormaPago", inv.payment_form.as_ref())
        .opt("NoCertificado", seal.map(|s| &s.certificate_number))
        .opt("Certificado", seal.map(|s| &s.certificate))
        .opt("CondicionesDePago", inv.payment_conditions.as_ref())
        .set("SubTotal", inv.subtotal)
        .opt("Descuento", inv.discount)
        .set("Moneda", &inv.currency)
        .opt("TipoCambio", inv.exchange_rate)
        .set("Total", inv.total)
        .set("TipoDeComprobante", inv.document_type.code())
        .opt("MetodoPago", inv.payment_method.as_ref())
        .set("LugarExpedicion", &inv.expedition_place)
        .opt("Confirmacion", inv.confirmation.as_ref());
    w.start("cfdi:Comprobante", &root)?;

    if let Some(related) = &inv.related {
        let mut attrs = Attrs::new();
        attrs.set("TipoRelacion", &related.relation_type);
        w.start("cfdi:CfdiRelacionados", &attrs)?;
        for uuid in &related.uuids {
            let mut attrs = Attrs::new();
            attrs.set("UUID", uuid);
            w.empty("cfdi:CfdiRelacionado", &attrs)?;
        }
        w.end("cfdi:CfdiRelacionados")?;
    }

    let mut issuer = Attrs::new();
    issuer
        .set("Rfc", &inv.issuer.rfc)
        .opt("Nombre", inv.issuer.name.as_ref())
        .set("RegimenFiscal", &inv.issuer.tax_regime);
    w.empty("cfdi:Emisor", &issuer)?;

    let r = &inv.recipient;
    let mut recipient = Attrs::new();
    recipient
        .set("Rfc", &r.rfc)
        .opt("Nombre", r.name.as_ref())
        .opt("ResidenciaFiscal", r.tax_residence.as_ref())
        .opt("NumRegIdTrib", r.foreign_tax_id.as_ref())
        .set("UsoCFDI", &r.cfdi_use);
    w.empty("cfdi:Receptor", &recipient)?;

    w.start("cfdi:Conceptos", &Attrs::new())?;
    for item in &inv.items {
        write_item(&mut w, item)?;
    }
    w.end("cfdi:Conceptos")?;

    if let Some(taxes) = &inv.taxes {
        let mut attrs = Attrs::new();
        attrs
            .opt("TotalImpuestosRetenidos", taxes.total_withheld)
            .opt("TotalImpuestosTrasladados", taxes.total_transferred);
        let empty = taxes.withheld.is_empty() && taxes.transferred.is_empty();
        if empty {
            w.empty("cfdi:Impuestos", &attrs)?;
        } else {
            w.start("cfdi:Impuestos", &attrs)?;
            if !taxes.withheld.is_empty() {
                w.start("cfdi:Retenciones", &Attrs::new())?;
                for r in &taxes.withheld {
                    let mut attrs = Attrs::new();
                    attrs.set("Impuesto", &r.tax).set("Importe", r.amount);
                    w.empty("cfdi:Retencion", &attrs)?;
                }
                w.end("cfdi:Retenciones")?;
            }
            if !taxes.transferred.is_empty() {
                w.start("cfdi:Traslados", &Attrs::new())?;
                for t in &taxes.transferred {
                    let mut attrs = Attrs::new();
                    attrs
                        .set("Impuesto", &t.tax)
                        .set("TipoFactor", t.factor.code())
                        .set("TasaOCuota", t.rate)
                        .set("Importe", t.amount);
                    w.empty("cfdi:Traslado", &attrs)?;
                }
                w.end("cfdi:Traslados")?;
            }
            w.end("cfdi:Impuestos")?;
        }
    }

    if !cfdi.complements().is_empty() {
        w.start("cfdi:Complemento", &Attrs::new())?;
        for complement in cfdi.complements() {
            match complement {
                Complement::Stamp(tfd) => write_stamp(&mut w, tfd)?,
                Complement::Opaque(node) => {
                    w.node(node)?;
                }
            }
        }
        w.end("cfdi:Complemento")?;
    }

    if !cfdi.addenda().is_empty() {
        w.start("cfdi:Addenda", &Attrs::new())?;
        for node in cfdi.addenda() {
            w.node(node)?;
        }
        w.end("cfdi:Addenda")?;
    }

    w.end("cfdi:Comprobante")?;
    Ok(w)
}

fn write_item(w: &mut XmlWriter, item: &LineItem) -> Result<(), CfdiError> {
    let mut attrs = Attrs::new();
    attrs
        .set("ClaveProdServ", &item.product_code)
        .opt("NoIdentificacion", item.sku.as_ref())
        .set("Cantidad", item.quantity)
        .set("ClaveUnidad", &item.unit_code)
        .opt("Unidad", item.unit.as_ref())
        .set("Descripcion", &item.description)
        .set("ValorUnitario", item.unit_value)
        .set("Importe", item.amount)
        .opt("Descuento", item.discount);

    let childless = item.taxes.is_empty()
        && item.customs.is_empty()
        && item.property_account.is_none()
        && item.complements.is_empty();
    if childless {
        w.empty("cfdi:Concepto", &attrs)?;
        return Ok(());
    }

    w.start("cfdi:Concepto", &attrs)?;
    if !item.taxes.is_empty() {
        w.start("cfdi:Impuestos", &Attrs::new())?;
        if !item.taxes.transferred.is_empty() {
            w.start("cfdi:Traslados", &Attrs::new())?;
            for line in &item.taxes.transferred {
                w.empty("cfdi:Traslado", &tax_line_attrs(line))?;
            }
            w.end("cfdi:Traslados")?;
        }
        if !item.taxes.withheld.is_empty() {
            w.start("cfdi:Retenciones", &Attrs::new())?;
            for line in &item.taxes.withheld {
                w.empty("cfdi:Retencion", &tax_line_attrs(line))?;
            }
            w.end("cfdi:Retenciones")?;
        }
        w.end("cfdi:Impuestos")?;
    }
    for number in &item.customs {
        let mut attrs = Attrs::new();
        attrs.set("NumeroPedimento", number);
        w.empty("cfdi:InformacionAduanera", &attrs)?;
    }
    if let Some(account) = &item.property_account {
        let mut attrs = Attrs::new();
        attrs.set("Numero", account);
        w.empty("cfdi:CuentaPredial", &attrs)?;
    }
    if !item.complements.is_empty() {
        w.start("cfdi:ComplementoConcepto", &Attrs::new())?;
        for node in &item.complements {
            w.node(node)?;
        }
        w.end("cfdi:ComplementoConcepto")?;
    }
    w.end("cfdi:Concepto")?;
    Ok(())
}

fn tax_line_attrs(line: &TaxLine) -> Attrs {
    let mut attrs = Attrs::new();
    attrs
        .set("Base", line.base)
        .set("Impuesto", &line.tax)
        .set("TipoFactor", line.factor.code())
        .opt("TasaOCuota", line.rate)
        .opt("Importe", line.amount);
    attrs
}

fn write_stamp(w: &mut XmlWriter, tfd: &TimbreFiscalDigital) -> Result<(), CfdiError> {
    let mut attrs = Attrs::new();
    attrs
        .set("xmlns:tfd", TFD_NS)
        .set("xsi:schemaLocation", TFD_SCHEMA_LOCATION)
        .set("Version", &tfd.version)
        .set("UUID", &tfd.uuid)
        .set("FechaTimbrado", tfd.stamped_at.format(DATE_FORMAT))
        .set("RfcProvCertif", &tfd.provider_rfc)
        .opt("Leyenda", tfd.legend.as_ref())
        .set("SelloCFD", &tfd.cfd_seal)
        .set("NoCertificadoSAT", &tfd.sat_certificate_number)
        .set("SelloSAT", &tfd.sat_seal);
    w.empty("tfd:TimbreFiscalDigital", &attrs)?;
    Ok(())
}
