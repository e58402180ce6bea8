use chrono::NaiveDate;
use cfdi::core::*;
use rust_decimal_macros::dec;

fn main() {
    let catalogs = StaticCatalog::new()
        .with(Catalog::Moneda, ["MXN"])
        .with(Catalog::CodigoPostal, ["06600"])
        .with(Catalog::FormaPago, ["03"])
        .with(Catalog::MetodoPago, ["PUE"])
        .with(Catalog::RegimenFiscal, ["601"])
        .with(Catalog::UsoCfdi, ["G03"])
        .with(Catalog::ClaveUnidad, ["E48", "H87"])
        .with(Catalog::Impuesto, ["001", "002"])
        .accept_all(Catalog::ClaveProdServ);

    let mut folios = FolioSequence::new("A").with_padding(6);

    // Professional services billed to a company: IVA transferred, ISR withheld
    let invoice = InvoiceBuilder::new(
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap(),
        "06600",
    )
    .folio_from(&mut folios)
    .payment_form("03")
    .payment_method("PUE")
    .payment_conditions("Contado")
    .issuer(
        IssuerBuilder::new("EKU9003173C9", "601")
            .name("ESCUELA KEMPER URGATE")
            .build(),
    )
    .recipient(
        RecipientBuilder::new("URE180429TM6", "G03")
            .name("UNIVERSIDAD ROBOTICA ESPAÑOLA")
            .build(),
    )
    .add_item(
        LineItemBuilder::new("84111506", dec!(10), "E48", "Asesoría contable", dec!(850))
            .discount(dec!(500))
            .transferred_rate("002", dec!(0.16))
            .withheld_rate("001", dec!(0.10)),
    )
    .add_item(
        LineItemBuilder::new("43232408", dec!(1), "H87", "Licencia anual", dec!(1200))
            .transferred_rate("002", dec!(0.16)),
    )
    .build()
    .expect("invoice should build");

    println!(
        "CFDI {}-{}",
        invoice.series.as_deref().unwrap_or(""),
        invoice.folio.as_deref().unwrap_or("")
    );
    println!("Emisor:   {}", invoice.issuer.rfc);
    println!("Receptor: {}", invoice.recipient.rfc);
    println!("---");
    for item in &invoice.items {
        println!(
            "  {} x {} @ {} = {}",
            item.quantity, item.description, item.unit_value, item.amount
        );
    }
    println!("---");
    println!("SubTotal:  {} {}", invoice.subtotal, invoice.currency);
    if let Some(discount) = invoice.discount {
        println!("Descuento: {discount}");
    }
    if let Some(taxes) = &invoice.taxes {
        for t in &taxes.transferred {
            println!("Traslado {} {}: {}", t.tax, t.rate, t.amount);
        }
        for w in &taxes.withheld {
            println!("Retención {}: {}", w.tax, w.amount);
        }
    }
    println!("Total:     {} {}", invoice.total, invoice.currency);

    let errors = validate(&invoice, &catalogs, &ValidationConfig::default());
    println!("\nValidation: {} errors", errors.len());

    // A tampered total is reported as a single reconciliation error
    let mut tampered = invoice.clone();
    tampered.total += dec!(1);
    for e in validate(&tampered, &catalogs, &ValidationConfig::default()) {
        println!("  {e}");
    }

    let validated = ValidatedInvoice::new(invoice, &catalogs, &ValidationConfig::default())
        .expect("invoice should validate");
    println!(
        "\nCadena original:\n{}",
        cfdi::cadena::canonicalize(&validated, "30001000000400002434")
    );
}
