//! Seal an invoice with a CSD and verify it after a trip through XML.
//!
//! Usage: `cargo run --example seal_and_verify --features all -- csd.cer csd.key password`

use chrono::NaiveDate;
use cfdi::core::*;
use cfdi::sello::{self, Certificate, PrivateKey};
use rust_decimal_macros::dec;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let [_, cer, key, password] = args.as_slice() else {
        eprintln!("usage: seal_and_verify <csd.cer> <csd.key> <password>");
        std::process::exit(2);
    };

    let certificate = Certificate::from_der(&std::fs::read(cer)?)?;
    let key = PrivateKey::from_encrypted_pkcs8_der(&std::fs::read(key)?, password)?;
    println!("CSD {} ({})", certificate.certificate_number(), certificate.subject());

    let catalogs = StaticCatalog::new()
        .with(Catalog::Moneda, ["MXN"])
        .with(Catalog::CodigoPostal, ["06600"])
        .with(Catalog::FormaPago, ["03"])
        .with(Catalog::MetodoPago, ["PUE"])
        .with(Catalog::RegimenFiscal, ["601"])
        .with(Catalog::UsoCfdi, ["G03"])
        .with(Catalog::ClaveUnidad, ["E48"])
        .with(Catalog::Impuesto, ["002"])
        .accept_all(Catalog::ClaveProdServ);

    let invoice = InvoiceBuilder::new(
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap(),
        "06600",
    )
    .series("A")
    .folio("1")
    .payment_form("03")
    .payment_method("PUE")
    .issuer(IssuerBuilder::new("EKU9003173C9", "601").build())
    .recipient(RecipientBuilder::new("XAXX010101000", "G03").build())
    .add_item(
        LineItemBuilder::new("84111506", dec!(2), "E48", "Consultoría", dec!(100))
            .transferred_rate("002", dec!(0.16)),
    )
    .build()?;

    let sealed = sello::issue(
        invoice,
        &catalogs,
        &ValidationConfig::default(),
        &certificate,
        &key,
    )?;
    let xml = cfdi::xml::to_xml(&sealed)?;
    println!("{xml}");

    let received = cfdi::xml::from_xml(&xml)?;
    let embedded = sello::verify_embedded(&received)?;
    println!("\nSeal verified with certificate {}", embedded.certificate_number());

    let tampered = cfdi::xml::from_xml(&xml.replace(r#"Total="232.00""#, r#"Total="1.00""#))?;
    match sello::verify(&tampered, &certificate) {
        Ok(()) => println!("tampered document verified (unexpected)"),
        Err(e) => println!("tampered document rejected: {e}"),
    }
    Ok(())
}
