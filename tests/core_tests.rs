use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use cfdi::core::*;

fn issued_at() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 1)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

fn catalogs() -> StaticCatalog {
    StaticCatalog::new()
        .with(Catalog::Moneda, ["MXN", "USD", "XXX"])
        .with(Catalog::CodigoPostal, ["06600", "64000"])
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

fn issuer() -> Issuer {
    IssuerBuilder::new("EKU9003173C9", "601")
        .name("ESCUELA KEMPER URGATE")
        .build()
}

fn recipient() -> Recipient {
    RecipientBuilder::new("XAXX010101000", "G03")
        .name("PUBLICO EN GENERAL")
        .build()
}

fn builder() -> InvoiceBuilder {
    InvoiceBuilder::new(issued_at(), "06600")
        .series("A")
        .folio("1")
        .payment_form("03")
        .payment_method("PUE")
        .issuer(issuer())
        .recipient(recipient())
}

fn consulting(quantity: Decimal, unit_value: Decimal) -> LineItemBuilder {
    LineItemBuilder::new(
        "84111506",
        quantity,
        "E48",
        "Servicio de consultoría",
        unit_value,
    )
}

/// 2 × 100.00 at IVA 16%.
fn simple_invoice() -> Invoice {
    builder()
        .add_item(consulting(dec!(2), dec!(100)).transferred_rate("002", dec!(0.16)))
        .build()
        .unwrap()
}

/// Discount, withholding and two items.
fn professional_services() -> Invoice {
    builder()
        .add_item(
            consulting(dec!(2), dec!(100))
                .discount(dec!(20))
                .transferred_rate("002", dec!(0.16))
                .withheld_rate("001", dec!(0.10)),
        )
        .add_item(
            LineItemBuilder::new("43232408", dec!(1), "H87", "Licencia", dec!(50))
                .transferred_rate("002", dec!(0.16)),
        )
        .build()
        .unwrap()
}

fn validate_default(invoice: &Invoice) -> Vec<ValidationError> {
    validate(invoice, &catalogs(), &ValidationConfig::default())
}

fn rules(errors: &[ValidationError]) -> Vec<RuleId> {
    errors.iter().map(|e| e.rule).collect()
}

/// Rules reported against one field.
fn rules_at(errors: &[ValidationError], field: &str) -> Vec<RuleId> {
    errors
        .iter()
        .filter(|e| e.field == field)
        .map(|e| e.rule)
        .collect()
}

// --- Builder and totals ---

#[test]
fn simple_invoice_totals() {
    let invoice = simple_invoice();
    assert_eq!(invoice.version, "3.3");
    assert_eq!(invoice.items[0].amount, dec!(200.00));
    assert_eq!(invoice.subtotal, dec!(200.00));
    assert_eq!(invoice.discount, None);
    assert_eq!(invoice.total, dec!(232.00));

    let taxes = invoice.taxes.as_ref().unwrap();
    assert_eq!(taxes.total_transferred, Some(dec!(32.00)));
    assert_eq!(taxes.total_withheld, None);
    assert_eq!(taxes.transferred.len(), 1);
    assert_eq!(taxes.transferred[0].tax, "002");
    assert_eq!(taxes.transferred[0].factor, FactorType::Tasa);
    assert_eq!(taxes.transferred[0].rate, dec!(0.16));
    assert_eq!(taxes.transferred[0].amount, dec!(32.00));

    assert!(validate_default(&invoice).is_empty());
}

#[test]
fn discount_and_withholding_totals() {
    let invoice = professional_services();
    assert_eq!(invoice.subtotal, dec!(250.00));
    assert_eq!(invoice.discount, Some(dec!(20)));
    assert_eq!(invoice.items[0].taxes.transferred[0].base, dec!(180));
    assert_eq!(invoice.items[0].taxes.transferred[0].amount, Some(dec!(28.80)));
    assert_eq!(invoice.items[0].taxes.withheld[0].amount, Some(dec!(18.00)));

    let taxes = invoice.taxes.as_ref().unwrap();
    assert_eq!(taxes.total_transferred, Some(dec!(36.80)));
    assert_eq!(taxes.total_withheld, Some(dec!(18.00)));
    assert_eq!(invoice.total, dec!(248.80));

    let errors = validate_default(&invoice);
    assert!(errors.is_empty(), "unexpected errors: {errors:?}");
}

#[test]
fn builder_rejects_incomplete_invoices() {
    let no_items = builder().build();
    assert!(matches!(no_items, Err(CfdiError::Builder(_))));

    let no_issuer = InvoiceBuilder::new(issued_at(), "06600")
        .recipient(recipient())
        .add_item(consulting(dec!(1), dec!(1)))
        .build();
    assert!(matches!(no_issuer, Err(CfdiError::Builder(_))));
}

#[test]
fn builder_takes_folio_from_sequence() {
    let mut seq = FolioSequence::starting_at("F", 41).with_padding(6);
    let invoice = InvoiceBuilder::new(issued_at(), "06600")
        .folio_from(&mut seq)
        .payment_form("01")
        .payment_method("PUE")
        .issuer(issuer())
        .recipient(recipient())
        .add_item(consulting(dec!(1), dec!(10)))
        .build()
        .unwrap();

    assert_eq!(invoice.series.as_deref(), Some("F"));
    assert_eq!(invoice.folio.as_deref(), Some("000041"));
    assert_eq!(seq.next_raw(), 42);
}

// --- Arithmetic ---

#[test]
fn wrong_total_is_a_single_reconciliation_error() {
    let mut invoice = simple_invoice();
    invoice.total = dec!(200.00);

    let errors = validate_default(&invoice);
    assert_eq!(errors.len(), 1, "{errors:?}");
    assert_eq!(errors[0].rule, RuleId::TotalReconciliation);
    assert_eq!(errors[0].field, "total");
    assert!(errors[0].rule.is_arithmetic());
}

#[test]
fn each_derived_field_reports_exactly_one_error() {
    type Mutation = fn(&mut Invoice);
    let cases: [(&str, RuleId, Mutation); 10] = [
        ("items[0].amount", RuleId::ItemAmount, |i| {
            i.items[0].amount += dec!(1)
        }),
        (
            "items[0].taxes.transferred[0].amount",
            RuleId::TaxLineAmount,
            |i| {
                let line = &mut i.items[0].taxes.transferred[0];
                line.amount = line.amount.map(|a| a + dec!(1));
            },
        ),
        (
            "items[0].taxes.withheld[0].amount",
            RuleId::TaxLineAmount,
            |i| {
                let line = &mut i.items[0].taxes.withheld[0];
                line.amount = line.amount.map(|a| a + dec!(1));
            },
        ),
        ("subtotal", RuleId::SubTotal, |i| i.subtotal += dec!(1)),
        ("discount", RuleId::DiscountSum, |i| {
            i.discount = i.discount.map(|d| d + dec!(1))
        }),
        (
            "taxes.transferred[0].amount",
            RuleId::TransferredSummary,
            |i| {
                if let Some(t) = i.taxes.as_mut() {
                    t.transferred[0].amount += dec!(1);
                }
            },
        ),
        ("taxes.withheld[0].amount", RuleId::WithheldSummary, |i| {
            if let Some(t) = i.taxes.as_mut() {
                t.withheld[0].amount += dec!(1);
            }
        }),
        ("taxes.total_transferred", RuleId::TotalTransferred, |i| {
            if let Some(t) = i.taxes.as_mut() {
                t.total_transferred = t.total_transferred.map(|a| a + dec!(1));
            }
        }),
        ("taxes.total_withheld", RuleId::TotalWithheld, |i| {
            if let Some(t) = i.taxes.as_mut() {
                t.total_withheld = t.total_withheld.map(|a| a + dec!(1));
            }
        }),
        ("total", RuleId::TotalReconciliation, |i| i.total += dec!(1)),
    ];

    for (field, rule, mutate) in cases {
        let mut invoice = professional_services();
        mutate(&mut invoice);
        let errors = validate_default(&invoice);
        assert_eq!(errors.len(), 1, "{field}: {errors:?}");
        assert_eq!(errors[0].rule, rule, "{field}");
        assert_eq!(errors[0].field, field);
    }
}

#[test]
fn rounding_within_precision_is_tolerated() {
    let mut invoice = builder()
        .add_item(consulting(dec!(3), dec!(33.335)).transferred_rate("002", dec!(0.16)))
        .build()
        .unwrap();
    // 3 × 33.335 = 100.005, rounds half up to 100.01
    assert_eq!(invoice.items[0].amount, dec!(100.01));
    assert!(validate_default(&invoice).is_empty());

    invoice.items[0].amount = dec!(100.00);
    assert_eq!(rules(&validate_default(&invoice)), vec![RuleId::ItemAmount]);
}

#[test]
fn validate_arithmetic_alone_ignores_catalogs() {
    let mut invoice = simple_invoice();
    invoice.issuer.tax_regime = "999".into();
    assert!(validate_arithmetic(&invoice, 2).is_empty());
}

// --- Currency and exchange rate ---

#[test]
fn home_currency_needs_no_exchange_rate() {
    let invoice = simple_invoice();
    assert_eq!(invoice.currency, "MXN");
    assert!(invoice.exchange_rate.is_none());
    assert!(validate_default(&invoice).is_empty());
}

#[test]
fn foreign_currency_without_exchange_rate() {
    let invoice = builder()
        .currency("USD")
        .add_item(consulting(dec!(2), dec!(100)).transferred_rate("002", dec!(0.16)))
        .build()
        .unwrap();

    let errors = validate_default(&invoice);
    assert_eq!(errors.len(), 1, "{errors:?}");
    assert_eq!(errors[0].rule, RuleId::ConditionallyRequired);
    assert_eq!(errors[0].field, "exchange_rate");
}

#[test]
fn foreign_currency_with_exchange_rate() {
    let invoice = builder()
        .currency("USD")
        .exchange_rate(dec!(17.0512))
        .add_item(consulting(dec!(2), dec!(100)).transferred_rate("002", dec!(0.16)))
        .build()
        .unwrap();
    assert!(validate_default(&invoice).is_empty());
}

#[test]
fn no_currency_forbids_exchange_rate() {
    let invoice = builder()
        .currency("XXX")
        .exchange_rate(dec!(1))
        .add_item(consulting(dec!(1), dec!(0)))
        .build()
        .unwrap();

    let errors = validate_default(&invoice);
    assert!(
        errors
            .iter()
            .any(|e| e.rule == RuleId::Forbidden && e.field == "exchange_rate"),
        "{errors:?}"
    );
}

#[test]
fn exchange_rate_out_of_band_requires_confirmation() {
    let invoice = builder()
        .currency("USD")
        .exchange_rate(dec!(40))
        .add_item(consulting(dec!(1), dec!(10)))
        .build()
        .unwrap();
    let config = ValidationConfig::default().with_exchange_rate_range("USD", dec!(15), dec!(25));

    let errors = validate(&invoice, &catalogs(), &config);
    assert_eq!(errors.len(), 1, "{errors:?}");
    assert_eq!(errors[0].rule, RuleId::ConditionallyRequired);
    assert_eq!(errors[0].field, "confirmation");
}

#[test]
fn config_from_json() {
    let config: ValidationConfig = serde_json::from_str(
        r#"{ "total_limit": "1000", "currency_decimals": { "MXN": 3 } }"#,
    )
    .unwrap();
    assert_eq!(config.total_limit, Some(dec!(1000)));
    assert_eq!(config.decimals_for("MXN"), 3);
    assert_eq!(config.home_currency, "MXN");
}

// --- Catalogs and patterns ---

#[test]
fn unknown_catalog_codes_are_reported() {
    let mut invoice = simple_invoice();
    invoice.issuer.tax_regime = "999".into();
    invoice.payment_method = Some("XYZ".into());

    let errors = validate_default(&invoice);
    assert_eq!(rules(&errors), vec![RuleId::Catalog, RuleId::Catalog]);
    assert!(errors.iter().any(|e| e.field == "issuer.tax_regime"));
    assert!(errors.iter().any(|e| e.field == "payment_method"));
}

#[test]
fn unloaded_catalog_rejects_codes() {
    let catalogs = StaticCatalog::new()
        .with(Catalog::Moneda, ["MXN"])
        .accept_all(Catalog::ClaveProdServ);
    let errors = validate(&simple_invoice(), &catalogs, &ValidationConfig::default());
    assert!(errors.iter().all(|e| e.rule == RuleId::Catalog), "{errors:?}");
    assert!(errors.iter().any(|e| e.field == "issuer.tax_regime"));
}

#[test]
fn malformed_rfc_is_a_pattern_error() {
    let mut invoice = simple_invoice();
    invoice.recipient.rfc = "not-an-rfc".into();

    let errors = validate_default(&invoice);
    assert_eq!(errors.len(), 1, "{errors:?}");
    assert_eq!(errors[0].rule, RuleId::Pattern);
    assert_eq!(errors[0].field, "recipient.rfc");
}

#[test]
fn validation_collects_every_error() {
    let mut invoice = simple_invoice();
    invoice.issuer.rfc = "bad".into();
    invoice.recipient.cfdi_use = "ZZZ".into();
    invoice.total = dec!(1);

    let errors = validate_default(&invoice);
    assert_eq!(
        rules(&errors),
        vec![RuleId::Pattern, RuleId::Catalog, RuleId::TotalReconciliation]
    );
}

#[test]
fn validation_error_display() {
    let err = ValidationError::new("total", RuleId::TotalReconciliation, "mismatch");
    assert_eq!(err.to_string(), "[CFDI-ARITH-06] total: mismatch");

    let wrapped = CfdiError::Validation(vec![err.clone(), err]);
    assert_eq!(
        wrapped.to_string(),
        "validation failed: [CFDI-ARITH-06] total: mismatch; [CFDI-ARITH-06] total: mismatch"
    );
}

#[test]
fn malformed_related_uuid() {
    let invoice = builder()
        .related("04", ["not-a-uuid"])
        .add_item(consulting(dec!(2), dec!(100)).transferred_rate("002", dec!(0.16)))
        .build()
        .unwrap();

    let errors = validate_default(&invoice);
    assert_eq!(errors.len(), 1, "{errors:?}");
    assert_eq!(errors[0].field, "related.uuids[0]");
    assert_eq!(errors[0].rule, RuleId::Pattern);
}

#[test]
fn unknown_relation_type() {
    let invoice = builder()
        .related("99", ["6F4E7B3A-1C2D-4E5F-8A9B-0C1D2E3F4A5B"])
        .add_item(consulting(dec!(2), dec!(100)).transferred_rate("002", dec!(0.16)))
        .build()
        .unwrap();

    let errors = validate_default(&invoice);
    assert_eq!(errors.len(), 1, "{errors:?}");
    assert_eq!(errors[0].field, "related.relation_type");
    assert_eq!(errors[0].rule, RuleId::Catalog);
}

#[test]
fn malformed_customs_number() {
    let invoice = builder()
        .add_item(
            consulting(dec!(2), dec!(100))
                .transferred_rate("002", dec!(0.16))
                .customs("21  47  3807  8003832")
                .customs("21 47 3807 8003832"),
        )
        .build()
        .unwrap();

    let errors = validate_default(&invoice);
    assert!(rules_at(&errors, "items[0].customs[0]").is_empty(), "{errors:?}");
    assert_eq!(rules_at(&errors, "items[0].customs[1]"), vec![RuleId::Pattern]);
}

#[test]
fn malformed_property_account() {
    let invoice = builder()
        .add_item(
            consulting(dec!(2), dec!(100))
                .transferred_rate("002", dec!(0.16))
                .property_account("12-34"),
        )
        .build()
        .unwrap();

    let errors = validate_default(&invoice);
    assert_eq!(
        rules_at(&errors, "items[0].property_account"),
        vec![RuleId::Pattern],
        "{errors:?}"
    );
}

#[test]
fn transfer_forbids_payment_conditions() {
    let invoice = builder()
        .document_type(DocumentType::Transfer)
        .payment_conditions("Contado")
        .add_item(consulting(dec!(1), dec!(0)))
        .build()
        .unwrap();

    let errors = validate_default(&invoice);
    assert_eq!(
        rules_at(&errors, "payment_conditions"),
        vec![RuleId::Forbidden],
        "{errors:?}"
    );
}

#[test]
fn exempt_only_items_forbid_tax_summary() {
    let mut invoice = builder()
        .add_item(consulting(dec!(2), dec!(100)).transferred_exempt("002"))
        .build()
        .unwrap();
    assert!(invoice.taxes.is_none());
    assert!(validate_default(&invoice).is_empty());

    invoice.taxes = simple_invoice().taxes;
    let errors = validate_default(&invoice);
    assert_eq!(rules_at(&errors, "taxes"), vec![RuleId::Forbidden], "{errors:?}");
}

#[test]
fn quota_line_with_wrong_amount() {
    let mut invoice = builder()
        .add_item(consulting(dec!(2), dec!(100)).transferred_quota("003", dec!(3.5)))
        .build()
        .unwrap();
    assert_eq!(invoice.items[0].taxes.transferred[0].amount, Some(dec!(3.50)));
    assert!(validate_default(&invoice).is_empty());

    invoice.items[0].taxes.transferred[0].amount = Some(dec!(7.00));
    let errors = validate_default(&invoice);
    assert_eq!(
        rules_at(&errors, "items[0].taxes.transferred[0].amount"),
        vec![RuleId::TaxLineAmount],
        "{errors:?}"
    );
}

// --- Typestate ---

#[test]
fn validated_invoice_rejects_invalid_drafts() {
    let mut invoice = simple_invoice();
    invoice.total = dec!(0);

    match ValidatedInvoice::new(invoice, &catalogs(), &ValidationConfig::default()) {
        Err(CfdiError::Validation(errors)) => {
            assert_eq!(rules(&errors), vec![RuleId::TotalReconciliation]);
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn validated_invoice_keeps_content() {
    let invoice = simple_invoice();
    let validated =
        ValidatedInvoice::new(invoice.clone(), &catalogs(), &ValidationConfig::default())
            .unwrap();
    assert_eq!(validated.decimals(), 2);
    assert_eq!(validated.invoice().total, invoice.total);
    assert_eq!(validated.invoice().total.to_string(), "232.00");
    assert_eq!(validated.into_invoice().items.len(), 1);
}

#[test]
fn unsealed_document_reopens_and_rejects_stamps() {
    let mut cfdi = Cfdi::unsealed(simple_invoice());
    assert!(!cfdi.is_sealed());
    assert_eq!(cfdi.origin(), Origin::Draft);

    let stamp = TimbreFiscalDigital {
        version: "1.1".into(),
        uuid: "6F4E7B3A-1C2D-4E5F-8A9B-0C1D2E3F4A5B".into(),
        stamped_at: issued_at(),
        provider_rfc: "SAT970701NN3".into(),
        legend: None,
        cfd_seal: "abc".into(),
        sat_certificate_number: "00001000000505211329".into(),
        sat_seal: "def".into(),
    };
    assert!(matches!(cfdi.attach_stamp(stamp), Err(CfdiError::Stamp(_))));

    cfdi.push_addendum(XmlNode::new("ext:Pedido").attribute("xmlns:ext", "urn:ext"));
    assert_eq!(cfdi.addenda().len(), 1);
    assert_eq!(cfdi.into_draft().unwrap(), simple_invoice());
}

#[test]
fn rule_codes_are_unique() {
    let all = [
        RuleId::Required,
        RuleId::ConditionallyRequired,
        RuleId::Forbidden,
        RuleId::FixedValue,
        RuleId::Pattern,
        RuleId::DecimalPlaces,
        RuleId::Catalog,
        RuleId::NonNegative,
        RuleId::ItemAmount,
        RuleId::ItemDiscount,
        RuleId::TaxLineAmount,
        RuleId::SubTotal,
        RuleId::DiscountSum,
        RuleId::TotalReconciliation,
        RuleId::TransferredSummary,
        RuleId::WithheldSummary,
        RuleId::TotalTransferred,
        RuleId::TotalWithheld,
        RuleId::Overflow,
    ];
    let codes: std::collections::HashSet<_> = all.iter().map(|r| r.code()).collect();
    assert_eq!(codes.len(), all.len());
    assert_eq!(all.iter().filter(|r| r.is_arithmetic()).count(), 11);
}
