//! Rule identifiers and the presence-rule tables.
//!
//! Conditional presence is data, not control flow: each entity has a table
//! mapping a field to the predicate over its siblings that makes it
//! required or forbidden. Adding a schema version means adding tables, not
//! editing the validator.

use serde::{Deserialize, Serialize};

use super::config::ValidationConfig;
use super::types::*;

/// Identifier of the rule a [`ValidationError`](super::ValidationError) violates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum RuleId {
    /// A required field is missing or blank.
    Required,
    /// A conditionally required field is missing while its trigger holds.
    ConditionallyRequired,
    /// A field is present although its trigger forbids it.
    Forbidden,
    /// Fixed-value attribute has another value (`Version`, `TipoCambio` for MXN).
    FixedValue,
    /// String does not match its character class or length bound.
    Pattern,
    /// Decimal carries more places than the field allows.
    DecimalPlaces,
    /// Code is not a member of its SAT catalog.
    Catalog,
    /// Amount is negative.
    NonNegative,
    /// `Concepto/@Importe` ≠ Cantidad × ValorUnitario.
    ItemAmount,
    /// `Concepto/@Descuento` exceeds `Concepto/@Importe`.
    ItemDiscount,
    /// Tax line `Importe` ≠ Base × TasaOCuota (Tasa) or the quota (Cuota).
    TaxLineAmount,
    /// `SubTotal` ≠ Σ item amounts.
    SubTotal,
    /// `Descuento` ≠ Σ item discounts.
    DiscountSum,
    /// `Total` ≠ SubTotal − Descuento + transferred − withheld.
    TotalReconciliation,
    /// Document-level `Traslado` entries ≠ grouped item transfers.
    TransferredSummary,
    /// Document-level `Retencion` entries ≠ grouped item withholdings.
    WithheldSummary,
    /// `TotalImpuestosTrasladados` ≠ Σ transferred entries.
    TotalTransferred,
    /// `TotalImpuestosRetenidos` ≠ Σ withheld entries.
    TotalWithheld,
    /// A figure recomputed for the checks above leaves the decimal range.
    Overflow,
}

impl RuleId {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Required => "CFDI-REQ",
            Self::ConditionallyRequired => "CFDI-COND",
            Self::Forbidden => "CFDI-FORB",
            Self::FixedValue => "CFDI-FIXED",
            Self::Pattern => "CFDI-PAT",
            Self::DecimalPlaces => "CFDI-DEC",
            Self::Catalog => "CFDI-CAT",
            Self::NonNegative => "CFDI-NEG",
            Self::ItemAmount => "CFDI-ARITH-01",
            Self::ItemDiscount => "CFDI-ARITH-02",
            Self::TaxLineAmount => "CFDI-ARITH-03",
            Self::SubTotal => "CFDI-ARITH-04",
            Self::DiscountSum => "CFDI-ARITH-05",
            Self::TotalReconciliation => "CFDI-ARITH-06",
            Self::TransferredSummary => "CFDI-ARITH-07",
            Self::WithheldSummary => "CFDI-ARITH-08",
            Self::TotalTransferred => "CFDI-ARITH-09",
            Self::TotalWithheld => "CFDI-ARITH-10",
            Self::Overflow => "CFDI-ARITH-11",
        }
    }

    /// Whether the rule checks an arithmetic invariant.
    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            Self::ItemAmount
                | Self::ItemDiscount
                | Self::TaxLineAmount
                | Self::SubTotal
                | Self::DiscountSum
                | Self::TotalReconciliation
                | Self::TransferredSummary
                | Self::WithheldSummary
                | Self::TotalTransferred
                | Self::TotalWithheld
                | Self::Overflow
        )
    }
}

impl std::fmt::Display for RuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// What the predicates of a presence rule can see besides the entity itself.
pub(crate) struct RuleContext<'a> {
    pub invoice: &'a Invoice,
    pub config: &'a ValidationConfig,
}

pub(crate) enum Trigger<T> {
    Always,
    /// Human-readable condition plus its predicate.
    When(&'static str, fn(&T, &RuleContext<'_>) -> bool),
}

#[derive(Clone, Copy)]
pub(crate) enum Requirement {
    Required,
    Forbidden,
}

pub(crate) struct PresenceRule<T> {
    pub field: &'static str,
    pub present: fn(&T) -> bool,
    pub trigger: Trigger<T>,
    pub requirement: Requirement,
}

fn filled(value: &str) -> bool {
    !value.trim().is_empty()
}

fn non_exempt(lines: &[TaxLine]) -> bool {
    lines.iter().any(|l| l.factor != FactorType::Exento)
}

fn items_transfer(invoice: &Invoice) -> bool {
    invoice.items.iter().any(|i| non_exempt(&i.taxes.transferred))
}

fn items_withhold(invoice: &Invoice) -> bool {
    invoice.items.iter().any(|i| non_exempt(&i.taxes.withheld))
}

fn transfer_or_payment(invoice: &Invoice) -> bool {
    matches!(
        invoice.document_type,
        DocumentType::Transfer | DocumentType::Payment
    )
}

pub(crate) static INVOICE_RULES: &[PresenceRule<Invoice>] = &[
    PresenceRule {
        field: "currency",
        present: |i| filled(&i.currency),
        trigger: Trigger::Always,
        requirement: Requirement::Required,
    },
    PresenceRule {
        field: "expedition_place",
        present: |i| filled(&i.expedition_place),
        trigger: Trigger::Always,
        requirement: Requirement::Required,
    },
    PresenceRule {
        field: "items",
        present: |i| !i.items.is_empty(),
        trigger: Trigger::Always,
        requirement: Requirement::Required,
    },
    PresenceRule {
        field: "exchange_rate",
        present: |i| i.exchange_rate.is_some(),
        trigger: Trigger::When(
            "the currency is neither the home currency nor the no-currency code",
            |i, ctx| filled(&i.currency) && ctx.config.needs_exchange_rate(&i.currency),
        ),
        requirement: Requirement::Required,
    },
    PresenceRule {
        field: "exchange_rate",
        present: |i| i.exchange_rate.is_some(),
        trigger: Trigger::When("the currency is the no-currency code", |i, ctx| {
            i.currency == ctx.config.no_currency
        }),
        requirement: Requirement::Forbidden,
    },
    PresenceRule {
        field: "discount",
        present: |i| i.discount.is_some(),
        trigger: Trigger::When("an item carries a discount", |i, _| {
            i.items.iter().any(|item| item.discount.is_some())
        }),
        requirement: Requirement::Required,
    },
    PresenceRule {
        field: "confirmation",
        present: |i| i.confirmation.is_some(),
        trigger: Trigger::When(
            "the total or the exchange rate is outside the configured range",
            |i, ctx| ctx.config.requires_confirmation(i),
        ),
        requirement: Requirement::Required,
    },
    PresenceRule {
        field: "payment_form",
        present: |i| i.payment_form.is_some(),
        trigger: Trigger::When("the document type is T or P", |i, _| {
            transfer_or_payment(i)
        }),
        requirement: Requirement::Forbidden,
    },
    PresenceRule {
        field: "payment_method",
        present: |i| i.payment_method.is_some(),
        trigger: Trigger::When("the document type is T or P", |i, _| {
            transfer_or_payment(i)
        }),
        requirement: Requirement::Forbidden,
    },
    PresenceRule {
        field: "payment_conditions",
        present: |i| i.payment_conditions.is_some(),
        trigger: Trigger::When("the document type is T or P", |i, _| {
            transfer_or_payment(i)
        }),
        requirement: Requirement::Forbidden,
    },
    PresenceRule {
        field: "taxes",
        present: |i| i.taxes.is_some(),
        trigger: Trigger::When("an item carries a non-exempt tax line", |i, _| {
            items_transfer(i) || items_withhold(i)
        }),
        requirement: Requirement::Required,
    },
    PresenceRule {
        field: "taxes",
        present: |i| i.taxes.is_some(),
        trigger: Trigger::When("no item carries a non-exempt tax line", |i, _| {
            !items_transfer(i) && !items_withhold(i)
        }),
        requirement: Requirement::Forbidden,
    },
];

pub(crate) static ISSUER_RULES: &[PresenceRule<Issuer>] = &[
    PresenceRule {
        field: "rfc",
        present: |e| filled(&e.rfc),
        trigger: Trigger::Always,
        requirement: Requirement::Required,
    },
    PresenceRule {
        field: "tax_regime",
        present: |e| filled(&e.tax_regime),
        trigger: Trigger::Always,
        requirement: Requirement::Required,
    },
];

pub(crate) static RECIPIENT_RULES: &[PresenceRule<Recipient>] = &[
    PresenceRule {
        field: "rfc",
        present: |r| filled(&r.rfc),
        trigger: Trigger::Always,
        requirement: Requirement::Required,
    },
    PresenceRule {
        field: "cfdi_use",
        present: |r| filled(&r.cfdi_use),
        trigger: Trigger::Always,
        requirement: Requirement::Required,
    },
    PresenceRule {
        field: "foreign_tax_id",
        present: |r| r.foreign_tax_id.is_some(),
        trigger: Trigger::When("a tax residence is given", |r, _| {
            r.tax_residence.is_some()
        }),
        requirement: Requirement::Required,
    },
    PresenceRule {
        field: "tax_residence",
        present: |r| r.tax_residence.is_some(),
        trigger: Trigger::When("a foreign tax id is given", |r, _| {
            r.foreign_tax_id.is_some()
        }),
        requirement: Requirement::Required,
    },
];

pub(crate) static RELATED_RULES: &[PresenceRule<RelatedDocuments>] = &[
    PresenceRule {
        field: "relation_type",
        present: |r| filled(&r.relation_type),
        trigger: Trigger::Always,
        requirement: Requirement::Required,
    },
    PresenceRule {
        field: "uuids",
        present: |r| !r.uuids.is_empty(),
        trigger: Trigger::Always,
        requirement: Requirement::Required,
    },
];

pub(crate) static ITEM_RULES: &[PresenceRule<LineItem>] = &[
    PresenceRule {
        field: "product_code",
        present: |c| filled(&c.product_code),
        trigger: Trigger::Always,
        requirement: Requirement::Required,
    },
    PresenceRule {
        field: "unit_code",
        present: |c| filled(&c.unit_code),
        trigger: Trigger::Always,
        requirement: Requirement::Required,
    },
    PresenceRule {
        field: "description",
        present: |c| filled(&c.description),
        trigger: Trigger::Always,
        requirement: Requirement::Required,
    },
];

pub(crate) static TAX_LINE_RULES: &[PresenceRule<TaxLine>] = &[
    PresenceRule {
        field: "tax",
        present: |t| filled(&t.tax),
        trigger: Trigger::Always,
        requirement: Requirement::Required,
    },
    PresenceRule {
        field: "rate",
        present: |t| t.rate.is_some(),
        trigger: Trigger::When("the factor is Tasa or Cuota", |t, _| {
            t.factor != FactorType::Exento
        }),
        requirement: Requirement::Required,
    },
    PresenceRule {
        field: "rate",
        present: |t| t.rate.is_some(),
        trigger: Trigger::When("the factor is Exento", |t, _| {
            t.factor == FactorType::Exento
        }),
        requirement: Requirement::Forbidden,
    },
    PresenceRule {
        field: "amount",
        present: |t| t.amount.is_some(),
        trigger: Trigger::When("the factor is Tasa or Cuota", |t, _| {
            t.factor != FactorType::Exento
        }),
        requirement: Requirement::Required,
    },
    PresenceRule {
        field: "amount",
        present: |t| t.amount.is_some(),
        trigger: Trigger::When("the factor is Exento", |t, _| {
            t.factor == FactorType::Exento
        }),
        requirement: Requirement::Forbidden,
    },
];

pub(crate) static SUMMARY_RULES: &[PresenceRule<TaxSummary>] = &[
    PresenceRule {
        field: "total_transferred",
        present: |s| s.total_transferred.is_some(),
        trigger: Trigger::When("items carry transferred taxes", |_, ctx| {
            items_transfer(ctx.invoice)
        }),
        requirement: Requirement::Required,
    },
    PresenceRule {
        field: "total_transferred",
        present: |s| s.total_transferred.is_some(),
        trigger: Trigger::When("no item carries transferred taxes", |_, ctx| {
            !items_transfer(ctx.invoice)
        }),
        requirement: Requirement::Forbidden,
    },
    PresenceRule {
        field: "total_withheld",
        present: |s| s.total_withheld.is_some(),
        trigger: Trigger::When("items carry withheld taxes", |_, ctx| {
            items_withhold(ctx.invoice)
        }),
        requirement: Requirement::Required,
    },
    PresenceRule {
        field: "total_withheld",
        present: |s| s.total_withheld.is_some(),
        trigger: Trigger::When("no item carries withheld taxes", |_, ctx| {
            !items_withhold(ctx.invoice)
        }),
        requirement: Requirement::Forbidden,
    },
];

/// Evaluate a presence table against one entity.
pub(crate) fn check_presence<T>(
    rules: &[PresenceRule<T>],
    target: &T,
    prefix: &str,
    ctx: &RuleContext<'_>,
    errors: &mut Vec<super::ValidationError>,
) {
    for rule in rules {
        let condition = match &rule.trigger {
            Trigger::Always => None,
            Trigger::When(description, predicate) => {
                if !predicate(target, ctx) {
                    continue;
                }
                Some(*description)
            }
        };
        let present = (rule.present)(target);
        let field = if prefix.is_empty() {
            rule.field.to_string()
        } else {
            format!("{prefix}.{}", rule.field)
        };
        match (rule.requirement, present, condition) {
            (Requirement::Required, false, None) => {
                errors.push(super::ValidationError::new(
                    field,
                    RuleId::Required,
                    format!("{} is required", rule.field),
                ));
            }
            (Requirement::Required, false, Some(when)) => {
                errors.push(super::ValidationError::new(
                    field,
                    RuleId::ConditionallyRequired,
                    format!("{} is required when {when}", rule.field),
                ));
            }
            (Requirement::Forbidden, true, when) => {
                errors.push(super::ValidationError::new(
                    field,
                    RuleId::Forbidden,
                    format!(
                        "{} must be omitted when {}",
                        rule.field,
                        when.unwrap_or("the schema forbids it")
                    ),
                ));
            }
            _ => {}
        }
    }
}
