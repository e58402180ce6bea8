//! # cfdi
//!
//! Document model, validation engine and digital seal pipeline for Mexican
//! CFDI 3.3 electronic invoices.
//!
//! All monetary values use [`rust_decimal::Decimal`]; never floating point.
//! An invoice moves through three stages: the editable [`Invoice`] draft,
//! a [`ValidatedInvoice`] that passed every structural, catalog and
//! arithmetic rule, and a sealed [`Cfdi`] that carries `Sello`,
//! `NoCertificado` and `Certificado`.
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::NaiveDate;
//! use cfdi::core::*;
//! use rust_decimal_macros::dec;
//!
//! let catalogs = StaticCatalog::new()
//!     .with(Catalog::Moneda, ["MXN"])
//!     .with(Catalog::CodigoPostal, ["06600"])
//!     .with(Catalog::FormaPago, ["03"])
//!     .with(Catalog::MetodoPago, ["PUE"])
//!     .with(Catalog::RegimenFiscal, ["601"])
//!     .with(Catalog::UsoCfdi, ["G03"])
//!     .with(Catalog::ClaveUnidad, ["E48"])
//!     .with(Catalog::Impuesto, ["002"])
//!     .accept_all(Catalog::ClaveProdServ);
//!
//! let issued_at = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(12, 0, 0).unwrap();
//! let invoice = InvoiceBuilder::new(issued_at, "06600")
//!     .payment_form("03")
//!     .payment_method("PUE")
//!     .issuer(IssuerBuilder::new("EKU9003173C9", "601").build())
//!     .recipient(RecipientBuilder::new("XAXX010101000", "G03").build())
//!     .add_item(LineItemBuilder::new("84111506", dec!(2), "E48", "Consultoría", dec!(100))
//!         .transferred_rate("002", dec!(0.16)))
//!     .build()
//!     .unwrap();
//!
//! assert!(validate(&invoice, &catalogs, &ValidationConfig::default()).is_empty());
//! assert_eq!(invoice.total, dec!(232.00));
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `core` (default) | Document model, validation, cadena original, folio numbering |
//! | `xml` | `cfdi:Comprobante` serialization and parsing |
//! | `sello` | RSA/SHA-256 sealing, verification, CSD certificates and keys |
//! | `all` | Everything |

#[cfg(feature = "core")]
pub mod core;

#[cfg(feature = "core")]
pub mod cadena;

#[cfg(feature = "xml")]
pub mod xml;

#[cfg(feature = "sello")]
pub mod sello;

// Re-export core types at crate root for convenience
#[cfg(feature = "core")]
pub use crate::core::*;
