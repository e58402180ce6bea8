//! Core CFDI 3.3 types, validation, and numbering.
//!
//! This module holds the document model of `cfdi:Comprobante`, the
//! table-driven validator, and the typestate that separates an editable
//! [`Invoice`] from a [`ValidatedInvoice`] and a sealed [`Cfdi`].

mod builder;
mod catalog;
mod config;
pub mod currencies;
mod document;
mod error;
mod money;
mod numbering;
pub mod patterns;
mod rules;
mod types;
mod validation;

pub use builder::*;
pub use catalog::*;
pub use config::*;
pub use document::*;
pub use error::*;
pub use money::*;
pub use numbering::*;
pub use rules::RuleId;
pub use types::*;
pub use validation::*;
