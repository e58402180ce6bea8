use thiserror::Error;

use super::rules::RuleId;

/// Errors that can occur while building, sealing, verifying or parsing a CFDI.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CfdiError {
    /// One or more validation rules failed. The list is complete, never
    /// truncated to the first failure.
    #[error("validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),

    /// Builder encountered invalid or missing configuration.
    #[error("builder error: {0}")]
    Builder(String),

    /// The cadena original was requested for data that cannot produce one
    /// (e.g. an unsealed document on the verification path).
    #[error("canonicalization precondition violated: {0}")]
    CanonicalizationPrecondition(String),

    /// Private key is malformed or cannot be used for signing.
    #[error("signing error: {0}")]
    Signing(String),

    /// Certificate could not be decoded or does not hold a usable RSA key.
    #[error("certificate error: {0}")]
    Certificate(String),

    /// The seal does not authenticate the document.
    #[error("verification failed: {0}")]
    Verification(VerificationFailure),

    /// Malformed wire bytes.
    #[error("XML parse error at byte {position}: {message}")]
    Parse { position: u64, message: String },

    /// XML generation error.
    #[error("XML error: {0}")]
    Xml(String),

    /// Attempt to turn a received document back into an editable draft.
    #[error("cannot reopen document: {0}")]
    Reopen(String),

    /// The stamp slot rejected a provider stamp.
    #[error("stamp error: {0}")]
    Stamp(String),
}

/// Reason a seal failed to verify.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationFailure {
    /// The document carries no seal.
    Unsealed,
    /// `NoCertificado` is not a 20-digit SAT certificate number.
    MalformedCertificateNumber(String),
    /// `NoCertificado` does not name the certificate supplied for verification.
    CertificateMismatch { expected: String, found: String },
    /// `Sello` is not valid base64.
    MalformedSeal(String),
    /// The signature does not match the recomputed cadena original.
    SignatureMismatch,
    /// The certificate was rejected by the certificate authority.
    CertificateRejected(String),
}

impl std::fmt::Display for VerificationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unsealed => write!(f, "document is not sealed"),
            Self::MalformedCertificateNumber(number) => {
                write!(f, "NoCertificado '{number}' is not a 20-digit number")
            }
            Self::CertificateMismatch { expected, found } => write!(
                f,
                "NoCertificado {found} does not match certificate {expected}"
            ),
            Self::MalformedSeal(e) => write!(f, "Sello is not valid base64: {e}"),
            Self::SignatureMismatch => {
                write!(f, "signature does not match the cadena original")
            }
            Self::CertificateRejected(reason) => write!(f, "certificate rejected: {reason}"),
        }
    }
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// A single validation error with field path, rule and message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dot-separated path to the invalid field (e.g. "items[0].taxes.transferred[1].rate").
    pub field: String,
    /// Rule that produced the error.
    pub rule: RuleId,
    /// Human-readable error description.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.rule.code(), self.field, self.message)
    }
}

impl ValidationError {
    pub fn new(field: impl Into<String>, rule: RuleId, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            rule,
            message: message.into(),
        }
    }
}
