//! Digital seal (`Sello`): RSA PKCS#1 v1.5 / SHA-256 over the cadena
//! original, plus the issuing pipeline and seal verification.
//!
//! ```no_run
//! use cfdi::core::*;
//! use cfdi::sello::{self, Certificate, PrivateKey};
//!
//! # fn run(invoice: Invoice, catalogs: &StaticCatalog) -> Result<(), CfdiError> {
//! let certificate = Certificate::from_der(&std::fs::read("csd.cer").unwrap())?;
//! let key = PrivateKey::from_encrypted_pkcs8_der(&std::fs::read("csd.key").unwrap(), "12345678a")?;
//!
//! let cfdi = sello::issue(invoice, catalogs, &ValidationConfig::default(), &certificate, &key)?;
//! sello::verify(&cfdi, &certificate)?;
//! # Ok(())
//! # }
//! ```

mod certificate;
mod key;

pub use certificate::Certificate;
pub use key::PrivateKey;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rsa::Pkcs1v15Sign;
use sha2::{Digest, Sha256};

use crate::cadena::{self, CadenaOriginal};
use crate::core::{
    CatalogProvider, Cfdi, CfdiError, Invoice, Seal, ValidatedInvoice, ValidationConfig,
    VerificationFailure, patterns,
};

/// Revocation and trust decisions about certificates, supplied by the
/// application (SAT's LCO list, OCSP, a local trust store, ...).
pub trait CertificateAuthority {
    /// Not revoked and inside its validity window right now.
    fn is_currently_valid(&self, certificate: &Certificate) -> bool;
    /// Chains up to a SAT root the application trusts.
    fn chain_trusted(&self, certificate: &Certificate) -> bool;
}

/// Sign a cadena original.
pub fn seal(cadena: &CadenaOriginal, key: &PrivateKey) -> Result<Vec<u8>, CfdiError> {
    key.sign(cadena.as_bytes())
}

/// Check a raw signature over a cadena original.
pub fn verify_signature(
    cadena: &CadenaOriginal,
    signature: &[u8],
    certificate: &Certificate,
) -> Result<(), CfdiError> {
    let digest = Sha256::digest(cadena.as_bytes());
    certificate
        .public_key()
        .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature)
        .map_err(|_| CfdiError::Verification(VerificationFailure::SignatureMismatch))
}

/// Validate, canonicalize and seal an invoice.
///
/// The certificate's number is bound into the cadena original, so it must
/// be the certificate that pairs with `key`.
pub fn issue<C: CatalogProvider + ?Sized>(
    invoice: Invoice,
    catalogs: &C,
    config: &ValidationConfig,
    certificate: &Certificate,
    key: &PrivateKey,
) -> Result<Cfdi, CfdiError> {
    let validated = ValidatedInvoice::new(invoice, catalogs, config).inspect_err(|e| {
        if let CfdiError::Validation(errors) = e {
            tracing::debug!(violations = errors.len(), "invoice rejected by validator");
        }
    })?;
    seal_validated(validated, certificate, key)
}

/// Seal an already validated invoice.
pub fn seal_validated(
    validated: ValidatedInvoice,
    certificate: &Certificate,
    key: &PrivateKey,
) -> Result<Cfdi, CfdiError> {
    let number = certificate.certificate_number();
    if !patterns::is_certificate_number(number) {
        return Err(CfdiError::Signing(format!(
            "certificate serial {number} is not a 20-digit SAT certificate number"
        )));
    }
    if !key.matches(certificate) {
        return Err(CfdiError::Signing(format!(
            "private key does not belong to certificate {number}"
        )));
    }

    let cadena = cadena::canonicalize(&validated, number);
    tracing::debug!(
        certificate = %number,
        cadena_len = cadena.as_str().len(),
        "canonicalized invoice"
    );

    let signature = seal(&cadena, key)?;
    tracing::debug!(certificate = %number, "invoice sealed");

    Ok(Cfdi::issued(
        validated.into_invoice(),
        Seal {
            certificate_number: number.to_string(),
            certificate: certificate.to_base64(),
            signature: STANDARD.encode(signature),
        },
    ))
}

/// Verify the seal of a document against the issuer's certificate.
///
/// Recomputes the cadena original from the document's own content. Any
/// change to a canonical field after sealing makes this fail.
pub fn verify(cfdi: &Cfdi, certificate: &Certificate) -> Result<(), CfdiError> {
    let seal = cfdi
        .seal()
        .ok_or(CfdiError::Verification(VerificationFailure::Unsealed))?;

    check_certificate_number(&seal.certificate_number)?;
    if seal.certificate_number != certificate.certificate_number() {
        return Err(CfdiError::Verification(
            VerificationFailure::CertificateMismatch {
                expected: certificate.certificate_number().to_string(),
                found: seal.certificate_number.clone(),
            },
        ));
    }

    let signature = decode_seal(&seal.signature)?;
    let cadena = CadenaOriginal::of_sealed(cfdi)?;
    verify_signature(&cadena, &signature, certificate)
}

/// Verify against the certificate embedded in the `Certificado` attribute.
/// Returns that certificate so the caller can check who issued it.
pub fn verify_embedded(cfdi: &Cfdi) -> Result<Certificate, CfdiError> {
    let seal = cfdi
        .seal()
        .ok_or(CfdiError::Verification(VerificationFailure::Unsealed))?;
    let certificate = Certificate::from_base64(&seal.certificate)?;
    verify(cfdi, &certificate)?;
    Ok(certificate)
}

/// [`verify`] plus the authority's revocation and trust decisions.
pub fn verify_with_authority<A: CertificateAuthority + ?Sized>(
    cfdi: &Cfdi,
    certificate: &Certificate,
    authority: &A,
) -> Result<(), CfdiError> {
    if !authority.is_currently_valid(certificate) {
        return Err(CfdiError::Verification(
            VerificationFailure::CertificateRejected(format!(
                "certificate {} is revoked or expired",
                certificate.certificate_number()
            )),
        ));
    }
    if !authority.chain_trusted(certificate) {
        return Err(CfdiError::Verification(
            VerificationFailure::CertificateRejected(format!(
                "certificate {} does not chain to a trusted root",
                certificate.certificate_number()
            )),
        ));
    }
    verify(cfdi, certificate)
}

/// Verify the `SelloSAT` of an attached stamp with SAT's certificate.
pub fn verify_stamp(cfdi: &Cfdi, sat_certificate: &Certificate) -> Result<(), CfdiError> {
    let stamp = cfdi
        .stamp()
        .ok_or_else(|| CfdiError::Stamp("document carries no TimbreFiscalDigital".into()))?;

    check_certificate_number(&stamp.sat_certificate_number)?;
    if stamp.sat_certificate_number != sat_certificate.certificate_number() {
        return Err(CfdiError::Verification(
            VerificationFailure::CertificateMismatch {
                expected: sat_certificate.certificate_number().to_string(),
                found: stamp.sat_certificate_number.clone(),
            },
        ));
    }

    let signature = decode_seal(&stamp.sat_seal)?;
    verify_signature(&stamp.cadena_original(), &signature, sat_certificate)
}

fn decode_seal(encoded: &str) -> Result<Vec<u8>, CfdiError> {
    let compact: String = encoded.split_whitespace().collect();
    STANDARD.decode(compact).map_err(|e| {
        CfdiError::Verification(VerificationFailure::MalformedSeal(e.to_string()))
    })
}

fn check_certificate_number(number: &str) -> Result<(), CfdiError> {
    if patterns::is_certificate_number(number) {
        Ok(())
    } else {
        Err(CfdiError::Verification(
            VerificationFailure::MalformedCertificateNumber(number.to_string()),
        ))
    }
}
