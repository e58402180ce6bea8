use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, NaiveDateTime};
use rsa::RsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use x509_cert::der::{Decode, DecodePem, Encode};

use crate::core::CfdiError;

/// SAT-issued X.509 certificate (CSD for issuers, the SAT certificate for
/// stamps).
#[derive(Clone)]
pub struct Certificate {
    der: Vec<u8>,
    number: String,
    subject: String,
    public_key: RsaPublicKey,
    not_before: NaiveDateTime,
    not_after: NaiveDateTime,
}

fn cert_err(e: impl std::fmt::Display) -> CfdiError {
    CfdiError::Certificate(e.to_string())
}

impl Certificate {
    pub fn from_der(der: &[u8]) -> Result<Self, CfdiError> {
        let cert = x509_cert::Certificate::from_der(der).map_err(cert_err)?;
        Self::from_parsed(cert, der.to_vec())
    }

    pub fn from_pem(pem: &str) -> Result<Self, CfdiError> {
        let cert = x509_cert::Certificate::from_pem(pem.as_bytes()).map_err(cert_err)?;
        let der = cert.to_der().map_err(cert_err)?;
        Self::from_parsed(cert, der)
    }

    /// Decode the `Certificado` attribute of a CFDI.
    pub fn from_base64(encoded: &str) -> Result<Self, CfdiError> {
        let compact: String = encoded.split_whitespace().collect();
        let der = STANDARD
            .decode(compact)
            .map_err(|e| CfdiError::Certificate(format!("Certificado is not valid base64: {e}")))?;
        Self::from_der(&der)
    }

    fn from_parsed(cert: x509_cert::Certificate, der: Vec<u8>) -> Result<Self, CfdiError> {
        let tbs = &cert.tbs_certificate;
        let spki = tbs.subject_public_key_info.to_der().map_err(cert_err)?;
        let public_key = RsaPublicKey::from_public_key_der(&spki)
            .map_err(|e| CfdiError::Certificate(format!("not an RSA certificate: {e}")))?;
        let validity = &tbs.validity;
        Ok(Self {
            number: serial_to_number(tbs.serial_number.as_bytes()),
            subject: tbs.subject.to_string(),
            public_key,
            not_before: to_naive(validity.not_before.to_unix_duration())?,
            not_after: to_naive(validity.not_after.to_unix_duration())?,
            der,
        })
    }

    /// `NoCertificado`: SAT packs the 20-digit number as ASCII in the
    /// serial. Other certificates fall back to upper-case hex.
    pub fn certificate_number(&self) -> &str {
        &self.number
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// `Certificado` attribute value.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.der)
    }

    pub fn not_before(&self) -> NaiveDateTime {
        self.not_before
    }

    pub fn not_after(&self) -> NaiveDateTime {
        self.not_after
    }

    /// Whether `at` (UTC) falls inside the validity window.
    pub fn is_within_validity(&self, at: NaiveDateTime) -> bool {
        at >= self.not_before && at <= self.not_after
    }
}

impl std::fmt::Debug for Certificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Certificate")
            .field("number", &self.number)
            .field("subject", &self.subject)
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}

fn serial_to_number(bytes: &[u8]) -> String {
    if !bytes.is_empty() && bytes.iter().all(u8::is_ascii_digit) {
        bytes.iter().map(|&b| b as char).collect()
    } else {
        bytes.iter().map(|b| format!("{b:02X}")).collect()
    }
}

fn to_naive(since_epoch: std::time::Duration) -> Result<NaiveDateTime, CfdiError> {
    let secs = i64::try_from(since_epoch.as_secs()).map_err(cert_err)?;
    DateTime::from_timestamp(secs, 0)
        .map(|d| d.naive_utc())
        .ok_or_else(|| CfdiError::Certificate("validity date out of range".into()))
}
