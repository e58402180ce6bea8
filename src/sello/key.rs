use rsa::pkcs8::{DecodePrivateKey, EncodePublicKey};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use super::certificate::Certificate;
use crate::core::CfdiError;

/// Issuer's CSD private key.
///
/// SAT distributes it as a password-protected PKCS#8 DER file (`.key`).
/// The key material is zeroized when the value is dropped and never shows
/// up in `Debug` output.
pub struct PrivateKey {
    inner: RsaPrivateKey,
}

impl PrivateKey {
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self, CfdiError> {
        RsaPrivateKey::from_pkcs8_der(der)
            .map(|inner| Self { inner })
            .map_err(|e| CfdiError::Signing(format!("invalid PKCS#8 key: {e}")))
    }

    pub fn from_pkcs8_pem(pem: &str) -> Result<Self, CfdiError> {
        RsaPrivateKey::from_pkcs8_pem(pem)
            .map(|inner| Self { inner })
            .map_err(|e| CfdiError::Signing(format!("invalid PKCS#8 PEM key: {e}")))
    }

    /// Decrypt a SAT `.key` file (encrypted PKCS#8 DER).
    pub fn from_encrypted_pkcs8_der(
        der: &[u8],
        password: impl AsRef<[u8]>,
    ) -> Result<Self, CfdiError> {
        RsaPrivateKey::from_pkcs8_encrypted_der(der, password)
            .map(|inner| Self { inner })
            .map_err(|e| CfdiError::Signing(format!("cannot decrypt private key: {e}")))
    }

    pub fn public_key(&self) -> RsaPublicKey {
        self.inner.to_public_key()
    }

    /// Whether this key pairs with the certificate's public key.
    pub fn matches(&self, certificate: &Certificate) -> bool {
        let ours = self.public_key().to_public_key_der();
        let theirs = certificate.public_key().to_public_key_der();
        match (ours, theirs) {
            (Ok(a), Ok(b)) => a.as_bytes() == b.as_bytes(),
            _ => false,
        }
    }

    /// RSA PKCS#1 v1.5 signature over the SHA-256 digest of `message`.
    pub(crate) fn sign(&self, message: &[u8]) -> Result<Vec<u8>, CfdiError> {
        let digest = Sha256::digest(message);
        self.inner
            .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
            .map_err(|e| CfdiError::Signing(e.to_string()))
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey").finish_non_exhaustive()
    }
}
