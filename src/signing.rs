//! The signing callback invoked by the CMS builder.
//!
//! The CMS/PDF backend never sees the private key. It receives a
//! [`SignatureProvider`](crate::backend::SignatureProvider) and calls back
//! into it, possibly more than once per run, while assembling the signature.
//! The callback looks up the private-key object paired with the selected
//! certificate and asks the token to sign with the matching
//! `<digest>-with-RSA-PKCS#1v1.5` mechanism.

use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::backend::SignatureProvider;
use crate::certificate::SelectedCertificate;
use crate::error::{Error, Result};
use crate::token::{ObjectClass, ObjectTemplate, Token};

/// Digest algorithm used for signing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DigestAlgorithm {
    /// SHA-1 (deprecated, but still accepted by some TSAs and legacy profiles)
    Sha1,
    /// SHA-256 (recommended)
    #[default]
    Sha256,
    /// SHA-384
    Sha384,
    /// SHA-512
    Sha512,
}

impl DigestAlgorithm {
    /// Get the DER-encoded OID body for this digest algorithm.
    pub fn oid(&self) -> &'static [u8] {
        match self {
            DigestAlgorithm::Sha1 => &[0x2B, 0x0E, 0x03, 0x02, 0x1A], // 1.3.14.3.2.26
            DigestAlgorithm::Sha256 => &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01], // 2.16.840.1.101.3.4.2.1
            DigestAlgorithm::Sha384 => &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x02], // 2.16.840.1.101.3.4.2.2
            DigestAlgorithm::Sha512 => &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x03], // 2.16.840.1.101.3.4.2.3
        }
    }

    /// Get the name of this algorithm.
    pub fn name(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha1 => "SHA-1",
            DigestAlgorithm::Sha256 => "SHA-256",
            DigestAlgorithm::Sha384 => "SHA-384",
            DigestAlgorithm::Sha512 => "SHA-512",
        }
    }

    /// Compute the digest of `data` with this algorithm.
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            DigestAlgorithm::Sha1 => {
                let mut hasher = Sha1::new();
                hasher.update(data);
                hasher.finalize().to_vec()
            },
            DigestAlgorithm::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(data);
                hasher.finalize().to_vec()
            },
            DigestAlgorithm::Sha384 => {
                let mut hasher = Sha384::new();
                hasher.update(data);
                hasher.finalize().to_vec()
            },
            DigestAlgorithm::Sha512 => {
                let mut hasher = Sha512::new();
                hasher.update(data);
                hasher.finalize().to_vec()
            },
        }
    }
}

impl std::str::FromStr for DigestAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha1" | "sha-1" => Ok(DigestAlgorithm::Sha1),
            "sha256" | "sha-256" => Ok(DigestAlgorithm::Sha256),
            "sha384" | "sha-384" => Ok(DigestAlgorithm::Sha384),
            "sha512" | "sha-512" => Ok(DigestAlgorithm::Sha512),
            other => Err(format!("unknown digest algorithm: {}", other)),
        }
    }
}

/// Sign `data` with the private key matching `key_id` on the token.
///
/// Looks up the private-key object by class and key id; returns
/// [`Error::KeyNotFound`] when no object matches (a key-id mismatch between
/// the certificate and key objects is a token data-integrity problem, not an
/// expected state). The data is passed to the token unmodified; the
/// `<digest>-RSA-PKCS` mechanism digests and pads inside the token.
pub fn sign_with_key<T: Token>(
    token: &T,
    key_id: &[u8],
    digest: DigestAlgorithm,
    data: &[u8],
) -> Result<Vec<u8>> {
    let handles = token.find_objects(&ObjectTemplate {
        class: ObjectClass::PrivateKey,
        key_id: Some(key_id),
    })?;

    let key = handles.first().copied().ok_or(Error::KeyNotFound)?;
    token.sign(key, digest, data)
}

/// Certificate-and-callback bundle handed to the CMS backend.
///
/// Borrows the authenticated session's token; neither the certificate nor
/// the signer outlives the session that produced them.
pub struct CardSigner<'a, T: Token> {
    token: &'a T,
    certificate: &'a SelectedCertificate,
}

impl<'a, T: Token> CardSigner<'a, T> {
    /// Bundle a token session and its selected certificate.
    pub fn new(token: &'a T, certificate: &'a SelectedCertificate) -> Self {
        Self { token, certificate }
    }
}

impl<T: Token> SignatureProvider for CardSigner<'_, T> {
    fn certificate(&self) -> (&[u8], &[u8]) {
        (&self.certificate.key_id, &self.certificate.der)
    }

    fn sign(&self, key_id: &[u8], data: &[u8], digest: DigestAlgorithm) -> Result<Vec<u8>> {
        sign_with_key(self.token, key_id, digest, data)
    }
}
