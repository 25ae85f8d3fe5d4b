//! Interface boundary to the CMS/PDF signature builder.
//!
//! The orchestrator hands the document, the metadata and a certificate
//! provider to a [`SignatureBackend`] and gets back the bytes to append to
//! the original file. The backend calls back into the provider synchronously,
//! zero or more times, while it assembles the signature; the callback must
//! not re-enter session login/logout (one session serves the whole run).

use crate::error::Result;
use crate::metadata::SignatureMetadata;
use crate::signing::DigestAlgorithm;

/// Certificate and signing capability consumed by the CMS builder.
pub trait SignatureProvider {
    /// The selected certificate as (key id, DER bytes).
    fn certificate(&self) -> (&[u8], &[u8]);

    /// Sign `data` with the private key identified by `key_id` using the
    /// `<digest>-with-RSA-PKCS#1v1.5` mechanism. Idempotent and free of side
    /// effects beyond the token's internal state.
    fn sign(&self, key_id: &[u8], data: &[u8], digest: DigestAlgorithm) -> Result<Vec<u8>>;
}

/// Builder of the embedded PDF signature.
pub trait SignatureBackend {
    /// Produce the signature bytes to append to `pdf`.
    ///
    /// `tsa_url` is passed through unmodified; `None` means no timestamp is
    /// requested.
    fn sign(
        &self,
        pdf: &[u8],
        metadata: &SignatureMetadata,
        digest: DigestAlgorithm,
        provider: &dyn SignatureProvider,
        tsa_url: Option<&str>,
    ) -> Result<Vec<u8>>;
}
