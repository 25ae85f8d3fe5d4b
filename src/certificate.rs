//! Certificate selection.
//!
//! A personal signing card typically carries several certificates: the
//! holder's signing certificate, authentication certificates, CA
//! certificates. The selection policy picks the first enumerated certificate
//! whose subject contains a surname attribute (OID 2.5.4.4), the field that
//! distinguishes a person's certificate from the card's other objects.
//!
//! Enumeration order is token-defined and not guaranteed stable across
//! tokens; when several certificates carry a surname the first one wins.
//! This is a known limitation of the policy, not a guarantee of picking
//! "the" personal certificate.

use x509_parser::der_parser::{oid, oid::Oid};
use x509_parser::prelude::FromDer;
use x509_parser::x509::X509Name;

use crate::error::{Error, Result};
use crate::token::{ObjectClass, ObjectTemplate, Token};

const OID_SURNAME: Oid<'static> = oid!(2.5.4.4);

/// The certificate chosen for signing, produced once per session.
#[derive(Debug, Clone)]
pub struct SelectedCertificate {
    /// Key identifier pairing the certificate with its private-key object
    pub key_id: Vec<u8>,
    /// Raw DER certificate bytes
    pub der: Vec<u8>,
    /// Subject common name, used for the default stamp text
    pub common_name: String,
}

/// Enumerate the token's certificates and select the signing certificate.
///
/// Objects whose attributes cannot be fetched are skipped (a card may expose
/// malformed or inaccessible certificate slots); a subject that fetches but
/// does not parse is a real encoding problem and propagates as
/// [`Error::Certificate`]. Completing enumeration without a match yields
/// [`Error::NoMatchingCertificate`].
pub fn select_signing_certificate<T: Token>(token: &T) -> Result<SelectedCertificate> {
    let handles = token.find_objects(&ObjectTemplate {
        class: ObjectClass::Certificate,
        key_id: None,
    })?;

    for handle in handles {
        let record = match token.certificate_attributes(handle) {
            Ok(record) => record,
            Err(e) => {
                log::debug!("skipping certificate object: {}", e);
                continue;
            },
        };

        let (_, subject) = X509Name::from_der(&record.subject)
            .map_err(|e| Error::Certificate(e.to_string()))?;

        if subject.iter_by_oid(&OID_SURNAME).next().is_none() {
            continue;
        }

        let common_name = subject
            .iter_common_name()
            .next()
            .and_then(|attr| attr.as_str().ok())
            .unwrap_or_default()
            .to_string();

        log::info!("selected signing certificate: {}", common_name);
        return Ok(SelectedCertificate {
            key_id: record.id,
            der: record.value,
            common_name,
        });
    }

    Err(Error::NoMatchingCertificate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::testing::SimulatedToken;

    const SIGNER_DER: &[u8] = include_bytes!("../tests/data/signer.der");
    const CA_DER: &[u8] = include_bytes!("../tests/data/ca.der");

    #[test]
    fn test_selects_certificate_with_surname() {
        let token = SimulatedToken::with_personal_certificate();
        let cert = select_signing_certificate(&token).unwrap();
        assert_eq!(cert.key_id, vec![0x02]);
        assert_eq!(cert.common_name, "JOHN PAPADOPOULOS");
        assert_eq!(cert.der, SIGNER_DER);
    }

    #[test]
    fn test_selection_is_position_independent() {
        // Personal certificate first, CA afterwards.
        let token = SimulatedToken::new()
            .with_certificate(b"\x0a", SIGNER_DER)
            .with_certificate(b"\x0b", CA_DER)
            .with_key(b"\x0a", 256);

        let cert = select_signing_certificate(&token).unwrap();
        assert_eq!(cert.key_id, vec![0x0a]);
    }

    #[test]
    fn test_no_surname_means_no_match() {
        let token = SimulatedToken::new().with_certificate(b"\x01", CA_DER);
        let result = select_signing_certificate(&token);
        assert!(matches!(result, Err(Error::NoMatchingCertificate)));
    }

    #[test]
    fn test_empty_token_means_no_match() {
        let token = SimulatedToken::new();
        let result = select_signing_certificate(&token);
        assert!(matches!(result, Err(Error::NoMatchingCertificate)));
    }

    #[test]
    fn test_unreadable_objects_are_skipped() {
        let token = SimulatedToken::new()
            .with_unreadable_certificate(b"\x01")
            .with_certificate(b"\x02", SIGNER_DER)
            .with_key(b"\x02", 256);

        let cert = select_signing_certificate(&token).unwrap();
        assert_eq!(cert.key_id, vec![0x02]);
    }
}
