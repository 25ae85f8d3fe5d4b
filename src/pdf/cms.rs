//! CMS `SignedData` construction.
//!
//! Builds the detached PKCS#7/CMS structure embedded in the signature
//! dictionary: one `SignerInfo` with authenticated attributes (content-type,
//! signing-time, message-digest), the signer certificate, and optionally an
//! RFC 3161 timestamp token as an unsigned attribute.
//!
//! The signature value covers the DER `SET` of authenticated attributes and
//! is produced by the [`SignatureProvider`] callback; the token digests and
//! pads internally via the `<digest>-RSA-PKCS` mechanism, so the attribute
//! bytes are passed to it unhashed.

use chrono::{DateTime, Utc};
use x509_parser::prelude::FromDer;

use crate::backend::SignatureProvider;
use crate::error::{Error, Result};
use crate::pdf::tsa::Timestamper;
use crate::signing::DigestAlgorithm;

/// OID 1.2.840.113549.1.7.1 (id-data)
const OID_DATA: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x07, 0x01];
/// OID 1.2.840.113549.1.7.2 (id-signedData)
const OID_SIGNED_DATA: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x07, 0x02];
/// OID 1.2.840.113549.1.9.3 (content-type attribute)
const OID_CONTENT_TYPE: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x09, 0x03];
/// OID 1.2.840.113549.1.9.4 (message-digest attribute)
const OID_MESSAGE_DIGEST: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x09, 0x04];
/// OID 1.2.840.113549.1.9.5 (signing-time attribute)
const OID_SIGNING_TIME: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x09, 0x05];
/// OID 1.2.840.113549.1.1.1 (rsaEncryption)
const OID_RSA_ENCRYPTION: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x01, 0x01];
/// OID 1.2.840.113549.1.9.16.2.14 (id-aa-timeStampToken)
const OID_TIMESTAMP_TOKEN: &[u8] = &[
    0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x09, 0x10, 0x02, 0x0E,
];

/// Build the detached `SignedData`, wrapped in its `ContentInfo`.
///
/// `document_digest` is the digest of the signed byte ranges; it becomes the
/// message-digest attribute. The provider is called exactly once for the
/// signature over the authenticated attributes; when a timestamper is given
/// it is called once with the resulting signature value.
pub fn build_signed_data(
    document_digest: &[u8],
    digest: DigestAlgorithm,
    signing_time: DateTime<Utc>,
    provider: &dyn SignatureProvider,
    timestamper: Option<&dyn Timestamper>,
) -> Result<Vec<u8>> {
    let (key_id, certificate) = provider.certificate();
    let (issuer, serial) = issuer_and_serial(certificate)?;

    let signed_attrs = authenticated_attributes(document_digest, signing_time);
    let signature = provider.sign(key_id, &tlv(0x31, &signed_attrs), digest)?;

    let timestamp = match timestamper {
        Some(tsa) => Some(tsa.token(&signature)?),
        None => None,
    };

    let mut signer_info = Vec::new();
    signer_info.extend_from_slice(&integer(1));
    signer_info.extend_from_slice(&{
        let mut ias = Vec::new();
        ias.extend_from_slice(&issuer);
        ias.extend_from_slice(&tlv(0x02, &serial));
        tlv(0x30, &ias)
    });
    signer_info.extend_from_slice(&algorithm_identifier(digest.oid()));
    // authenticatedAttributes [0] IMPLICIT
    signer_info.extend_from_slice(&tlv(0xA0, &signed_attrs));
    signer_info.extend_from_slice(&algorithm_identifier(OID_RSA_ENCRYPTION));
    signer_info.extend_from_slice(&tlv(0x04, &signature));
    if let Some(token) = &timestamp {
        // unsignedAttributes [1] IMPLICIT, one timestampToken attribute
        let mut attr = Vec::new();
        attr.extend_from_slice(&tlv(0x06, OID_TIMESTAMP_TOKEN));
        attr.extend_from_slice(&tlv(0x31, token));
        signer_info.extend_from_slice(&tlv(0xA1, &tlv(0x30, &attr)));
    }
    let signer_info = tlv(0x30, &signer_info);

    let mut signed_data = Vec::new();
    signed_data.extend_from_slice(&integer(1));
    signed_data.extend_from_slice(&tlv(0x31, &algorithm_identifier(digest.oid())));
    // Detached: EncapsulatedContentInfo carries the type but no content.
    signed_data.extend_from_slice(&tlv(0x30, &tlv(0x06, OID_DATA)));
    // certificates [0] IMPLICIT
    signed_data.extend_from_slice(&tlv(0xA0, certificate));
    signed_data.extend_from_slice(&tlv(0x31, &signer_info));
    let signed_data = tlv(0x30, &signed_data);

    let mut content_info = Vec::new();
    content_info.extend_from_slice(&tlv(0x06, OID_SIGNED_DATA));
    content_info.extend_from_slice(&tlv(0xA0, &signed_data));
    Ok(tlv(0x30, &content_info))
}

/// The authenticated attributes as the content of a `SET OF` (sorted per
/// DER), without the outer tag.
fn authenticated_attributes(document_digest: &[u8], signing_time: DateTime<Utc>) -> Vec<u8> {
    let time = signing_time.format("%y%m%d%H%M%SZ").to_string();

    let mut attrs = vec![
        attribute(OID_CONTENT_TYPE, &tlv(0x06, OID_DATA)),
        attribute(OID_SIGNING_TIME, &tlv(0x17, time.as_bytes())),
        attribute(OID_MESSAGE_DIGEST, &tlv(0x04, document_digest)),
    ];
    // DER SET OF orders elements by their encoding.
    attrs.sort();
    attrs.concat()
}

/// Attribute := SEQUENCE { type OID, values SET { value } }
fn attribute(oid: &[u8], value: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&tlv(0x06, oid));
    body.extend_from_slice(&tlv(0x31, value));
    tlv(0x30, &body)
}

/// Raw issuer `Name` and serial content bytes of a DER certificate.
fn issuer_and_serial(certificate: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    let (_, cert) = x509_parser::certificate::X509Certificate::from_der(certificate)
        .map_err(|e| Error::Certificate(e.to_string()))?;
    Ok((
        cert.tbs_certificate.issuer.as_raw().to_vec(),
        cert.tbs_certificate.raw_serial().to_vec(),
    ))
}

/// AlgorithmIdentifier := SEQUENCE { OID, NULL }
fn algorithm_identifier(oid: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&tlv(0x06, oid));
    body.extend_from_slice(&[0x05, 0x00]);
    tlv(0x30, &body)
}

/// Small non-negative INTEGER.
fn integer(value: u8) -> Vec<u8> {
    tlv(0x02, &[value])
}

/// One DER TLV.
pub(crate) fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + 4);
    out.push(tag);
    out.extend_from_slice(&encode_length(content.len()));
    out.extend_from_slice(content);
    out
}

/// DER definite-form length octets.
pub(crate) fn encode_length(length: usize) -> Vec<u8> {
    if length < 0x80 {
        vec![length as u8]
    } else {
        let bytes = length.to_be_bytes();
        let skip = bytes.iter().take_while(|&&b| b == 0).count();
        let mut out = vec![0x80 | (bytes.len() - skip) as u8];
        out.extend_from_slice(&bytes[skip..]);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SIGNER_DER: &[u8] = include_bytes!("../../tests/data/signer.der");

    struct FakeProvider;

    impl SignatureProvider for FakeProvider {
        fn certificate(&self) -> (&[u8], &[u8]) {
            (b"\x02", SIGNER_DER)
        }

        fn sign(&self, _key_id: &[u8], data: &[u8], digest: DigestAlgorithm) -> Result<Vec<u8>> {
            // Deterministic stand-in sized like RSA-2048.
            let mut out = digest.digest(data);
            while out.len() < 256 {
                let more = out.clone();
                out.extend_from_slice(&more);
            }
            out.truncate(256);
            Ok(out)
        }
    }

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }

    #[test]
    fn test_encode_length() {
        assert_eq!(encode_length(0x2A), vec![0x2A]);
        assert_eq!(encode_length(0x7F), vec![0x7F]);
        assert_eq!(encode_length(0x80), vec![0x81, 0x80]);
        assert_eq!(encode_length(0x1234), vec![0x82, 0x12, 0x34]);
    }

    #[test]
    fn test_tlv_framing() {
        assert_eq!(tlv(0x04, b"ab"), vec![0x04, 0x02, b'a', b'b']);
    }

    #[test]
    fn test_signed_data_skeleton() {
        let digest = [0xAAu8; 32];
        let time = Utc.with_ymd_and_hms(2024, 3, 7, 16, 45, 9).unwrap();
        let cms =
            build_signed_data(&digest, DigestAlgorithm::Sha256, time, &FakeProvider, None).unwrap();

        // Outer SEQUENCE wrapping the signedData content type.
        assert_eq!(cms[0], 0x30);
        assert!(contains(&cms, OID_SIGNED_DATA));
        // The signer certificate is embedded whole.
        assert!(contains(&cms, SIGNER_DER));
        // The message-digest attribute carries the document digest.
        assert!(contains(&cms, &digest));
        // UTCTime of the signing-time attribute.
        assert!(contains(&cms, b"240307164509Z"));
    }

    #[test]
    fn test_signed_data_is_deterministic() {
        let digest = [0x11u8; 32];
        let time = Utc.with_ymd_and_hms(2024, 3, 7, 16, 45, 9).unwrap();
        let a = build_signed_data(&digest, DigestAlgorithm::Sha256, time, &FakeProvider, None)
            .unwrap();
        let b = build_signed_data(&digest, DigestAlgorithm::Sha256, time, &FakeProvider, None)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_timestamp_token_is_attached() {
        struct FixedTsa;
        impl Timestamper for FixedTsa {
            fn token(&self, _signature: &[u8]) -> Result<Vec<u8>> {
                Ok(b"\x30\x06TOKEN!".to_vec())
            }
        }

        let digest = [0x22u8; 32];
        let time = Utc.with_ymd_and_hms(2024, 3, 7, 16, 45, 9).unwrap();
        let cms = build_signed_data(
            &digest,
            DigestAlgorithm::Sha256,
            time,
            &FakeProvider,
            Some(&FixedTsa),
        )
        .unwrap();

        assert!(contains(&cms, OID_TIMESTAMP_TOKEN));
        assert!(contains(&cms, b"TOKEN!"));
    }

    #[test]
    fn test_authenticated_attributes_are_der_sorted() {
        let attrs = authenticated_attributes(
            &[0x33u8; 32],
            Utc.with_ymd_and_hms(2024, 3, 7, 16, 45, 9).unwrap(),
        );

        // Walk the concatenated attribute encodings and check ordering.
        let mut encodings = Vec::new();
        let mut pos = 0;
        while pos < attrs.len() {
            let len = attrs[pos + 1] as usize; // attribute encodings are short-form here
            encodings.push(attrs[pos..pos + 2 + len].to_vec());
            pos += 2 + len;
        }
        assert_eq!(encodings.len(), 3);
        let mut sorted = encodings.clone();
        sorted.sort();
        assert_eq!(encodings, sorted);
    }
}
