//! RFC 3161 time-stamp authority client.
//!
//! Sends a `TimeStampReq` for the signature value and returns the DER
//! `TimeStampToken` from the response, which the CMS builder attaches as an
//! unsigned attribute. The request asks the TSA to include its certificate
//! so the token verifies on its own.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::pdf::cms::tlv;
use crate::signing::DigestAlgorithm;

/// Supplies a timestamp token for a signature value.
pub trait Timestamper {
    /// Obtain a DER `TimeStampToken` covering `signature`.
    fn token(&self, signature: &[u8]) -> Result<Vec<u8>>;
}

/// HTTP time-stamp authority endpoint.
#[derive(Debug, Clone)]
pub struct HttpTsa {
    url: String,
    digest: DigestAlgorithm,
    timeout: Duration,
}

impl HttpTsa {
    /// A client for the TSA at `url`, hashing the signature with `digest`.
    pub fn new(url: impl Into<String>, digest: DigestAlgorithm) -> Self {
        Self {
            url: url.into(),
            digest,
            timeout: Duration::from_secs(30),
        }
    }
}

impl Timestamper for HttpTsa {
    fn token(&self, signature: &[u8]) -> Result<Vec<u8>> {
        let request = timestamp_request(&self.digest.digest(signature), self.digest);

        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| Error::Tsa(e.to_string()))?;

        log::debug!("requesting timestamp from {}", self.url);
        let response = client
            .post(&self.url)
            .header("Content-Type", "application/timestamp-query")
            .body(request)
            .send()
            .map_err(|e| Error::Tsa(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::Tsa(format!("{} returned {}", self.url, response.status())));
        }

        let body = response.bytes().map_err(|e| Error::Tsa(e.to_string()))?;
        extract_token(&body)
    }
}

/// Build a DER `TimeStampReq` for a message imprint.
fn timestamp_request(imprint: &[u8], digest: DigestAlgorithm) -> Vec<u8> {
    let mut algorithm = Vec::new();
    algorithm.extend_from_slice(&tlv(0x06, digest.oid()));
    algorithm.extend_from_slice(&[0x05, 0x00]);

    let mut message_imprint = Vec::new();
    message_imprint.extend_from_slice(&tlv(0x30, &algorithm));
    message_imprint.extend_from_slice(&tlv(0x04, imprint));

    let mut request = Vec::new();
    request.extend_from_slice(&tlv(0x02, &[1])); // version
    request.extend_from_slice(&tlv(0x30, &message_imprint));
    request.extend_from_slice(&[0x01, 0x01, 0xFF]); // certReq TRUE
    tlv(0x30, &request)
}

/// Pull the `TimeStampToken` out of a DER `TimeStampResp`.
fn extract_token(response: &[u8]) -> Result<Vec<u8>> {
    let (tag, content, _) = read_tlv(response)?;
    if tag != 0x30 {
        return Err(Error::Tsa("response is not a TimeStampResp".to_string()));
    }

    // PKIStatusInfo, then the optional token.
    let (tag, status_info, token) = read_tlv(content)?;
    if tag != 0x30 {
        return Err(Error::Tsa("malformed PKIStatusInfo".to_string()));
    }
    let (tag, status, _) = read_tlv(status_info)?;
    if tag != 0x02 || status.is_empty() {
        return Err(Error::Tsa("malformed PKIStatus".to_string()));
    }
    // 0 = granted, 1 = grantedWithMods
    if status[0] > 1 {
        return Err(Error::Tsa(format!("request rejected with status {}", status[0])));
    }

    let (tag, _, rest) = read_tlv(token)?;
    if tag != 0x30 {
        return Err(Error::Tsa("response carries no token".to_string()));
    }
    Ok(token[..token.len() - rest.len()].to_vec())
}

/// Read one TLV: tag, content, and the bytes after it.
fn read_tlv(data: &[u8]) -> Result<(u8, &[u8], &[u8])> {
    let malformed = || Error::Tsa("truncated DER in response".to_string());

    let &tag = data.first().ok_or_else(malformed)?;
    let &first = data.get(1).ok_or_else(malformed)?;

    let (length, header) = if first < 0x80 {
        (first as usize, 2)
    } else {
        let count = (first & 0x7F) as usize;
        if count == 0 || count > 4 || data.len() < 2 + count {
            return Err(malformed());
        }
        let mut length = 0usize;
        for &byte in &data[2..2 + count] {
            length = (length << 8) | byte as usize;
        }
        (length, 2 + count)
    };

    if data.len() < header + length {
        return Err(malformed());
    }
    Ok((tag, &data[header..header + length], &data[header + length..]))
}
