//! Simulated token for tests.
//!
//! Implements [`Token`] entirely in memory so certificate selection, the
//! signing callback and the orchestrator can run without a card reader.
//! Signatures are deterministic per (key, mechanism, data) and sized to the
//! simulated key's modulus, mirroring RSA PKCS#1 v1.5 behavior.

use std::cell::Cell;

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::signing::DigestAlgorithm;
use crate::token::{CertificateRecord, ObjectClass, ObjectTemplate, Token, TokenObject};

/// Default modulus size of simulated keys (RSA-2048).
const MODULUS_SIZE: usize = 256;

struct SimCertificate {
    id: Vec<u8>,
    subject: Vec<u8>,
    value: Vec<u8>,
    readable: bool,
}

struct SimKey {
    id: Vec<u8>,
    modulus_size: usize,
}

/// In-memory stand-in for a card token.
pub struct SimulatedToken {
    label: String,
    pin: String,
    token_present: bool,
    certificates: Vec<SimCertificate>,
    keys: Vec<SimKey>,
    authenticated: Cell<bool>,
    login_attempts: Cell<u32>,
    logout_calls: Cell<u32>,
    sign_calls: Cell<u32>,
    last_login_label: std::cell::RefCell<Option<String>>,
}

impl SimulatedToken {
    /// An empty token with label `SimCard` and PIN `1234`.
    pub fn new() -> Self {
        Self {
            label: "SimCard".to_string(),
            pin: "1234".to_string(),
            token_present: true,
            certificates: Vec::new(),
            keys: Vec::new(),
            authenticated: Cell::new(false),
            login_attempts: Cell::new(0),
            logout_calls: Cell::new(0),
            sign_calls: Cell::new(0),
            last_login_label: std::cell::RefCell::new(None),
        }
    }

    /// A token populated the way a typical personal signing card is: a CA
    /// certificate first (no surname in its subject), then the holder's
    /// personal certificate with a matching private key.
    pub fn with_personal_certificate() -> Self {
        Self::new()
            .with_certificate(b"\x01", include_bytes!("../../tests/data/ca.der"))
            .with_certificate(b"\x02", include_bytes!("../../tests/data/signer.der"))
            .with_key(b"\x02", MODULUS_SIZE)
    }

    /// A reader with no token in any slot.
    pub fn without_token() -> Self {
        let mut token = Self::new();
        token.token_present = false;
        token
    }

    /// Add a certificate object; the subject is extracted from the DER.
    pub fn with_certificate(mut self, id: &[u8], der: &[u8]) -> Self {
        let subject = subject_of(der);
        self.certificates.push(SimCertificate {
            id: id.to_vec(),
            subject,
            value: der.to_vec(),
            readable: true,
        });
        self
    }

    /// Add a certificate object whose attribute reads fail, as malformed or
    /// inaccessible card slots do.
    pub fn with_unreadable_certificate(mut self, id: &[u8]) -> Self {
        self.certificates.push(SimCertificate {
            id: id.to_vec(),
            subject: Vec::new(),
            value: Vec::new(),
            readable: false,
        });
        self
    }

    /// Add a private-key object.
    pub fn with_key(mut self, id: &[u8], modulus_size: usize) -> Self {
        self.keys.push(SimKey {
            id: id.to_vec(),
            modulus_size,
        });
        self
    }

    /// Override the (raw) token label.
    pub fn with_label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    /// Override the expected PIN.
    pub fn with_pin(mut self, pin: &str) -> Self {
        self.pin = pin.to_string();
        self
    }

    /// Key id of the personal certificate installed by
    /// [`with_personal_certificate`](Self::with_personal_certificate).
    pub fn personal_key_id(&self) -> Vec<u8> {
        vec![0x02]
    }

    /// Modulus size of the simulated keys, in bytes.
    pub fn modulus_size(&self) -> usize {
        MODULUS_SIZE
    }

    /// Number of login attempts the token has seen.
    pub fn login_attempts(&self) -> u32 {
        self.login_attempts.get()
    }

    /// Number of logout calls the token has seen.
    pub fn logout_calls(&self) -> u32 {
        self.logout_calls.get()
    }

    /// Number of sign-primitive invocations.
    pub fn sign_calls(&self) -> u32 {
        self.sign_calls.get()
    }

    /// Label passed to the most recent login call.
    pub fn last_login_label(&self) -> Option<String> {
        self.last_login_label.borrow().clone()
    }
}

impl Default for SimulatedToken {
    fn default() -> Self {
        Self::new()
    }
}

impl Token for SimulatedToken {
    fn token_labels(&self) -> Result<Vec<String>> {
        if self.token_present {
            Ok(vec![self.label.clone()])
        } else {
            Ok(Vec::new())
        }
    }

    fn login(&mut self, label: &str, pin: &str) -> Result<()> {
        self.login_attempts.set(self.login_attempts.get() + 1);
        *self.last_login_label.borrow_mut() = Some(label.to_string());

        if pin == self.pin {
            self.authenticated.set(true);
            Ok(())
        } else {
            Err(Error::IncorrectPin)
        }
    }

    fn logout(&mut self) -> Result<()> {
        self.logout_calls.set(self.logout_calls.get() + 1);
        self.authenticated.set(false);
        Ok(())
    }

    fn find_objects(&self, template: &ObjectTemplate<'_>) -> Result<Vec<TokenObject>> {
        // Handles encode (class, index) so attribute and sign calls can find
        // the object again without shared mutable state.
        let matches = |id: &[u8]| template.key_id.map_or(true, |wanted| wanted == id);

        let handles = match template.class {
            ObjectClass::Certificate => self
                .certificates
                .iter()
                .enumerate()
                .filter(|(_, c)| matches(&c.id))
                .map(|(i, _)| TokenObject(i as u64))
                .collect(),
            ObjectClass::PrivateKey => self
                .keys
                .iter()
                .enumerate()
                .filter(|(_, k)| matches(&k.id))
                .map(|(i, _)| TokenObject(0x1000 + i as u64))
                .collect(),
        };
        Ok(handles)
    }

    fn certificate_attributes(&self, object: TokenObject) -> Result<CertificateRecord> {
        let cert = self
            .certificates
            .get(object.0 as usize)
            .ok_or_else(|| Error::Token {
                code: "stale object handle".to_string(),
            })?;

        if !cert.readable {
            return Err(Error::Token {
                code: "CKR_ATTRIBUTE_SENSITIVE".to_string(),
            });
        }

        Ok(CertificateRecord {
            subject: cert.subject.clone(),
            value: cert.value.clone(),
            id: cert.id.clone(),
        })
    }

    fn sign(&self, key: TokenObject, digest: DigestAlgorithm, data: &[u8]) -> Result<Vec<u8>> {
        let index = (key.0 as usize).checked_sub(0x1000).ok_or_else(|| Error::Token {
            code: "stale object handle".to_string(),
        })?;
        let key = self.keys.get(index).ok_or_else(|| Error::Token {
            code: "stale object handle".to_string(),
        })?;

        self.sign_calls.set(self.sign_calls.get() + 1);

        // Deterministic, modulus-sized output, like PKCS#1 v1.5.
        let mut seed = Sha256::new();
        seed.update(&key.id);
        seed.update(digest.name().as_bytes());
        seed.update(data);
        let seed = seed.finalize();

        let mut signature = Vec::with_capacity(key.modulus_size);
        while signature.len() < key.modulus_size {
            signature.extend_from_slice(&seed);
        }
        signature.truncate(key.modulus_size);
        Ok(signature)
    }
}

fn subject_of(der: &[u8]) -> Vec<u8> {
    use x509_parser::prelude::FromDer;
    match x509_parser::certificate::X509Certificate::from_der(der) {
        Ok((_, cert)) => cert.tbs_certificate.subject.as_raw().to_vec(),
        Err(_) => Vec::new(),
    }
}
