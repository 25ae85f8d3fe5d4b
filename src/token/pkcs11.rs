//! PKCS#11 driver binding.
//!
//! Thin failure-translating layer over the `cryptoki` crate. Driver load and
//! slot discovery happen in [`Pkcs11Token::open`]; a read-only session is
//! opened against the matching slot at login time. PIN mismatches map to
//! [`Error::IncorrectPin`]; every other token-level failure surfaces as
//! [`Error::Token`] carrying the driver's return code.

use std::cell::RefCell;
use std::path::Path;

use cryptoki::context::{CInitializeArgs, Pkcs11};
use cryptoki::error::{Error as CkError, RvError};
use cryptoki::mechanism::Mechanism;
use cryptoki::object::{Attribute, AttributeType, ObjectClass as CkObjectClass, ObjectHandle};
use cryptoki::session::{Session, UserType};
use cryptoki::slot::Slot;
use cryptoki::types::AuthPin;

use crate::error::{Error, Result};
use crate::signing::DigestAlgorithm;
use crate::token::{CertificateRecord, ObjectClass, ObjectTemplate, Token, TokenObject};

/// Card token accessed through a dynamically loaded PKCS#11 driver.
pub struct Pkcs11Token {
    pkcs11: Pkcs11,
    session: Option<Session>,
    // cryptoki exposes no way to rebuild an ObjectHandle from a raw value,
    // so handles returned by find_objects are kept here and TokenObject
    // carries the index.
    handles: RefCell<Vec<ObjectHandle>>,
}

impl std::fmt::Debug for Pkcs11Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pkcs11Token")
            .field("session", &self.session.is_some())
            .finish_non_exhaustive()
    }
}

impl Pkcs11Token {
    /// Load and initialize the PKCS#11 driver at `driver_path`.
    pub fn open(driver_path: &Path) -> Result<Self> {
        let pkcs11 = Pkcs11::new(driver_path).map_err(|e| Error::DriverLoad {
            path: driver_path.to_path_buf(),
            reason: e.to_string(),
        })?;

        pkcs11
            .initialize(CInitializeArgs::OsThreads)
            .map_err(|e| Error::DriverLoad {
                path: driver_path.to_path_buf(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            pkcs11,
            session: None,
            handles: RefCell::new(Vec::new()),
        })
    }

    fn slots(&self) -> Result<Vec<Slot>> {
        self.pkcs11.get_slots_with_token().map_err(token_err)
    }

    fn slot_label(&self, slot: Slot) -> Result<String> {
        let info = self.pkcs11.get_token_info(slot).map_err(token_err)?;
        Ok(info.label().to_string())
    }

    fn session(&self) -> Result<&Session> {
        self.session.as_ref().ok_or_else(|| Error::Token {
            code: "no open session".to_string(),
        })
    }
}

impl Token for Pkcs11Token {
    fn token_labels(&self) -> Result<Vec<String>> {
        self.slots()?
            .into_iter()
            .map(|slot| self.slot_label(slot))
            .collect()
    }

    fn login(&mut self, label: &str, pin: &str) -> Result<()> {
        let mut matching = None;
        for slot in self.slots()? {
            if trimmed(&self.slot_label(slot)?) == label {
                matching = Some(slot);
                break;
            }
        }
        let slot = matching.ok_or(Error::NoTokenPresent)?;

        let session = self.pkcs11.open_ro_session(slot).map_err(token_err)?;
        session
            .login(UserType::User, Some(&AuthPin::new(pin.to_string())))
            .map_err(|e| match e {
                CkError::Pkcs11(RvError::PinIncorrect, ..) => Error::IncorrectPin,
                other => token_err(other),
            })?;

        self.session = Some(session);
        Ok(())
    }

    fn logout(&mut self) -> Result<()> {
        if let Some(session) = self.session.take() {
            self.handles.borrow_mut().clear();
            session.logout().map_err(token_err)?;
        }
        Ok(())
    }

    fn find_objects(&self, template: &ObjectTemplate<'_>) -> Result<Vec<TokenObject>> {
        let class = match template.class {
            ObjectClass::Certificate => CkObjectClass::CERTIFICATE,
            ObjectClass::PrivateKey => CkObjectClass::PRIVATE_KEY,
        };
        let mut attrs = vec![Attribute::Class(class)];
        if let Some(key_id) = template.key_id {
            attrs.push(Attribute::Id(key_id.to_vec()));
        }

        let found = self.session()?.find_objects(&attrs).map_err(token_err)?;

        let mut handles = self.handles.borrow_mut();
        Ok(found
            .into_iter()
            .map(|handle| {
                handles.push(handle);
                TokenObject(handles.len() as u64 - 1)
            })
            .collect())
    }

    fn certificate_attributes(&self, object: TokenObject) -> Result<CertificateRecord> {
        let handle = self.object_handle(object)?;
        let attrs = self
            .session()?
            .get_attributes(
                handle,
                &[AttributeType::Subject, AttributeType::Value, AttributeType::Id],
            )
            .map_err(token_err)?;

        let mut subject = None;
        let mut value = None;
        let mut id = None;
        for attr in attrs {
            match attr {
                Attribute::Subject(bytes) => subject = Some(bytes),
                Attribute::Value(bytes) => value = Some(bytes),
                Attribute::Id(bytes) => id = Some(bytes),
                _ => {},
            }
        }

        // A card may expose certificate slots with unreadable attributes;
        // report them as a token error so enumeration can skip the object.
        match (subject, value, id) {
            (Some(subject), Some(value), Some(id)) => Ok(CertificateRecord { subject, value, id }),
            _ => Err(Error::Token {
                code: "certificate attributes unavailable".to_string(),
            }),
        }
    }

    fn sign(&self, key: TokenObject, digest: DigestAlgorithm, data: &[u8]) -> Result<Vec<u8>> {
        let handle = self.object_handle(key)?;
        let mechanism = match digest {
            DigestAlgorithm::Sha1 => Mechanism::Sha1RsaPkcs,
            DigestAlgorithm::Sha256 => Mechanism::Sha256RsaPkcs,
            DigestAlgorithm::Sha384 => Mechanism::Sha384RsaPkcs,
            DigestAlgorithm::Sha512 => Mechanism::Sha512RsaPkcs,
        };

        self.session()?
            .sign(&mechanism, handle, data)
            .map_err(|e| Error::SignFailed { code: code_of(e) })
    }
}

impl Pkcs11Token {
    fn object_handle(&self, object: TokenObject) -> Result<ObjectHandle> {
        self.handles
            .borrow()
            .get(object.0 as usize)
            .copied()
            .ok_or_else(|| Error::Token {
                code: "stale object handle".to_string(),
            })
    }
}

fn trimmed(label: &str) -> String {
    label.split('\0').next().unwrap_or("").trim().to_string()
}

fn code_of(e: CkError) -> String {
    match e {
        CkError::Pkcs11(rv, ..) => rv.to_string(),
        other => other.to_string(),
    }
}

fn token_err(e: CkError) -> Error {
    Error::Token { code: code_of(e) }
}
