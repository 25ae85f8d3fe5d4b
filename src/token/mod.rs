//! Token session management.
//!
//! Everything the rest of the crate needs from a PKCS#11 token is expressed
//! by the small [`Token`] capability trait (object search, attribute reads,
//! the sign primitive, login/logout). The production implementation wraps the
//! card reader driver via the `cryptoki` crate; tests substitute a simulated
//! token, so certificate selection and orchestration never require hardware.
//!
//! [`TokenSession`] owns the driver handle and tracks the authenticated
//! session: created by [`TokenSession::open`] (driver load + slot discovery),
//! authenticated by a single [`TokenSession::login`] attempt, released by an
//! explicit [`TokenSession::logout`]. One session serves a whole signing run;
//! nothing is cached across runs.

mod pkcs11;
pub mod testing;

use std::path::Path;

use crate::error::{Error, Result};
use crate::signing::DigestAlgorithm;

pub use pkcs11::Pkcs11Token;

/// Opaque handle to a card-resident object (certificate or private key).
///
/// Scoped to the session that produced it; not valid after the session
/// closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenObject(pub(crate) u64);

/// Object class used in search templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectClass {
    /// X.509 certificate objects
    Certificate,
    /// Private-key objects
    PrivateKey,
}

/// Search template for [`Token::find_objects`].
#[derive(Debug, Clone, Copy)]
pub struct ObjectTemplate<'a> {
    /// Object class to match
    pub class: ObjectClass,
    /// Optional key-id attribute to match
    pub key_id: Option<&'a [u8]>,
}

/// Attributes fetched from a certificate object.
#[derive(Debug, Clone)]
pub struct CertificateRecord {
    /// DER-encoded subject distinguished name
    pub subject: Vec<u8>,
    /// Raw DER certificate bytes
    pub value: Vec<u8>,
    /// Key identifier pairing the certificate with its private key
    pub id: Vec<u8>,
}

/// Capability interface over a PKCS#11 token.
///
/// The orchestrator and the certificate selector only ever see this trait,
/// never the driver API, so they can be exercised against
/// [`testing::SimulatedToken`] without hardware.
pub trait Token {
    /// Labels of slots with a token present, in slot order (raw, untrimmed).
    fn token_labels(&self) -> Result<Vec<String>>;

    /// Authenticate against the slot whose token label matches `label`.
    ///
    /// Counts as an authentication attempt on the card; callers perform
    /// exactly one attempt and never retry (repeated incorrect PINs can lock
    /// the card).
    fn login(&mut self, label: &str, pin: &str) -> Result<()>;

    /// End the authenticated session.
    fn logout(&mut self) -> Result<()>;

    /// Handles of objects matching the template, in token-defined order.
    fn find_objects(&self, template: &ObjectTemplate<'_>) -> Result<Vec<TokenObject>>;

    /// Subject, raw value and key id of a certificate object.
    fn certificate_attributes(&self, object: TokenObject) -> Result<CertificateRecord>;

    /// Sign `data` with the given private key using the
    /// `<digest>-with-RSA-PKCS#1v1.5` mechanism.
    fn sign(&self, key: TokenObject, digest: DigestAlgorithm, data: &[u8]) -> Result<Vec<u8>>;
}

/// An open token session: driver handle plus authentication state.
#[derive(Debug)]
pub struct TokenSession<T: Token> {
    token: T,
    authenticated: bool,
}

impl TokenSession<Pkcs11Token> {
    /// Load the PKCS#11 driver at `driver_path` and discover slots.
    ///
    /// Any load failure (missing file, ABI mismatch, library initialization
    /// failure) is reported as [`Error::DriverLoad`] with the original path.
    pub fn open(driver_path: &Path) -> Result<Self> {
        let token = Pkcs11Token::open(driver_path)?;
        Ok(Self::new(token))
    }
}

impl<T: Token> TokenSession<T> {
    /// Wrap an already-constructed token implementation.
    pub fn new(token: T) -> Self {
        Self {
            token,
            authenticated: false,
        }
    }

    /// Authenticate with a single login attempt.
    ///
    /// The slot is the first one with a token present; its label is trimmed
    /// of trailing NULs and whitespace before matching. A PIN mismatch maps
    /// to [`Error::IncorrectPin`]; no retry is ever attempted.
    pub fn login(&mut self, pin: &str) -> Result<()> {
        let labels = self.token.token_labels()?;
        let raw = labels.first().ok_or(Error::NoTokenPresent)?;
        let label = raw.split('\0').next().unwrap_or("").trim().to_string();

        log::debug!("logging in to token {:?}", label);
        self.token.login(&label, pin)?;
        self.authenticated = true;
        Ok(())
    }

    /// Release the session. A no-op when never authenticated.
    pub fn logout(&mut self) -> Result<()> {
        if self.authenticated {
            self.authenticated = false;
            self.token.logout()?;
        }
        Ok(())
    }

    /// Whether a login attempt has succeeded on this session.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Access the underlying token for object queries and signing.
    pub fn token(&self) -> &T {
        &self.token
    }
}

#[cfg(test)]
mod tests {
    use super::testing::SimulatedToken;
    use super::*;

    #[test]
    fn test_login_transitions_to_authenticated() {
        let mut session = TokenSession::new(SimulatedToken::with_personal_certificate());
        assert!(!session.is_authenticated());
        session.login("1234").unwrap();
        assert!(session.is_authenticated());
    }

    #[test]
    fn test_incorrect_pin_leaves_session_unauthenticated() {
        let mut session = TokenSession::new(SimulatedToken::with_personal_certificate());
        let result = session.login("9999");
        assert!(matches!(result, Err(Error::IncorrectPin)));
        assert!(!session.is_authenticated());
        // Exactly one attempt reached the token; the subsystem never retries.
        assert_eq!(session.token().login_attempts(), 1);
    }

    #[test]
    fn test_no_token_present() {
        let mut session = TokenSession::new(SimulatedToken::without_token());
        let result = session.login("1234");
        assert!(matches!(result, Err(Error::NoTokenPresent)));
        // No authentication attempt is made when no token is present.
        assert_eq!(session.token().login_attempts(), 0);
    }

    #[test]
    fn test_label_is_trimmed_before_matching() {
        // Tokens pad their labels with NULs or spaces to the fixed field width.
        let token = SimulatedToken::with_personal_certificate().with_label("MyCard\0\0\0  ");
        let mut session = TokenSession::new(token);
        session.login("1234").unwrap();
        assert_eq!(session.token().last_login_label(), Some("MyCard".to_string()));
    }

    #[test]
    fn test_logout_only_after_login() {
        let mut session = TokenSession::new(SimulatedToken::with_personal_certificate());
        session.logout().unwrap();
        assert_eq!(session.token().logout_calls(), 0);

        session.login("1234").unwrap();
        session.logout().unwrap();
        assert_eq!(session.token().logout_calls(), 1);
    }
}
