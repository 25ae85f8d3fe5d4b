//! Error types for card-based PDF signing.
//!
//! Known, user-actionable failures (bad driver path, missing card, wrong PIN,
//! no usable certificate) carry a short diagnostic message suitable for a
//! single stderr line. Token-level failures preserve the underlying return
//! code; unexpected failures keep their full source detail instead of being
//! swallowed.

use std::path::PathBuf;

/// Result type alias for signing operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur during a signing run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The PKCS#11 driver could not be loaded or initialized
    #[error("Cannot load card reader driver {}: {}", path.display(), reason)]
    DriverLoad {
        /// Path of the driver that failed to load
        path: PathBuf,
        /// Underlying loader/initialization failure
        reason: String,
    },

    /// No slot reported a token present
    #[error("Cannot read card: no token present in any slot")]
    NoTokenPresent,

    /// The token rejected the PIN
    #[error("Incorrect PIN")]
    IncorrectPin,

    /// Any other token-level failure, with the underlying return code
    #[error("Token error: {code}")]
    Token {
        /// Return code reported by the token driver
        code: String,
    },

    /// Certificate enumeration found no certificate matching the selection policy
    #[error("No signing certificate found on the token")]
    NoMatchingCertificate,

    /// No private-key object matches the selected certificate's key id
    #[error("No private key on the token matches the certificate key id")]
    KeyNotFound,

    /// The token sign primitive failed
    #[error("Sign operation failed: {code}")]
    SignFailed {
        /// Return code reported by the token driver
        code: String,
    },

    /// The input PDF path does not exist or is not a file
    #[error("{}: no such file", path.display())]
    InputFile {
        /// The path that was checked
        path: PathBuf,
    },

    /// Malformed certificate encoding (surfaced with detail, never swallowed)
    #[error("Invalid certificate encoding: {0}")]
    Certificate(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or unsupported PDF structure
    #[error("Invalid PDF: {0}")]
    InvalidPdf(String),

    /// Time-stamp authority request failed
    #[error("Timestamp authority error: {0}")]
    Tsa(String),
}
