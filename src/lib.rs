//! # cardsign
//!
//! Sign PDF documents with a private key held on a smart card or HSM,
//! accessed through a PKCS#11 card reader driver. The signature is a CMS
//! (PKCS#7) blob embedded in an incremental update appended to the original
//! document, optionally timestamped by an RFC 3161 time-stamp authority and
//! optionally rendered as a visible stamp on a page.
//!
//! ## How a run works
//!
//! 1. Load the PKCS#11 driver and open a session against the first slot
//!    with a token present ([`token::TokenSession`]).
//! 2. Authenticate with a single PIN attempt; incorrect PINs are never
//!    retried (a second attempt risks locking the card).
//! 3. Select the signing certificate: the first certificate object whose
//!    subject carries a surname field ([`certificate`]).
//! 4. Hand the document, metadata and signing callback to the signature
//!    backend; the backend calls back into the token for each raw RSA
//!    signature it needs ([`backend`], [`pdf`]).
//! 5. Write the original bytes plus the appended signature, log out.
//!
//! The private key never leaves the token; only object handles and
//! signatures cross the boundary.
//!
//! ## Quick start
//!
//! ```ignore
//! use cardsign::orchestrator::{sign_document, SignConfig};
//! use cardsign::pdf::IncrementalUpdateBackend;
//!
//! let mut config = SignConfig::new("doc.pdf", "libgclib.so", pin);
//! config.tsa_url = Some("http://qts.harica.gr/".to_string());
//! let output = sign_document(&config, &IncrementalUpdateBackend::default())?;
//! println!("signed pdf written to {}", output.display());
//! ```

#![warn(missing_docs)]

// Error handling
pub mod error;

// Card session and signing core
pub mod certificate;
pub mod signing;
pub mod token;

// Orchestration and the backend boundary
pub mod backend;
pub mod metadata;
pub mod orchestrator;

// CMS/PDF signature builder
pub mod pdf;

pub use error::{Error, Result};
pub use orchestrator::{sign_document, SignConfig};
