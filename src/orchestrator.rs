//! Signing-run orchestration.
//!
//! Sequences one whole run: driver load, login, certificate selection,
//! backend invocation, output writing, logout. Every invocation performs a
//! fresh driver load and discovery; nothing is cached or shared across runs.
//!
//! The run aborts on the first failed transition. Logout is attempted only
//! once signing has succeeded (on earlier failures the token invalidates
//! the session at process exit anyway); a failed logout after a signed
//! document only logs a warning.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{Local, Utc};

use crate::backend::SignatureBackend;
use crate::certificate::{select_signing_certificate, SelectedCertificate};
use crate::error::{Error, Result};
use crate::metadata::{self, SignatureMetadata, StampSpec};
use crate::signing::{CardSigner, DigestAlgorithm};
use crate::token::{Pkcs11Token, Token, TokenSession};

/// Visible-stamp request, straight from the command line.
#[derive(Debug, Clone)]
pub struct StampOptions {
    /// Page to stamp, 1-based; 0 means no stamp
    pub page: usize,
    /// Bottom-left corner of the stamp, relative to the page origin
    pub position: (f64, f64),
    /// Width and height of the stamp
    pub size: (f64, f64),
    /// Stamp text; `None` synthesizes the signer's name and date
    pub text: Option<String>,
}

impl Default for StampOptions {
    fn default() -> Self {
        Self {
            page: 0,
            position: (200.0, 20.0),
            size: (270.0, 60.0),
            text: None,
        }
    }
}

/// Configuration of one signing run.
#[derive(Debug, Clone)]
pub struct SignConfig {
    /// Path of the PDF to sign
    pub input: PathBuf,
    /// Output path; `None` derives it from the input path
    pub output: Option<PathBuf>,
    /// Path of the PKCS#11 card reader driver
    pub driver: PathBuf,
    /// Card PIN
    pub pin: String,
    /// Digest algorithm
    pub digest: DigestAlgorithm,
    /// Time-stamp authority URL; `None` or empty requests no timestamp
    pub tsa_url: Option<String>,
    /// Visible stamp request
    pub stamp: StampOptions,
    /// Contact information for the signature dictionary
    pub contact: String,
    /// Signing location for the signature dictionary
    pub location: String,
    /// Signing reason for the signature dictionary
    pub reason: String,
}

impl SignConfig {
    /// A configuration with defaults matching the command-line tool.
    pub fn new(input: impl Into<PathBuf>, driver: impl Into<PathBuf>, pin: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: None,
            driver: driver.into(),
            pin: pin.into(),
            digest: DigestAlgorithm::default(),
            tsa_url: None,
            stamp: StampOptions::default(),
            contact: String::new(),
            location: String::new(),
            reason: String::new(),
        }
    }
}

/// Sign a document with a card reachable through the configured driver.
///
/// Loads the driver, then runs [`sign_with_session`].
pub fn sign_document<B: SignatureBackend>(config: &SignConfig, backend: &B) -> Result<PathBuf> {
    let session = TokenSession::<Pkcs11Token>::open(&config.driver)?;
    sign_with_session(config, backend, session)
}

/// Sign a document using an already-open token session.
///
/// Split out from [`sign_document`] so the whole flow can run against a
/// simulated token.
pub fn sign_with_session<T: Token, B: SignatureBackend>(
    config: &SignConfig,
    backend: &B,
    mut session: TokenSession<T>,
) -> Result<PathBuf> {
    if !config.input.is_file() {
        return Err(Error::InputFile {
            path: config.input.clone(),
        });
    }
    let pdf = fs::read(&config.input)?;

    session.login(&config.pin)?;
    let certificate = select_signing_certificate(session.token())?;

    let metadata = build_metadata(config, &certificate);
    let signer = CardSigner::new(session.token(), &certificate);
    let tsa_url = config.tsa_url.as_deref().filter(|url| !url.is_empty());

    let signature = backend.sign(&pdf, &metadata, config.digest, &signer, tsa_url)?;

    if let Err(e) = session.logout() {
        log::warn!("token logout failed: {}", e);
    }

    let output = config
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&config.input));

    let mut file = fs::File::create(&output)?;
    file.write_all(&pdf)?;
    file.write_all(&signature)?;

    log::info!("signed pdf written to {}", output.display());
    Ok(output)
}

/// Assemble the signature metadata for one run.
///
/// The signing date is computed once, here, in UTC; the stamp date uses the
/// local wall clock and is independent of the signing-time attribute.
fn build_metadata(config: &SignConfig, certificate: &SelectedCertificate) -> SignatureMetadata {
    let stamp = (config.stamp.page != 0).then(|| {
        let text = config.stamp.text.clone().unwrap_or_else(|| {
            metadata::default_stamp_text(
                &certificate.common_name,
                &metadata::stamp_date(Local::now()),
            )
        });
        // The command line counts pages from 1; the stamp spec from 0.
        StampSpec::from_position(
            config.stamp.page - 1,
            config.stamp.position,
            config.stamp.size,
            text,
        )
    });

    SignatureMetadata {
        sig_flags: 3,
        contact: config.contact.clone(),
        location: config.location.clone(),
        signing_date: metadata::pdf_date(Utc::now()),
        reason: config.reason.clone(),
        stamp,
    }
}

/// Default output path: the input path with `-signed` inserted before the
/// `.pdf` extension, case-insensitively; the extension keeps its case.
pub fn default_output_path(input: &Path) -> PathBuf {
    let name = input
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();

    let tail = name.len().checked_sub(4).and_then(|at| name.get(at..));
    match tail {
        Some(ext) if ext.eq_ignore_ascii_case(".pdf") => {
            let stem = &name[..name.len() - 4];
            input.with_file_name(format!("{}-signed{}", stem, ext))
        },
        _ => input.with_file_name(format!("{}-signed", name)),
    }
}
