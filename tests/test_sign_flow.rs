//! End-to-end signing flow against a simulated token.

use std::cell::RefCell;
use std::fs;

use cardsign::backend::{SignatureBackend, SignatureProvider};
use cardsign::error::{Error, Result};
use cardsign::metadata::SignatureMetadata;
use cardsign::orchestrator::{sign_with_session, SignConfig};
use cardsign::pdf::IncrementalUpdateBackend;
use cardsign::signing::DigestAlgorithm;
use cardsign::token::testing::SimulatedToken;
use cardsign::token::TokenSession;

/// Build a classical single-section PDF with `pages` empty pages.
fn minimal_pdf(pages: usize) -> Vec<u8> {
    let mut objects: Vec<String> = Vec::new();
    let kids: Vec<String> = (0..pages).map(|i| format!("{} 0 R", i + 3)).collect();

    objects.push("<< /Type /Catalog /Pages 2 0 R >>".to_string());
    objects.push(format!(
        "<< /Type /Pages /Kids [{}] /Count {} >>",
        kids.join(" "),
        pages
    ));
    for _ in 0..pages {
        objects.push("<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >>".to_string());
    }

    let mut pdf: Vec<u8> = b"%PDF-1.7\n".to_vec();
    let mut offsets = Vec::new();
    for (index, body) in objects.iter().enumerate() {
        offsets.push(pdf.len());
        pdf.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", index + 1, body).as_bytes());
    }

    let xref_offset = pdf.len();
    pdf.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
    pdf.extend_from_slice(b"0000000000 65535 f \n");
    for offset in &offsets {
        pdf.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    pdf.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref_offset
        )
        .as_bytes(),
    );
    pdf
}

/// Backend double that records what the orchestrator hands it.
#[derive(Default)]
struct RecordingBackend {
    seen: RefCell<Option<(SignatureMetadata, Option<String>)>>,
}

impl RecordingBackend {
    fn seen(&self) -> (SignatureMetadata, Option<String>) {
        self.seen.borrow().clone().expect("backend was invoked")
    }
}

impl SignatureBackend for RecordingBackend {
    fn sign(
        &self,
        _pdf: &[u8],
        metadata: &SignatureMetadata,
        digest: DigestAlgorithm,
        provider: &dyn SignatureProvider,
        tsa_url: Option<&str>,
    ) -> Result<Vec<u8>> {
        // Exercise the callback the way the real builder does.
        let (key_id, der) = provider.certificate();
        assert!(!der.is_empty());
        let signature = provider.sign(key_id, b"authenticated attributes", digest)?;
        assert_eq!(signature.len(), 256);

        *self.seen.borrow_mut() = Some((metadata.clone(), tsa_url.map(String::from)));
        Ok(b"SIGNATURE".to_vec())
    }
}

fn session() -> TokenSession<SimulatedToken> {
    TokenSession::new(SimulatedToken::with_personal_certificate())
}

#[test]
fn test_output_name_and_appended_signature() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("doc.pdf");
    let pdf = minimal_pdf(1);
    fs::write(&input, &pdf).unwrap();

    let config = SignConfig::new(&input, "libgclib.so", "1234");
    let backend = RecordingBackend::default();
    let output = sign_with_session(&config, &backend, session()).unwrap();

    assert_eq!(output, dir.path().join("doc-signed.pdf"));

    // The original bytes are a byte-for-byte prefix; the signature is
    // strictly appended, never interleaved.
    let written = fs::read(&output).unwrap();
    assert_eq!(&written[..pdf.len()], pdf.as_slice());
    assert_eq!(&written[pdf.len()..], b"SIGNATURE");

    // No stamp metadata was attached for stamp page 0.
    let (metadata, tsa) = backend.seen();
    assert!(metadata.stamp.is_none());
    assert_eq!(metadata.sig_flags, 3);
    assert!(tsa.is_none());
}

#[test]
fn test_stamp_page_and_box() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("doc.pdf");
    fs::write(&input, minimal_pdf(2)).unwrap();

    let mut config = SignConfig::new(&input, "libgclib.so", "1234");
    config.stamp.page = 1;
    config.stamp.position = (200.0, 20.0);
    config.stamp.size = (270.0, 60.0);

    let backend = RecordingBackend::default();
    sign_with_session(&config, &backend, session()).unwrap();

    let (metadata, _) = backend.seen();
    let stamp = metadata.stamp.expect("stamp requested");
    assert_eq!(stamp.page_index, 0);
    assert_eq!(stamp.rect, (200.0, 20.0, 470.0, 80.0));
    assert!(stamp.text.starts_with("Digitally signed by JOHN PAPADOPOULOS"));
    assert!(stamp.text.contains("\nDate: "));
}

#[test]
fn test_explicit_stamp_text_is_kept() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("doc.pdf");
    fs::write(&input, minimal_pdf(1)).unwrap();

    let mut config = SignConfig::new(&input, "libgclib.so", "1234");
    config.stamp.page = 1;
    config.stamp.text = Some("Approved".to_string());

    let backend = RecordingBackend::default();
    sign_with_session(&config, &backend, session()).unwrap();

    let (metadata, _) = backend.seen();
    assert_eq!(metadata.stamp.unwrap().text, "Approved");
}

#[test]
fn test_tsa_url_passes_through() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("doc.pdf");
    fs::write(&input, minimal_pdf(1)).unwrap();

    let mut config = SignConfig::new(&input, "libgclib.so", "1234");
    config.tsa_url = Some("http://qts.harica.gr/".to_string());

    let backend = RecordingBackend::default();
    sign_with_session(&config, &backend, session()).unwrap();
    let (_, tsa) = backend.seen();
    assert_eq!(tsa.as_deref(), Some("http://qts.harica.gr/"));

    // An empty URL means no timestamp.
    config.tsa_url = Some(String::new());
    let backend = RecordingBackend::default();
    sign_with_session(&config, &backend, session()).unwrap();
    let (_, tsa) = backend.seen();
    assert!(tsa.is_none());
}

#[test]
fn test_incorrect_pin_aborts_before_signing() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("doc.pdf");
    fs::write(&input, minimal_pdf(1)).unwrap();

    let config = SignConfig::new(&input, "libgclib.so", "0000");
    let backend = RecordingBackend::default();
    let result = sign_with_session(&config, &backend, session());

    assert!(matches!(result, Err(Error::IncorrectPin)));
    assert!(backend.seen.borrow().is_none());
    assert!(!dir.path().join("doc-signed.pdf").exists());
}

#[test]
fn test_missing_input_file() {
    let config = SignConfig::new("/nonexistent/doc.pdf", "libgclib.so", "1234");
    let backend = RecordingBackend::default();
    let result = sign_with_session(&config, &backend, session());
    assert!(matches!(result, Err(Error::InputFile { .. })));
}

#[test]
fn test_no_matching_certificate_aborts() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("doc.pdf");
    fs::write(&input, minimal_pdf(1)).unwrap();

    // Only a CA certificate on the card; the surname heuristic matches
    // nothing.
    let token = SimulatedToken::new()
        .with_certificate(b"\x01", include_bytes!("data/ca.der"));
    let config = SignConfig::new(&input, "libgclib.so", "1234");
    let backend = RecordingBackend::default();
    let result = sign_with_session(&config, &backend, TokenSession::new(token));

    assert!(matches!(result, Err(Error::NoMatchingCertificate)));
}

#[test]
fn test_full_run_with_real_backend() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("contract.pdf");
    let pdf = minimal_pdf(2);
    fs::write(&input, &pdf).unwrap();

    let mut config = SignConfig::new(&input, "libgclib.so", "1234");
    config.stamp.page = 2;

    let backend = IncrementalUpdateBackend::default();
    let output = sign_with_session(&config, &backend, session()).unwrap();
    assert_eq!(output, dir.path().join("contract-signed.pdf"));

    let written = fs::read(&output).unwrap();
    assert!(written.len() > pdf.len());
    assert_eq!(&written[..pdf.len()], pdf.as_slice());

    let update = &written[pdf.len()..];
    let contains = |needle: &[u8]| update.windows(needle.len()).any(|w| w == needle);
    assert!(contains(b"/Type /Sig"));
    assert!(contains(b"/SubFilter /adbe.pkcs7.detached"));
    assert!(contains(b"/Rect [200 20 470 80]"));
    assert!(update.ends_with(b"%%EOF\n"));
}
