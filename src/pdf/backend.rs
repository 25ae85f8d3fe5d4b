//! Incremental-update signature embedding.
//!
//! Produces the bytes appended after the original document: the signature
//! dictionary, the signature field widget, rewritten page and catalog
//! objects, the optional stamp appearance, and a classic cross-reference
//! section whose trailer chains to the previous one via `/Prev`. The
//! original bytes are never touched; re-reading the output's prefix
//! reproduces the input exactly.

use chrono::Utc;

use crate::backend::{SignatureBackend, SignatureProvider};
use crate::error::Result;
use crate::metadata::{SignatureMetadata, StampSpec};
use crate::pdf::byterange::{bytes_to_hex, ByteRangeCalculator};
use crate::pdf::structure::{self, DocumentInfo, ObjRef};
use crate::pdf::tsa::{HttpTsa, Timestamper};
use crate::pdf::cms;
use crate::signing::DigestAlgorithm;

/// Line height of the stamp text, in page units.
const STAMP_LEADING: f64 = 12.0;
/// Font size of the stamp text.
const STAMP_FONT_SIZE: f64 = 10.0;

/// Signature backend appending one incremental update to the document.
#[derive(Debug, Default)]
pub struct IncrementalUpdateBackend {
    byterange: ByteRangeCalculator,
}

impl SignatureBackend for IncrementalUpdateBackend {
    fn sign(
        &self,
        pdf: &[u8],
        metadata: &SignatureMetadata,
        digest: DigestAlgorithm,
        provider: &dyn SignatureProvider,
        tsa_url: Option<&str>,
    ) -> Result<Vec<u8>> {
        let info = structure::scan_document(pdf)?;

        // The widget needs a host page even for an invisible signature.
        let page_index = metadata.stamp.as_ref().map_or(0, |stamp| stamp.page_index);
        let page_number = structure::page_object(pdf, info.root, page_index)?;

        let mut update = self.build_update(pdf, &info, page_number, metadata)?;

        // Offsets into the combined document.
        let combined_len = pdf.len() + update.buffer.len();
        let byte_range = self
            .byterange
            .byte_range(combined_len, update.contents_offset);
        let formatted = ByteRangeCalculator::format_byte_range(&byte_range);
        let range_pos = update.byterange_offset - pdf.len();
        update.buffer[range_pos..range_pos + formatted.len()]
            .copy_from_slice(formatted.as_bytes());

        let mut combined = Vec::with_capacity(combined_len);
        combined.extend_from_slice(pdf);
        combined.extend_from_slice(&update.buffer);

        let signed = ByteRangeCalculator::signed_bytes(&combined, &byte_range)?;
        let document_digest = digest.digest(&signed);

        let tsa = tsa_url.map(|url| HttpTsa::new(url, digest));
        let blob = cms::build_signed_data(
            &document_digest,
            digest,
            Utc::now(),
            provider,
            tsa.as_ref().map(|t| t as &dyn Timestamper),
        )?;

        self.byterange
            .insert_signature(&mut combined, update.contents_offset, &bytes_to_hex(&blob))?;

        Ok(combined.split_off(pdf.len()))
    }
}

struct Update {
    buffer: Vec<u8>,
    /// Absolute offset of the `/Contents` value's `<`
    contents_offset: usize,
    /// Absolute offset of the `/ByteRange` value's `[`
    byterange_offset: usize,
}

impl IncrementalUpdateBackend {
    fn build_update(
        &self,
        pdf: &[u8],
        info: &DocumentInfo,
        page_number: u32,
        metadata: &SignatureMetadata,
    ) -> Result<Update> {
        let sig_number = info.next_object;
        let field_number = sig_number + 1;
        let (font_number, appearance_number, next_free) = if metadata.stamp.is_some() {
            (Some(sig_number + 2), Some(sig_number + 3), sig_number + 4)
        } else {
            (None, None, sig_number + 2)
        };

        let mut writer = UpdateWriter::new(pdf.len());

        // Signature dictionary. The ByteRange and Contents values are
        // fixed-width placeholders patched after the update is assembled.
        writer.begin_object(sig_number);
        writer.push_str("<< /Type /Sig /Filter /Adobe.PPKLite /SubFilter /adbe.pkcs7.detached\n");
        writer.push_str("/ByteRange ");
        let byterange_offset = writer.offset();
        writer.push_str(&ByteRangeCalculator::range_placeholder());
        writer.push_str("\n/Contents ");
        let contents_offset = writer.offset();
        writer.push_str(&self.byterange.placeholder());
        writer.push_str(&format!("\n/M ({})", escape_string(&metadata.signing_date)));
        if !metadata.reason.is_empty() {
            writer.push_str(&format!("\n/Reason ({})", escape_string(&metadata.reason)));
        }
        if !metadata.location.is_empty() {
            writer.push_str(&format!("\n/Location ({})", escape_string(&metadata.location)));
        }
        if !metadata.contact.is_empty() {
            writer.push_str(&format!("\n/ContactInfo ({})", escape_string(&metadata.contact)));
        }
        writer.push_str(" >>");
        writer.end_object();

        // Stamp appearance: a Helvetica font and a form XObject.
        if let (Some(stamp), Some(font), Some(appearance)) =
            (&metadata.stamp, font_number, appearance_number)
        {
            writer.begin_object(font);
            writer.push_str("<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>");
            writer.end_object();

            let stream = appearance_stream(stamp);
            writer.begin_object(appearance);
            writer.push_str(&format!(
                "<< /Type /XObject /Subtype /Form /BBox [0 0 {} {}] /Resources << /Font << /F1 {} 0 R >> >> /Length {} >>\nstream\n",
                fmt(stamp.rect.2 - stamp.rect.0),
                fmt(stamp.rect.3 - stamp.rect.1),
                font,
                stream.len()
            ));
            writer.push_bytes(&stream);
            writer.push_str("\nendstream");
            writer.end_object();
        }

        // Signature field widget.
        writer.begin_object(field_number);
        match (&metadata.stamp, appearance_number) {
            (Some(stamp), Some(appearance)) => {
                writer.push_str(&format!(
                    "<< /Type /Annot /Subtype /Widget /FT /Sig /T (Signature1) /V {} 0 R /P {} 0 R /Rect [{} {} {} {}] /F 4 /AP << /N {} 0 R >> >>",
                    sig_number,
                    page_number,
                    fmt(stamp.rect.0),
                    fmt(stamp.rect.1),
                    fmt(stamp.rect.2),
                    fmt(stamp.rect.3),
                    appearance
                ));
            },
            _ => {
                writer.push_str(&format!(
                    "<< /Type /Annot /Subtype /Widget /FT /Sig /T (Signature1) /V {} 0 R /P {} 0 R /Rect [0 0 0 0] /F 132 >>",
                    sig_number, page_number
                ));
            },
        }
        writer.end_object();

        // Rewritten host page with the widget in /Annots.
        let page_body = structure::dict_body(structure::object_slice(pdf, page_number)?)?;
        let (cleaned, old_annots) = structure::remove_entry(page_body, b"/Annots");
        let mut annots: Vec<ObjRef> = match old_annots {
            Some(value) => refs_of_value(pdf, &value)?,
            None => Vec::new(),
        };
        annots.push(ObjRef {
            number: field_number,
            generation: 0,
        });
        writer.begin_object(page_number);
        writer.push_str("<<");
        writer.push_bytes(&cleaned);
        writer.push_str(&format!(" /Annots [ {} ] >>", render_refs(&annots)));
        writer.end_object();

        // Rewritten catalog with the field merged into /AcroForm.
        let catalog_body = structure::dict_body(structure::object_slice(pdf, info.root.number)?)?;
        let (cleaned, old_acroform) = structure::remove_entry(catalog_body, b"/AcroForm");
        let mut fields = match old_acroform {
            Some(value) => acroform_fields(pdf, &value)?,
            None => Vec::new(),
        };
        fields.push(ObjRef {
            number: field_number,
            generation: 0,
        });
        writer.begin_object(info.root.number);
        writer.push_str("<<");
        writer.push_bytes(&cleaned);
        writer.push_str(&format!(
            " /AcroForm << /Fields [ {} ] /SigFlags {} >> >>",
            render_refs(&fields),
            metadata.sig_flags
        ));
        writer.end_object();

        let (buffer, _) = writer.finish(info, next_free);
        Ok(Update {
            contents_offset,
            byterange_offset,
            buffer,
        })
    }
}

/// References named by an `/Annots` value: an inline array or a reference to
/// an array object.
fn refs_of_value(pdf: &[u8], value: &[u8]) -> Result<Vec<ObjRef>> {
    let trimmed: &[u8] = trim(value);
    if trimmed.first() == Some(&b'[') {
        structure::refs_in_array(trimmed)
    } else if let Some(reference) = structure::parse_ref_at(trimmed) {
        structure::refs_in_array(structure::object_slice(pdf, reference.number)?)
    } else {
        Ok(Vec::new())
    }
}

/// Field references of an existing `/AcroForm` value (inline dictionary or
/// reference), so previously present form fields survive the rewrite.
fn acroform_fields(pdf: &[u8], value: &[u8]) -> Result<Vec<ObjRef>> {
    let trimmed = trim(value);
    let dict: Vec<u8> = if trimmed.starts_with(b"<<") {
        trimmed.to_vec()
    } else if let Some(reference) = structure::parse_ref_at(trimmed) {
        structure::object_slice(pdf, reference.number)?.to_vec()
    } else {
        return Ok(Vec::new());
    };

    match structure::key_position(&dict, b"/Fields") {
        Some(pos) => refs_of_value(pdf, &dict[pos..]),
        None => Ok(Vec::new()),
    }
}

fn trim(value: &[u8]) -> &[u8] {
    let start = value
        .iter()
        .take_while(|b| b.is_ascii_whitespace())
        .count();
    &value[start..]
}

fn render_refs(refs: &[ObjRef]) -> String {
    refs.iter()
        .map(|r| r.to_pdf())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Content stream drawing the stamp text.
fn appearance_stream(stamp: &StampSpec) -> Vec<u8> {
    let height = stamp.rect.3 - stamp.rect.1;
    let mut stream = String::new();
    stream.push_str("q\nBT\n");
    stream.push_str(&format!("/F1 {} Tf\n", fmt(STAMP_FONT_SIZE)));
    stream.push_str(&format!("2 {} Td\n", fmt(height - STAMP_LEADING)));
    for (index, line) in stamp.text.split('\n').enumerate() {
        if index > 0 {
            stream.push_str(&format!("0 -{} Td\n", fmt(STAMP_LEADING)));
        }
        stream.push_str(&format!("({}) Tj\n", escape_string(line)));
    }
    stream.push_str("ET\nQ");
    stream.into_bytes()
}

/// Escape special characters in a PDF literal string.
fn escape_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 8);
    for c in s.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '(' => result.push_str("\\("),
            ')' => result.push_str("\\)"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            _ => result.push(c),
        }
    }
    result
}

/// Render a coordinate without a trailing `.0`.
fn fmt(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Accumulates the update and the cross-reference entries.
struct UpdateWriter {
    base: usize,
    buffer: Vec<u8>,
    entries: Vec<(u32, usize)>,
}

impl UpdateWriter {
    fn new(base: usize) -> Self {
        Self {
            base,
            // Separate the update from the previous %%EOF.
            buffer: b"\n".to_vec(),
            entries: Vec::new(),
        }
    }

    fn offset(&self) -> usize {
        self.base + self.buffer.len()
    }

    fn begin_object(&mut self, number: u32) {
        self.entries.push((number, self.offset()));
        self.push_str(&format!("{} 0 obj\n", number));
    }

    fn end_object(&mut self) {
        self.push_str("\nendobj\n");
    }

    fn push_str(&mut self, s: &str) {
        self.buffer.extend_from_slice(s.as_bytes());
    }

    fn push_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Emit the cross-reference section and trailer; returns the buffer and
    /// the absolute offset of the section.
    fn finish(mut self, info: &DocumentInfo, next_free: u32) -> (Vec<u8>, usize) {
        self.entries.sort_by_key(|&(number, _)| number);
        let xref_offset = self.offset();

        self.push_str("xref\n");
        let mut index = 0;
        while index < self.entries.len() {
            let start = self.entries[index].0;
            let mut count = 1;
            while index + count < self.entries.len()
                && self.entries[index + count].0 == start + count as u32
            {
                count += 1;
            }
            self.push_str(&format!("{} {}\n", start, count));
            for i in index..index + count {
                let offset = self.entries[i].1;
                self.push_str(&format!("{:010} 00000 n \n", offset));
            }
            index += count;
        }

        self.push_str(&format!(
            "trailer\n<< /Size {} /Root {} /Prev {} >>\nstartxref\n{}\n%%EOF\n",
            next_free,
            info.root.to_pdf(),
            info.startxref,
            xref_offset
        ));

        (self.buffer, xref_offset)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::minimal_pdf;
    use super::*;
    use crate::error::Error;
    use crate::metadata::SignatureMetadata;

    const SIGNER_DER: &[u8] = include_bytes!("../../tests/data/signer.der");

    struct FakeProvider;

    impl SignatureProvider for FakeProvider {
        fn certificate(&self) -> (&[u8], &[u8]) {
            (b"\x02", SIGNER_DER)
        }

        fn sign(&self, _key_id: &[u8], data: &[u8], digest: DigestAlgorithm) -> Result<Vec<u8>> {
            let mut out = digest.digest(data);
            while out.len() < 256 {
                let more = out.clone();
                out.extend_from_slice(&more);
            }
            out.truncate(256);
            Ok(out)
        }
    }

    fn metadata(stamp: Option<StampSpec>) -> SignatureMetadata {
        SignatureMetadata {
            sig_flags: 3,
            contact: String::new(),
            location: String::new(),
            signing_date: "D:20240307164509+00'00'".to_string(),
            reason: String::new(),
            stamp,
        }
    }

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }

    #[test]
    fn test_invisible_signature_update() {
        let pdf = minimal_pdf(1);
        let backend = IncrementalUpdateBackend::default();
        let update = backend
            .sign(&pdf, &metadata(None), DigestAlgorithm::Sha256, &FakeProvider, None)
            .unwrap();

        assert!(contains(&update, b"/Type /Sig"));
        assert!(contains(&update, b"/SubFilter /adbe.pkcs7.detached"));
        assert!(contains(&update, b"/Rect [0 0 0 0]"));
        assert!(contains(&update, b"/SigFlags 3"));
        assert!(contains(&update, b"/M (D:20240307164509+00'00')"));
        assert!(!contains(&update, b"/AP"));
        assert!(update.ends_with(b"%%EOF\n"));
    }

    #[test]
    fn test_stamp_signature_update() {
        let pdf = minimal_pdf(2);
        let stamp = StampSpec::from_position(
            1,
            (200.0, 20.0),
            (270.0, 60.0),
            "Digitally signed by JOHN\nDate: 2024.03.07".to_string(),
        );
        let backend = IncrementalUpdateBackend::default();
        let update = backend
            .sign(
                &pdf,
                &metadata(Some(stamp)),
                DigestAlgorithm::Sha256,
                &FakeProvider,
                None,
            )
            .unwrap();

        assert!(contains(&update, b"/Rect [200 20 470 80]"));
        assert!(contains(&update, b"/AP << /N"));
        assert!(contains(&update, b"/BaseFont /Helvetica"));
        assert!(contains(&update, b"(Digitally signed by JOHN) Tj"));
    }

    #[test]
    fn test_byte_range_covers_combined_document() {
        let pdf = minimal_pdf(1);
        let backend = IncrementalUpdateBackend::default();
        let update = backend
            .sign(&pdf, &metadata(None), DigestAlgorithm::Sha256, &FakeProvider, None)
            .unwrap();

        let mut combined = pdf.clone();
        combined.extend_from_slice(&update);

        // Recover the patched ByteRange and check it spans the file with one
        // gap exactly the size of the /Contents placeholder.
        let pos = combined
            .windows(12)
            .position(|w| w == b"/ByteRange [")
            .unwrap();
        let text = std::str::from_utf8(&combined[pos + 12..pos + 60]).unwrap();
        let numbers: Vec<i64> = text
            .trim_start()
            .trim_start_matches('0')
            .split(|c: char| !c.is_ascii_digit())
            .filter(|s| !s.is_empty())
            .map(|s| s.parse().unwrap())
            .collect();
        // numbers[0] is byte_range[1] since byte_range[0] == 0
        let (a, b) = (numbers[0], numbers[1]);
        let gap = (b - a) as usize;
        assert_eq!(gap, ByteRangeCalculator::default().placeholder_size());
        assert_eq!(
            numbers[2] as usize,
            combined.len() - b as usize
        );

        // The signed ranges digest to the value embedded in the CMS blob,
        // which sits hex-encoded inside the /Contents placeholder.
        let byte_range = [0, a, b, numbers[2]];
        let signed = ByteRangeCalculator::signed_bytes(&combined, &byte_range).unwrap();
        let digest = DigestAlgorithm::Sha256.digest(&signed);
        assert!(contains(&combined, bytes_to_hex(&digest).as_bytes()));
    }

    #[test]
    fn test_page_and_catalog_are_rewritten() {
        let pdf = minimal_pdf(1);
        let backend = IncrementalUpdateBackend::default();
        let update = backend
            .sign(&pdf, &metadata(None), DigestAlgorithm::Sha256, &FakeProvider, None)
            .unwrap();

        // Page 3 and catalog 1 appear again in the update with /Annots and
        // /AcroForm entries.
        assert!(contains(&update, b"3 0 obj"));
        assert!(contains(&update, b"1 0 obj"));
        assert!(contains(&update, b"/Annots [ 5 0 R ]"));
        assert!(contains(&update, b"/AcroForm << /Fields [ 5 0 R ] /SigFlags 3 >>"));
        assert!(contains(&update, b"/Prev "));
    }

    #[test]
    fn test_rejects_out_of_range_stamp_page() {
        let pdf = minimal_pdf(1);
        let stamp = StampSpec::from_position(3, (200.0, 20.0), (270.0, 60.0), "x".to_string());
        let backend = IncrementalUpdateBackend::default();
        let result = backend.sign(
            &pdf,
            &metadata(Some(stamp)),
            DigestAlgorithm::Sha256,
            &FakeProvider,
            None,
        );
        assert!(matches!(result, Err(Error::InvalidPdf(_))));
    }

    #[test]
    fn test_fmt_drops_trailing_zero() {
        assert_eq!(fmt(200.0), "200");
        assert_eq!(fmt(20.5), "20.5");
    }
}
