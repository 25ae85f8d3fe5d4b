//! Signature metadata and stamp geometry.
//!
//! Built once per signing run from user-supplied configuration and passed
//! opaquely to the signature backend. The cryptographic signing time uses the
//! PDF date format in UTC; the human-readable date in a visible stamp uses
//! local wall-clock time, independently of the signing-time attribute.

use chrono::{DateTime, Local, Utc};

/// Metadata for one signature.
#[derive(Debug, Clone)]
pub struct SignatureMetadata {
    /// AcroForm signature flags (3 = signatures exist + append only)
    pub sig_flags: u32,
    /// Contact information, may be empty
    pub contact: String,
    /// Signing location, may be empty
    pub location: String,
    /// Signing time in PDF date format, `D:YYYYMMDDHHMMSS+00'00'`
    pub signing_date: String,
    /// Reason for signing, may be empty
    pub reason: String,
    /// Visible stamp, when requested
    pub stamp: Option<StampSpec>,
}

/// Geometry and text of a visible signature stamp.
#[derive(Debug, Clone, PartialEq)]
pub struct StampSpec {
    /// Page carrying the stamp, 0-based
    pub page_index: usize,
    /// Bounding box (x0, y0, x1, y1) in page units, origin bottom-left
    pub rect: (f64, f64, f64, f64),
    /// Text shown inside the stamp; `\n` separates lines
    pub text: String,
}

impl StampSpec {
    /// Build a stamp box from a position and a size.
    pub fn from_position(page_index: usize, pos: (f64, f64), size: (f64, f64), text: String) -> Self {
        Self {
            page_index,
            rect: (pos.0, pos.1, pos.0 + size.0, pos.1 + size.1),
            text,
        }
    }
}

/// Format an instant as a PDF date string, `D:YYYYMMDDHHMMSS+00'00'` (UTC).
pub fn pdf_date(instant: DateTime<Utc>) -> String {
    instant.format("D:%Y%m%d%H%M%S+00'00'").to_string()
}

/// Format an instant the way the stamp shows it, `YYYY.MM.DD HH:MM:SS +ZZZZ`.
pub fn stamp_date(instant: DateTime<Local>) -> String {
    instant.format("%Y.%m.%d %H:%M:%S %z").to_string()
}

/// Default stamp text: the signer's name and the local date.
pub fn default_stamp_text(common_name: &str, local_date: &str) -> String {
    format!("Digitally signed by {}\nDate: {}", common_name, local_date)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_pdf_date_format() {
        let instant = Utc.with_ymd_and_hms(2024, 3, 7, 16, 45, 9).unwrap();
        assert_eq!(pdf_date(instant), "D:20240307164509+00'00'");
    }

    #[test]
    fn test_stamp_box_from_position_and_size() {
        let stamp = StampSpec::from_position(0, (200.0, 20.0), (270.0, 60.0), String::new());
        assert_eq!(stamp.rect, (200.0, 20.0, 470.0, 80.0));
    }

    #[test]
    fn test_default_stamp_text() {
        let text = default_stamp_text("JOHN PAPADOPOULOS", "2024.03.07 18:45:09 +0200");
        assert_eq!(
            text,
            "Digitally signed by JOHN PAPADOPOULOS\nDate: 2024.03.07 18:45:09 +0200"
        );
    }
}
