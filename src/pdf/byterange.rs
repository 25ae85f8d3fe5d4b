//! ByteRange arithmetic for the signature placeholder.
//!
//! A PDF signature covers the whole document except the `/Contents` value
//! itself. The ByteRange array `[offset1 length1 offset2 length2]` names the
//! two covered ranges; the hex-encoded CMS blob sits between them inside
//! `<` and `>` delimiters. The array is emitted with fixed-width numbers so
//! it can be patched in place once the final offsets are known.

use crate::error::{Error, Result};

/// Width of each number in the patched ByteRange array.
const RANGE_DIGITS: usize = 10;

/// Calculator for the signature placeholder and its byte ranges.
#[derive(Debug)]
pub struct ByteRangeCalculator {
    /// Size of the `/Contents` placeholder, angle brackets included
    placeholder_size: usize,
}

impl ByteRangeCalculator {
    /// Calculator for a signature of at most `max_signature_size` bytes.
    ///
    /// Each byte becomes two hex digits, plus two delimiter characters.
    pub fn new(max_signature_size: usize) -> Self {
        Self {
            placeholder_size: max_signature_size * 2 + 2,
        }
    }

    /// The placeholder size, angle brackets included.
    pub fn placeholder_size(&self) -> usize {
        self.placeholder_size
    }

    /// The zero-filled `/Contents` placeholder.
    pub fn placeholder(&self) -> String {
        format!("<{}>", "0".repeat(self.placeholder_size - 2))
    }

    /// The fixed-width ByteRange value emitted before offsets are known.
    pub fn range_placeholder() -> String {
        format!(
            "[0 {:0w$} {:0w$} {:0w$}]",
            0,
            0,
            0,
            w = RANGE_DIGITS
        )
    }

    /// ByteRange for a document of `file_size` bytes whose `/Contents` value
    /// starts at `contents_offset` (at the `<`).
    pub fn byte_range(&self, file_size: usize, contents_offset: usize) -> [i64; 4] {
        let after_sig = (contents_offset + self.placeholder_size) as i64;
        [
            0,
            contents_offset as i64,
            after_sig,
            file_size as i64 - after_sig,
        ]
    }

    /// Render a ByteRange with the same fixed width as
    /// [`range_placeholder`](Self::range_placeholder).
    pub fn format_byte_range(byte_range: &[i64; 4]) -> String {
        format!(
            "[0 {:0w$} {:0w$} {:0w$}]",
            byte_range[1],
            byte_range[2],
            byte_range[3],
            w = RANGE_DIGITS
        )
    }

    /// Concatenation of the two covered ranges; this is what gets digested.
    pub fn signed_bytes(pdf: &[u8], byte_range: &[i64; 4]) -> Result<Vec<u8>> {
        let (offset1, length1) = (byte_range[0] as usize, byte_range[1] as usize);
        let (offset2, length2) = (byte_range[2] as usize, byte_range[3] as usize);

        if offset1 + length1 > pdf.len() || offset2 + length2 > pdf.len() {
            return Err(Error::InvalidPdf(format!(
                "ByteRange exceeds file size: {:?} > {}",
                byte_range,
                pdf.len()
            )));
        }

        let mut signed = Vec::with_capacity(length1 + length2);
        signed.extend_from_slice(&pdf[offset1..offset1 + length1]);
        signed.extend_from_slice(&pdf[offset2..offset2 + length2]);
        Ok(signed)
    }

    /// Patch the hex-encoded signature into the placeholder, zero-padded.
    pub fn insert_signature(
        &self,
        pdf: &mut [u8],
        contents_offset: usize,
        signature_hex: &str,
    ) -> Result<()> {
        if signature_hex.len() + 2 > self.placeholder_size {
            return Err(Error::InvalidPdf(format!(
                "signature ({} hex digits) exceeds placeholder ({} bytes)",
                signature_hex.len(),
                self.placeholder_size
            )));
        }
        if contents_offset + self.placeholder_size > pdf.len() {
            return Err(Error::InvalidPdf(
                "signature insertion would exceed file bounds".to_string(),
            ));
        }

        let mut value = String::with_capacity(self.placeholder_size);
        value.push('<');
        value.push_str(signature_hex);
        for _ in 0..self.placeholder_size - 2 - signature_hex.len() {
            value.push('0');
        }
        value.push('>');

        pdf[contents_offset..contents_offset + self.placeholder_size]
            .copy_from_slice(value.as_bytes());
        Ok(())
    }
}

impl Default for ByteRangeCalculator {
    fn default() -> Self {
        // Room for the CMS blob plus a timestamp token.
        Self::new(8192)
    }
}

/// Convert bytes to uppercase hex.
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    const HEX_CHARS: &[u8] = b"0123456789ABCDEF";
    let mut hex = String::with_capacity(bytes.len() * 2);
    for &byte in bytes {
        hex.push(HEX_CHARS[(byte >> 4) as usize] as char);
        hex.push(HEX_CHARS[(byte & 0x0F) as usize] as char);
    }
    hex
}
