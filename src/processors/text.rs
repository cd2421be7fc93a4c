// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Plain text, code, markup, and delimited data files.

use std::path::Path;

use super::{FilePipeline, ProcessingResult};

/// How much of the file the encoding sniff looks at.
const ENCODING_SNIFF_BYTES: usize = 100 * 1024;

pub fn process(pipeline: &FilePipeline, path: &Path) -> ProcessingResult {
    let max_chars = pipeline.config.extraction.max_text_chars;

    match read_text(path) {
        Ok(content) => ProcessingResult::ok(truncate_chars(&content, max_chars)),
        Err(e) => ProcessingResult::failed(String::new(), format!("Failed to read text file: {}", e)),
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum TextEncoding {
    Utf8,
    Utf16Le,
    Utf16Be,
}

/// Read a file as text: sniff the encoding from a bounded prefix, then
/// decode with invalid sequences replaced rather than erroring.
pub(crate) fn read_text(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    let sniff = &bytes[..bytes.len().min(ENCODING_SNIFF_BYTES)];

    Ok(match sniff_encoding(sniff) {
        TextEncoding::Utf16Le => decode_utf16_bytes(&bytes, true),
        TextEncoding::Utf16Be => decode_utf16_bytes(&bytes, false),
        TextEncoding::Utf8 => {
            let body = if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
                bytes[3..].to_vec()
            } else {
                bytes
            };
            match String::from_utf8(body) {
                Ok(s) => s,
                Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
            }
        }
    })
}

/// Guess the byte encoding from a prefix. BOMs win; otherwise BOM-less
/// UTF-16 shows up as null bytes concentrated on one parity.
fn sniff_encoding(prefix: &[u8]) -> TextEncoding {
    if prefix.starts_with(&[0xFF, 0xFE]) {
        return TextEncoding::Utf16Le;
    }
    if prefix.starts_with(&[0xFE, 0xFF]) {
        return TextEncoding::Utf16Be;
    }

    let mut even_nulls = 0usize;
    let mut odd_nulls = 0usize;
    for (i, &b) in prefix.iter().enumerate() {
        if b == 0 {
            if i % 2 == 0 {
                even_nulls += 1;
            } else {
                odd_nulls += 1;
            }
        }
    }
    if (even_nulls + odd_nulls) * 4 > prefix.len() {
        if odd_nulls >= even_nulls {
            TextEncoding::Utf16Le
        } else {
            TextEncoding::Utf16Be
        }
    } else {
        TextEncoding::Utf8
    }
}

fn decode_utf16_bytes(bytes: &[u8], little_endian: bool) -> String {
    // A trailing odd byte is dropped.
    let units = bytes.chunks_exact(2).map(|pair| {
        if little_endian {
            u16::from_le_bytes([pair[0], pair[1]])
        } else {
            u16::from_be_bytes([pair[0], pair[1]])
        }
    });
    let mut decoded: String = char::decode_utf16(units)
        .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect();
    if decoded.starts_with('\u{feff}') {
        decoded.drain(..3);
    }
    decoded
}

pub(crate) fn truncate_chars(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        content.to_string()
    } else {
        content.chars().take(max_chars).collect()
    }
}
