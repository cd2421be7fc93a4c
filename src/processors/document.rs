// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! PDF, Word, spreadsheet, and JSON extraction.
//!
//! Each puller bounds its own output and folds format-library errors into
//! the result instead of raising.

use std::path::Path;

use calamine::{open_workbook_auto, Reader};

use super::{text, FilePipeline, ProcessingResult};
use crate::{EunomiaError, Result};

const SHEET_WINDOW: usize = 5;
const ROW_WINDOW: usize = 100;

pub fn process(pipeline: &FilePipeline, path: &Path) -> ProcessingResult {
    let max_chars = pipeline.config.extraction.max_text_chars;

    let extracted = match super::extension_of(path).as_str() {
        "pdf" => extract_pdf(path),
        "docx" | "doc" => extract_docx(path),
        "xlsx" | "xls" => extract_spreadsheet(path),
        "json" | "jsonl" => extract_json(path),
        other => Err(EunomiaError::Document(format!(
            "No extractor for .{}",
            other
        ))),
    };

    match extracted {
        Ok(content) => ProcessingResult::ok(text::truncate_chars(&content, max_chars)),
        Err(e) => ProcessingResult::failed(String::new(), e.to_string()),
    }
}

fn extract_pdf(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    let extracted = pdf_extract::extract_text_from_mem(&bytes)
        .map_err(|e| EunomiaError::Pdf(format!("Text extraction failed: {}", e)))?;

    // Scanned PDFs extract as whitespace; describe them instead
    if extracted.trim().is_empty() {
        let pages = lopdf::Document::load_mem(&bytes)
            .map(|doc| doc.get_pages().len())
            .unwrap_or(0);
        return Ok(format!(
            "PDF document: {} ({} pages, no extractable text)",
            super::file_name_of(path),
            pages
        ));
    }

    Ok(extracted)
}

/// Pull the `<w:t>` text runs out of the DOCX zip's word/document.xml
fn extract_docx(path: &Path) -> Result<String> {
    let file = std::fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| EunomiaError::Document(format!("Failed to open Word archive: {}", e)))?;

    let mut xml = String::new();
    {
        let mut entry = archive
            .by_name("word/document.xml")
            .map_err(|_| EunomiaError::Document("No word/document.xml in archive".to_string()))?;
        std::io::Read::read_to_string(&mut entry, &mut xml)?;
    }

    let mut out = String::new();
    for chunk in xml.split('<').skip(1) {
        let Some((tag, rest)) = chunk.split_once('>') else {
            continue;
        };
        if tag == "w:t" || tag.starts_with("w:t ") {
            if !rest.is_empty() {
                out.push_str(&unescape_xml(rest));
                out.push(' ');
            }
        } else if tag == "/w:p" && !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
    }

    Ok(out.trim_end().to_string())
}

fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn extract_spreadsheet(path: &Path) -> Result<String> {
    let mut workbook = open_workbook_auto(path)
        .map_err(|e| EunomiaError::Document(format!("Failed to open spreadsheet: {}", e)))?;

    let sheet_names: Vec<String> = workbook.sheet_names().to_vec();
    let mut out = format!("Sheets: {}\n", sheet_names.join(", "));

    for name in sheet_names.iter().take(SHEET_WINDOW) {
        let Ok(range) = workbook.worksheet_range(name) else {
            continue;
        };
        out.push_str(&format!("\n[{}]\n", name));
        for (i, row) in range.rows().enumerate() {
            if i >= ROW_WINDOW {
                out.push_str("...\n");
                break;
            }
            let cells: Vec<String> = row.iter().map(|c| c.to_string()).collect();
            out.push_str(&cells.join("\t"));
            out.push('\n');
        }
    }

    Ok(out)
}

/// Pretty-print valid JSON; JSONL and malformed files read as plain text
fn extract_json(path: &Path) -> Result<String> {
    let raw = text::read_text(path)?;
    match serde_json::from_str::<serde_json::Value>(&raw) {
        Ok(value) => Ok(serde_json::to_string_pretty(&value)?),
        Err(_) => Ok(raw),
    }
}
