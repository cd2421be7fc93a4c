// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! OCR engine contract and the tesseract-backed default.
//!
//! OCR output is noisy; the shared line filter drops artifacts before any
//! text reaches a prompt.

use std::collections::HashMap;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use tracing::warn;

use crate::resources::ChildRegistry;
use crate::{EunomiaError, Result};

/// Minimum fraction of a line that must be alphanumeric or whitespace
const MIN_INFORMATIVE_RATIO: f64 = 0.5;

/// A single character occupying more than this fraction marks an artifact
const MAX_REPEAT_RATIO: f64 = 0.5;

/// Lines shorter than this are dropped
const MIN_LINE_LEN: usize = 2;

/// OCR backend contract
pub trait OcrEngine: Send + Sync {
    /// Whether the engine can run at all
    fn available(&self) -> bool;

    /// Raw recognized lines from an image file, unfiltered
    fn read_text(&self, image_path: &Path) -> Result<Vec<String>>;
}

/// Default engine shelling out to the `tesseract` CLI
pub struct TesseractOcr {
    children: Arc<ChildRegistry>,
    available: bool,
}

impl TesseractOcr {
    pub fn new(children: Arc<ChildRegistry>) -> Self {
        let available = Command::new("tesseract")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false);

        if !available {
            warn!("tesseract not found in PATH; OCR is disabled");
        }

        Self { children, available }
    }
}

impl OcrEngine for TesseractOcr {
    fn available(&self) -> bool {
        self.available
    }

    fn read_text(&self, image_path: &Path) -> Result<Vec<String>> {
        if !self.available {
            return Err(EunomiaError::Media("tesseract not available".to_string()));
        }

        let mut cmd = Command::new("tesseract");
        cmd.arg(image_path).arg("stdout");

        let (status, stdout) = self.children.run_capture(cmd)?;
        if !status.success() {
            return Err(EunomiaError::Media(format!(
                "tesseract exited with {} for {:?}",
                status, image_path
            )));
        }

        let text = String::from_utf8_lossy(&stdout);
        Ok(text.lines().map(str::to_string).collect())
    }
}

/// Drop OCR lines that are empty, mostly symbols, too short, or dominated
/// by a single repeated character. Lossy by intent.
pub fn clean_ocr_text(text: &str) -> String {
    let mut kept = Vec::new();

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        let chars: Vec<char> = line.chars().collect();
        let len = chars.len();

        let informative = chars
            .iter()
            .filter(|c| c.is_alphanumeric() || c.is_whitespace())
            .count();
        if (informative as f64) < (len as f64) * MIN_INFORMATIVE_RATIO {
            continue;
        }

        if len < MIN_LINE_LEN {
            continue;
        }

        let mut counts: HashMap<char, usize> = HashMap::new();
        for &c in &chars {
            *counts.entry(c).or_insert(0) += 1;
        }
        if counts
            .values()
            .any(|&n| (n as f64) > (len as f64) * MAX_REPEAT_RATIO)
        {
            continue;
        }

        kept.push(line.to_string());
    }

    kept.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_character_line_is_dropped() {
        assert_eq!(clean_ocr_text("!!!!!!!!!!"), "");
        assert_eq!(clean_ocr_text("aaaaaaaab"), "");
    }

    #[test]
    fn real_text_line_is_kept() {
        assert_eq!(
            clean_ocr_text("Invoice #4521 dated 2024-01-03"),
            "Invoice #4521 dated 2024-01-03"
        );
    }

    #[test]
    fn empty_and_single_character_lines_are_dropped() {
        assert_eq!(clean_ocr_text(""), "");
        assert_eq!(clean_ocr_text("   \n\n"), "");
        assert_eq!(clean_ocr_text("a"), "");
    }

    #[test]
    fn mostly_symbolic_line_is_dropped() {
        assert_eq!(clean_ocr_text("-=|=- x -=|=-"), "");
    }

    #[test]
    fn exactly_half_informative_is_kept() {
        // Strict comparisons on both thresholds
        assert_eq!(clean_ocr_text("ab!!"), "ab!!");
    }

    #[test]
    fn filter_preserves_surviving_lines_in_order() {
        let noisy = "Quarterly Report 2024\n!!!!!!!!!!\n\nx\nRevenue up 12 percent";
        assert_eq!(
            clean_ocr_text(noisy),
            "Quarterly Report 2024\nRevenue up 12 percent"
        );
    }
}
