// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Speech-to-text contract and the whisper-backed default

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use tracing::warn;

use crate::resources::ChildRegistry;
use crate::{EunomiaError, Result};

/// Transcription result for one audio track
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcription {
    pub text: String,
    pub language: String,
    pub segments: usize,
}

/// Speech-to-text backend contract
pub trait Transcriber: Send + Sync {
    fn available(&self) -> bool;

    fn transcribe(&self, audio_path: &Path) -> Result<Transcription>;
}

/// Default engine shelling out to the `whisper` CLI with JSON output
pub struct WhisperCli {
    children: Arc<ChildRegistry>,
    model: String,
    available: bool,
}

impl WhisperCli {
    pub fn new(model: &str, children: Arc<ChildRegistry>) -> Self {
        let available = Command::new("whisper")
            .arg("--help")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false);

        if !available {
            warn!("whisper not found in PATH; transcription is disabled");
        }

        Self {
            children,
            model: model.to_string(),
            available,
        }
    }
}

impl Transcriber for WhisperCli {
    fn available(&self) -> bool {
        self.available
    }

    fn transcribe(&self, audio_path: &Path) -> Result<Transcription> {
        if !self.available {
            return Err(EunomiaError::Media("whisper not available".to_string()));
        }

        // Whisper only writes result files, so give it a scratch directory
        // and read the JSON back out.
        let scratch = tempfile::tempdir()?;

        let mut cmd = Command::new("whisper");
        cmd.arg(audio_path)
            .arg("--model")
            .arg(&self.model)
            .arg("--output_format")
            .arg("json")
            .arg("--output_dir")
            .arg(scratch.path());

        let status = self.children.run_quiet(cmd)?;
        if !status.success() {
            return Err(EunomiaError::Media(format!(
                "whisper exited with {} for {:?}",
                status, audio_path
            )));
        }

        let stem = audio_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("audio");
        let json_path = scratch.path().join(format!("{}.json", stem));
        let content = std::fs::read_to_string(&json_path)?;
        let value: serde_json::Value = serde_json::from_str(&content)?;

        Ok(parse_whisper_output(&value))
    }
}

fn parse_whisper_output(value: &serde_json::Value) -> Transcription {
    Transcription {
        text: value
            .get("text")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim()
            .to_string(),
        language: value
            .get("language")
            .and_then(|v| v.as_str())
            .unwrap_or("en")
            .to_string(),
        segments: value
            .get("segments")
            .and_then(|v| v.as_array())
            .map(|a| a.len())
            .unwrap_or(0),
    }
}
