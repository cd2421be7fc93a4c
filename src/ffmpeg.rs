// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! ffmpeg/ffprobe wrappers: audio track extraction, frame sampling, and
//! container probing. All media decoding is delegated to these tools.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tracing::warn;

use crate::resources::ChildRegistry;
use crate::{EunomiaError, Result};

/// Container metadata from ffprobe
#[derive(Debug, Clone)]
pub struct MediaProbe {
    pub duration_secs: f64,
    pub format_name: String,
    pub size_bytes: u64,
}

/// Check if ffmpeg is available on the system
pub fn ffmpeg_available() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Check if ffprobe is available on the system
pub fn ffprobe_available() -> bool {
    Command::new("ffprobe")
        .arg("-version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Subprocess-backed media tooling for one worker
pub struct MediaTools {
    children: Arc<ChildRegistry>,
    ffmpeg: bool,
    ffprobe: bool,
}

impl MediaTools {
    pub fn new(children: Arc<ChildRegistry>) -> Self {
        let ffmpeg = ffmpeg_available();
        let ffprobe = ffprobe_available();

        if !ffmpeg {
            warn!("ffmpeg not found in PATH; media extraction is disabled");
        }

        Self {
            children,
            ffmpeg,
            ffprobe,
        }
    }

    pub fn available(&self) -> bool {
        self.ffmpeg
    }

    /// Extract a mono 16kHz PCM audio track, capped at `max_secs`
    pub fn extract_audio(&self, video: &Path, out_wav: &Path, max_secs: u64) -> Result<()> {
        if !self.ffmpeg {
            return Err(EunomiaError::Media("ffmpeg not available".to_string()));
        }

        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-i")
            .arg(video)
            .arg("-vn")
            .arg("-acodec")
            .arg("pcm_s16le")
            .arg("-ar")
            .arg("16000")
            .arg("-ac")
            .arg("1")
            .arg("-t")
            .arg(max_secs.to_string())
            .arg("-y")
            .arg(out_wav);

        let status = self.children.run_quiet(cmd)?;
        if !status.success() {
            return Err(EunomiaError::Media(format!(
                "ffmpeg audio extraction failed for {:?}",
                video
            )));
        }

        Ok(())
    }

    /// Sample one frame every `interval_secs` into numbered JPEGs under
    /// `out_dir`, returned in order
    pub fn sample_frames(
        &self,
        video: &Path,
        out_dir: &Path,
        interval_secs: u64,
    ) -> Result<Vec<PathBuf>> {
        if !self.ffmpeg {
            return Err(EunomiaError::Media("ffmpeg not available".to_string()));
        }

        let pattern = out_dir.join("frame_%04d.jpg");

        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-i")
            .arg(video)
            .arg("-vf")
            .arg(format!("fps=1/{}", interval_secs.max(1)))
            .arg("-q:v")
            .arg("2")
            .arg("-f")
            .arg("image2")
            .arg(pattern);

        let status = self.children.run_quiet(cmd)?;
        if !status.success() {
            return Err(EunomiaError::Media(format!(
                "ffmpeg frame sampling failed for {:?}",
                video
            )));
        }

        let mut frames: Vec<PathBuf> = std::fs::read_dir(out_dir)?
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with("frame_") && n.ends_with(".jpg"))
                    .unwrap_or(false)
            })
            .collect();
        frames.sort();

        Ok(frames)
    }

    /// Probe container metadata as JSON
    pub fn probe(&self, media: &Path) -> Result<MediaProbe> {
        if !self.ffprobe {
            return Err(EunomiaError::Media("ffprobe not available".to_string()));
        }

        let mut cmd = Command::new("ffprobe");
        cmd.arg("-v")
            .arg("quiet")
            .arg("-print_format")
            .arg("json")
            .arg("-show_format")
            .arg("-show_streams")
            .arg(media);

        let (status, stdout) = self.children.run_capture(cmd)?;
        if !status.success() {
            return Err(EunomiaError::Media(format!(
                "ffprobe failed for {:?}",
                media
            )));
        }

        let value: serde_json::Value = serde_json::from_slice(&stdout)?;

        Ok(parse_probe_output(&value))
    }
}

// ffprobe reports numbers as JSON strings.
fn parse_probe_output(value: &serde_json::Value) -> MediaProbe {
    let format = &value["format"];

    MediaProbe {
        duration_secs: format
            .get("duration")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.0),
        format_name: format
            .get("format_name")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string(),
        size_bytes: format
            .get("size")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
            .unwrap_or(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_output_parses_stringly_typed_numbers() {
        let value = serde_json::json!({
            "format": {
                "duration": "12.532000",
                "format_name": "mov,mp4,m4a,3gp,3g2,mj2",
                "size": "1048576"
            }
        });

        let probe = parse_probe_output(&value);
        assert!((probe.duration_secs - 12.532).abs() < 1e-6);
        assert_eq!(probe.format_name, "mov,mp4,m4a,3gp,3g2,mj2");
        assert_eq!(probe.size_bytes, 1_048_576);
    }

    #[test]
    fn probe_output_defaults_when_format_is_missing() {
        let probe = parse_probe_output(&serde_json::json!({}));
        assert_eq!(probe.duration_secs, 0.0);
        assert_eq!(probe.format_name, "unknown");
        assert_eq!(probe.size_bytes, 0);
    }
}
