// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Video and audio understanding: transcription, frame OCR, frame vision.
//!
//! Transcription and frame OCR persist together as one JSON blob in the
//! "transcription" namespace, keyed by content hash. The generated summary
//! stays out of the blob so a prompt change regenerates it without
//! re-running Whisper.

use base64::{engine::general_purpose, Engine as _};
use id3::TagLike;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};

use super::{file_name_of, text, FileKind, FilePipeline, ProcessingResult};
use crate::cache;
use crate::ocr::clean_ocr_text;
use crate::transcribe::Transcription;

/// Frames whose cleaned OCR text shares this long a leading substring with
/// the previous kept frame count as the same screen
const SCREEN_PREFIX: usize = 200;
/// Later repeats are dropped on a shorter, case-folded prefix
const REPEAT_PREFIX: usize = 100;

/// Signals persisted per media file; the summary is deliberately excluded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionBlob {
    pub transcript: String,
    pub ocr_text: String,
    pub language: String,
    pub segments: usize,
}

pub async fn process(pipeline: &FilePipeline, path: &Path) -> ProcessingResult {
    let name = file_name_of(path);
    let is_video = pipeline.registry.kind_of(path) == FileKind::Video;

    let blob = cached_signals(pipeline, path, is_video);
    let vision = if is_video {
        cached_frame_vision(pipeline, path).await
    } else {
        String::new()
    };
    let tags = if is_video {
        String::new()
    } else {
        audio_tags(path)
    };

    let summary = compose_summary(pipeline, &name, &blob, &vision, &tags, is_video).await;
    let mut summary = if summary.is_empty() {
        "(No summary generated)".to_string()
    } else {
        summary
    };

    if let Ok(probe) = pipeline.resources.media.probe(path) {
        if probe.duration_secs > 0.0 {
            let minutes = probe.duration_secs as u64 / 60;
            let seconds = probe.duration_secs as u64 % 60;
            summary.push_str(&format!(
                "\n\nMetadata: Duration: {}m {}s, Format: {}",
                minutes, seconds, probe.format_name
            ));
        }
    }

    ProcessingResult::ok(summary)
}

/// Transcript plus on-screen OCR text, memoized by content hash
fn cached_signals(pipeline: &FilePipeline, path: &Path, is_video: bool) -> TranscriptionBlob {
    let key = cache::content_key(path)
        .map_err(|e| warn!("Could not fingerprint {:?}: {}", path, e))
        .ok();

    if let Some(key) = &key {
        if let Some(hit) = pipeline.transcription_cache.get(key) {
            match serde_json::from_str::<TranscriptionBlob>(&hit) {
                Ok(blob) => {
                    debug!("Transcription cache hit for {:?}", path);
                    return blob;
                }
                Err(e) => warn!("Discarding unreadable transcription entry for {:?}: {}", path, e),
            }
        }
    }

    let transcription = transcribe(pipeline, path, is_video);
    let ocr_text = if is_video {
        ocr_frames(pipeline, path)
    } else {
        String::new()
    };

    let blob = TranscriptionBlob {
        transcript: transcription
            .as_ref()
            .map(|t| t.text.clone())
            .unwrap_or_default(),
        ocr_text,
        language: transcription
            .as_ref()
            .map(|t| t.language.clone())
            .unwrap_or_else(|| "en".to_string()),
        segments: transcription.as_ref().map(|t| t.segments).unwrap_or(0),
    };

    // Engines that never ran produce no signal worth remembering
    if transcription.is_some() || !blob.ocr_text.is_empty() {
        if let Some(key) = &key {
            if let Ok(json) = serde_json::to_string(&blob) {
                pipeline.transcription_cache.set(key, &json);
            }
        }
    }

    blob
}

fn transcribe(pipeline: &FilePipeline, path: &Path, is_video: bool) -> Option<Transcription> {
    let transcriber = &pipeline.resources.transcriber;
    if !transcriber.available() {
        return None;
    }

    if !is_video {
        info!("Transcribing {:?}", path);
        return match transcriber.transcribe(path) {
            Ok(t) => Some(t),
            Err(e) => {
                warn!("Transcription failed for {:?}: {}", path, e);
                None
            }
        };
    }

    // Videos transcribe through an extracted mono 16kHz track
    let scratch = match tempfile::tempdir() {
        Ok(d) => d,
        Err(e) => {
            warn!("Could not create scratch directory: {}", e);
            return None;
        }
    };
    let wav = scratch.path().join("audio.wav");
    if let Err(e) = pipeline.resources.media.extract_audio(
        path,
        &wav,
        pipeline.config.extraction.max_media_duration_secs,
    ) {
        warn!("Audio extraction failed for {:?}: {}", path, e);
        return None;
    }

    info!("Transcribing {:?}", path);
    match transcriber.transcribe(&wav) {
        Ok(t) => Some(t),
        Err(e) => {
            warn!("Transcription failed for {:?}: {}", path, e);
            None
        }
    }
}

/// OCR over frames sampled at a fixed interval, with screen deduplication
fn ocr_frames(pipeline: &FilePipeline, path: &Path) -> String {
    if !pipeline.resources.ocr.available() || !pipeline.resources.media.available() {
        return String::new();
    }

    let scratch = match tempfile::tempdir() {
        Ok(d) => d,
        Err(e) => {
            warn!("Could not create scratch directory: {}", e);
            return String::new();
        }
    };
    let frames = match pipeline.resources.media.sample_frames(
        path,
        scratch.path(),
        pipeline.config.extraction.ocr_frame_interval_secs,
    ) {
        Ok(frames) => frames,
        Err(e) => {
            warn!("Frame sampling failed for {:?}: {}", path, e);
            return String::new();
        }
    };
    debug!("Running OCR over {} sampled frames", frames.len());

    let mut texts = Vec::new();
    for frame in &frames {
        let raw = match pipeline.resources.ocr.read_text(frame) {
            Ok(lines) => lines.join("\n"),
            Err(_) => continue,
        };
        let cleaned = clean_ocr_text(&raw);
        if !cleaned.is_empty() {
            texts.push(cleaned);
        }
    }

    dedupe_repeats(collapse_consecutive(texts)).join("\n\n")
}

/// Drop frames showing the same screen as the previously kept frame
pub(crate) fn collapse_consecutive(texts: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for text_block in texts {
        let same = out
            .last()
            .map(|prev| {
                prev.chars().take(SCREEN_PREFIX).eq(text_block.chars().take(SCREEN_PREFIX))
            })
            .unwrap_or(false);
        if !same {
            out.push(text_block);
        }
    }
    out
}

/// Drop screens that reappear later in the video
pub(crate) fn dedupe_repeats(texts: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for text_block in texts {
        let key: String = text_block
            .chars()
            .take(REPEAT_PREFIX)
            .collect::<String>()
            .to_lowercase();
        if seen.insert(key) {
            out.push(text_block);
        }
    }
    out
}

/// Vision-model description of sampled frames, memoized by content hash
async fn cached_frame_vision(pipeline: &FilePipeline, path: &Path) -> String {
    let Some(backend) = pipeline.backend.as_ref() else {
        return String::new();
    };
    if !pipeline.resources.media.available() {
        return String::new();
    }

    let key = cache::content_key(path)
        .map_err(|e| warn!("Could not fingerprint {:?}: {}", path, e))
        .ok();
    if let Some(key) = &key {
        if let Some(hit) = pipeline.vision_cache.get(key) {
            debug!("Vision cache hit for {:?}", path);
            return hit;
        }
    }

    let scratch = match tempfile::tempdir() {
        Ok(d) => d,
        Err(e) => {
            warn!("Could not create scratch directory: {}", e);
            return String::new();
        }
    };
    let frames = match pipeline.resources.media.sample_frames(
        path,
        scratch.path(),
        pipeline.config.extraction.frame_interval_secs,
    ) {
        Ok(frames) => frames,
        Err(e) => {
            warn!("Frame sampling failed for {:?}: {}", path, e);
            return String::new();
        }
    };

    let mut images = Vec::new();
    for frame in frames.iter().take(pipeline.config.extraction.max_frames) {
        match std::fs::read(frame) {
            Ok(bytes) => images.push(general_purpose::STANDARD.encode(&bytes)),
            Err(e) => warn!("Could not read sampled frame {:?}: {}", frame, e),
        }
    }
    if images.is_empty() {
        return String::new();
    }

    match backend
        .generate_with_images(
            &pipeline.config.backend.models.vision,
            &pipeline.config.prompts.video_frames,
            &images,
        )
        .await
    {
        Ok(description) => {
            let description = description.trim().to_string();
            if let Some(key) = &key {
                pipeline.vision_cache.set(key, &description);
            }
            description
        }
        Err(e) => {
            warn!("Vision analysis failed for {:?}: {}", path, e);
            String::new()
        }
    }
}

/// ID3 title/artist/album for MP3 files
fn audio_tags(path: &Path) -> String {
    if super::extension_of(path) != "mp3" {
        return String::new();
    }
    let Ok(tag) = id3::Tag::read_from_path(path) else {
        return String::new();
    };

    let mut parts = Vec::new();
    if let Some(title) = tag.title() {
        parts.push(format!("Title: {}", title));
    }
    if let Some(artist) = tag.artist() {
        parts.push(format!("Artist: {}", artist));
    }
    if let Some(album) = tag.album() {
        parts.push(format!("Album: {}", album));
    }
    parts.join(", ")
}

async fn compose_summary(
    pipeline: &FilePipeline,
    name: &str,
    blob: &TranscriptionBlob,
    vision: &str,
    tags: &str,
    is_video: bool,
) -> String {
    if blob.transcript.is_empty() && blob.ocr_text.is_empty() && vision.is_empty() && tags.is_empty()
    {
        return String::new();
    }

    let mut lines = vec![if is_video {
        format!("Video file: {}", name)
    } else {
        format!("Audio file: {}", name)
    }];
    if !tags.is_empty() {
        lines.push(format!("\nTags: {}", tags));
    }
    if !vision.is_empty() {
        lines.push(format!("\nVisual analysis:\n{}", vision));
    }
    if !blob.transcript.is_empty() {
        lines.push(format!(
            "\nAudio transcription:\n{}",
            text::truncate_chars(&blob.transcript, 1000)
        ));
    }
    if !blob.ocr_text.is_empty() {
        lines.push(format!(
            "\nText visible on screen:\n{}",
            text::truncate_chars(&blob.ocr_text, 1000)
        ));
    }
    let context = lines.join("\n");

    let head = if is_video {
        &pipeline.config.prompts.video
    } else {
        &pipeline.config.prompts.audio
    };
    let prompt = format!("{}\n\n{}\n\nSummary:", head, context);

    pipeline.summaries.generate(&prompt).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consecutive_duplicate_screens_collapse() {
        let frames = vec![
            "login page".to_string(),
            "login page".to_string(),
            "dashboard".to_string(),
            "login page".to_string(),
        ];

        let collapsed = collapse_consecutive(frames);
        assert_eq!(collapsed, vec!["login page", "dashboard", "login page"]);

        let unique = dedupe_repeats(collapsed);
        assert_eq!(unique, vec!["login page", "dashboard"]);
    }

    #[test]
    fn repeats_match_case_insensitively_on_prefix() {
        let frames = vec!["ERROR 404 not found".to_string(), "error 404 NOT FOUND".to_string()];
        assert_eq!(dedupe_repeats(frames).len(), 1);
    }

    #[test]
    fn unreadable_media_degrades_to_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.mp3");
        std::fs::write(&path, b"not really audio").unwrap();

        let pipeline = crate::test_support::pipeline(dir.path());
        let result = tokio_test::block_on(process(&pipeline, &path));

        assert!(result.success);
        assert!(result.summary.starts_with("(No summary generated)"));
    }
}
