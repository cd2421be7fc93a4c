// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Image processing: OCR, vision-model description, and metadata.
//!
//! OCR text and vision descriptions are memoized by file-content hash so
//! re-runs over an unchanged image never repeat the expensive calls.

use base64::{engine::general_purpose, Engine as _};
use exif::{In, Tag};
use image::GenericImageView;
use std::path::Path;
use tracing::{debug, warn};

use super::{file_name_of, text, FilePipeline, ProcessingResult};
use crate::cache;
use crate::ocr::clean_ocr_text;
use crate::Result;

/// Longest edge sent to the vision model
const MAX_VISION_EDGE: u32 = 1024;

const EXIF_TAGS: [(Tag, &str); 4] = [
    (Tag::DateTime, "DateTime"),
    (Tag::Make, "Make"),
    (Tag::Model, "Model"),
    (Tag::Software, "Software"),
];

pub async fn process(pipeline: &FilePipeline, path: &Path) -> ProcessingResult {
    let filename = file_name_of(path);

    if image::open(path).is_err() {
        return ProcessingResult::failed(String::new(), "Failed to read image file");
    }

    let ocr_text = cached_ocr(pipeline, path);
    if !ocr_text.is_empty() {
        debug!("OCR text from {}: {} chars", filename, ocr_text.len());
    }
    let vision = cached_vision(pipeline, path).await;

    let mut context = format!("Image file: {}", filename);
    if !ocr_text.is_empty() {
        context.push_str(&format!(
            "\n\nText visible in image:\n{}",
            text::truncate_chars(&ocr_text, 1000)
        ));
    }
    if !vision.is_empty() {
        context.push_str(&format!("\nVisual description:\n{}", vision));
    }

    let summary = if ocr_text.is_empty() && vision.is_empty() {
        String::new()
    } else {
        let prompt = format!(
            "{}\n\n{}\n\nSummary:",
            pipeline.config.prompts.image, context
        );
        pipeline.summaries.generate(&prompt).await
    };

    let mut final_summary = if summary.is_empty() {
        "(no content detected)".to_string()
    } else {
        summary
    };

    let metadata = read_metadata(path);
    if !metadata.is_empty() {
        final_summary.push_str(&format!("\n\nMetadata: {}", metadata));
    }

    ProcessingResult::ok(final_summary)
}

/// OCR through the engine, memoized by content hash
pub(crate) fn cached_ocr(pipeline: &FilePipeline, path: &Path) -> String {
    if !pipeline.resources.ocr.available() {
        return String::new();
    }

    let key = cache::content_key(path)
        .map_err(|e| warn!("Could not fingerprint {:?}: {}", path, e))
        .ok();
    if let Some(key) = &key {
        if let Some(hit) = pipeline.ocr_cache.get(key) {
            debug!("OCR cache hit for {:?}", path);
            return hit;
        }
    }

    match pipeline.resources.ocr.read_text(path) {
        Ok(lines) => {
            let cleaned = clean_ocr_text(&lines.join("\n"));
            if let Some(key) = &key {
                pipeline.ocr_cache.set(key, &cleaned);
            }
            cleaned
        }
        Err(e) => {
            warn!("OCR failed for {:?}: {}", path, e);
            String::new()
        }
    }
}

/// Vision-model description, memoized by content hash
async fn cached_vision(pipeline: &FilePipeline, path: &Path) -> String {
    let Some(backend) = pipeline.backend.as_ref() else {
        return String::new();
    };

    let key = cache::content_key(path)
        .map_err(|e| warn!("Could not fingerprint {:?}: {}", path, e))
        .ok();
    if let Some(key) = &key {
        if let Some(hit) = pipeline.vision_cache.get(key) {
            debug!("Vision cache hit for {:?}", path);
            return hit;
        }
    }

    let encoded = match prepare_image(path) {
        Ok(data) => general_purpose::STANDARD.encode(&data),
        Err(_) => match std::fs::read(path) {
            Ok(raw) => general_purpose::STANDARD.encode(&raw),
            Err(e) => {
                warn!("Could not read {:?} for vision model: {}", path, e);
                return String::new();
            }
        },
    };

    match backend
        .generate_with_images(
            &pipeline.config.backend.models.vision,
            &pipeline.config.prompts.vision,
            &[encoded],
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
            warn!("Vision model failed for {:?}: {}", path, e);
            String::new()
        }
    }
}

/// Resize large images and re-encode as JPEG for the vision model
fn prepare_image(path: &Path) -> Result<Vec<u8>> {
    let img = image::open(path)?;

    let img = if img.width() > MAX_VISION_EDGE || img.height() > MAX_VISION_EDGE {
        img.resize(
            MAX_VISION_EDGE,
            MAX_VISION_EDGE,
            image::imageops::FilterType::Triangle,
        )
    } else {
        img
    };

    let mut buffer = Vec::new();
    let mut cursor = std::io::Cursor::new(&mut buffer);
    img.write_to(&mut cursor, image::ImageFormat::Jpeg)?;

    Ok(buffer)
}

fn read_metadata(path: &Path) -> String {
    match try_metadata(path) {
        Ok(parts) => parts,
        Err(e) => format!("Error reading metadata: {}", e),
    }
}

fn try_metadata(path: &Path) -> Result<String> {
    let img = image::open(path)?;
    let (width, height) = img.dimensions();
    let format = image::ImageFormat::from_path(path)
        .map(|f| format!("{:?}", f))
        .unwrap_or_else(|_| "unknown".to_string());

    let mut parts = vec![
        format!("Dimensions: {}x{}", width, height),
        format!("Format: {}", format),
    ];
    parts.extend(camera_tags(path));

    Ok(parts.join(", "))
}

fn camera_tags(path: &Path) -> Vec<String> {
    let Ok(file) = std::fs::File::open(path) else {
        return Vec::new();
    };
    let mut reader = std::io::BufReader::new(file);
    let Ok(meta) = exif::Reader::new().read_from_container(&mut reader) else {
        return Vec::new();
    };

    EXIF_TAGS
        .iter()
        .filter_map(|(tag, name)| {
            meta.get_field(*tag, In::PRIMARY).map(|field| {
                let value: String = field.display_value().to_string().chars().take(50).collect();
                format!("{}: {}", name, value)
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreadable_image_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, "not an image").unwrap();

        let pipeline = crate::test_support::pipeline(dir.path());
        let result = tokio_test::block_on(process(&pipeline, &path));

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Failed to read image file"));
    }

    #[test]
    fn blank_image_yields_placeholder_with_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blank.png");
        image::RgbImage::new(4, 4).save(&path).unwrap();

        let pipeline = crate::test_support::pipeline(dir.path());
        let result = tokio_test::block_on(process(&pipeline, &path));

        assert!(result.success);
        assert!(result.summary.starts_with("(no content detected)"));
        assert!(result.summary.contains("Metadata: Dimensions: 4x4"));
        assert!(result.summary.contains("Format: Png"));
    }

    #[test]
    fn oversized_images_shrink_for_the_vision_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wide.png");
        image::RgbImage::new(2048, 64).save(&path).unwrap();

        let prepared = prepare_image(&path).unwrap();
        let shrunk = image::load_from_memory(&prepared).unwrap();

        assert!(shrunk.width() <= MAX_VISION_EDGE);
        assert!(shrunk.height() <= MAX_VISION_EDGE);
    }
}
