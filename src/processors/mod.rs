// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! File processing pipeline.
//!
//! Extensions map to a processing capability through a registry built once
//! at startup; every capability funnels into the same
//! `ProcessingResult` contract so orchestration never special-cases a
//! file type.

pub mod archive;
pub mod document;
pub mod image;
pub mod media;
pub mod text;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::cache::{self, ContentHashCache};
use crate::ollama::TextBackend;
use crate::resources::WorkerResources;
use crate::summary::SummaryGenerator;
use crate::{AppConfig, Result};

/// Unknown files up to this size are tried as text
const UNKNOWN_TEXT_LIMIT: u64 = 1024 * 1024;

/// File classification, one of the categories the organizer reports on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    Text,
    Pdf,
    Document,
    Json,
    Code,
    Markup,
    Data,
    Spreadsheet,
    Image,
    Video,
    Audio,
    Archive,
    Unknown,
}

/// Processing capability a file dispatches to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Text,
    Document,
    Image,
    Media,
    Archive,
}

impl FileKind {
    pub fn capability(self) -> Option<Capability> {
        match self {
            FileKind::Text | FileKind::Code | FileKind::Markup | FileKind::Data => {
                Some(Capability::Text)
            }
            FileKind::Pdf | FileKind::Document | FileKind::Json | FileKind::Spreadsheet => {
                Some(Capability::Document)
            }
            FileKind::Image => Some(Capability::Image),
            FileKind::Video | FileKind::Audio => Some(Capability::Media),
            FileKind::Archive => Some(Capability::Archive),
            FileKind::Unknown => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FileKind::Text => "text",
            FileKind::Pdf => "pdf",
            FileKind::Document => "document",
            FileKind::Json => "json",
            FileKind::Code => "code",
            FileKind::Markup => "markup",
            FileKind::Data => "data",
            FileKind::Spreadsheet => "spreadsheet",
            FileKind::Image => "image",
            FileKind::Video => "video",
            FileKind::Audio => "audio",
            FileKind::Archive => "archive",
            FileKind::Unknown => "unknown",
        }
    }

    /// Category used when no LLM backend is available
    pub fn fallback_category(self) -> &'static str {
        match self {
            FileKind::Text => "Text",
            FileKind::Pdf | FileKind::Document | FileKind::Spreadsheet => "Documents",
            FileKind::Json | FileKind::Data => "Data_Files",
            FileKind::Code | FileKind::Markup => "Code",
            FileKind::Image => "Images",
            FileKind::Video | FileKind::Audio => "Media",
            FileKind::Archive => "Archives",
            FileKind::Unknown => "Uncategorized",
        }
    }
}

/// Extension-to-kind lookup table, built once at startup
pub struct ProcessorRegistry {
    kinds: HashMap<&'static str, FileKind>,
}

const KIND_TABLE: &[(&str, FileKind)] = &[
    ("txt", FileKind::Text),
    ("md", FileKind::Text),
    ("rst", FileKind::Text),
    ("log", FileKind::Text),
    ("pdf", FileKind::Pdf),
    ("docx", FileKind::Document),
    ("doc", FileKind::Document),
    ("json", FileKind::Json),
    ("jsonl", FileKind::Json),
    ("py", FileKind::Code),
    ("js", FileKind::Code),
    ("java", FileKind::Code),
    ("cpp", FileKind::Code),
    ("c", FileKind::Code),
    ("h", FileKind::Code),
    ("hpp", FileKind::Code),
    ("cs", FileKind::Code),
    ("go", FileKind::Code),
    ("rs", FileKind::Code),
    ("rb", FileKind::Code),
    ("php", FileKind::Code),
    ("swift", FileKind::Code),
    ("kt", FileKind::Code),
    ("ts", FileKind::Code),
    ("tsx", FileKind::Code),
    ("jsx", FileKind::Code),
    ("html", FileKind::Markup),
    ("htm", FileKind::Markup),
    ("xml", FileKind::Markup),
    ("svg", FileKind::Markup),
    ("csv", FileKind::Data),
    ("tsv", FileKind::Data),
    ("xlsx", FileKind::Spreadsheet),
    ("xls", FileKind::Spreadsheet),
    ("jpg", FileKind::Image),
    ("jpeg", FileKind::Image),
    ("png", FileKind::Image),
    ("gif", FileKind::Image),
    ("bmp", FileKind::Image),
    ("webp", FileKind::Image),
    ("tiff", FileKind::Image),
    ("tif", FileKind::Image),
    ("mp4", FileKind::Video),
    ("avi", FileKind::Video),
    ("mov", FileKind::Video),
    ("mkv", FileKind::Video),
    ("wmv", FileKind::Video),
    ("flv", FileKind::Video),
    ("webm", FileKind::Video),
    ("m4v", FileKind::Video),
    ("mp3", FileKind::Audio),
    ("wav", FileKind::Audio),
    ("flac", FileKind::Audio),
    ("aac", FileKind::Audio),
    ("ogg", FileKind::Audio),
    ("m4a", FileKind::Audio),
    ("wma", FileKind::Audio),
    ("zip", FileKind::Archive),
    ("tar", FileKind::Archive),
    ("gz", FileKind::Archive),
    ("rar", FileKind::Archive),
    ("7z", FileKind::Archive),
    ("bz2", FileKind::Archive),
];

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self {
            kinds: KIND_TABLE.iter().copied().collect(),
        }
    }

    /// Kind for a lowercase extension without the leading dot
    pub fn kind_for(&self, ext: &str) -> FileKind {
        self.kinds.get(ext).copied().unwrap_or(FileKind::Unknown)
    }

    pub fn capability_for(&self, ext: &str) -> Option<Capability> {
        self.kind_for(ext).capability()
    }

    pub fn kind_of(&self, path: &Path) -> FileKind {
        self.kind_for(&extension_of(path))
    }
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowercase extension without the leading dot; empty when absent
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default()
}

/// Uniform return contract across every processor
#[derive(Debug, Clone)]
pub struct ProcessingResult {
    pub success: bool,
    pub summary: String,
    pub error: Option<String>,
}

impl ProcessingResult {
    pub fn ok(summary: impl Into<String>) -> Self {
        Self {
            success: true,
            summary: summary.into(),
            error: None,
        }
    }

    pub fn failed(summary: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            summary: summary.into(),
            error: Some(error.into()),
        }
    }
}

/// Everything known about one scanned file once extraction completes
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub path: PathBuf,
    pub name: String,
    pub extension: String,
    pub size: u64,
    pub mime_type: String,
    pub kind: FileKind,
    pub content: String,
    pub metadata: serde_json::Value,
    pub transcription: Option<String>,
    pub summary: Option<String>,
    pub error: Option<String>,
}

/// One worker's processing pipeline: the capability registry plus the
/// caches, summary generator, and engine handles everything dispatches
/// through.
pub struct FilePipeline {
    config: AppConfig,
    backend: Option<Arc<dyn TextBackend>>,
    summaries: SummaryGenerator,
    registry: ProcessorRegistry,
    ocr_cache: ContentHashCache,
    vision_cache: ContentHashCache,
    transcription_cache: ContentHashCache,
    resources: WorkerResources,
}

impl FilePipeline {
    pub fn new(
        config: &AppConfig,
        backend: Option<Arc<dyn TextBackend>>,
        resources: WorkerResources,
    ) -> Result<Self> {
        let cache_dir = config.cache_dir();

        Ok(Self {
            config: config.clone(),
            summaries: SummaryGenerator::new(
                backend.clone(),
                &config.backend.models.text,
                &cache_dir,
            )?,
            backend,
            registry: ProcessorRegistry::new(),
            ocr_cache: ContentHashCache::open(&cache_dir, "ocr")?,
            vision_cache: ContentHashCache::open(&cache_dir, "vision")?,
            transcription_cache: ContentHashCache::open(&cache_dir, "transcription")?,
            resources,
        })
    }

    pub fn registry(&self) -> &ProcessorRegistry {
        &self.registry
    }

    pub fn resources(&self) -> &WorkerResources {
        &self.resources
    }

    /// Process one file through its capability. Never fails: anything that
    /// goes wrong is folded into the result.
    pub async fn process(&self, path: &Path) -> ProcessingResult {
        let ext = extension_of(path);
        debug!("Processing {:?}", path);

        match self.registry.capability_for(&ext) {
            Some(Capability::Text) => text::process(self, path),
            Some(Capability::Document) => document::process(self, path),
            Some(Capability::Image) => image::process(self, path).await,
            Some(Capability::Media) => media::process(self, path).await,
            Some(Capability::Archive) => archive::process(self, path).await,
            None => self.process_unknown(path),
        }
    }

    /// Dispatch for files pulled out of an archive. Nested archive members
    /// are never recursed into; anything unrecognized falls back to the
    /// text extractor.
    pub(crate) async fn process_member(&self, path: &Path) -> Option<ProcessingResult> {
        let ext = extension_of(path);

        match self.registry.capability_for(&ext) {
            Some(Capability::Text) | None => Some(text::process(self, path)),
            Some(Capability::Document) => Some(document::process(self, path)),
            Some(Capability::Image) => Some(image::process(self, path).await),
            Some(Capability::Media) => Some(media::process(self, path).await),
            Some(Capability::Archive) => {
                debug!("Skipping nested archive member {:?}", path);
                None
            }
        }
    }

    fn process_unknown(&self, path: &Path) -> ProcessingResult {
        let name = file_name_of(path);
        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);

        if size < UNKNOWN_TEXT_LIMIT {
            let result = text::process(self, path);
            if result.success {
                return result;
            }
            ProcessingResult::ok(format!("Binary or unknown file: {}", name))
        } else {
            ProcessingResult::ok(format!("Large binary file: {}", name))
        }
    }

    /// Full extraction for the organizer: classification, content, and
    /// whatever signals the processors produced.
    pub async fn extract(&self, path: &Path) -> FileRecord {
        let name = file_name_of(path);
        let ext = extension_of(path);
        let extension = if ext.is_empty() {
            String::new()
        } else {
            format!(".{}", ext)
        };
        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        let mime_type = mime_guess::from_path(path)
            .first_raw()
            .unwrap_or("unknown")
            .to_string();
        let mut kind = self.registry.kind_for(&ext);

        let result = self.process(path).await;

        // A small unknown file that read cleanly as text is text
        if kind == FileKind::Unknown
            && result.success
            && !result.summary.starts_with("Binary or unknown file:")
            && !result.summary.starts_with("Large binary file:")
        {
            kind = FileKind::Text;
        }

        let summary = match kind {
            FileKind::Image | FileKind::Video | FileKind::Audio | FileKind::Archive => {
                Some(result.summary.clone())
            }
            _ => None,
        };

        let transcription = match kind {
            FileKind::Video | FileKind::Audio => cache::content_key(path)
                .ok()
                .and_then(|key| self.transcription_cache.get(&key))
                .and_then(|blob| serde_json::from_str::<media::TranscriptionBlob>(&blob).ok())
                .map(|blob| blob.transcript)
                .filter(|t| !t.is_empty()),
            _ => None,
        };

        FileRecord {
            path: path.to_path_buf(),
            name,
            extension,
            size,
            mime_type: mime_type.clone(),
            kind,
            content: result.summary,
            metadata: serde_json::json!({
                "mime_type": mime_type,
                "size": size,
            }),
            transcription,
            summary,
            error: result.error,
        }
    }
}

pub(crate) fn file_name_of(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unnamed")
        .to_string()
}
