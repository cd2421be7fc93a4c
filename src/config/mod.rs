// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Configuration management for Eunomia

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main application configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    /// LLM backend configuration
    pub backend: BackendConfig,

    /// Directory scanning rules
    #[serde(default)]
    pub scan: ScanConfig,

    /// Content extraction limits
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Archive handling limits
    #[serde(default)]
    pub archive: ArchiveConfig,

    /// File placement behavior
    #[serde(default)]
    pub organize: OrganizeConfig,

    /// Worker count for batch processing
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Cache directory override; discovered from the project root if unset
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Prompt templates
    #[serde(default)]
    pub prompts: PromptConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BackendConfig {
    pub url: String,
    pub models: ModelConfig,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_text_model")]
    pub text: String,
    #[serde(default = "default_vision_model")]
    pub vision: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ScanConfig {
    /// Recurse into subdirectories
    #[serde(default)]
    pub recursive: bool,

    /// Substring patterns that exclude a file from scanning
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ExtractionConfig {
    /// Character budget for extracted text
    #[serde(default = "default_max_text_chars")]
    pub max_text_chars: usize,

    /// Seconds between sampled frames sent to the vision model
    #[serde(default = "default_frame_interval")]
    pub frame_interval_secs: u64,

    /// Seconds between sampled frames sent to OCR
    #[serde(default = "default_ocr_frame_interval")]
    pub ocr_frame_interval_secs: u64,

    /// Upper bound on sampled frames per video
    #[serde(default = "default_max_frames")]
    pub max_frames: usize,

    /// Audio track extraction cap in seconds
    #[serde(default = "default_max_media_duration")]
    pub max_media_duration_secs: u64,

    /// Whisper model size (tiny, base, small, medium, large)
    #[serde(default = "default_whisper_model")]
    pub whisper_model: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ArchiveConfig {
    /// Members extracted during deep processing
    #[serde(default = "default_max_members")]
    pub max_members_extracted: usize,

    /// Members larger than this are skipped
    #[serde(default = "default_member_size_limit")]
    pub member_size_limit_mb: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OrganizeConfig {
    /// Copy files by default; `--move` overrides
    #[serde(default = "default_true")]
    pub copy_default: bool,

    /// Category folder name length cap
    #[serde(default = "default_category_max_len")]
    pub category_name_max_len: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PromptConfig {
    #[serde(default = "default_image_prompt")]
    pub image: String,
    #[serde(default = "default_vision_prompt")]
    pub vision: String,
    #[serde(default = "default_video_prompt")]
    pub video: String,
    #[serde(default = "default_audio_prompt")]
    pub audio: String,
    #[serde(default = "default_video_frames_prompt")]
    pub video_frames: String,
    #[serde(default = "default_archive_prompt")]
    pub archive: String,
    #[serde(default = "default_archive_verdict_prompt")]
    pub archive_verdict: String,
    #[serde(default = "default_categorize_prompt")]
    pub categorize: String,
}

// Default value functions
fn default_timeout() -> u64 { 120 }
fn default_text_model() -> String { "llama3.2:3b".to_string() }
fn default_vision_model() -> String { "llava:7b".to_string() }
fn default_true() -> bool { true }
fn default_workers() -> usize { num_cpus::get() }
fn default_max_text_chars() -> usize { 50_000 }
fn default_frame_interval() -> u64 { 3 }
fn default_ocr_frame_interval() -> u64 { 5 }
fn default_max_frames() -> usize { 20 }
fn default_max_media_duration() -> u64 { 300 }
fn default_whisper_model() -> String { "base".to_string() }
fn default_max_members() -> usize { 10 }
fn default_member_size_limit() -> u64 { 10 }
fn default_category_max_len() -> usize { 50 }

fn default_ignore_patterns() -> Vec<String> {
    vec![
        ".DS_Store", "Thumbs.db", ".git", "__pycache__", ".pyc", ".swp", "~",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_image_prompt() -> String {
    "Based on the following text extracted from an image, write a single concise \
     paragraph (2-3 sentences) describing what this image is about. Focus on the \
     main topic, what's being shown, and any key information (eg proper names, \
     dates, etc)."
        .to_string()
}

fn default_vision_prompt() -> String {
    "Describe what is shown in this image. Include details about any visible \
     text, UI elements, people, objects, or activities, and the overall context."
        .to_string()
}

fn default_video_prompt() -> String {
    "Based on the following video content, write a single concise paragraph \
     (2-3 sentences) describing what this video is about. Focus on the main \
     topic, what's being shown/discussed, and any key technical details."
        .to_string()
}

fn default_audio_prompt() -> String {
    "Based on the following audio content, write a single concise paragraph \
     (2-3 sentences) describing what this audio file is about. Focus on the \
     main topic, what's being discussed, and any key details."
        .to_string()
}

fn default_video_frames_prompt() -> String {
    "Describe what is happening in these video frames. Include details about \
     any visible UI elements, text, actions, people, or activities. Describe \
     the overall context and purpose."
        .to_string()
}

fn default_archive_prompt() -> String {
    "Based on the following archive file information, write a single concise \
     paragraph (2-3 sentences) describing what this archive contains and what \
     it might be used for."
        .to_string()
}

fn default_archive_verdict_prompt() -> String {
    "You are analyzing an archive file to decide if we should extract and \
     process its contents."
        .to_string()
}

fn default_categorize_prompt() -> String {
    "You are a file organization assistant. Categorize the following file into \
     a descriptive category."
        .to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig {
                url: "http://localhost:11434/api/generate".to_string(),
                models: ModelConfig {
                    text: default_text_model(),
                    vision: default_vision_model(),
                },
                timeout_secs: default_timeout(),
            },
            scan: ScanConfig::default(),
            extraction: ExtractionConfig::default(),
            archive: ArchiveConfig::default(),
            organize: OrganizeConfig::default(),
            workers: default_workers(),
            cache_dir: None,
            prompts: PromptConfig::default(),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            recursive: false,
            ignore_patterns: default_ignore_patterns(),
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_text_chars: default_max_text_chars(),
            frame_interval_secs: default_frame_interval(),
            ocr_frame_interval_secs: default_ocr_frame_interval(),
            max_frames: default_max_frames(),
            max_media_duration_secs: default_max_media_duration(),
            whisper_model: default_whisper_model(),
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            max_members_extracted: default_max_members(),
            member_size_limit_mb: default_member_size_limit(),
        }
    }
}

impl Default for OrganizeConfig {
    fn default() -> Self {
        Self {
            copy_default: default_true(),
            category_name_max_len: default_category_max_len(),
        }
    }
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            image: default_image_prompt(),
            vision: default_vision_prompt(),
            video: default_video_prompt(),
            audio: default_audio_prompt(),
            video_frames: default_video_frames_prompt(),
            archive: default_archive_prompt(),
            archive_verdict: default_archive_verdict_prompt(),
            categorize: default_categorize_prompt(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> crate::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = serde_json::from_str(&content)
                .map_err(|e| crate::EunomiaError::Config(format!("Failed to parse config: {}", e)))?;
            Ok(config)
        } else {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Cache directory: the configured override, or `.cache` under the
    /// discovered project root
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(crate::cache::default_cache_dir)
    }
}
