// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Eunomia: Local AI File Organizer
//!
//! Extracts content from files, summarizes it through a local LLM, and
//! files everything into category folders. Expensive signal extraction
//! (OCR, vision, transcription, summaries) is memoized in a process-safe
//! on-disk cache keyed by content hash.

pub mod cache;
pub mod config;
pub mod error;
pub mod ffmpeg;
pub mod history;
pub mod ocr;
pub mod ollama;
pub mod organizer;
pub mod pool;
pub mod processors;
pub mod resources;
pub mod summary;
pub mod transcribe;

pub use config::AppConfig;
pub use error::{EunomiaError, Result};
