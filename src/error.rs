// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Error types for Eunomia

use thiserror::Error;

/// Result type alias for Eunomia operations
pub type Result<T> = std::result::Result<T, EunomiaError>;

/// Eunomia error types
#[derive(Error, Debug)]
pub enum EunomiaError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("API error: {0}")]
    Api(#[from] reqwest::Error),

    #[error("Ollama not available: {0}")]
    OllamaUnavailable(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("PDF error: {0}")]
    Pdf(String),

    #[error("Document error: {0}")]
    Document(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Media tool error: {0}")]
    Media(String),

    #[error("Organize error: {0}")]
    Organize(String),
}
