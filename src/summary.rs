// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Memoized summary generation.
//!
//! The cache key is a hash of the complete prompt, embedded context
//! included, so changed upstream signals (different OCR text, different
//! vision description) invalidate naturally through a new key. A given
//! prompt reaches the backend exactly once across all runs.

use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::{self, ContentHashCache};
use crate::ollama::TextBackend;
use crate::Result;

pub struct SummaryGenerator {
    backend: Option<Arc<dyn TextBackend>>,
    model: String,
    cache: ContentHashCache,
}

impl SummaryGenerator {
    pub fn new(
        backend: Option<Arc<dyn TextBackend>>,
        model: &str,
        cache_dir: &Path,
    ) -> Result<Self> {
        Ok(Self {
            backend,
            model: model.to_string(),
            cache: ContentHashCache::open(cache_dir, "summaries")?,
        })
    }

    /// Generate a summary for the prompt. An absent backend or an empty
    /// prompt yields an empty string; so does a backend failure, after a
    /// warning. Summary generation never aborts the pipeline.
    pub async fn generate(&self, prompt: &str) -> String {
        let Some(backend) = &self.backend else {
            return String::new();
        };
        if prompt.trim().is_empty() {
            return String::new();
        }

        let key = cache::prompt_key(prompt);

        if let Some(cached) = self.cache.get(&key) {
            debug!("Using cached summary");
            return cached;
        }

        match backend.generate(&self.model, prompt).await {
            Ok(response) => {
                let summary = response.trim().to_string();
                self.cache.set(&key, &summary);
                summary
            }
            Err(e) => {
                warn!("Could not generate summary: {}", e);
                String::new()
            }
        }
    }

    pub fn has_backend(&self) -> bool {
        self.backend.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingBackend {
        calls: AtomicUsize,
    }

    impl CountingBackend {
        fn new() -> Arc<Self> {
            Arc::new(Self { calls: AtomicUsize::new(0) })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TextBackend for CountingBackend {
        async fn generate(&self, _model: &str, prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("  summary for {} chars  ", prompt.len()))
        }

        async fn generate_with_images(
            &self,
            _model: &str,
            prompt: &str,
            _images: &[String],
        ) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("vision summary for {} chars", prompt.len()))
        }
    }

    struct FailingBackend;

    #[async_trait]
    impl TextBackend for FailingBackend {
        async fn generate(&self, _model: &str, _prompt: &str) -> Result<String> {
            Err(crate::EunomiaError::OllamaUnavailable("down".to_string()))
        }

        async fn generate_with_images(
            &self,
            _model: &str,
            _prompt: &str,
            _images: &[String],
        ) -> Result<String> {
            Err(crate::EunomiaError::OllamaUnavailable("down".to_string()))
        }
    }

    #[tokio::test]
    async fn identical_prompts_hit_backend_once() {
        let dir = tempfile::tempdir().unwrap();
        let backend = CountingBackend::new();
        let generator =
            SummaryGenerator::new(Some(backend.clone()), "llama3.2:3b", dir.path()).unwrap();

        let first = generator.generate("Summarize this: the quick brown fox").await;
        let second = generator.generate("Summarize this: the quick brown fox").await;
        let third = generator.generate("Summarize this: the quick brown fox").await;

        assert_eq!(backend.calls(), 1);
        assert_eq!(first, second);
        assert_eq!(second, third);
        // Responses are trimmed before caching
        assert_eq!(first, first.trim());
    }

    #[tokio::test]
    async fn one_character_difference_is_a_new_cache_entry() {
        let dir = tempfile::tempdir().unwrap();
        let backend = CountingBackend::new();
        let generator =
            SummaryGenerator::new(Some(backend.clone()), "llama3.2:3b", dir.path()).unwrap();

        generator.generate("Summarize this: version a").await;
        generator.generate("Summarize this: version b").await;

        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn cache_persists_across_generator_instances() {
        let dir = tempfile::tempdir().unwrap();
        let backend = CountingBackend::new();

        {
            let generator =
                SummaryGenerator::new(Some(backend.clone()), "llama3.2:3b", dir.path()).unwrap();
            generator.generate("stable prompt").await;
        }

        let generator =
            SummaryGenerator::new(Some(backend.clone()), "llama3.2:3b", dir.path()).unwrap();
        generator.generate("stable prompt").await;

        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn absent_backend_and_empty_prompt_yield_empty() {
        let dir = tempfile::tempdir().unwrap();

        let no_backend = SummaryGenerator::new(None, "llama3.2:3b", dir.path()).unwrap();
        assert_eq!(no_backend.generate("anything").await, "");

        let backend = CountingBackend::new();
        let generator =
            SummaryGenerator::new(Some(backend.clone()), "llama3.2:3b", dir.path()).unwrap();
        assert_eq!(generator.generate("").await, "");
        assert_eq!(generator.generate("   ").await, "");
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn backend_failure_degrades_to_empty_string() {
        let dir = tempfile::tempdir().unwrap();
        let generator =
            SummaryGenerator::new(Some(Arc::new(FailingBackend)), "llama3.2:3b", dir.path())
                .unwrap();

        assert_eq!(generator.generate("a prompt").await, "");
    }
}
