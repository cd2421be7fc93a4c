// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Worker pool for batch file processing.
//!
//! Long-lived workers pull paths from a shared job channel. Each worker
//! builds its own pipeline lazily on the first job, so caches and engine
//! probes happen once per worker rather than once per file. Shutdown is
//! one poison pill per worker; after its pill, a worker terminates any
//! stray child processes its tools spawned.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, warn};

use crate::ollama::TextBackend;
use crate::processors::{file_name_of, FileKind, FilePipeline, FileRecord};
use crate::resources::ResourceFactory;
use crate::AppConfig;

enum Job {
    File(PathBuf),
    Shutdown,
}

/// One processed file as collected from the result channel
#[derive(Debug, Clone)]
pub struct FileOutcome {
    pub success: bool,
    pub record: FileRecord,
}

pub struct WorkerPool {
    config: AppConfig,
    backend: Option<Arc<dyn TextBackend>>,
    factory: Arc<dyn ResourceFactory>,
}

impl WorkerPool {
    pub fn new(
        config: &AppConfig,
        backend: Option<Arc<dyn TextBackend>>,
        factory: Arc<dyn ResourceFactory>,
    ) -> Self {
        Self {
            config: config.clone(),
            backend,
            factory,
        }
    }

    /// Process every file and return one outcome per file, in completion
    /// order.
    pub async fn run(&self, files: Vec<PathBuf>) -> Vec<FileOutcome> {
        let workers = self.config.workers.max(1);
        let total = files.len();
        debug!("Dispatching {} files across {} workers", total, workers);

        let (job_tx, job_rx) = mpsc::unbounded_channel::<Job>();
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<FileOutcome>();

        // The whole queue is staged up front, pills last
        for path in files {
            let _ = job_tx.send(Job::File(path));
        }
        for _ in 0..workers {
            let _ = job_tx.send(Job::Shutdown);
        }
        drop(job_tx);

        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let rx = Arc::clone(&job_rx);
            let tx = result_tx.clone();
            let config = self.config.clone();
            let backend = self.backend.clone();
            let factory = Arc::clone(&self.factory);

            handles.push(tokio::spawn(async move {
                worker_loop(id, config, backend, factory, rx, tx).await;
            }));
        }
        drop(result_tx);

        let mut outcomes = Vec::with_capacity(total);
        while let Some(outcome) = result_rx.recv().await {
            outcomes.push(outcome);
        }

        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Worker task failed: {}", e);
            }
        }

        outcomes
    }
}

async fn worker_loop(
    id: usize,
    config: AppConfig,
    backend: Option<Arc<dyn TextBackend>>,
    factory: Arc<dyn ResourceFactory>,
    jobs: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>,
    results: mpsc::UnboundedSender<FileOutcome>,
) {
    let mut pipeline: Option<FilePipeline> = None;

    loop {
        let job = { jobs.lock().await.recv().await };

        match job {
            Some(Job::File(path)) => {
                if pipeline.is_none() {
                    debug!("Worker {} building its pipeline", id);
                    match FilePipeline::new(&config, backend.clone(), factory.build()) {
                        Ok(built) => pipeline = Some(built),
                        Err(e) => {
                            error!("Worker {} could not initialize: {}", id, e);
                            let _ = results.send(FileOutcome {
                                success: false,
                                record: failure_record(&path, &e.to_string()),
                            });
                            continue;
                        }
                    }
                }

                if let Some(pipe) = pipeline.as_ref() {
                    let record = pipe.extract(&path).await;
                    let success = record.error.is_none();
                    let _ = results.send(FileOutcome { success, record });
                }
            }
            Some(Job::Shutdown) | None => {
                if let Some(pipe) = pipeline.as_ref() {
                    pipe.resources().children.terminate_all();
                }
                debug!("Worker {} shutting down", id);
                break;
            }
        }
    }
}

fn failure_record(path: &Path, error: &str) -> FileRecord {
    FileRecord {
        path: path.to_path_buf(),
        name: file_name_of(path),
        extension: String::new(),
        size: 0,
        mime_type: "unknown".to_string(),
        kind: FileKind::Unknown,
        content: String::new(),
        metadata: serde_json::Value::Null,
        transcription: None,
        summary: None,
        error: Some(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::DefaultResourceFactory;
    use std::collections::HashSet;

    #[tokio::test]
    async fn every_file_yields_exactly_one_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.cache_dir = Some(dir.path().join("cache"));
        config.workers = 3;

        let mut files = Vec::new();
        for i in 0..8 {
            let path = dir.path().join(format!("note_{}.txt", i));
            std::fs::write(&path, format!("note number {}", i)).unwrap();
            files.push(path);
        }

        let factory = DefaultResourceFactory::new(&config);
        let pool = WorkerPool::new(&config, None, factory);
        let outcomes = pool.run(files).await;

        assert_eq!(outcomes.len(), 8);
        assert!(outcomes.iter().all(|o| o.success));

        let names: HashSet<String> = outcomes.iter().map(|o| o.record.name.clone()).collect();
        assert_eq!(names.len(), 8);
        assert!(names.contains("note_0.txt"));

        let sample = outcomes
            .iter()
            .find(|o| o.record.name == "note_5.txt")
            .unwrap();
        assert_eq!(sample.record.content, "note number 5");
    }

    #[tokio::test]
    async fn empty_input_returns_no_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.cache_dir = Some(dir.path().join("cache"));
        config.workers = 2;

        let factory = DefaultResourceFactory::new(&config);
        let pool = WorkerPool::new(&config, None, factory);
        let outcomes = pool.run(Vec::new()).await;

        assert!(outcomes.is_empty());
    }
}
