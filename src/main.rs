// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Eunomia: LLM-driven file organizer
//!
//! Scans a directory, extracts content from each file with local models
//! and external tools, asks a local LLM for a category per file, and
//! places the files into categorized folders with generated summaries.

use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tracing::{debug, warn};

use eunomia::cache;
use eunomia::config::AppConfig;
use eunomia::history::{self, History, TransferMode};
use eunomia::ocr::OcrEngine;
use eunomia::ollama::{OllamaClient, TextBackend};
use eunomia::organizer::{Organizer, OrganizeOptions, RunStats};
use eunomia::processors::{FilePipeline, FileRecord};
use eunomia::resources::{DefaultResourceFactory, ResourceFactory};
use eunomia::transcribe::Transcriber;
use eunomia::{EunomiaError, Result};

/// Eunomia CLI - organize files with local LLM categorization
#[derive(Parser, Debug)]
#[command(name = "eunomia")]
#[command(author = "Jonathan D. A. Jewell <hyperpolymath>")]
#[command(version = "0.9.0")]
#[command(about = "LLM-driven file organizer", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (JSON format)
    #[arg(short, long, default_value = "config.json", global = true)]
    config: PathBuf,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output format for results
    #[arg(long, global = true, default_value = "text", value_parser = ["text", "json"])]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Organize a directory of files into categorized folders
    Organize {
        /// Source directory containing files to organize
        source: PathBuf,

        /// Output directory for organized files
        #[arg(short, long)]
        output: PathBuf,

        /// Scan subdirectories recursively
        #[arg(short, long)]
        recursive: bool,

        /// Move files instead of copying
        #[arg(long = "move")]
        move_files: bool,

        /// Show what would happen without copying or moving anything
        #[arg(long)]
        dry_run: bool,

        /// Limit the number of files processed
        #[arg(long)]
        max_files: Option<usize>,

        /// Number of worker tasks (default: CPU count)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Skip the LLM backend and use kind-based categories
        #[arg(long)]
        no_llm: bool,
    },

    /// Run one file or directory through the extraction pipeline
    Process {
        /// File or directory to process
        path: PathBuf,

        /// Skip the LLM backend
        #[arg(long)]
        no_llm: bool,
    },

    /// Show backend, external tool, and cache status
    Status,

    /// Cache maintenance
    Cache {
        #[command(subcommand)]
        action: CacheCommands,
    },

    /// List recent transfers
    History {
        /// Number of records to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Reverse recorded transfers, newest first
    Undo {
        /// Number of transfers to undo
        #[arg(short, long, default_value = "1")]
        last: usize,

        /// Undo one specific record by id
        #[arg(long)]
        id: Option<String>,

        /// Show what would be undone
        #[arg(long)]
        dry_run: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum CacheCommands {
    /// Show entry counts and sizes per namespace
    Stats,

    /// Delete cached results
    Clear {
        /// Only this namespace (ocr, vision, transcription, summaries)
        #[arg(short, long)]
        namespace: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Print the active configuration as JSON
    Show,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = AppConfig::load(&cli.config)?;

    match cli.command {
        Commands::Organize {
            source,
            output,
            recursive,
            move_files,
            dry_run,
            max_files,
            workers,
            no_llm,
        } => {
            let options = OrganizeOptions {
                source,
                output,
                recursive: recursive || config.scan.recursive,
                copy_mode: if move_files {
                    false
                } else {
                    config.organize.copy_default
                },
                dry_run,
                max_files,
            };
            run_organize(config, options, workers, no_llm, &cli.format).await?;
        }
        Commands::Process { path, no_llm } => {
            run_process(config, path, no_llm, &cli.format).await?;
        }
        Commands::Status => run_status(config).await?,
        Commands::Cache { action } => run_cache_command(config, action)?,
        Commands::History { limit } => run_history(config, limit, &cli.format)?,
        Commands::Undo { last, id, dry_run } => run_undo(config, last, id, dry_run)?,
        Commands::Config { action } => run_config_command(config, action, &cli.config)?,
    }

    Ok(())
}

/// Connect to the Ollama backend, degrading to no backend when it is
/// unreachable.
async fn connect_backend(config: &AppConfig) -> Option<Arc<dyn TextBackend>> {
    let client = OllamaClient::new(&config.backend.url, config.backend.timeout_secs);

    match client.health_check().await {
        Ok(()) => {
            match client.list_models().await {
                Ok(models) => {
                    let text_model = &config.backend.models.text;
                    if !models.iter().any(|m| m.starts_with(text_model.as_str())) {
                        warn!(
                            "Text model '{}' not found. Available: {:?}",
                            text_model, models
                        );
                        warn!("Try: ollama pull {}", text_model);
                    }
                }
                Err(e) => warn!("Failed to list models: {}", e),
            }
            Some(Arc::new(client))
        }
        Err(e) => {
            warn!("Ollama is not reachable ({}); continuing without LLM", e);
            None
        }
    }
}

/// Run the full organization pipeline
async fn run_organize(
    mut config: AppConfig,
    options: OrganizeOptions,
    workers: Option<usize>,
    no_llm: bool,
    format: &str,
) -> Result<()> {
    if let Some(workers) = workers {
        config.workers = workers;
    }

    if options.dry_run {
        warn!("DRY RUN MODE - files will not be copied or moved");
    }

    let removed = cache::cleanup_stale_locks(&config.cache_dir());
    if removed > 0 {
        debug!("Removed {} stale lock files", removed);
    }

    let backend = if no_llm {
        None
    } else {
        connect_backend(&config).await
    };
    if backend.is_none() {
        warn!("Categories will fall back to file kinds");
    }

    let output = options.output.clone();
    let organizer = Organizer::new(&config, backend, options)?;
    let factory: Arc<dyn ResourceFactory> = DefaultResourceFactory::new(&config);

    let stats = tokio::select! {
        result = organizer.run(factory) => result?,
        _ = signal::ctrl_c() => {
            eprintln!("\nOperation cancelled");
            std::process::exit(1);
        }
    };

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        print_stats(&stats, &output);
    }

    Ok(())
}

fn print_stats(stats: &RunStats, output: &Path) {
    println!("Organization complete");
    println!("  Total files: {}", stats.total_files);
    println!("  Organized: {}", stats.organized);
    println!("  Errors: {}", stats.errors);
    if !stats.categories.is_empty() {
        println!("\nCategories:");
        for (category, info) in &stats.categories {
            println!("  {}: {} files", category, info.count);
        }
    }
    println!("\nOrganized files location: {}", output.display());
}

/// Process a file or directory and print extraction results
async fn run_process(config: AppConfig, path: PathBuf, no_llm: bool, format: &str) -> Result<()> {
    if !path.exists() {
        return Err(EunomiaError::Organize(format!(
            "Path does not exist: {}",
            path.display()
        )));
    }

    let backend = if no_llm {
        None
    } else {
        connect_backend(&config).await
    };

    let factory = DefaultResourceFactory::new(&config);
    let pipeline = FilePipeline::new(&config, backend, factory.build())?;

    let mut files: Vec<PathBuf> = if path.is_dir() {
        fs::read_dir(&path)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect()
    } else {
        vec![path]
    };
    files.sort();

    let mut records = Vec::with_capacity(files.len());
    for file in &files {
        records.push(pipeline.extract(file).await);
    }

    if format == "json" {
        let values: Vec<serde_json::Value> = records.iter().map(record_json).collect();
        println!("{}", serde_json::to_string_pretty(&values)?);
    } else {
        for record in &records {
            print_record(record);
        }
        println!("Processed {} files", records.len());
    }

    Ok(())
}

fn print_record(record: &FileRecord) {
    println!("{}", "=".repeat(60));
    println!("File: {}", record.path.display());
    println!("Kind: {} ({})", record.kind.label(), record.mime_type);
    println!("Size: {} bytes", record.size);
    if let Some(ref error) = record.error {
        println!("Error: {}", error);
    }
    if let Some(ref summary) = record.summary {
        println!("\n{}", summary);
    } else if !record.content.is_empty() {
        println!("\n{}", preview(&record.content, 500));
    }
    println!();
}

fn record_json(record: &FileRecord) -> serde_json::Value {
    serde_json::json!({
        "path": record.path.to_string_lossy(),
        "name": record.name,
        "extension": record.extension,
        "size": record.size,
        "mime_type": record.mime_type,
        "kind": record.kind.label(),
        "content": record.content,
        "metadata": record.metadata,
        "transcription": record.transcription,
        "summary": record.summary,
        "error": record.error,
    })
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{}...", head)
}

/// Show backend health, external tool availability, and cache sizes
async fn run_status(config: AppConfig) -> Result<()> {
    let client = OllamaClient::new(&config.backend.url, config.backend.timeout_secs);

    println!("Eunomia v0.9.0 Status");
    println!("=====================");

    match client.health_check().await {
        Ok(()) => println!("Ollama: Running"),
        Err(e) => println!("Ollama: Error - {}", e),
    }

    match client.list_models().await {
        Ok(models) => {
            println!("\nAvailable models:");
            for m in &models {
                let marker = if m.starts_with(config.backend.models.text.as_str())
                    || m.starts_with(config.backend.models.vision.as_str())
                {
                    "→"
                } else {
                    " "
                };
                println!("  {} {}", marker, m);
            }
        }
        Err(e) => println!("  Error listing models: {}", e),
    }

    let factory = DefaultResourceFactory::new(&config);
    let resources = factory.build();
    println!("\nExternal tools:");
    println!(
        "  tesseract: {}",
        if resources.ocr.available() {
            "available"
        } else {
            "not found"
        }
    );
    println!(
        "  whisper: {}",
        if resources.transcriber.available() {
            "available"
        } else {
            "not found"
        }
    );
    println!(
        "  ffmpeg/ffprobe: {}",
        if resources.media.available() {
            "available"
        } else {
            "not found"
        }
    );

    let cache_dir = config.cache_dir();
    println!("\nCache ({}):", cache_dir.display());
    match cache::namespace_stats(&cache_dir) {
        Ok(stats) if stats.is_empty() => println!("  (empty)"),
        Ok(stats) => {
            for (namespace, entries, bytes) in stats {
                println!("  {}: {} entries, {} KB", namespace, entries, bytes / 1024);
            }
        }
        Err(e) => println!("  Error reading cache: {}", e),
    }

    println!("\nConfiguration:");
    println!("  Text model: {}", config.backend.models.text);
    println!("  Vision model: {}", config.backend.models.vision);
    println!("  Whisper model: {}", config.extraction.whisper_model);
    println!("  Workers: {}", config.workers);

    Ok(())
}

/// Run cache maintenance commands
fn run_cache_command(config: AppConfig, action: CacheCommands) -> Result<()> {
    let cache_dir = config.cache_dir();

    match action {
        CacheCommands::Stats => {
            let stats = cache::namespace_stats(&cache_dir)?;
            if stats.is_empty() {
                println!("Cache is empty ({})", cache_dir.display());
                return Ok(());
            }
            println!("Cache ({}):", cache_dir.display());
            let mut total_bytes = 0;
            for (namespace, entries, bytes) in &stats {
                println!("  {}: {} entries, {} KB", namespace, entries, bytes / 1024);
                total_bytes += bytes;
            }
            println!("  total: {} KB", total_bytes / 1024);
        }
        CacheCommands::Clear { namespace } => {
            let removed = cache::clear(&cache_dir, namespace.as_deref())?;
            println!("Removed {} cache files", removed);
        }
    }

    Ok(())
}

/// List recent transfer records
fn run_history(config: AppConfig, limit: usize, format: &str) -> Result<()> {
    let history = History::new(config.cache_dir().join("history.jsonl"));
    let records = history.get_recent(limit)?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No transfer history");
        return Ok(());
    }

    println!("Recent transfers ({} records):", records.len());
    for record in records {
        let status = if record.undone { " [UNDONE]" } else { "" };
        println!(
            "  {} [{}] {} -> {}{}",
            record.timestamp.format("%Y-%m-%d %H:%M"),
            record.mode,
            record.source.display(),
            record.destination.display(),
            status
        );
    }

    Ok(())
}

/// Reverse recorded transfers
fn run_undo(config: AppConfig, last: usize, id: Option<String>, dry_run: bool) -> Result<()> {
    let history = History::new(config.cache_dir().join("history.jsonl"));
    let undoable = history.get_undoable()?;

    let to_undo: Vec<_> = if let Some(ref id) = id {
        undoable.into_iter().filter(|r| &r.id == id).collect()
    } else {
        undoable.into_iter().rev().take(last).collect()
    };

    if to_undo.is_empty() {
        println!("No transfers to undo");
        return Ok(());
    }

    let mut undone = 0;
    let mut skipped = 0;

    for record in to_undo {
        if !record.destination.exists() {
            warn!(
                "File not found (may have been moved/deleted): {}",
                record.destination.display()
            );
            skipped += 1;
            continue;
        }
        if record.mode == TransferMode::Move && record.source.exists() {
            warn!("Original path already exists: {}", record.source.display());
            skipped += 1;
            continue;
        }

        if dry_run {
            println!(
                "Would undo ({}): {} -> {}",
                record.mode,
                record.destination.display(),
                record.source.display()
            );
            undone += 1;
            continue;
        }

        match history::revert(&record) {
            Ok(()) => {
                history.mark_undone(&record.id)?;
                println!("Undone ({}): {}", record.mode, record.destination.display());
                undone += 1;
            }
            Err(e) => {
                warn!("Failed to undo {}: {}", record.destination.display(), e);
                skipped += 1;
            }
        }
    }

    println!("\nDone. {} undone, {} skipped.", undone, skipped);
    Ok(())
}

/// Run config commands
fn run_config_command(config: AppConfig, action: ConfigCommands, config_path: &Path) -> Result<()> {
    match action {
        ConfigCommands::Show => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigCommands::Init { force } => {
            if config_path.exists() && !force {
                return Err(EunomiaError::Config(format!(
                    "{} already exists. Use --force to overwrite",
                    config_path.display()
                )));
            }
            AppConfig::default().save(config_path)?;
            println!("Wrote default configuration to {}", config_path.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_requires_a_subcommand() {
        assert!(Cli::try_parse_from(["eunomia"]).is_err());
    }

    #[test]
    fn test_cli_organize_command() {
        let cli = Cli::try_parse_from([
            "eunomia", "organize", "/tmp/in", "-o", "/tmp/out", "--move", "--dry-run",
            "--max-files", "5",
        ])
        .unwrap();

        match cli.command {
            Commands::Organize {
                source,
                output,
                move_files,
                dry_run,
                max_files,
                recursive,
                ..
            } => {
                assert_eq!(source, PathBuf::from("/tmp/in"));
                assert_eq!(output, PathBuf::from("/tmp/out"));
                assert!(move_files);
                assert!(dry_run);
                assert_eq!(max_files, Some(5));
                assert!(!recursive);
            }
            _ => panic!("Expected Organize command"),
        }
    }

    #[test]
    fn test_cli_undo_defaults() {
        let cli = Cli::try_parse_from(["eunomia", "undo"]).unwrap();

        match cli.command {
            Commands::Undo { last, id, dry_run } => {
                assert_eq!(last, 1);
                assert!(id.is_none());
                assert!(!dry_run);
            }
            _ => panic!("Expected Undo command"),
        }
    }

    #[test]
    fn test_cli_cache_clear_namespace() {
        let cli =
            Cli::try_parse_from(["eunomia", "cache", "clear", "--namespace", "ocr"]).unwrap();

        match cli.command {
            Commands::Cache {
                action: CacheCommands::Clear { namespace },
            } => assert_eq!(namespace.as_deref(), Some("ocr")),
            _ => panic!("Expected Cache clear command"),
        }
    }

    #[test]
    fn test_cli_rejects_unknown_format() {
        assert!(Cli::try_parse_from(["eunomia", "--format", "yaml", "status"]).is_err());
    }
}
