// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Directory scan, LLM categorization, and file placement.
//!
//! An organization run scans the source directory, pushes every file
//! through the extraction pool, asks the text backend for a category
//! per file, then places files under `<output>/<category>/files/`
//! with a generated README per category and a summary report at the
//! output root.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::EunomiaError;
use crate::history::{History, MoveRecord, TransferMode};
use crate::ollama::TextBackend;
use crate::pool::WorkerPool;
use crate::processors::text::truncate_chars;
use crate::processors::{file_name_of, FileRecord};
use crate::resources::ResourceFactory;
use crate::Result;

const CONTENT_PREVIEW_CHARS: usize = 800;

/// Options for a single organization run, resolved from CLI flags and
/// config defaults by the caller.
#[derive(Debug, Clone)]
pub struct OrganizeOptions {
    pub source: PathBuf,
    pub output: PathBuf,
    pub recursive: bool,
    pub copy_mode: bool,
    pub dry_run: bool,
    pub max_files: Option<usize>,
}

/// Totals for one organization run.
#[derive(Debug, Default, Serialize)]
pub struct RunStats {
    pub total_files: usize,
    pub organized: usize,
    pub errors: usize,
    pub categories: BTreeMap<String, CategoryStats>,
}

/// Per-category file count and destination directory.
#[derive(Debug, Clone, Serialize)]
pub struct CategoryStats {
    pub count: usize,
    pub path: PathBuf,
}

pub struct Organizer {
    config: AppConfig,
    backend: Option<Arc<dyn TextBackend>>,
    options: OrganizeOptions,
}

impl Organizer {
    /// Validate the source and output directories and build an organizer.
    pub fn new(
        config: &AppConfig,
        backend: Option<Arc<dyn TextBackend>>,
        options: OrganizeOptions,
    ) -> Result<Self> {
        if !options.source.exists() {
            return Err(EunomiaError::Organize(format!(
                "Source directory does not exist: {}",
                options.source.display()
            )));
        }
        if options.source == options.output {
            return Err(EunomiaError::Organize(
                "Source and output directories cannot be the same".to_string(),
            ));
        }

        Ok(Self {
            config: config.clone(),
            backend,
            options,
        })
    }

    /// Run the full pipeline: scan, extract, categorize, place, report.
    pub async fn run(&self, factory: Arc<dyn ResourceFactory>) -> Result<RunStats> {
        let files = self.scan()?;
        info!("Found {} files to organize", files.len());
        if files.is_empty() {
            return Ok(RunStats::default());
        }

        let pool = WorkerPool::new(&self.config, self.backend.clone(), factory);
        let outcomes = pool.run(files).await;

        let mut categorized: BTreeMap<String, Vec<FileRecord>> = BTreeMap::new();
        let total = outcomes.len();
        for (i, outcome) in outcomes.into_iter().enumerate() {
            let record = outcome.record;
            let category = self.categorize(&record).await;
            info!("[{}/{}] {} -> {}", i + 1, total, record.name, category);
            categorized.entry(category).or_default().push(record);
        }

        if !self.options.dry_run {
            fs::create_dir_all(self.config.cache_dir())?;
        }
        let history = History::new(self.config.cache_dir().join("history.jsonl"));

        let stats = self.place(&categorized, &history)?;

        if !self.options.dry_run {
            self.write_report(&stats)?;
        }

        Ok(stats)
    }

    /// Scan the source directory, honoring the ignore rules and the
    /// optional file cap. Results are sorted for a stable run order.
    pub fn scan(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        collect_files(
            &self.options.source,
            self.options.recursive,
            &self.config.scan.ignore_patterns,
            &mut files,
        )?;
        files.sort();
        if let Some(limit) = self.options.max_files {
            files.truncate(limit);
        }
        Ok(files)
    }

    /// Pick a category for one file: the text backend when present,
    /// otherwise the kind-based fallback.
    async fn categorize(&self, record: &FileRecord) -> String {
        let Some(backend) = self.backend.as_deref() else {
            return record.kind.fallback_category().to_string();
        };

        let prompt = build_categorize_prompt(&self.config.prompts.categorize, record);
        match backend
            .generate(&self.config.backend.models.text, &prompt)
            .await
        {
            Ok(response) => {
                clean_category(&response, self.config.organize.category_name_max_len)
            }
            Err(e) => {
                warn!("Error categorizing {}: {}", record.name, e);
                "Uncategorized".to_string()
            }
        }
    }

    /// Place every categorized file under `<output>/<category>/files/`,
    /// writing the per-category README first.
    fn place(
        &self,
        categorized: &BTreeMap<String, Vec<FileRecord>>,
        history: &History,
    ) -> Result<RunStats> {
        let mut stats = RunStats::default();

        for (category, records) in categorized {
            let category_dir = self.options.output.join(category);
            let files_dir = category_dir.join("files");

            stats.categories.insert(
                category.clone(),
                CategoryStats {
                    count: records.len(),
                    path: category_dir.clone(),
                },
            );

            if !self.options.dry_run {
                fs::create_dir_all(&files_dir)?;
                write_category_readme(&category_dir, category, records)?;
            }

            for record in records {
                stats.total_files += 1;

                let dest = unique_path(files_dir.join(&record.name));

                if self.options.dry_run {
                    info!(
                        "[DRY RUN] Would organize: {} -> {}/files/",
                        record.name, category
                    );
                    stats.organized += 1;
                    continue;
                }

                let mode = if self.options.copy_mode {
                    TransferMode::Copy
                } else {
                    TransferMode::Move
                };
                let transferred = match mode {
                    TransferMode::Copy => fs::copy(&record.path, &dest).map(|_| ()),
                    TransferMode::Move => move_file(&record.path, &dest),
                };

                match transferred {
                    Ok(()) => {
                        stats.organized += 1;
                        debug!("{} -> {}", record.path.display(), dest.display());
                        let entry = MoveRecord::new(
                            record.path.clone(),
                            dest,
                            category.clone(),
                            mode,
                        );
                        if let Err(e) = history.append(&entry) {
                            warn!("Failed to record history entry: {}", e);
                        }
                    }
                    Err(e) => {
                        stats.errors += 1;
                        warn!("Error organizing {}: {}", record.name, e);
                    }
                }
            }
        }

        Ok(stats)
    }

    fn write_report(&self, stats: &RunStats) -> Result<()> {
        let mut report = String::from("# File Organization Report\n\n");
        report.push_str(&format!(
            "**Total Files Processed:** {}\n",
            stats.total_files
        ));
        report.push_str(&format!(
            "**Successfully Organized:** {}\n",
            stats.organized
        ));
        report.push_str(&format!("**Errors:** {}\n\n", stats.errors));
        report.push_str("## Categories\n\n");

        for (category, info) in &stats.categories {
            report.push_str(&format!("### {}\n", category));
            report.push_str(&format!("- **Files:** {}\n", info.count));
            report.push_str(&format!("- **Location:** `{}`\n\n", info.path.display()));
        }

        let path = self.options.output.join("ORGANIZATION_REPORT.md");
        fs::write(&path, report)?;
        info!("Summary report created: {}", path.display());
        Ok(())
    }
}

fn collect_files(
    dir: &Path,
    recursive: bool,
    ignore_patterns: &[String],
    out: &mut Vec<PathBuf>,
) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            if recursive {
                collect_files(&path, recursive, ignore_patterns, out)?;
            }
        } else if path.is_file() {
            let name = file_name_of(&path);
            if !should_ignore(&name, ignore_patterns) {
                out.push(path);
            }
        }
    }
    Ok(())
}

/// A file is skipped when its name contains any ignore pattern, or is
/// hidden. `.gitignore` and `.env.example` are kept despite the dot.
fn should_ignore(name: &str, ignore_patterns: &[String]) -> bool {
    if ignore_patterns.iter().any(|p| name.contains(p.as_str())) {
        return true;
    }
    name.starts_with('.') && name != ".gitignore" && name != ".env.example"
}

fn build_categorize_prompt(head: &str, record: &FileRecord) -> String {
    let file_desc = format!(
        "\nFile: {}\nType: {}\nExtension: {}\nContent preview: {}\n",
        record.name,
        record.kind.label(),
        record.extension,
        truncate_chars(&record.content, CONTENT_PREVIEW_CHARS),
    );
    format!(
        "{}\n\nFILE INFORMATION:\n{}\n\nProvide a short, descriptive category \
         name (1-3 words) that best describes this file.\nExamples: \
         \"Documents\", \"Images\", \"Code\", \"Data Files\", \"Configuration\", \
         \"Media\", \"Archives\", etc.\n\nRespond with ONLY the category name, \
         nothing else.\n\nCategory:",
        head, file_desc
    )
}

/// First line of the model's answer, stripped of stray punctuation and
/// sanitized into a folder name.
fn clean_category(response: &str, max_len: usize) -> String {
    let first_line = response.trim().lines().next().unwrap_or("");
    let stripped = first_line.trim_matches(|c: char| ".,!?\"' ".contains(c));
    sanitize_folder_name(stripped, max_len)
}

/// Strip filesystem-hostile characters, replace spaces with
/// underscores, and cap the length. An empty result becomes
/// `Uncategorized`.
pub(crate) fn sanitize_folder_name(name: &str, max_len: usize) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !"<>:\"/\\|?*".contains(*c))
        .map(|c| if c == ' ' { '_' } else { c })
        .take(max_len)
        .collect();
    if cleaned.is_empty() {
        "Uncategorized".to_string()
    } else {
        cleaned
    }
}

/// Resolve a name collision by appending `_1`, `_2`, ... before the
/// extension until the path is free.
fn unique_path(path: PathBuf) -> PathBuf {
    if !path.exists() {
        return path;
    }

    let name = file_name_of(&path);
    let (stem, suffix) = match name.rfind('.') {
        Some(i) if i > 0 => (&name[..i], &name[i..]),
        _ => (name.as_str(), ""),
    };
    let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();

    let mut counter = 1;
    loop {
        let candidate = parent.join(format!("{}_{}{}", stem, counter, suffix));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

/// Rename, falling back to copy-and-delete for cross-device moves.
fn move_file(source: &Path, dest: &Path) -> std::io::Result<()> {
    match fs::rename(source, dest) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(source, dest)?;
            fs::remove_file(source)
        }
    }
}

fn write_category_readme(
    category_dir: &Path,
    category: &str,
    records: &[FileRecord],
) -> Result<()> {
    let mut by_type: BTreeMap<&str, Vec<&FileRecord>> = BTreeMap::new();
    for record in records {
        by_type.entry(record.kind.label()).or_default().push(record);
    }

    let mut readme = format!("# {}\n\n", category);
    readme.push_str(&format!(
        "This folder contains files categorized as: **{}**\n\n",
        category
    ));
    readme.push_str(&format!("## Files ({})\n\n", records.len()));

    for (label, mut group) in by_type {
        group.sort_by(|a, b| a.name.cmp(&b.name));
        readme.push_str(&format!("### {} Files\n\n", title_case(label)));
        for record in group {
            readme.push_str(&format!("- `{}`", record.name));
            if record.size > 0 {
                let size_kb = record.size as f64 / 1024.0;
                if size_kb > 1024.0 {
                    readme.push_str(&format!(" ({:.1} MB)", size_kb / 1024.0));
                } else {
                    readme.push_str(&format!(" ({:.1} KB)", size_kb));
                }
            }
            readme.push('\n');
        }
        readme.push('\n');
    }

    fs::write(category_dir.join("README.md"), readme)?;
    Ok(())
}

fn title_case(label: &str) -> String {
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::FileKind;
    use crate::resources::DefaultResourceFactory;
    use async_trait::async_trait;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    struct FixedBackend(&'static str);

    #[async_trait]
    impl TextBackend for FixedBackend {
        async fn generate(&self, _model: &str, _prompt: &str) -> Result<String> {
            Ok(self.0.to_string())
        }

        async fn generate_with_images(
            &self,
            _model: &str,
            _prompt: &str,
            _images: &[String],
        ) -> Result<String> {
            Ok(String::new())
        }
    }

    fn touch(path: &Path, contents: &str) {
        let mut f = File::create(path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    fn test_config(dir: &Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.cache_dir = Some(dir.join("cache"));
        config.workers = 2;
        config
    }

    fn options(source: &Path, output: &Path) -> OrganizeOptions {
        OrganizeOptions {
            source: source.to_path_buf(),
            output: output.to_path_buf(),
            recursive: false,
            copy_mode: true,
            dry_run: false,
            max_files: None,
        }
    }

    fn record(name: &str, kind: FileKind, content: &str) -> FileRecord {
        FileRecord {
            path: PathBuf::from(name),
            name: name.to_string(),
            extension: ".txt".to_string(),
            size: 0,
            mime_type: "text/plain".to_string(),
            kind,
            content: content.to_string(),
            metadata: serde_json::Value::Null,
            transcription: None,
            summary: None,
            error: None,
        }
    }

    #[test]
    fn ignore_rules_match_names_not_paths() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("sub")).unwrap();

        touch(&src.join("notes.txt"), "n");
        touch(&src.join(".DS_Store"), "");
        touch(&src.join("backup~"), "");
        touch(&src.join(".hidden"), "");
        touch(&src.join(".gitignore"), "target/");
        touch(&src.join(".env.example"), "KEY=");
        touch(&src.join("Thumbs.db"), "");
        touch(&src.join("sub").join("deep.txt"), "d");

        let config = test_config(dir.path());
        let output = dir.path().join("out");

        let flat = Organizer::new(&config, None, options(&src, &output)).unwrap();
        let names: Vec<String> = flat
            .scan()
            .unwrap()
            .iter()
            .map(|p| file_name_of(p))
            .collect();
        assert_eq!(names, vec![".env.example", ".gitignore", "notes.txt"]);

        let mut opts = options(&src, &output);
        opts.recursive = true;
        let deep = Organizer::new(&config, None, opts).unwrap();
        let names: Vec<String> = deep
            .scan()
            .unwrap()
            .iter()
            .map(|p| file_name_of(p))
            .collect();
        assert!(names.contains(&"deep.txt".to_string()));
    }

    #[test]
    fn scan_caps_at_max_files() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        for i in 0..5 {
            touch(&src.join(format!("f{}.txt", i)), "x");
        }

        let config = test_config(dir.path());
        let mut opts = options(&src, &dir.path().join("out"));
        opts.max_files = Some(2);
        let organizer = Organizer::new(&config, None, opts).unwrap();
        assert_eq!(organizer.scan().unwrap().len(), 2);
    }

    #[test]
    fn construction_validates_directories() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        let config = test_config(dir.path());

        let missing = Organizer::new(
            &config,
            None,
            options(&dir.path().join("nope"), &dir.path().join("out")),
        );
        assert!(missing.is_err());

        let same = Organizer::new(&config, None, options(&src, &src));
        assert!(same.is_err());
    }

    #[test]
    fn sanitization_produces_safe_folder_names() {
        assert_eq!(sanitize_folder_name("Data Files", 50), "Data_Files");
        assert_eq!(
            sanitize_folder_name("Reports: 2024/Q1*", 50),
            "Reports_2024Q1"
        );
        assert_eq!(sanitize_folder_name("???", 50), "Uncategorized");
        assert_eq!(sanitize_folder_name("", 50), "Uncategorized");
        assert_eq!(sanitize_folder_name(&"a".repeat(80), 50).len(), 50);
    }

    #[test]
    fn cleanup_takes_first_line_and_strips_punctuation() {
        assert_eq!(
            clean_category("  Financial Documents.\nAnything else", 50),
            "Financial_Documents"
        );
        assert_eq!(clean_category("\"Code\"", 50), "Code");
        assert_eq!(clean_category("", 50), "Uncategorized");
    }

    #[test]
    fn categorize_prompt_matches_the_template() {
        let config = AppConfig::default();
        let record = record("a.txt", FileKind::Text, "hello");
        let prompt = build_categorize_prompt(&config.prompts.categorize, &record);

        assert!(prompt.starts_with(
            "You are a file organization assistant. Categorize the following \
             file into a descriptive category.\n\nFILE INFORMATION:\n\nFile: \
             a.txt\nType: text\nExtension: .txt\nContent preview: hello\n"
        ));
        assert!(prompt.ends_with("\n\nCategory:"));
        assert!(prompt.contains("Respond with ONLY the category name, nothing else."));
    }

    #[test]
    fn unique_path_appends_counters() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("report.txt");

        assert_eq!(unique_path(base.clone()), base);

        touch(&base, "a");
        assert_eq!(unique_path(base.clone()), dir.path().join("report_1.txt"));

        touch(&dir.path().join("report_1.txt"), "b");
        assert_eq!(unique_path(base), dir.path().join("report_2.txt"));
    }

    #[tokio::test]
    async fn copy_run_places_files_and_writes_reports() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        touch(&src.join("notes.txt"), "meeting notes");
        touch(&src.join("todo.md"), "- fix the gate");

        let config = test_config(dir.path());
        let output = dir.path().join("out");
        let organizer =
            Organizer::new(&config, None, options(&src, &output)).unwrap();
        let factory = DefaultResourceFactory::new(&config);

        let stats = organizer.run(factory).await.unwrap();

        assert_eq!(stats.total_files, 2);
        assert_eq!(stats.organized, 2);
        assert_eq!(stats.errors, 0);
        assert!(output.join("Text").join("files").join("notes.txt").exists());
        assert!(output.join("Text").join("files").join("todo.md").exists());
        assert!(src.join("notes.txt").exists());

        let readme =
            fs::read_to_string(output.join("Text").join("README.md")).unwrap();
        assert!(readme.starts_with("# Text\n\n"));
        assert!(readme.contains("This folder contains files categorized as: **Text**"));
        assert!(readme.contains("## Files (2)"));
        assert!(readme.contains("### Text Files"));
        assert!(readme.contains("- `notes.txt`"));

        let report =
            fs::read_to_string(output.join("ORGANIZATION_REPORT.md")).unwrap();
        assert!(report.starts_with("# File Organization Report\n\n"));
        assert!(report.contains("**Total Files Processed:** 2"));
        assert!(report.contains("### Text"));
    }

    #[tokio::test]
    async fn dry_run_counts_without_touching_the_filesystem() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        touch(&src.join("notes.txt"), "text");

        let config = test_config(dir.path());
        let output = dir.path().join("out");
        let mut opts = options(&src, &output);
        opts.dry_run = true;
        let organizer = Organizer::new(&config, None, opts).unwrap();
        let factory = DefaultResourceFactory::new(&config);

        let stats = organizer.run(factory).await.unwrap();

        assert_eq!(stats.organized, 1);
        assert!(!output.exists());
        assert_eq!(stats.categories["Text"].count, 1);
    }

    #[tokio::test]
    async fn move_run_relocates_and_journals() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        touch(&src.join("clip.mp3"), "not really audio");

        let config = test_config(dir.path());
        let output = dir.path().join("out");
        let mut opts = options(&src, &output);
        opts.copy_mode = false;
        let organizer = Organizer::new(&config, None, opts).unwrap();
        let factory = DefaultResourceFactory::new(&config);

        let stats = organizer.run(factory).await.unwrap();

        assert_eq!(stats.organized, 1);
        assert!(!src.join("clip.mp3").exists());
        assert!(output.join("Media").join("files").join("clip.mp3").exists());

        let history = History::new(config.cache_dir().join("history.jsonl"));
        let entries = history.read_all().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].mode, TransferMode::Move);
        assert_eq!(entries[0].category, "Media");
    }

    #[tokio::test]
    async fn collisions_get_numbered_destinations() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("a")).unwrap();
        fs::create_dir_all(src.join("b")).unwrap();
        touch(&src.join("a").join("dup.txt"), "first");
        touch(&src.join("b").join("dup.txt"), "second");

        let config = test_config(dir.path());
        let output = dir.path().join("out");
        let mut opts = options(&src, &output);
        opts.recursive = true;
        let organizer = Organizer::new(&config, None, opts).unwrap();
        let factory = DefaultResourceFactory::new(&config);

        let stats = organizer.run(factory).await.unwrap();

        assert_eq!(stats.organized, 2);
        let files_dir = output.join("Text").join("files");
        assert!(files_dir.join("dup.txt").exists());
        assert!(files_dir.join("dup_1.txt").exists());
    }

    #[tokio::test]
    async fn backend_answers_become_folder_names() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        touch(&src.join("q3.txt"), "quarterly numbers");

        let config = test_config(dir.path());
        let output = dir.path().join("out");
        let backend: Arc<dyn TextBackend> =
            Arc::new(FixedBackend(" Financial Reports.\n"));
        let organizer =
            Organizer::new(&config, Some(backend), options(&src, &output))
                .unwrap();
        let factory = DefaultResourceFactory::new(&config);

        let stats = organizer.run(factory).await.unwrap();

        assert!(stats.categories.contains_key("Financial_Reports"));
        assert!(output
            .join("Financial_Reports")
            .join("files")
            .join("q3.txt")
            .exists());
    }
}
