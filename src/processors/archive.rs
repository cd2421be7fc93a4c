// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Archive inspection and the deep-processing decision cascade.
//!
//! Archives are never blindly unpacked. A manifest is derived first, then
//! an ordered rule cascade decides whether members are worth extracting
//! and running through the type-specific processors.

use flate2::read::GzDecoder;
use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{file_name_of, text, FileKind, FilePipeline, ProcessingResult};
use crate::ollama::TextBackend;
use crate::{EunomiaError, Result};

/// Extensions that mark a member as a nested archive
const NESTED_ARCHIVE_EXTS: [&str; 6] = [".zip", ".tar", ".gz", ".rar", ".7z", ".bz2"];

/// Member extensions the bounded-set rule counts as processable
const PROCESSABLE_EXTS: [&str; 12] = [
    ".txt", ".md", ".json", ".csv", ".log", ".py", ".js", ".html", ".css", ".pdf", ".docx",
    ".doc",
];

const SAMPLE_LIMIT: usize = 20;
const HISTOGRAM_LIMIT: usize = 10;
const VERDICT_TYPES_LIMIT: usize = 5;
const VERDICT_ANSWER_WINDOW: usize = 20;

/// What an archive looks like from its table of contents
#[derive(Debug, Default)]
pub(crate) struct ArchiveManifest {
    /// Every entry name as listed, including directories and metadata
    pub entry_names: Vec<String>,
    pub total_size: u64,
    /// Real member files after filtering metadata and directories
    pub files: Vec<MemberInfo>,
    pub has_folders: bool,
    pub has_nested: bool,
    /// Lowercased dotted extension -> member count
    pub histogram: HashMap<String, usize>,
}

#[derive(Debug, Clone)]
pub(crate) struct MemberInfo {
    pub name: String,
    pub size: u64,
}

impl ArchiveManifest {
    pub(crate) fn add_entry(&mut self, name: String, size: u64, is_dir: bool) {
        self.total_size += size;
        self.entry_names.push(name.clone());

        if is_metadata_entry(&name) {
            return;
        }
        if is_dir || name.ends_with('/') {
            self.has_folders = true;
            return;
        }

        let ext = dotted_extension(&name);
        if !ext.is_empty() {
            *self.histogram.entry(ext.clone()).or_insert(0) += 1;
            if NESTED_ARCHIVE_EXTS.contains(&ext.as_str()) {
                self.has_nested = true;
            }
        }
        self.files.push(MemberInfo { name, size });
    }

    /// Extensions by descending member count, capped at `n`
    pub(crate) fn top_extensions(&self, n: usize) -> Vec<(String, usize)> {
        let mut counts: Vec<(String, usize)> = self
            .histogram
            .iter()
            .map(|(ext, count)| (ext.clone(), *count))
            .collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        counts.truncate(n);
        counts
    }
}

/// macOS resource forks and `__MACOSX` folders never count as content
fn is_metadata_entry(name: &str) -> bool {
    name.starts_with("__MACOSX/") || name.contains("/__MACOSX/") || name.contains("._")
}

fn dotted_extension(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_default()
}

pub async fn process(pipeline: &FilePipeline, path: &Path) -> ProcessingResult {
    let name = file_name_of(path);
    let ext = super::extension_of(path);

    let manifest = match ext.as_str() {
        "zip" => read_zip_manifest(path),
        "tar" | "gz" => read_tar_manifest(path),
        _ => {
            return ProcessingResult::ok(format!(
                "Archive file: {} (format not fully supported)",
                name
            ))
        }
    };

    let manifest = match manifest {
        Ok(manifest) => manifest,
        Err(e) => {
            let detail = e.to_string();
            return ProcessingResult::failed(
                format!("Archive file: {}\nError reading archive: {}", name, detail),
                detail,
            );
        }
    };

    let deep = should_deep_process(pipeline, &manifest).await;
    debug!(
        "Archive {}: {} files, folders={}, nested={}, deep={}",
        name,
        manifest.files.len(),
        manifest.has_folders,
        manifest.has_nested,
        deep
    );

    let mut description = describe_header(&name, &manifest);

    if deep {
        description.push_str(&format!(
            "\n🔍 Deep processing {} files...\n",
            manifest.files.len()
        ));
        let sections = deep_process(pipeline, path, &ext, &manifest).await;
        if !sections.is_empty() {
            description.push_str("\nProcessed file contents:\n");
            description.push_str(&sections.join("\n"));
        }
    }

    push_samples(&mut description, &manifest);

    if pipeline.summaries.has_backend() {
        let prompt = format!(
            "{}\n\n{}\n\nSummary:",
            pipeline.config.prompts.archive,
            text::truncate_chars(&description, 2000)
        );
        let paragraph = pipeline.summaries.generate(&prompt).await;
        if !paragraph.is_empty() {
            description = format!(
                "Archive file: {}\n\n📋 Summary: {}\n\n{}",
                name, paragraph, description
            );
        }
    }

    ProcessingResult::ok(description)
}

fn describe_header(name: &str, manifest: &ArchiveManifest) -> String {
    let mut description = format!(
        "Archive file: {}\nContains {} files, total size: {:.2} MB\n\n",
        name,
        manifest.entry_names.len(),
        manifest.total_size as f64 / (1024.0 * 1024.0)
    );

    if !manifest.histogram.is_empty() {
        description.push_str("File types:\n");
        for (ext, count) in manifest.top_extensions(HISTOGRAM_LIMIT) {
            description.push_str(&format!("  {}: {} files\n", ext, count));
        }
    }

    description
}

fn push_samples(description: &mut String, manifest: &ArchiveManifest) {
    if manifest.entry_names.is_empty() {
        return;
    }

    description.push_str("\n\nSample files:\n");
    for name in manifest.entry_names.iter().take(SAMPLE_LIMIT) {
        description.push_str(&format!("  - {}\n", name));
    }
    if manifest.entry_names.len() > SAMPLE_LIMIT {
        description.push_str(&format!(
            "  ... and {} more files\n",
            manifest.entry_names.len() - SAMPLE_LIMIT
        ));
    }
}

/// Ordered rule cascade; first match wins.
pub(crate) async fn should_deep_process(
    pipeline: &FilePipeline,
    manifest: &ArchiveManifest,
) -> bool {
    let num_files = manifest.files.len();

    // Trivial flat archive
    if num_files < 5 && !manifest.has_folders && !manifest.has_nested {
        return true;
    }

    // Small bounded set of processable members
    let processable: usize = manifest
        .histogram
        .iter()
        .filter(|(ext, _)| PROCESSABLE_EXTS.contains(&ext.as_str()))
        .map(|(_, count)| *count)
        .sum();
    if (1..=5).contains(&processable) && !manifest.has_nested {
        return true;
    }

    // Large archive: let the model weigh in
    if let Some(backend) = pipeline.backend.as_ref() {
        if num_files > 5 {
            match archive_verdict(pipeline, backend.as_ref(), manifest).await {
                Ok(answer) => {
                    let head: String = answer
                        .trim()
                        .to_lowercase()
                        .chars()
                        .take(VERDICT_ANSWER_WINDOW)
                        .collect();
                    return head.contains("yes");
                }
                Err(e) => debug!("Archive verdict failed, defaulting to shallow: {}", e),
            }
        }
    }

    false
}

async fn archive_verdict(
    pipeline: &FilePipeline,
    backend: &dyn TextBackend,
    manifest: &ArchiveManifest,
) -> Result<String> {
    let types: Vec<String> = manifest
        .top_extensions(VERDICT_TYPES_LIMIT)
        .into_iter()
        .map(|(ext, count)| format!("{} {} files", count, ext))
        .collect();

    let prompt = format!(
        "{}\n\nArchive info:\n\
         - Number of files: {}\n\
         - Has subdirectories: {}\n\
         - Has nested archives: {}\n\
         - File types: {}\n\n\
         Should we extract and deeply process the files inside this archive? \
         Answer with just \"yes\" or \"no\" and a brief reason.\n\n\
         Consider:\n\
         - If it's a small backup or export with a few documents/text files -> yes\n\
         - If it's a large codebase or complex project structure -> no\n\
         - If it has many nested archives or binary files -> no\n\
         - If it's clearly documentation or data files -> yes\n\n\
         Answer:",
        pipeline.config.prompts.archive_verdict,
        manifest.files.len(),
        manifest.has_folders,
        manifest.has_nested,
        types.join(", ")
    );

    backend
        .generate(&pipeline.config.backend.models.text, &prompt)
        .await
}

/// Extract the selected members into a scratch directory and run each
/// through its processor, collecting per-member sections
async fn deep_process(
    pipeline: &FilePipeline,
    path: &Path,
    ext: &str,
    manifest: &ArchiveManifest,
) -> Vec<String> {
    let scratch = match tempfile::tempdir() {
        Ok(dir) => dir,
        Err(e) => {
            warn!("Could not create scratch directory: {}", e);
            return Vec::new();
        }
    };

    let size_limit = pipeline.config.archive.member_size_limit_mb * 1024 * 1024;
    let wanted: Vec<&MemberInfo> = manifest
        .files
        .iter()
        .take(pipeline.config.archive.max_members_extracted)
        .filter(|member| member.size <= size_limit)
        .collect();

    let extracted = match ext {
        "zip" => extract_zip_members(path, &wanted, scratch.path()),
        _ => extract_tar_members(path, &wanted, scratch.path()),
    };
    let extracted = match extracted {
        Ok(extracted) => extracted,
        Err(e) => {
            warn!("Member extraction failed for {:?}: {}", path, e);
            return Vec::new();
        }
    };

    let mut sections = Vec::new();
    for (member_name, member_path) in extracted {
        let Some(result) = pipeline.process_member(&member_path).await else {
            continue;
        };
        if !result.success || result.summary.trim().is_empty() {
            continue;
        }

        let kind = pipeline.registry.kind_of(&member_path);
        let media = matches!(kind, FileKind::Image | FileKind::Video | FileKind::Audio);
        let preview = if media {
            result.summary
        } else {
            text::truncate_chars(&result.summary, 1000)
        };
        sections.push(format!("\n--- {} ---\n{}", member_name, preview));
    }

    sections
}

fn read_zip_manifest(path: &Path) -> Result<ArchiveManifest> {
    let file = std::fs::File::open(path)?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| EunomiaError::Archive(e.to_string()))?;

    let mut manifest = ArchiveManifest::default();
    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|e| EunomiaError::Archive(e.to_string()))?;
        manifest.add_entry(entry.name().to_string(), entry.size(), entry.is_dir());
    }

    Ok(manifest)
}

fn open_tar(path: &Path) -> Result<tar::Archive<Box<dyn Read>>> {
    let file = std::fs::File::open(path)?;
    let reader: Box<dyn Read> = if super::extension_of(path) == "gz" {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    Ok(tar::Archive::new(reader))
}

fn read_tar_manifest(path: &Path) -> Result<ArchiveManifest> {
    let mut archive = open_tar(path)?;

    let mut manifest = ArchiveManifest::default();
    for entry in archive
        .entries()
        .map_err(|e| EunomiaError::Archive(e.to_string()))?
    {
        let entry = entry.map_err(|e| EunomiaError::Archive(e.to_string()))?;
        let name = entry
            .path()
            .map_err(|e| EunomiaError::Archive(e.to_string()))?
            .to_string_lossy()
            .into_owned();
        let is_dir = entry.header().entry_type().is_dir();
        manifest.add_entry(name, entry.size(), is_dir);
    }

    Ok(manifest)
}

fn extract_zip_members(
    path: &Path,
    wanted: &[&MemberInfo],
    scratch: &Path,
) -> Result<Vec<(String, PathBuf)>> {
    let file = std::fs::File::open(path)?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| EunomiaError::Archive(e.to_string()))?;

    let mut extracted = Vec::new();
    for member in wanted {
        let mut entry = match archive.by_name(&member.name) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Could not open archive member {}: {}", member.name, e);
                continue;
            }
        };

        let dest = scratch.join(member_basename(&member.name));
        let mut out = match std::fs::File::create(&dest) {
            Ok(out) => out,
            Err(e) => {
                warn!("Could not create {:?}: {}", dest, e);
                continue;
            }
        };
        if let Err(e) = std::io::copy(&mut entry, &mut out) {
            warn!("Could not extract {}: {}", member.name, e);
            continue;
        }

        extracted.push((member.name.clone(), dest));
    }

    Ok(extracted)
}

fn extract_tar_members(
    path: &Path,
    wanted: &[&MemberInfo],
    scratch: &Path,
) -> Result<Vec<(String, PathBuf)>> {
    let wanted_names: HashSet<&str> = wanted.iter().map(|m| m.name.as_str()).collect();
    let mut archive = open_tar(path)?;

    let mut extracted = Vec::new();
    for entry in archive
        .entries()
        .map_err(|e| EunomiaError::Archive(e.to_string()))?
    {
        let mut entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable tar entry: {}", e);
                continue;
            }
        };
        let name = match entry.path() {
            Ok(p) => p.to_string_lossy().into_owned(),
            Err(_) => continue,
        };
        if !wanted_names.contains(name.as_str()) {
            continue;
        }

        let dest = scratch.join(member_basename(&name));
        match entry.unpack(&dest) {
            Ok(_) => extracted.push((name, dest)),
            Err(e) => warn!("Could not extract {}: {}", name, e),
        }
    }

    Ok(extracted)
}

fn member_basename(name: &str) -> String {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("member")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn manifest_of(entries: &[(&str, u64, bool)]) -> ArchiveManifest {
        let mut manifest = ArchiveManifest::default();
        for (name, size, is_dir) in entries {
            manifest.add_entry(name.to_string(), *size, *is_dir);
        }
        manifest
    }

    #[test]
    fn manifest_filters_metadata_and_directories() {
        let manifest = manifest_of(&[
            ("__MACOSX/._photo.jpg", 100, false),
            ("docs/", 0, true),
            ("docs/readme.txt", 50, false),
            ("backup.zip", 900, false),
        ]);

        assert_eq!(manifest.entry_names.len(), 4);
        assert_eq!(manifest.total_size, 1050);
        assert_eq!(manifest.files.len(), 2);
        assert!(manifest.has_folders);
        assert!(manifest.has_nested);
        assert_eq!(manifest.histogram.get(".txt"), Some(&1));
        assert_eq!(manifest.histogram.get(".zip"), Some(&1));
    }

    #[test]
    fn small_flat_archive_always_deep_processes() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = crate::test_support::pipeline(dir.path());

        let manifest = manifest_of(&[
            ("a.bin", 10, false),
            ("b.bin", 10, false),
            ("c.bin", 10, false),
            ("d.bin", 10, false),
        ]);

        assert!(tokio_test::block_on(should_deep_process(&pipeline, &manifest)));
    }

    #[test]
    fn folders_disable_the_trivial_rule_but_not_the_bounded_one() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = crate::test_support::pipeline(dir.path());

        // Folders plus unprocessable members: shallow
        let opaque = manifest_of(&[("sub/", 0, true), ("sub/a.bin", 10, false)]);
        assert!(!tokio_test::block_on(should_deep_process(&pipeline, &opaque)));

        // Folders but five processable documents: deep
        let documents = manifest_of(&[
            ("sub/", 0, true),
            ("sub/a.md", 10, false),
            ("sub/b.md", 10, false),
            ("sub/c.txt", 10, false),
            ("sub/d.txt", 10, false),
            ("sub/e.pdf", 10, false),
            ("sub/f.bin", 10, false),
        ]);
        assert!(tokio_test::block_on(should_deep_process(&pipeline, &documents)));
    }

    #[test]
    fn nested_archives_block_both_unconditional_rules() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = crate::test_support::pipeline(dir.path());

        let manifest = manifest_of(&[("notes.txt", 10, false), ("inner.zip", 10, false)]);

        assert!(!tokio_test::block_on(should_deep_process(&pipeline, &manifest)));
    }

    #[test]
    fn large_archive_without_backend_stays_shallow() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = crate::test_support::pipeline(dir.path());

        let entries: Vec<(String, u64, bool)> = (0..8)
            .map(|i| (format!("img_{}.bin", i), 10, false))
            .collect();
        let mut manifest = ArchiveManifest::default();
        for (name, size, is_dir) in entries {
            manifest.add_entry(name, size, is_dir);
        }

        assert!(!tokio_test::block_on(should_deep_process(&pipeline, &manifest)));
    }

    #[test]
    fn flat_zip_is_deep_processed_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.zip");

        let file = std::fs::File::create(&path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for (name, content) in [
            ("alpha.txt", "alpha content here"),
            ("beta.md", "# beta notes"),
            ("gamma.log", "gamma log line"),
        ] {
            writer.start_file(name, options).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap();

        let pipeline = crate::test_support::pipeline(dir.path());
        let result = tokio_test::block_on(process(&pipeline, &path));

        assert!(result.success);
        assert!(result.summary.starts_with("Archive file: sample.zip"));
        assert!(result.summary.contains("Contains 3 files"));
        assert!(result.summary.contains("🔍 Deep processing 3 files"));
        assert!(result.summary.contains("Processed file contents:"));
        assert!(result.summary.contains("--- alpha.txt ---"));
        assert!(result.summary.contains("alpha content here"));
        assert!(result.summary.contains("Sample files:"));
        assert!(result.summary.contains("  - beta.md"));
    }

    #[test]
    fn tar_gz_members_extract_through_the_same_cascade() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.tar.gz");

        let file = std::fs::File::create(&path).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let data = b"tarred readme body";
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "docs/readme.txt", data.as_slice())
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let pipeline = crate::test_support::pipeline(dir.path());
        let result = tokio_test::block_on(process(&pipeline, &path));

        assert!(result.success);
        assert!(result.summary.contains("Contains 1 files"));
        assert!(result.summary.contains("--- docs/readme.txt ---"));
        assert!(result.summary.contains("tarred readme body"));
    }

    #[test]
    fn unsupported_formats_are_described_not_failed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.rar");
        std::fs::write(&path, b"rar bytes").unwrap();

        let pipeline = crate::test_support::pipeline(dir.path());
        let result = tokio_test::block_on(process(&pipeline, &path));

        assert!(result.success);
        assert_eq!(
            result.summary,
            "Archive file: old.rar (format not fully supported)"
        );
    }

    #[test]
    fn corrupt_zip_reports_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.zip");
        std::fs::write(&path, b"definitely not a zip").unwrap();

        let pipeline = crate::test_support::pipeline(dir.path());
        let result = tokio_test::block_on(process(&pipeline, &path));

        assert!(!result.success);
        assert!(result
            .summary
            .starts_with("Archive file: bad.zip\nError reading archive:"));
        assert!(result.error.is_some());
    }
}
