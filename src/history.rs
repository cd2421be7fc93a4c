// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Transfer journal for undo support

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::Result;

/// How a file reached its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    Copy,
    Move,
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferMode::Copy => write!(f, "copy"),
            TransferMode::Move => write!(f, "move"),
        }
    }
}

/// A single organized file in the journal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub category: String,
    pub mode: TransferMode,
    pub undone: bool,
}

impl MoveRecord {
    pub fn new(
        source: PathBuf,
        destination: PathBuf,
        category: String,
        mode: TransferMode,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            source,
            destination,
            category,
            mode,
            undone: false,
        }
    }
}

/// Journal of copy/move operations, one JSON line per organized file
pub struct History {
    path: PathBuf,
}

impl History {
    /// Create a new journal handle
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Append a record to the journal
    pub fn append(&self, record: &MoveRecord) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let json = serde_json::to_string(record)?;
        writeln!(file, "{}", json)?;

        Ok(())
    }

    /// Read all journal records
    pub fn read_all(&self) -> Result<Vec<MoveRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);

        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!("Failed to parse history record: {}", e);
                }
            }
        }

        Ok(records)
    }

    /// Get the most recent N records (newest first)
    pub fn get_recent(&self, count: usize) -> Result<Vec<MoveRecord>> {
        let mut records = self.read_all()?;
        records.reverse();
        records.truncate(count);
        Ok(records)
    }

    /// Mark a record as undone
    pub fn mark_undone(&self, id: &str) -> Result<()> {
        let records = self.read_all()?;

        // Rewrite the entire file with the updated record
        let file = File::create(&self.path)?;
        let mut writer = std::io::BufWriter::new(file);

        for mut record in records {
            if record.id == id {
                record.undone = true;
            }
            let json = serde_json::to_string(&record)?;
            writeln!(writer, "{}", json)?;
        }

        Ok(())
    }

    /// Get records that haven't been undone
    pub fn get_undoable(&self) -> Result<Vec<MoveRecord>> {
        let records = self.read_all()?;
        Ok(records.into_iter().filter(|r| !r.undone).collect())
    }

    /// Clear the journal
    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    /// Get the journal file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Reverse one recorded transfer. Move records go back to their source;
/// copy records have the copy deleted.
pub fn revert(record: &MoveRecord) -> Result<()> {
    match record.mode {
        TransferMode::Move => {
            if let Some(parent) = record.source.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::rename(&record.destination, &record.source)?;
        }
        TransferMode::Copy => {
            fs::remove_file(&record.destination)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(category: &str, mode: TransferMode) -> MoveRecord {
        MoveRecord::new(
            PathBuf::from("/tmp/in/a.txt"),
            PathBuf::from("/tmp/out/files/a.txt"),
            category.to_string(),
            mode,
        )
    }

    #[test]
    fn journal_round_trips_records() {
        let dir = tempdir().unwrap();
        let history = History::new(dir.path().join("history.jsonl"));

        history.append(&sample("Documents", TransferMode::Copy)).unwrap();
        history.append(&sample("Images", TransferMode::Move)).unwrap();

        let records = history.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].category, "Documents");
        assert_eq!(records[0].mode, TransferMode::Copy);
        assert!(!records[0].undone);

        let recent = history.get_recent(1).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].category, "Images");
    }

    #[test]
    fn undone_records_drop_out_of_the_undoable_set() {
        let dir = tempdir().unwrap();
        let history = History::new(dir.path().join("history.jsonl"));

        let first = sample("Documents", TransferMode::Copy);
        history.append(&first).unwrap();
        history.append(&sample("Images", TransferMode::Copy)).unwrap();

        history.mark_undone(&first.id).unwrap();

        let undoable = history.get_undoable().unwrap();
        assert_eq!(undoable.len(), 1);
        assert_eq!(undoable[0].category, "Images");
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        let history = History::new(path.clone());

        history.append(&sample("Documents", TransferMode::Copy)).unwrap();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "not json").unwrap();

        assert_eq!(history.read_all().unwrap().len(), 1);
    }

    #[test]
    fn revert_moves_a_moved_file_back() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("in").join("a.txt");
        let dest = dir.path().join("out").join("a.txt");
        fs::create_dir_all(dest.parent().unwrap()).unwrap();
        fs::write(&dest, "moved").unwrap();

        let mut record = sample("Documents", TransferMode::Move);
        record.source = source.clone();
        record.destination = dest.clone();

        revert(&record).unwrap();
        assert!(source.exists());
        assert!(!dest.exists());
    }

    #[test]
    fn revert_deletes_a_copy() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("a.txt");
        fs::write(&dest, "copied").unwrap();

        let mut record = sample("Documents", TransferMode::Copy);
        record.destination = dest.clone();

        revert(&record).unwrap();
        assert!(!dest.exists());
    }
}
