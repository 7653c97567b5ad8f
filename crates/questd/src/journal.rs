//! Append-only JSONL journal of progression notifications.
//!
//! Rotation rewrites the file with the newest `max_entries` records once it
//! grows past the limit.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use quest_common::Result;

/// Single journal record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// e.g. "task_completed", "achievement_unlocked", "level_changed", "purchase"
    pub kind: String,
    pub summary: String,
    #[serde(default)]
    pub detail: serde_json::Value,
}

impl JournalEntry {
    pub fn new(kind: &str, summary: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            kind: kind.to_string(),
            summary: summary.into(),
            detail: serde_json::Value::Null,
        }
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }
}

pub struct Journal {
    path: PathBuf,
    max_entries: usize,
    writer: Mutex<()>,
}

impl Journal {
    pub fn new(path: impl AsRef<Path>, max_entries: usize) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_entries: max_entries.max(1),
            writer: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, entry: &JournalEntry) -> Result<()> {
        let _guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", serde_json::to_string(entry)?)?;
        drop(file);
        self.maybe_rotate()
    }

    /// Append, logging instead of failing
    pub fn record(&self, entry: JournalEntry) {
        if let Err(e) = self.append(&entry) {
            warn!("journal write to {} failed: {}", self.path.display(), e);
        }
    }

    /// Unparseable lines are skipped
    pub fn read_all(&self) -> Result<Vec<JournalEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(&self.path)?);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(entry) = serde_json::from_str::<JournalEntry>(&line) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// The newest `n` entries, oldest first
    pub fn recent(&self, n: usize) -> Result<Vec<JournalEntry>> {
        let mut entries = self.read_all()?;
        let skip = entries.len().saturating_sub(n);
        Ok(entries.split_off(skip))
    }

    fn maybe_rotate(&self) -> Result<()> {
        let entries = self.read_all()?;
        if entries.len() <= self.max_entries {
            return Ok(());
        }
        let keep = &entries[entries.len() - self.max_entries..];

        // Write to temp file then rename
        let temp_path = self.path.with_extension("jsonl.tmp");
        {
            let mut file = File::create(&temp_path)?;
            for entry in keep {
                writeln!(file, "{}", serde_json::to_string(entry)?)?;
            }
        }
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}
