//! JSONL ledger journal - append-only writer and sequential reader
//!
//! One file per posting date (`ledger-YYYY-MM-DD.jsonl`). Records are replayed
//! at open; boarding records first, then events in sequence order.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::balances::LoanTerms;
use crate::error::LedgerError;
use crate::event::{LedgerEntry, LedgerEvent};

/// One line of the journal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum JournalRecord {
    Boarded(LoanTerms),
    Event {
        event: LedgerEvent,
        entries: Vec<LedgerEntry>,
    },
}

/// Append-only JSONL journal
pub struct Journal {
    base_path: PathBuf,
    current_file: Option<BufWriter<File>>,
    current_date: Option<String>,
}

impl Journal {
    /// Create a journal rooted at the given directory
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;

        Ok(Self {
            base_path,
            current_file: None,
            current_date: None,
        })
    }

    /// Append one record and flush it
    pub fn append(&mut self, record: &JournalRecord) -> Result<(), LedgerError> {
        let date = Utc::now().format("%Y-%m-%d").to_string();

        if self.current_date.as_ref() != Some(&date) {
            self.rotate_file(&date)?;
        }

        if let Some(ref mut writer) = self.current_file {
            let json = serde_json::to_string(record)?;
            writeln!(writer, "{}", json)?;
            writer.flush()?;
        }

        Ok(())
    }

    fn rotate_file(&mut self, date: &str) -> Result<(), LedgerError> {
        if let Some(ref mut writer) = self.current_file {
            writer.flush()?;
        }

        let file_path = self.base_path.join(format!("ledger-{}.jsonl", date));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file_path)?;

        self.current_file = Some(BufWriter::new(file));
        self.current_date = Some(date.to_string());

        Ok(())
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// All journal files under `path`, oldest first
    pub fn list_files(path: impl AsRef<Path>) -> Result<Vec<PathBuf>, LedgerError> {
        let path = path.as_ref();
        let mut files = Vec::new();

        if path.exists() {
            for entry in fs::read_dir(path)? {
                let file_path = entry?.path();
                if file_path.extension().is_some_and(|ext| ext == "jsonl") {
                    files.push(file_path);
                }
            }
        }

        files.sort();
        Ok(files)
    }

    /// Read every record from every file in order
    pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<JournalRecord>, LedgerError> {
        let mut records = Vec::new();

        for file_path in Self::list_files(path)? {
            let reader = BufReader::new(File::open(&file_path)?);
            for (i, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let record: JournalRecord = serde_json::from_str(&line).map_err(|e| {
                    LedgerError::Storage(format!(
                        "{}:{}: {}",
                        file_path.display(),
                        i + 1,
                        e
                    ))
                })?;
                records.push(record);
            }
        }

        Ok(records)
    }

    /// Flush and close the current file
    pub fn close(&mut self) -> Result<(), LedgerError> {
        if let Some(ref mut writer) = self.current_file {
            writer.flush()?;
        }
        self.current_file = None;
        self.current_date = None;
        Ok(())
    }
}

impl Drop for Journal {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
