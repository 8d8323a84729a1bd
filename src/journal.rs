use crate::error::{ErrorKind, TransferOutcome};
use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferRole {
    Sender,
    Receiver,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Completed,
    Failed,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct JournalEntry {
    pub timestamp: String,
    pub role: TransferRole,
    pub peer: String,
    pub file: Option<String>,
    pub status: TransferStatus,
    pub bytes_transferred: u64,
    pub error_kind: Option<ErrorKind>,
    pub error: Option<String>,
}

impl JournalEntry {
    pub fn new(role: TransferRole, peer: &str, file: Option<&str>, outcome: &TransferOutcome) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            role,
            peer: peer.to_string(),
            file: file.map(str::to_string),
            status: if outcome.success {
                TransferStatus::Completed
            } else {
                TransferStatus::Failed
            },
            bytes_transferred: outcome.bytes_transferred,
            error_kind: outcome.error_kind,
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

/// Append-only JSONL record of transfer outcomes. Shared between receiver
/// workers, so appends are serialised.
pub struct TransferJournal {
    path: PathBuf,
    lock: Mutex<()>,
}

impl TransferJournal {
    pub fn new(path: &Path) -> Self {
        TransferJournal {
            path: path.to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn add_entry(&self, entry: &JournalEntry) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context("Failed to open transfer journal")?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, entry)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    pub fn read_entries(&self) -> Result<Vec<JournalEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.path).context("Failed to open transfer journal for reading")?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(&line)?);
        }
        Ok(entries)
    }
}

/// Record `entry` if a journal is configured; failures are logged, not fatal.
pub fn record(journal: Option<&TransferJournal>, entry: JournalEntry) {
    if let Some(j) = journal {
        if let Err(e) = j.add_entry(&entry) {
            log::warn!("journal {}: {:#}", j.path().display(), e);
        }
    }
}
