//! Storage backends for the newline-delimited ledger file.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::warn;

use crate::entry::LedgerEntry;
use crate::error::LedgerError;

/// Append-only persistence for ledger entries. A backend must make an entry
/// durable before `append` returns; a failed append leaves no partial entry
/// visible to a subsequent `load`.
pub trait LedgerStorage: Send + Sync {
    fn append(&self, entry: &LedgerEntry) -> Result<(), LedgerError>;

    /// Load all committed entries. A corrupt trailing line is treated as
    /// not-yet-committed and dropped; nothing after it is read.
    fn load(&self) -> Result<Vec<LedgerEntry>, LedgerError>;
}

/// One JSON object per line, append-only, flushed per entry.
pub struct FileStorage {
    path: PathBuf,
    file: Mutex<std::fs::File>,
}

impl FileStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LedgerStorage for FileStorage {
    fn append(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        let mut line = serde_json::to_string(entry)
            .map_err(|error| LedgerError::Serialization(error.to_string()))?;
        line.push('\n');

        let mut file = self.file.lock().map_err(|_| LedgerError::LockError)?;
        file.write_all(line.as_bytes())?;
        file.flush()?;
        file.sync_data()?;
        Ok(())
    }

    fn load(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        let file = std::fs::File::open(&self.path)?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();
        let mut dropped = 0usize;

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LedgerEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(error) => {
                    // Torn final write from a crash; everything after it is
                    // uncommitted by definition.
                    warn!(
                        path = %self.path.display(),
                        after_sequence = entries.last().map(|e| e.sequence).unwrap_or(0),
                        %error,
                        "Dropping corrupt trailing ledger line"
                    );
                    dropped += 1;
                    break;
                }
            }
        }

        if dropped > 0 {
            warn!(
                path = %self.path.display(),
                committed = entries.len(),
                "Ledger reopened with uncommitted tail discarded"
            );
        }
        Ok(entries)
    }
}

/// In-memory backend for tests and ephemeral teams.
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<Vec<LedgerEntry>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStorage for MemoryStorage {
    fn append(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        let mut entries = self.entries.lock().map_err(|_| LedgerError::LockError)?;
        entries.push(entry.clone());
        Ok(())
    }

    fn load(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        let entries = self.entries.lock().map_err(|_| LedgerError::LockError)?;
        Ok(entries.clone())
    }
}
