use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::HistoryError;
use crate::report::BatchSummary;

pub const HISTORY_ENV: &str = "PIXBATCH_HISTORY";

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    Convert,
    Rename,
    DedupScan,
}

impl OperationKind {
    pub fn label(self) -> &'static str {
        match self {
            OperationKind::Convert => "convert",
            OperationKind::Rename => "rename",
            OperationKind::DedupScan => "dedup-scan",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub kind: OperationKind,
    pub timestamp: DateTime<Utc>,
    pub root: PathBuf,
    pub summary: BatchSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Append-only JSON Lines log of finished batch runs.
#[derive(Debug)]
pub struct HistoryRecorder {
    path: PathBuf,
    append_lock: Mutex<()>,
}

impl HistoryRecorder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            append_lock: Mutex::new(()),
        }
    }

    /// `$PIXBATCH_HISTORY`, then the XDG data dir, then `~/.local/share`,
    /// then the temp dir.
    pub fn default_path() -> PathBuf {
        if let Some(path) = std::env::var_os(HISTORY_ENV) {
            return PathBuf::from(path);
        }
        let data_dir = std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".local/share")))
            .unwrap_or_else(std::env::temp_dir);
        data_dir.join("pixbatch").join("history.jsonl")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &HistoryRecord) -> Result<(), HistoryError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let _guard = self.append_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| self.io_error(source))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| self.io_error(source))?;
        if ends_mid_line(&mut file).map_err(|source| self.io_error(source))? {
            line.insert(0, b'\n');
        }
        file.write_all(&line).map_err(|source| self.io_error(source))?;
        file.flush().map_err(|source| self.io_error(source))?;

        debug!(kind = record.kind.label(), path = %self.path.display(), "history appended");
        Ok(())
    }

    /// Appends, downgrading any failure to a warning so the batch that
    /// produced the record is unaffected.
    pub fn record(&self, record: &HistoryRecord) {
        if let Err(err) = self.append(record) {
            warn!(
                kind = record.kind.label(),
                error = %err,
                "history write warning: record not saved"
            );
        }
    }

    /// Most recent `limit` records, newest first. Lines that fail to parse
    /// (for example a torn final append) are skipped.
    pub fn list(&self, limit: usize) -> Result<Vec<HistoryRecord>, HistoryError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(self.io_error(source)),
        };

        let records = contents
            .lines()
            .rev()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<HistoryRecord>(line) {
                Ok(record) => Some(record),
                Err(err) => {
                    warn!(error = %err, "skipping malformed history line");
                    None
                }
            })
            .take(limit)
            .collect();

        Ok(records)
    }

    fn io_error(&self, source: std::io::Error) -> HistoryError {
        HistoryError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// True when a torn earlier append left the log without a final newline.
fn ends_mid_line(file: &mut File) -> io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}
