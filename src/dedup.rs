use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::EngineError;
use crate::history::{HistoryRecord, HistoryRecorder, OperationKind};
use crate::pool::{CancelToken, RunHandle, WorkerPool};
use crate::report::{BatchSummary, JobState, Tally};
use crate::scanner::{FileEntry, FileScanner, ScanOptions};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct DedupOptions {
    pub scan: ScanOptions,
    pub worker_count: usize,
}

impl Default for DedupOptions {
    fn default() -> Self {
        Self {
            scan: ScanOptions::default(),
            worker_count: 4,
        }
    }
}

/// Whole-file BLAKE3 digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHash {
    pub entry: FileEntry,
    pub digest: blake3::Hash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub digest: String,
    /// In scan order; always two or more.
    pub entries: Vec<FileEntry>,
}

impl DuplicateGroup {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|entry| entry.size).sum()
    }

    /// Bytes freed if all but one copy went away.
    pub fn redundant_bytes(&self) -> u64 {
        self.entries.iter().skip(1).map(|entry| entry.size).sum()
    }
}

#[derive(Debug, Clone)]
pub struct DuplicateReport {
    pub summary: BatchSummary,
    pub groups: Vec<DuplicateGroup>,
}

pub fn hash_file(path: &Path) -> io::Result<blake3::Hash> {
    let file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    hasher.update_reader(file)?;
    Ok(hasher.finalize())
}

/// Groups equal digests. Largest group first, then smallest total size,
/// then earliest scan position.
pub fn group_duplicates(hashes: Vec<FileHash>) -> Vec<DuplicateGroup> {
    let mut by_digest: HashMap<blake3::Hash, Vec<FileEntry>> = HashMap::new();
    let mut first_seen: Vec<blake3::Hash> = Vec::new();

    for hash in hashes {
        let bucket = by_digest.entry(hash.digest).or_default();
        if bucket.is_empty() {
            first_seen.push(hash.digest);
        }
        bucket.push(hash.entry);
    }

    let mut groups: Vec<DuplicateGroup> = first_seen
        .into_iter()
        .filter_map(|digest| {
            let entries = by_digest.remove(&digest)?;
            (entries.len() >= 2).then(|| DuplicateGroup {
                digest: digest.to_hex().to_string(),
                entries,
            })
        })
        .collect();

    // Stable sort keeps first-seen order for full ties.
    groups.sort_by(|a, b| {
        b.len()
            .cmp(&a.len())
            .then_with(|| a.total_bytes().cmp(&b.total_bytes()))
    });
    groups
}

pub(crate) fn start(
    root: &Path,
    options: DedupOptions,
    history: Arc<HistoryRecorder>,
) -> Result<RunHandle<DuplicateReport>, EngineError> {
    let scanner = FileScanner::new(root, options.scan)?;
    let root = scanner.root().to_path_buf();
    let entries = Arc::new(scanner.scan().collect::<Vec<FileEntry>>());
    let pool = WorkerPool::new(options.worker_count, "pixbatch-dedup")?;
    let cancel = CancelToken::new();

    info!(root = %root.display(), files = entries.len(), "starting duplicate scan");

    let run_cancel = cancel.clone();
    RunHandle::spawn("pixbatch-dedup", cancel, move |progress| {
        let started = Instant::now();
        let mut tally = Tally::new(entries.len());
        let mut hashes: Vec<Option<FileHash>> = vec![None; entries.len()];

        let completions = pool.dispatch(Arc::clone(&entries), &run_cancel, |entry: &FileEntry| {
            hash_file(&entry.path)
        });

        for done in completions {
            let entry = &entries[done.index];
            match done.outcome {
                Ok(Ok(digest)) => {
                    debug!(path = %entry.relative.display(), digest = %digest.to_hex(), "hashed");
                    progress.emit(tally.record(&entry.path, JobState::Succeeded, 0, None));
                    hashes[done.index] = Some(FileHash {
                        entry: entry.clone(),
                        digest,
                    });
                }
                Ok(Err(err)) => {
                    let reason = format!("hashing: {err}");
                    progress.emit(tally.record(&entry.path, JobState::Failed, 0, Some(reason)));
                }
                Err(panic) => {
                    let reason = format!("worker panicked: {panic}");
                    progress.emit(tally.record(&entry.path, JobState::Failed, 0, Some(reason)));
                }
            }
        }

        let groups = group_duplicates(hashes.into_iter().flatten().collect());
        let summary = tally.finish(started.elapsed(), run_cancel.is_cancelled());
        info!(
            hashed = summary.succeeded,
            failed = summary.failed,
            groups = groups.len(),
            "duplicate scan finished"
        );
        history.record(&HistoryRecord {
            kind: OperationKind::DedupScan,
            timestamp: Utc::now(),
            root,
            summary: summary.clone(),
            detail: Some(format!("{} duplicate groups", groups.len())),
        });

        DuplicateReport { summary, groups }
    })
}
