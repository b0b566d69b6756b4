use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Skipped
        )
    }
}

/// Emitted once per job as it reaches a terminal state.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub completed: usize,
    pub total: usize,
    pub bytes_saved: i64,
    pub path: PathBuf,
    pub status: JobState,
}

impl ProgressUpdate {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.completed as f64 / self.total as f64 * 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub path: PathBuf,
    pub reason: String,
}

/// Aggregate outcome of one batch run.
///
/// `succeeded + failed + skipped == submitted`. `submitted` falls short of
/// `discovered` only when the run was cancelled before every job dispatched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub discovered: usize,
    pub submitted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub bytes_saved: i64,
    pub elapsed: Duration,
    pub cancelled: bool,
    pub failures: Vec<FailureRecord>,
}

impl BatchSummary {
    pub fn not_dispatched(&self) -> usize {
        self.discovered.saturating_sub(self.submitted)
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0 && !self.cancelled
    }
}

/// Running counts kept by the coordinating thread of a run.
#[derive(Debug)]
pub(crate) struct Tally {
    summary: BatchSummary,
}

impl Tally {
    pub(crate) fn new(discovered: usize) -> Self {
        Self {
            summary: BatchSummary {
                discovered,
                ..BatchSummary::default()
            },
        }
    }

    pub(crate) fn record(
        &mut self,
        path: &Path,
        status: JobState,
        bytes_saved: i64,
        failure: Option<String>,
    ) -> ProgressUpdate {
        let summary = &mut self.summary;
        summary.submitted += 1;
        match status {
            JobState::Succeeded => {
                summary.succeeded += 1;
                summary.bytes_saved += bytes_saved;
            }
            JobState::Skipped => summary.skipped += 1,
            JobState::Failed | JobState::Pending | JobState::Running => {
                summary.failed += 1;
                summary.failures.push(FailureRecord {
                    path: path.to_path_buf(),
                    reason: failure.unwrap_or_else(|| String::from("unknown failure")),
                });
            }
        }

        ProgressUpdate {
            completed: summary.submitted,
            total: summary.discovered,
            bytes_saved: summary.bytes_saved,
            path: path.to_path_buf(),
            status,
        }
    }

    pub(crate) fn finish(mut self, elapsed: Duration, cancelled: bool) -> BatchSummary {
        self.summary.elapsed = elapsed;
        self.summary.cancelled = cancelled && self.summary.submitted < self.summary.discovered;
        self.summary
    }
}
