use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use chrono::{Local, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::EngineError;
use crate::history::{HistoryRecord, HistoryRecorder, OperationKind};
use crate::pool::{CancelToken, ProgressSink, RunHandle};
use crate::report::{BatchSummary, JobState, Tally};
use crate::scanner::{FileEntry, FileScanner, ScanOptions};

const COUNTER_WIDTH: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    Name,
    Date,
    Time,
    Counter,
}

/// Filename template over `{name}`, `{date}`, `{time}` and `{counter}`.
/// The original extension is always kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RenamePattern {
    source: String,
    tokens: Vec<Token>,
}

impl RenamePattern {
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn has_counter(&self) -> bool {
        self.tokens.contains(&Token::Counter)
    }

    /// Stem for one file. `counter` is 1-based; `width` is the zero-padding.
    pub fn render(&self, stem: &str, counter: usize, width: usize, at: NaiveDateTime) -> String {
        let mut rendered = String::new();
        for token in &self.tokens {
            match token {
                Token::Literal(text) => rendered.push_str(text),
                Token::Name => rendered.push_str(stem),
                Token::Date => rendered.push_str(&at.format("%Y%m%d").to_string()),
                Token::Time => rendered.push_str(&at.format("%H%M%S").to_string()),
                Token::Counter => rendered.push_str(&format!("{counter:0width$}")),
            }
        }
        rendered
    }
}

impl FromStr for RenamePattern {
    type Err = EngineError;

    fn from_str(pattern: &str) -> Result<Self, Self::Err> {
        if pattern.is_empty() {
            return Err(EngineError::Config(String::from("rename pattern is empty")));
        }
        if pattern.contains(['/', '\\', '\0']) {
            return Err(EngineError::Config(format!(
                "rename pattern {pattern:?} must not contain path separators"
            )));
        }

        let mut tokens = Vec::new();
        let mut literal = String::new();
        let mut rest = pattern;
        while let Some(open) = rest.find('{') {
            literal.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let close = after.find('}').ok_or_else(|| {
                EngineError::Config(format!("unclosed placeholder in rename pattern {pattern:?}"))
            })?;
            let token = match &after[..close] {
                "name" => Token::Name,
                "date" => Token::Date,
                "time" => Token::Time,
                "counter" => Token::Counter,
                other => {
                    return Err(EngineError::Config(format!(
                        "unknown placeholder {{{other}}} in rename pattern; expected name, date, time or counter"
                    )));
                }
            };
            if !literal.is_empty() {
                tokens.push(Token::Literal(std::mem::take(&mut literal)));
            }
            tokens.push(token);
            rest = &after[close + 1..];
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            tokens.push(Token::Literal(literal));
        }

        Ok(Self {
            source: pattern.to_string(),
            tokens,
        })
    }
}

impl TryFrom<String> for RenamePattern {
    type Error = EngineError;

    fn try_from(pattern: String) -> Result<Self, Self::Error> {
        pattern.parse()
    }
}

impl From<RenamePattern> for String {
    fn from(pattern: RenamePattern) -> Self {
        pattern.source
    }
}

impl fmt::Display for RenamePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Zero-padding for `{counter}` over `count` files: four digits, or more
/// when the count needs them.
pub fn counter_width(count: usize) -> usize {
    COUNTER_WIDTH.max(count.to_string().len())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenameOp {
    pub from: PathBuf,
    pub to: PathBuf,
}

impl RenameOp {
    pub fn is_identity(&self) -> bool {
        self.from == self.to
    }
}

/// Fully validated target set for one rename run.
#[derive(Debug, Clone)]
pub struct RenamePlan {
    pub ops: Vec<RenameOp>,
    /// Intermediate name for ops whose target is another op's source.
    staging: Vec<Option<PathBuf>>,
}

impl RenamePlan {
    pub fn staged_count(&self) -> usize {
        self.staging.iter().flatten().count()
    }
}

/// Resolves every target before anything moves. Fails if two entries land
/// on one path, if a target is an unrelated existing file, or if a chained
/// or cyclic rename has no free intermediate name.
pub fn plan_rename(
    entries: &[FileEntry],
    pattern: &RenamePattern,
    at: NaiveDateTime,
) -> Result<RenamePlan, EngineError> {
    let width = counter_width(entries.len());
    let mut ops = Vec::with_capacity(entries.len());
    let mut claimed: HashMap<PathBuf, PathBuf> = HashMap::new();

    for (index, entry) in entries.iter().enumerate() {
        let stem = entry.stem().to_string_lossy();
        let mut name = OsString::from(pattern.render(&stem, index + 1, width, at));
        if let Some(ext) = entry.path.extension() {
            name.push(".");
            name.push(ext);
        }
        let parent = entry.path.parent().unwrap_or_else(|| Path::new("."));
        let target = parent.join(name);

        if let Some(first) = claimed.insert(target.clone(), entry.path.clone()) {
            return Err(EngineError::AmbiguousRenamePattern {
                target,
                first,
                second: entry.path.clone(),
            });
        }
        ops.push(RenameOp {
            from: entry.path.clone(),
            to: target,
        });
    }

    let sources: HashSet<&Path> = ops.iter().map(|op| op.from.as_path()).collect();
    let mut staging = Vec::with_capacity(ops.len());
    for (index, op) in ops.iter().enumerate() {
        if op.is_identity() {
            staging.push(None);
            continue;
        }
        if !sources.contains(op.to.as_path()) {
            if op.to.symlink_metadata().is_ok() {
                return Err(EngineError::RenameTargetExists {
                    target: op.to.clone(),
                    source_path: op.from.clone(),
                });
            }
            staging.push(None);
            continue;
        }

        let mut intermediate_name = OsString::from(".");
        intermediate_name.push(op.from.file_name().unwrap_or_default());
        intermediate_name.push(format!(".pixbatch-rename-{index}.tmp"));
        let intermediate = op.from.with_file_name(intermediate_name);
        if intermediate.symlink_metadata().is_ok() {
            return Err(EngineError::RenameCycle {
                path: op.from.clone(),
                intermediate,
            });
        }
        staging.push(Some(intermediate));
    }

    Ok(RenamePlan { ops, staging })
}

#[derive(Debug, Clone)]
pub struct RenameReport {
    pub summary: BatchSummary,
    /// Moves that took effect, excluding no-op renames.
    pub renamed: Vec<RenameOp>,
    pub rolled_back: bool,
}

pub(crate) fn start(
    root: &Path,
    pattern: RenamePattern,
    scan: ScanOptions,
    history: Arc<HistoryRecorder>,
) -> Result<RunHandle<RenameReport>, EngineError> {
    let scanner = FileScanner::new(root, scan)?;
    let root = scanner.root().to_path_buf();
    let entries: Vec<FileEntry> = scanner.scan().collect();
    let plan = plan_rename(&entries, &pattern, Local::now().naive_local())?;
    let cancel = CancelToken::new();

    info!(
        root = %root.display(),
        files = plan.ops.len(),
        staged = plan.staged_count(),
        pattern = %pattern,
        "starting rename"
    );

    let run_cancel = cancel.clone();
    RunHandle::spawn("pixbatch-rename", cancel, move |progress| {
        let started = Instant::now();
        let report = if run_cancel.is_cancelled() {
            let summary = Tally::new(plan.ops.len()).finish(started.elapsed(), true);
            RenameReport {
                summary,
                renamed: Vec::new(),
                rolled_back: false,
            }
        } else {
            execute(&plan, &progress, started)
        };

        info!(
            renamed = report.summary.succeeded,
            unchanged = report.summary.skipped,
            failed = report.summary.failed,
            rolled_back = report.rolled_back,
            "rename finished"
        );
        history.record(&HistoryRecord {
            kind: OperationKind::Rename,
            timestamp: Utc::now(),
            root,
            summary: report.summary.clone(),
            detail: Some(pattern.to_string()),
        });
        report
    })
}

struct Move<'a> {
    op: usize,
    from: &'a Path,
    to: &'a Path,
    completes_op: bool,
}

fn schedule(plan: &RenamePlan) -> Vec<Move<'_>> {
    let mut direct = Vec::new();
    let mut stage = Vec::new();
    let mut unstage = Vec::new();

    for (index, (op, staging)) in plan.ops.iter().zip(&plan.staging).enumerate() {
        if op.is_identity() {
            continue;
        }
        match staging {
            None => direct.push(Move {
                op: index,
                from: &op.from,
                to: &op.to,
                completes_op: true,
            }),
            Some(intermediate) => {
                stage.push(Move {
                    op: index,
                    from: &op.from,
                    to: intermediate,
                    completes_op: false,
                });
                unstage.push(Move {
                    op: index,
                    from: intermediate,
                    to: &op.to,
                    completes_op: true,
                });
            }
        }
    }

    // Direct moves vacate sources that staged targets point at.
    direct.into_iter().chain(stage).chain(unstage).collect()
}

fn execute(plan: &RenamePlan, progress: &ProgressSink, started: Instant) -> RenameReport {
    let mut tally = Tally::new(plan.ops.len());
    for op in plan.ops.iter().filter(|op| op.is_identity()) {
        progress.emit(tally.record(&op.from, JobState::Skipped, 0, None));
    }

    let moves = schedule(plan);
    let mut applied: Vec<&Move<'_>> = Vec::with_capacity(moves.len());

    for step in &moves {
        if let Err(err) = fs::rename(step.from, step.to) {
            error!(
                from = %step.from.display(),
                to = %step.to.display(),
                error = %err,
                "rename failed, rolling back"
            );
            roll_back(&applied);
            let reason = format!("renaming to {}: {err}", step.to.display());
            return failed_report(plan, step.op, reason, started);
        }
        debug!(from = %step.from.display(), to = %step.to.display(), "renamed");
        applied.push(step);

        if step.completes_op {
            let op = &plan.ops[step.op];
            progress.emit(tally.record(&op.from, JobState::Succeeded, 0, None));
        }
    }

    RenameReport {
        summary: tally.finish(started.elapsed(), false),
        renamed: plan.ops.iter().filter(|op| !op.is_identity()).cloned().collect(),
        rolled_back: false,
    }
}

fn roll_back(applied: &[&Move<'_>]) {
    for step in applied.iter().rev() {
        if let Err(err) = fs::rename(step.to, step.from) {
            warn!(
                from = %step.to.display(),
                to = %step.from.display(),
                error = %err,
                "could not undo rename"
            );
        }
    }
}

/// After a rollback no op stands, so every real move is reported failed.
fn failed_report(plan: &RenamePlan, failing: usize, reason: String, started: Instant) -> RenameReport {
    let mut tally = Tally::new(plan.ops.len());
    for (index, op) in plan.ops.iter().enumerate() {
        if op.is_identity() {
            tally.record(&op.from, JobState::Skipped, 0, None);
        } else if index == failing {
            tally.record(&op.from, JobState::Failed, 0, Some(reason.clone()));
        } else {
            tally.record(&op.from, JobState::Failed, 0, Some(String::from("rolled back")));
        }
    }

    RenameReport {
        summary: tally.finish(started.elapsed(), false),
        renamed: Vec::new(),
        rolled_back: true,
    }
}
