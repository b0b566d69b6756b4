use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Whole-run failures. Every variant is raised before any file is touched,
/// except `CoordinatorPanicked` which surfaces from `RunHandle::summary`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("cannot scan {}: {reason}", path.display())]
    Path { path: PathBuf, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(
        "rename pattern maps both {} and {} to {}",
        first.display(),
        second.display(),
        target.display()
    )]
    AmbiguousRenamePattern {
        target: PathBuf,
        first: PathBuf,
        second: PathBuf,
    },

    #[error(
        "rename target {} for {} already exists",
        target.display(),
        source_path.display()
    )]
    RenameTargetExists {
        target: PathBuf,
        source_path: PathBuf,
    },

    #[error(
        "rename cycle through {} cannot be staged: intermediate {} already exists",
        path.display(),
        intermediate.display()
    )]
    RenameCycle {
        path: PathBuf,
        intermediate: PathBuf,
    },

    #[error("reading {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{}: {source}", path.display())]
    Codec {
        path: PathBuf,
        #[source]
        source: CodecError,
    },

    #[error("spawning {what}: {source}")]
    Spawn {
        what: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("batch coordinator panicked")]
    CoordinatorPanicked,
}

impl EngineError {
    pub(crate) fn path(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        EngineError::Path {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum CodecError {
    #[error("decode failed: {0}")]
    Decode(String),

    #[error("encode failed: {0}")]
    Encode(String),
}

/// Failure of a single job. Recorded in that job's result, never propagated.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("output {} already exists", path.display())]
    OutputCollision { path: PathBuf },

    #[error("{action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("worker panicked: {0}")]
    Panicked(String),
}

impl JobError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        JobError::Io {
            action,
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history log {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("encoding history record: {0}")]
    Serialize(#[from] serde_json::Error),
}
