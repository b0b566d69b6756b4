//! Batch image conversion, duplicate detection and renaming over a
//! directory tree, with bounded parallelism and a persistent run history.

pub mod codec;
pub mod convert;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod formats;
pub mod history;
pub mod inspect;
pub mod logging;
pub mod pipeline;
pub mod pool;
pub mod rename;
pub mod report;
pub mod scanner;

pub use codec::{EncodeSettings, ImageCodec, Raster, RasterCodec, ResizeFilter};
pub use convert::{ConversionConfig, ConversionReport, ConversionResult, ResizeSpec};
pub use dedup::{DedupOptions, DuplicateGroup, DuplicateReport};
pub use engine::BatchEngine;
pub use error::{CodecError, EngineError, HistoryError, JobError};
pub use formats::{ImageFormatKind, InputFilter};
pub use history::{HistoryRecord, HistoryRecorder, OperationKind};
pub use inspect::{ImageInfo, inspect};
pub use pool::{CancelToken, MAX_WORKERS, RunHandle};
pub use rename::{RenameOp, RenamePattern, RenamePlan, RenameReport, plan_rename};
pub use report::{BatchSummary, FailureRecord, JobState, ProgressUpdate};
pub use scanner::{FileEntry, FileScanner, ScanOptions};
