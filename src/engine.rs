use std::path::Path;
use std::sync::Arc;

use crate::codec::{ImageCodec, RasterCodec};
use crate::convert::{self, ConversionConfig, ConversionReport};
use crate::dedup::{self, DedupOptions, DuplicateReport};
use crate::error::{EngineError, HistoryError};
use crate::history::{HistoryRecord, HistoryRecorder};
use crate::pool::RunHandle;
use crate::rename::{self, RenamePattern, RenameReport};
use crate::scanner::ScanOptions;

/// Entry point for starting batch runs. Every run executes in the
/// background and is observed through its [`RunHandle`].
#[derive(Clone)]
pub struct BatchEngine {
    codec: Arc<dyn ImageCodec>,
    history: Arc<HistoryRecorder>,
}

impl BatchEngine {
    pub fn new(history: HistoryRecorder) -> Self {
        Self::with_codec(Arc::new(RasterCodec::new()), history)
    }

    pub fn with_codec(codec: Arc<dyn ImageCodec>, history: HistoryRecorder) -> Self {
        Self {
            codec,
            history: Arc::new(history),
        }
    }

    pub fn history(&self) -> &HistoryRecorder {
        &self.history
    }

    pub fn start_conversion(
        &self,
        root: &Path,
        config: ConversionConfig,
    ) -> Result<RunHandle<ConversionReport>, EngineError> {
        convert::start(root, config, Arc::clone(&self.codec), Arc::clone(&self.history))
    }

    pub fn start_duplicate_scan(
        &self,
        root: &Path,
        options: DedupOptions,
    ) -> Result<RunHandle<DuplicateReport>, EngineError> {
        dedup::start(root, options, Arc::clone(&self.history))
    }

    /// Plans every target before returning. Planning failures leave the
    /// directory untouched.
    pub fn start_rename(
        &self,
        root: &Path,
        pattern: RenamePattern,
        scan: ScanOptions,
    ) -> Result<RunHandle<RenameReport>, EngineError> {
        rename::start(root, pattern, scan, Arc::clone(&self.history))
    }

    pub fn list_history(&self, limit: usize) -> Result<Vec<HistoryRecord>, HistoryError> {
        self.history.list(limit)
    }
}

impl std::fmt::Debug for BatchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchEngine")
            .field("history", &self.history.path())
            .finish_non_exhaustive()
    }
}
