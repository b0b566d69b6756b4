use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::EngineError;
use crate::formats::{ImageFormatKind, InputFilter};

/// One candidate file produced by a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: PathBuf,
    pub relative: PathBuf,
    pub format: ImageFormatKind,
    pub size: u64,
}

impl FileEntry {
    pub fn stem(&self) -> &std::ffi::OsStr {
        self.path.file_stem().unwrap_or_default()
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct ScanOptions {
    pub recursive: bool,
    pub filter: InputFilter,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            filter: InputFilter::All,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileScanner {
    root: PathBuf,
    options: ScanOptions,
}

impl FileScanner {
    /// Resolves and checks the root. Nothing is yielded from a root that
    /// is missing, not a directory, or not listable.
    pub fn new(root: &Path, options: ScanOptions) -> Result<Self, EngineError> {
        let root = root
            .canonicalize()
            .map_err(|err| EngineError::path(root, err.to_string()))?;
        if !root.is_dir() {
            return Err(EngineError::path(&root, "not a directory"));
        }
        fs::read_dir(&root).map_err(|err| EngineError::path(&root, err.to_string()))?;

        Ok(Self { root, options })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lexicographic by relative path, since walkdir visits siblings sorted by
    /// name and descends depth-first.
    pub fn scan(self) -> ScanIter {
        let max_depth = if self.options.recursive { usize::MAX } else { 1 };
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .min_depth(1)
            .max_depth(max_depth)
            .sort_by_file_name()
            .into_iter();

        ScanIter {
            root: self.root,
            filter: self.options.filter,
            walker,
        }
    }
}

pub struct ScanIter {
    root: PathBuf,
    filter: InputFilter,
    walker: walkdir::IntoIter,
}

impl Iterator for ScanIter {
    type Item = FileEntry;

    fn next(&mut self) -> Option<FileEntry> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(error = %err, "skipping unreadable directory entry");
                    continue;
                }
            };

            // Symlinks report their own type since links are not followed.
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let Some(format) = ImageFormatKind::from_path(path) else {
                continue;
            };
            if !self.filter.matches(format) {
                continue;
            }

            let size = match entry.metadata() {
                Ok(meta) => meta.len(),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping file without metadata");
                    continue;
                }
            };
            let relative = path.strip_prefix(&self.root).unwrap_or(path).to_path_buf();
            debug!(path = %relative.display(), %format, size, "scanned");

            return Some(FileEntry {
                path: path.to_path_buf(),
                relative,
                format,
                size,
            });
        }
    }
}
