use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDateTime, Utc};
use filetime::FileTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::codec::{EncodeSettings, ImageCodec, ResizeFilter};
use crate::error::{EngineError, JobError};
use crate::formats::ImageFormatKind;
use crate::history::{HistoryRecord, HistoryRecorder, OperationKind};
use crate::inspect::inspect;
use crate::pipeline::{OutputNaming, derive_output_path, write_atomic};
use crate::pool::{CancelToken, MAX_WORKERS, RunHandle, WorkerPool};
use crate::rename::{RenamePattern, counter_width};
use crate::report::{BatchSummary, JobState, Tally};
use crate::scanner::{FileEntry, FileScanner, ScanOptions};

/// Target box for resampling. A missing dimension keeps the source value,
/// or follows the aspect ratio when `keep_aspect` is set.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct ResizeSpec {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub keep_aspect: bool,
    #[serde(default)]
    pub filter: ResizeFilter,
}

impl ResizeSpec {
    pub fn target_dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        let scaled = |numerator: u32, denominator: u32, value: u32| -> u32 {
            if denominator == 0 {
                return value;
            }
            let result = (f64::from(value) * f64::from(numerator) / f64::from(denominator)).round();
            (result as u32).max(1)
        };

        match (self.width, self.height, self.keep_aspect) {
            (Some(w), None, true) => (w, scaled(w, width, height)),
            (None, Some(h), true) => (scaled(h, height, width), h),
            (w, h, _) => (w.unwrap_or(width), h.unwrap_or(height)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionConfig {
    pub format: ImageFormatKind,
    pub quality: u8,
    pub resize: Option<ResizeSpec>,
    pub delete_original: bool,
    pub preserve_metadata: bool,
    pub optimize: bool,
    /// `None` writes next to each source.
    pub output_dir: Option<PathBuf>,
    pub worker_count: usize,
    /// Output stem template; `{counter}` follows scan order.
    #[serde(default)]
    pub name_pattern: Option<RenamePattern>,
    pub suffix: String,
    pub scan: ScanOptions,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            format: ImageFormatKind::Webp,
            quality: 80,
            resize: None,
            delete_original: false,
            preserve_metadata: true,
            optimize: true,
            output_dir: None,
            worker_count: 4,
            name_pattern: None,
            suffix: String::new(),
            scan: ScanOptions::default(),
        }
    }
}

impl ConversionConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if !(1..=100).contains(&self.quality) {
            return Err(EngineError::Config(format!(
                "quality must be between 1 and 100, got {}",
                self.quality
            )));
        }
        if !(1..=MAX_WORKERS).contains(&self.worker_count) {
            return Err(EngineError::Config(format!(
                "worker count must be between 1 and {MAX_WORKERS}, got {}",
                self.worker_count
            )));
        }
        if let Some(resize) = &self.resize {
            match (resize.width, resize.height) {
                (None, None) => {
                    return Err(EngineError::Config(String::from(
                        "resize needs a width, a height, or both",
                    )));
                }
                (Some(0), _) | (_, Some(0)) => {
                    return Err(EngineError::Config(String::from(
                        "resize dimensions must be positive",
                    )));
                }
                (Some(_), Some(_)) if resize.keep_aspect => {
                    return Err(EngineError::Config(String::from(
                        "aspect-ratio lock needs exactly one of width or height",
                    )));
                }
                _ => {}
            }
        }
        if self
            .suffix
            .chars()
            .any(|c| c == '/' || c == '\\' || c == '\0')
        {
            return Err(EngineError::Config(format!(
                "suffix {:?} must not contain path separators",
                self.suffix
            )));
        }
        if let Some(dir) = &self.output_dir {
            if dir.is_file() {
                return Err(EngineError::Config(format!(
                    "output directory {} is a file",
                    dir.display()
                )));
            }
        }
        Ok(())
    }

    fn encode_settings(&self) -> EncodeSettings {
        EncodeSettings {
            format: self.format,
            quality: self.quality,
            keep_metadata: self.preserve_metadata,
            optimize: self.optimize,
        }
    }

    /// Short description kept in the history log.
    pub fn describe(&self) -> String {
        let mut detail = self.format.to_string();
        if self.format.supports_quality() {
            detail.push_str(&format!(" q{}", self.quality));
        }
        if let Some(resize) = &self.resize {
            let dim = |value: Option<u32>| value.map_or_else(|| String::from("auto"), |v| v.to_string());
            detail.push_str(&format!(" resize {}x{}", dim(resize.width), dim(resize.height)));
        }
        if let Some(pattern) = &self.name_pattern {
            detail.push_str(&format!(" name {pattern}"));
        }
        if self.delete_original {
            detail.push_str(" delete-original");
        }
        detail
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobPlan {
    Convert { output: PathBuf },
    /// Already in the target format with no resize, or the output would
    /// overwrite the source itself.
    Skip,
    /// An earlier job in scan order claimed the same output.
    Collides { output: PathBuf },
}

/// One scanned file bound to the run's configuration snapshot.
#[derive(Debug, Clone)]
pub struct ConversionJob {
    pub entry: FileEntry,
    pub plan: JobPlan,
    pub config: Arc<ConversionConfig>,
}

#[derive(Debug)]
pub struct ConversionResult {
    pub source: PathBuf,
    pub status: JobState,
    pub output: Option<PathBuf>,
    pub original_size: u64,
    pub output_size: Option<u64>,
    pub error: Option<JobError>,
    pub elapsed: Duration,
}

impl ConversionResult {
    fn skipped(job: &ConversionJob, started: Instant) -> Self {
        Self {
            source: job.entry.path.clone(),
            status: JobState::Skipped,
            output: None,
            original_size: job.entry.size,
            output_size: None,
            error: None,
            elapsed: started.elapsed(),
        }
    }

    fn failed(job: &ConversionJob, error: JobError, output: Option<PathBuf>, started: Instant) -> Self {
        Self {
            source: job.entry.path.clone(),
            status: JobState::Failed,
            output,
            original_size: job.entry.size,
            output_size: None,
            error: Some(error),
            elapsed: started.elapsed(),
        }
    }

    /// Original minus output size; negative when the output grew.
    pub fn bytes_saved(&self) -> i64 {
        match (self.status, self.output_size) {
            (JobState::Succeeded, Some(output)) => self.original_size as i64 - output as i64,
            _ => 0,
        }
    }

    pub fn compression_ratio(&self) -> f64 {
        if self.original_size == 0 {
            return 0.0;
        }
        self.bytes_saved().max(0) as f64 / self.original_size as f64 * 100.0
    }
}

#[derive(Debug)]
pub struct ConversionReport {
    pub summary: BatchSummary,
    /// In scan order; only jobs that were dispatched.
    pub results: Vec<ConversionResult>,
}

/// Binds each entry to a job, resolving output paths up front so no two
/// workers ever target the same file. `started` feeds `{date}` and `{time}`
/// in the name pattern.
pub fn plan_jobs(
    entries: Vec<FileEntry>,
    config: &Arc<ConversionConfig>,
    started: NaiveDateTime,
) -> Vec<ConversionJob> {
    let naming = OutputNaming {
        output_root: config.output_dir.as_deref(),
        pattern: config.name_pattern.as_ref(),
        suffix: &config.suffix,
        format: config.format,
        started,
        counter_width: counter_width(entries.len()),
    };
    let mut claimed: HashSet<PathBuf> = HashSet::new();

    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            let plan = if entry.format == config.format && config.resize.is_none() {
                JobPlan::Skip
            } else {
                let output = derive_output_path(&entry, index + 1, &naming);
                if output == entry.path {
                    JobPlan::Skip
                } else if claimed.insert(output.clone()) {
                    JobPlan::Convert { output }
                } else {
                    JobPlan::Collides { output }
                }
            };

            ConversionJob {
                entry,
                plan,
                config: Arc::clone(config),
            }
        })
        .collect()
}

pub(crate) fn start(
    root: &Path,
    config: ConversionConfig,
    codec: Arc<dyn ImageCodec>,
    history: Arc<HistoryRecorder>,
) -> Result<RunHandle<ConversionReport>, EngineError> {
    config.validate()?;
    let mut config = config;
    if let Some(dir) = &config.output_dir {
        config.output_dir = Some(absolute(dir)?);
    }

    let scanner = FileScanner::new(root, config.scan)?;
    let root = scanner.root().to_path_buf();
    let entries: Vec<FileEntry> = scanner.scan().collect();
    let config = Arc::new(config);
    let jobs = Arc::new(plan_jobs(entries, &config, Local::now().naive_local()));
    let pool = WorkerPool::new(config.worker_count, "pixbatch-convert")?;
    let cancel = CancelToken::new();

    info!(
        root = %root.display(),
        files = jobs.len(),
        format = %config.format,
        workers = config.worker_count,
        "starting conversion"
    );

    let run_cancel = cancel.clone();
    RunHandle::spawn("pixbatch-convert", cancel, move |progress| {
        let started = Instant::now();
        let mut tally = Tally::new(jobs.len());
        let mut results: Vec<Option<ConversionResult>> = (0..jobs.len()).map(|_| None).collect();

        let completions = pool.dispatch(Arc::clone(&jobs), &run_cancel, move |job| {
            execute(codec.as_ref(), job)
        });

        for done in completions {
            let job = &jobs[done.index];
            let result = done.outcome.unwrap_or_else(|panic| {
                ConversionResult::failed(job, JobError::Panicked(panic), None, started)
            });
            let failure = result.error.as_ref().map(ToString::to_string);
            progress.emit(tally.record(&result.source, result.status, result.bytes_saved(), failure));
            results[done.index] = Some(result);
        }

        let summary = tally.finish(started.elapsed(), run_cancel.is_cancelled());
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            bytes_saved = summary.bytes_saved,
            cancelled = summary.cancelled,
            "conversion finished"
        );
        history.record(&HistoryRecord {
            kind: OperationKind::Convert,
            timestamp: Utc::now(),
            root,
            summary: summary.clone(),
            detail: Some(config.describe()),
        });

        ConversionReport {
            summary,
            results: results.into_iter().flatten().collect(),
        }
    })
}

fn absolute(path: &Path) -> Result<PathBuf, EngineError> {
    if path.is_absolute() {
        return Ok(lexically_normal(path));
    }
    let cwd = std::env::current_dir()
        .map_err(|err| EngineError::Config(format!("resolving output directory: {err}")))?;
    Ok(lexically_normal(&cwd.join(path)))
}

fn lexically_normal(path: &Path) -> PathBuf {
    let mut normal = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normal.pop();
            }
            other => normal.push(other.as_os_str()),
        }
    }
    normal
}

fn execute(codec: &dyn ImageCodec, job: &ConversionJob) -> ConversionResult {
    let started = Instant::now();
    debug!(path = %job.entry.relative.display(), "job running");

    let output = match &job.plan {
        JobPlan::Skip => return ConversionResult::skipped(job, started),
        JobPlan::Collides { output } => {
            let error = JobError::OutputCollision {
                path: output.clone(),
            };
            return ConversionResult::failed(job, error, None, started);
        }
        JobPlan::Convert { output } => output,
    };

    match convert_file(codec, job, output) {
        Ok(Converted::Written { output_size }) => ConversionResult {
            source: job.entry.path.clone(),
            status: JobState::Succeeded,
            output: Some(output.clone()),
            original_size: job.entry.size,
            output_size: Some(output_size),
            error: None,
            elapsed: started.elapsed(),
        },
        Ok(Converted::AlreadyTarget) => ConversionResult::skipped(job, started),
        Err(Failure { error, wrote_output }) => {
            warn!(path = %job.entry.path.display(), error = %error, "job failed");
            let output = wrote_output.then(|| output.clone());
            ConversionResult::failed(job, error, output, started)
        }
    }
}

enum Converted {
    Written { output_size: u64 },
    AlreadyTarget,
}

struct Failure {
    error: JobError,
    wrote_output: bool,
}

impl From<JobError> for Failure {
    fn from(error: JobError) -> Self {
        Self {
            error,
            wrote_output: false,
        }
    }
}

fn convert_file(codec: &dyn ImageCodec, job: &ConversionJob, output: &Path) -> Result<Converted, Failure> {
    let config = &job.config;
    let source = &job.entry.path;

    if output.exists() {
        if is_previous_output(job, output) {
            debug!(path = %output.display(), "output from an earlier run already in place");
            return Ok(Converted::AlreadyTarget);
        }
        return Err(JobError::OutputCollision {
            path: output.to_path_buf(),
        }
        .into());
    }

    let bytes = fs::read(source).map_err(|err| JobError::io("reading", source, err))?;
    let mut raster = codec.decode(&bytes).map_err(JobError::from)?;

    if let Some(resize) = &config.resize {
        let current = raster.dimensions();
        let (width, height) = resize.target_dimensions(current.0, current.1);
        if (width, height) == current {
            if job.entry.format == config.format {
                return Ok(Converted::AlreadyTarget);
            }
        } else {
            raster = codec.resize(raster, width, height, resize.filter);
        }
    }

    let encoded = codec
        .encode(&raster, &config.encode_settings())
        .map_err(JobError::from)?;
    write_atomic(output, &encoded)?;

    if config.preserve_metadata {
        carry_modified_time(source, output);
    }

    if config.delete_original && source.as_path() != output {
        fs::remove_file(source).map_err(|err| Failure {
            error: JobError::io("removing original", source, err),
            wrote_output: true,
        })?;
        debug!(path = %source.display(), "original removed");
    }

    Ok(Converted::Written {
        output_size: encoded.len() as u64,
    })
}

/// An existing output counts as this job's own result from an earlier run
/// when its header shows the target format at the dimensions this config
/// would produce. Anything unreadable stays a collision.
fn is_previous_output(job: &ConversionJob, output: &Path) -> bool {
    let (Ok(existing), Ok(source)) = (inspect(output), inspect(&job.entry.path)) else {
        return false;
    };
    let expected = match &job.config.resize {
        Some(resize) => resize.target_dimensions(source.width, source.height),
        None => (source.width, source.height),
    };
    existing.format == Some(job.config.format) && (existing.width, existing.height) == expected
}

fn carry_modified_time(source: &Path, output: &Path) {
    let carried = fs::metadata(source)
        .map(|meta| FileTime::from_last_modification_time(&meta))
        .and_then(|mtime| filetime::set_file_mtime(output, mtime));
    if let Err(err) = carried {
        warn!(path = %output.display(), error = %err, "could not carry modification time");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::InputFilter;

    fn noon() -> NaiveDateTime {
        chrono::NaiveDate::from_ymd_opt(2024, 6, 1)
            .and_then(|day| day.and_hms_opt(12, 0, 0))
            .unwrap()
    }

    fn entry(relative: &str, format: ImageFormatKind) -> FileEntry {
        FileEntry {
            path: Path::new("/src").join(relative),
            relative: PathBuf::from(relative),
            format,
            size: 10,
        }
    }

    #[test]
    fn aspect_lock_scales_missing_dimension() {
        let by_width = ResizeSpec {
            width: Some(100),
            height: None,
            keep_aspect: true,
            filter: ResizeFilter::default(),
        };
        assert_eq!(by_width.target_dimensions(400, 300), (100, 75));

        let by_height = ResizeSpec {
            width: None,
            height: Some(50),
            keep_aspect: true,
            filter: ResizeFilter::default(),
        };
        assert_eq!(by_height.target_dimensions(400, 300), (67, 50));

        let unlocked = ResizeSpec {
            width: Some(10),
            height: None,
            keep_aspect: false,
            filter: ResizeFilter::default(),
        };
        assert_eq!(unlocked.target_dimensions(400, 300), (10, 300));
    }

    #[test]
    fn contradictory_resize_is_rejected() {
        let config = ConversionConfig {
            resize: Some(ResizeSpec {
                width: Some(10),
                height: Some(10),
                keep_aspect: true,
                filter: ResizeFilter::default(),
            }),
            ..ConversionConfig::default()
        };
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        for config in [
            ConversionConfig {
                quality: 0,
                ..ConversionConfig::default()
            },
            ConversionConfig {
                worker_count: 17,
                ..ConversionConfig::default()
            },
            ConversionConfig {
                suffix: String::from("../escape"),
                ..ConversionConfig::default()
            },
        ] {
            assert!(config.validate().is_err(), "{config:?}");
        }
        assert!(ConversionConfig::default().validate().is_ok());
    }

    #[test]
    fn planning_skips_target_format_and_flags_shared_outputs() {
        let config = Arc::new(ConversionConfig {
            scan: ScanOptions {
                recursive: true,
                filter: InputFilter::All,
            },
            ..ConversionConfig::default()
        });
        let jobs = plan_jobs(
            vec![
                entry("a.jpg", ImageFormatKind::Jpeg),
                entry("a.png", ImageFormatKind::Png),
                entry("b.webp", ImageFormatKind::Webp),
            ],
            &config,
            noon(),
        );

        assert_eq!(
            jobs[0].plan,
            JobPlan::Convert {
                output: PathBuf::from("/src/a.webp")
            }
        );
        assert_eq!(
            jobs[1].plan,
            JobPlan::Collides {
                output: PathBuf::from("/src/a.webp")
            }
        );
        assert_eq!(jobs[2].plan, JobPlan::Skip);
    }

    #[test]
    fn name_pattern_shapes_outputs_and_shared_names_collide() {
        let config = Arc::new(ConversionConfig {
            name_pattern: Some("{date}_{counter}".parse().unwrap()),
            suffix: String::from("_web"),
            ..ConversionConfig::default()
        });
        let jobs = plan_jobs(
            vec![
                entry("x.png", ImageFormatKind::Png),
                entry("y.jpg", ImageFormatKind::Jpeg),
            ],
            &config,
            noon(),
        );
        assert_eq!(
            jobs[1].plan,
            JobPlan::Convert {
                output: PathBuf::from("/src/20240601_0002_web.webp")
            }
        );

        let fixed = Arc::new(ConversionConfig {
            name_pattern: Some("cover".parse().unwrap()),
            ..ConversionConfig::default()
        });
        let jobs = plan_jobs(
            vec![
                entry("x.png", ImageFormatKind::Png),
                entry("y.jpg", ImageFormatKind::Jpeg),
            ],
            &fixed,
            noon(),
        );
        assert_eq!(
            jobs[1].plan,
            JobPlan::Collides {
                output: PathBuf::from("/src/cover.webp")
            }
        );
        assert_eq!(fixed.describe(), "WebP q80 name cover");
    }

    #[test]
    fn normalizes_relative_output_dirs() {
        assert_eq!(
            lexically_normal(Path::new("/a/./b/../c")),
            PathBuf::from("/a/c")
        );
    }
}
