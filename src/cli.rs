use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Args, Parser, Subcommand};

use pixbatch::{
    ConversionConfig, DedupOptions, HistoryRecorder, ImageFormatKind, InputFilter, MAX_WORKERS,
    RenamePattern, ResizeFilter, ResizeSpec, ScanOptions,
};

/// Command-line interface definition.
#[derive(Debug, Parser)]
#[command(author, version, about = "Batch image converter, deduplicator and renamer", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// History log location.
    #[arg(long, global = true, value_name = "FILE", env = "PIXBATCH_HISTORY")]
    pub history: Option<PathBuf>,

    /// Disable the progress bar.
    #[arg(long, global = true, default_value_t = false, action = ArgAction::SetTrue)]
    pub no_progress: bool,

    /// Raise log verbosity (-v info, -vv debug). RUST_LOG overrides.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Convert every image under a directory to one format.
    Convert(ConvertArgs),
    /// Rename images from a pattern such as "{date}_{counter}".
    Rename(RenameArgs),
    /// Report files with identical content.
    Dupes(DupesArgs),
    /// Show recent runs, newest first.
    History(HistoryArgs),
    /// Print format, dimensions and metadata presence for images.
    Info(InfoArgs),
}

#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Only process files of this format.
    #[arg(long, value_enum, value_name = "FORMAT")]
    pub only: Option<ImageFormatKind>,
}

impl ScanArgs {
    fn options(&self, recursive: bool) -> ScanOptions {
        ScanOptions {
            recursive,
            filter: self.only.map_or(InputFilter::All, InputFilter::Only),
        }
    }
}

#[derive(Debug, Args)]
pub struct ConvertArgs {
    /// Directory to convert.
    #[arg(value_name = "DIR")]
    pub root: PathBuf,

    #[arg(long, short, value_enum, default_value_t = ImageFormatKind::Webp)]
    pub format: ImageFormatKind,

    /// Encoder quality, used by lossy formats.
    #[arg(
        long,
        short,
        default_value_t = 80u8,
        value_name = "LEVEL",
        value_parser = clap::value_parser!(u8).range(1..=100)
    )]
    pub quality: u8,

    #[arg(long, value_name = "PX")]
    pub width: Option<u32>,

    #[arg(long, value_name = "PX")]
    pub height: Option<u32>,

    /// Derive the missing dimension from the source aspect ratio.
    #[arg(long, default_value_t = false, action = ArgAction::SetTrue)]
    pub keep_aspect: bool,

    #[arg(long, value_enum, default_value_t = ResizeFilter::Lanczos3)]
    pub filter: ResizeFilter,

    /// Remove each source after its output is written.
    #[arg(long, default_value_t = false, action = ArgAction::SetTrue)]
    pub delete_original: bool,

    /// Drop ICC profiles, text chunks and timestamps from outputs.
    #[arg(long, default_value_t = false, action = ArgAction::SetTrue)]
    pub strip_metadata: bool,

    /// Skip the extra lossless pass on PNG outputs.
    #[arg(long, default_value_t = false, action = ArgAction::SetTrue)]
    pub no_optimize: bool,

    /// Write outputs here, mirroring the input tree.
    #[arg(long, short, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Output name template: {name} {date} {time} {counter}.
    #[arg(long, value_name = "PATTERN")]
    pub name_pattern: Option<String>,

    /// Appended to each output's file stem.
    #[arg(long, default_value = "")]
    pub suffix: String,

    #[arg(long, short = 'j', default_value_t = 4)]
    pub workers: usize,

    /// Stay in the top-level directory.
    #[arg(long, default_value_t = false, action = ArgAction::SetTrue)]
    pub no_recursive: bool,

    #[command(flatten)]
    pub scan: ScanArgs,
}

#[derive(Debug, Args)]
pub struct RenameArgs {
    #[arg(value_name = "DIR")]
    pub root: PathBuf,

    /// Placeholders: {name} {date} {time} {counter}.
    #[arg(long, short)]
    pub pattern: String,

    /// Print the planned renames without touching any file.
    #[arg(long, default_value_t = false, action = ArgAction::SetTrue)]
    pub dry_run: bool,

    /// Descend into subdirectories. Each file keeps its own directory.
    #[arg(long, short, default_value_t = false, action = ArgAction::SetTrue)]
    pub recursive: bool,

    #[command(flatten)]
    pub scan: ScanArgs,
}

#[derive(Debug, Args)]
pub struct DupesArgs {
    #[arg(value_name = "DIR")]
    pub root: PathBuf,

    #[arg(long, short = 'j', default_value_t = 4)]
    pub workers: usize,

    #[arg(long, default_value_t = false, action = ArgAction::SetTrue)]
    pub no_recursive: bool,

    #[command(flatten)]
    pub scan: ScanArgs,
}

#[derive(Debug, Args)]
pub struct HistoryArgs {
    #[arg(long, short = 'n', default_value_t = 20)]
    pub limit: usize,
}

#[derive(Debug, Args)]
pub struct InfoArgs {
    #[arg(required = true, value_name = "FILE", num_args = 1..)]
    pub paths: Vec<PathBuf>,
}

/// Derived configuration passed to the driver.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub action: Action,
    pub history: PathBuf,
    pub progress: ProgressKind,
    pub verbosity: u8,
}

#[derive(Debug, Clone)]
pub enum Action {
    Convert {
        root: PathBuf,
        config: ConversionConfig,
    },
    Rename {
        root: PathBuf,
        pattern: RenamePattern,
        scan: ScanOptions,
        dry_run: bool,
    },
    Dupes {
        root: PathBuf,
        options: DedupOptions,
    },
    History {
        limit: usize,
    },
    Info {
        paths: Vec<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ProgressKind {
    Fancy,
    Quiet,
}

impl Cli {
    pub fn build(self) -> Result<AppConfig> {
        let action = match self.command {
            Command::Convert(args) => Action::Convert {
                config: args.config()?,
                root: args.root,
            },
            Command::Rename(args) => Action::Rename {
                pattern: args
                    .pattern
                    .parse()
                    .with_context(|| format!("parsing rename pattern {:?}", args.pattern))?,
                scan: args.scan.options(args.recursive),
                dry_run: args.dry_run,
                root: args.root,
            },
            Command::Dupes(args) => {
                check_workers(args.workers)?;
                Action::Dupes {
                    options: DedupOptions {
                        scan: args.scan.options(!args.no_recursive),
                        worker_count: args.workers,
                    },
                    root: args.root,
                }
            }
            Command::History(args) => Action::History { limit: args.limit },
            Command::Info(args) => Action::Info { paths: args.paths },
        };

        Ok(AppConfig {
            action,
            history: self.history.unwrap_or_else(HistoryRecorder::default_path),
            progress: if self.no_progress {
                ProgressKind::Quiet
            } else {
                ProgressKind::Fancy
            },
            verbosity: self.verbose,
        })
    }
}

impl ConvertArgs {
    fn config(&self) -> Result<ConversionConfig> {
        check_workers(self.workers)?;

        let resize = match (self.width, self.height) {
            (None, None) if self.keep_aspect => bail!("--keep-aspect needs --width or --height"),
            (None, None) => None,
            (width, height) => Some(ResizeSpec {
                width,
                height,
                keep_aspect: self.keep_aspect,
                filter: self.filter,
            }),
        };

        let name_pattern = self
            .name_pattern
            .as_deref()
            .map(|pattern| {
                pattern
                    .parse::<RenamePattern>()
                    .with_context(|| format!("parsing name pattern {pattern:?}"))
            })
            .transpose()?;

        let config = ConversionConfig {
            format: self.format,
            quality: self.quality,
            resize,
            delete_original: self.delete_original,
            preserve_metadata: !self.strip_metadata,
            optimize: !self.no_optimize,
            output_dir: self.output_dir.clone(),
            worker_count: self.workers,
            name_pattern,
            suffix: self.suffix.clone(),
            scan: self.scan.options(!self.no_recursive),
        };
        config.validate().context("validating conversion options")?;
        Ok(config)
    }
}

fn check_workers(workers: usize) -> Result<()> {
    if !(1..=MAX_WORKERS).contains(&workers) {
        bail!("--workers must be between 1 and {MAX_WORKERS}, got {workers}");
    }
    Ok(())
}
