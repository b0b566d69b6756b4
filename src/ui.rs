use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tracing::{info, warn};

use pixbatch::{
    BatchSummary, ConversionReport, DuplicateReport, HistoryRecord, ImageInfo, JobState,
    ProgressUpdate, RenameOp, RenameReport,
};

use crate::cli::ProgressKind;

/// Renders a run's progress channel as a single overall bar, or as log
/// lines when the bar is disabled.
pub struct ProgressDispatcher {
    bar: Option<ProgressBar>,
}

impl ProgressDispatcher {
    pub fn new(kind: ProgressKind, label: &str) -> Self {
        match kind {
            ProgressKind::Quiet => Self { bar: None },
            ProgressKind::Fancy => {
                let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr_with_hz(20));
                bar.set_style(overall_style());
                bar.set_prefix(label.to_string());
                Self { bar: Some(bar) }
            }
        }
    }

    pub fn update(&self, update: &ProgressUpdate) {
        let Some(bar) = &self.bar else {
            if update.status == JobState::Failed {
                warn!(path = %update.path.display(), "failed");
            } else {
                info!(
                    path = %update.path.display(),
                    status = ?update.status,
                    done = update.completed,
                    total = update.total,
                    "processed"
                );
            }
            return;
        };
        bar.set_length(update.total as u64);
        bar.set_position(update.completed as u64);
        bar.set_message(format_signed_bytes(update.bytes_saved));
        if update.status == JobState::Failed {
            bar.println(format!("✗ {}", update.path.display()));
        }
    }

    pub fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }
}

pub fn print_conversion(report: &ConversionReport) {
    for result in &report.results {
        match (result.status, &result.output, result.output_size) {
            (JobState::Succeeded, Some(output), Some(size)) => println!(
                "✓ {} → {} ({} → {}, {}, {})",
                result.source.display(),
                output.display(),
                format_bytes(result.original_size),
                format_bytes(size),
                format_savings(result.bytes_saved(), result.compression_ratio()),
                format_duration(result.elapsed)
            ),
            (JobState::Skipped, _, _) => println!("- {} (skipped)", result.source.display()),
            _ => {
                let reason = result
                    .error
                    .as_ref()
                    .map_or_else(|| String::from("failed"), ToString::to_string);
                println!("✗ {} ({reason})", result.source.display());
            }
        }
    }
    print_summary("converted", &report.summary);
}

pub fn print_duplicates(report: &DuplicateReport) {
    if report.groups.is_empty() {
        println!("No duplicates found.");
    }
    for (index, group) in report.groups.iter().enumerate() {
        println!(
            "Group {} ({} files, {} reclaimable, blake3 {})",
            index + 1,
            group.len(),
            format_bytes(group.redundant_bytes()),
            &group.digest[..group.digest.len().min(16)]
        );
        for entry in &group.entries {
            println!("  {} ({})", entry.path.display(), format_bytes(entry.size));
        }
    }
    for failure in &report.summary.failures {
        println!("✗ {} ({})", failure.path.display(), failure.reason);
    }
    print_summary("hashed", &report.summary);
}

pub fn print_rename_plan(ops: &[RenameOp]) {
    let mut changes = 0;
    for op in ops.iter().filter(|op| !op.is_identity()) {
        changes += 1;
        println!("{} → {}", op.from.display(), op.to.display());
    }
    println!("{changes} of {} files would be renamed (dry run)", ops.len());
}

pub fn print_rename(report: &RenameReport) {
    for op in &report.renamed {
        println!("✓ {} → {}", op.from.display(), op.to.display());
    }
    if report.rolled_back {
        for failure in &report.summary.failures {
            println!("✗ {} ({})", failure.path.display(), failure.reason);
        }
        println!("All renames were rolled back.");
    }
    print_summary("renamed", &report.summary);
}

pub fn print_history(records: &[HistoryRecord]) {
    if records.is_empty() {
        println!("No recorded runs.");
    }
    for record in records {
        let summary = &record.summary;
        let mut line = format!(
            "{}  {:<10} {}  ok {} failed {} skipped {}",
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            record.kind.label(),
            record.root.display(),
            summary.succeeded,
            summary.failed,
            summary.skipped
        );
        if summary.bytes_saved != 0 {
            line.push_str(&format!(" saved {}", format_signed_bytes(summary.bytes_saved)));
        }
        if summary.cancelled {
            line.push_str(" (cancelled)");
        }
        if let Some(detail) = &record.detail {
            line.push_str(&format!("  [{detail}]"));
        }
        println!("{line}");
    }
}

pub fn print_info(info: &ImageInfo) {
    let format = info
        .format
        .map_or_else(|| String::from("unknown"), |format| format.to_string());
    println!("{}", info.path.display());
    println!("  format     {format}");
    println!(
        "  size       {}x{} ({:.2} MP, {})",
        info.width,
        info.height,
        info.megapixels(),
        format_bytes(info.file_size)
    );
    println!("  color      {}", info.color);
    println!("  icc        {}", yes_no(info.has_icc_profile));
    println!("  exif       {}", yes_no(info.has_exif));
    if !info.png_chunks.is_empty() {
        println!("  chunks     {}", info.png_chunks.join(" "));
    }
}

fn print_summary(verb: &str, summary: &BatchSummary) {
    let mut line = format!(
        "{} {verb}, {} failed, {} skipped in {}",
        summary.succeeded,
        summary.failed,
        summary.skipped,
        format_duration(summary.elapsed)
    );
    if summary.bytes_saved != 0 {
        line.push_str(&format!(", {} saved", format_signed_bytes(summary.bytes_saved)));
    }
    if summary.cancelled {
        line.push_str(&format!(" (cancelled, {} not started)", summary.not_dispatched()));
    }
    println!("{line}");
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    let as_f64 = bytes as f64;
    if as_f64 >= GB {
        format!("{:.2} GiB", as_f64 / GB)
    } else if as_f64 >= MB {
        format!("{:.2} MiB", as_f64 / MB)
    } else if as_f64 >= KB {
        format!("{:.2} KiB", as_f64 / KB)
    } else {
        format!("{} B", bytes)
    }
}

fn format_signed_bytes(bytes: i64) -> String {
    if bytes < 0 {
        format!("-{}", format_bytes(bytes.unsigned_abs()))
    } else {
        format_bytes(bytes.unsigned_abs())
    }
}

fn format_savings(saved: i64, percent: f64) -> String {
    if saved <= 0 {
        format!("+{}", format_bytes(saved.unsigned_abs()))
    } else {
        format!("-{} ({percent:.1}% saved)", format_bytes(saved.unsigned_abs()))
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs_f64() >= 1.0 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{} ms", duration.as_millis())
    }
}

fn overall_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix:>9} {bar:36.green/black} {pos:>3}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏ ")
}
