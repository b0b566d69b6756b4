mod cli;
mod ui;

use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::Local;
use clap::Parser;
use tracing::warn;

use pixbatch::{BatchEngine, BatchSummary, FileScanner, HistoryRecorder, RunHandle, plan_rename};

use crate::cli::{Action, AppConfig};
use crate::ui::ProgressDispatcher;

fn main() -> Result<()> {
    let parsed = cli::Cli::parse();
    let config = parsed.build()?;
    pixbatch::logging::init(config.verbosity);

    let engine = BatchEngine::new(HistoryRecorder::new(&config.history));

    match config.action.clone() {
        Action::Convert { root, config: conversion } => {
            let handle = engine
                .start_conversion(&root, conversion)
                .with_context(|| format!("starting conversion of {}", root.display()))?;
            let report = follow(&config, "convert", handle)?;
            ui::print_conversion(&report);
            finish(&report.summary)
        }
        Action::Dupes { root, options } => {
            let handle = engine
                .start_duplicate_scan(&root, options)
                .with_context(|| format!("scanning {} for duplicates", root.display()))?;
            let report = follow(&config, "hash", handle)?;
            ui::print_duplicates(&report);
            finish(&report.summary)
        }
        Action::Rename {
            root,
            pattern,
            scan,
            dry_run: true,
        } => {
            let entries: Vec<_> = FileScanner::new(&root, scan)?.scan().collect();
            let plan = plan_rename(&entries, &pattern, Local::now().naive_local())
                .context("planning renames")?;
            ui::print_rename_plan(&plan.ops);
            Ok(())
        }
        Action::Rename {
            root,
            pattern,
            scan,
            dry_run: false,
        } => {
            let handle = engine
                .start_rename(&root, pattern, scan)
                .context("planning renames")?;
            let report = follow(&config, "rename", handle)?;
            ui::print_rename(&report);
            finish(&report.summary)
        }
        Action::History { limit } => {
            let records = engine
                .list_history(limit)
                .with_context(|| format!("reading history from {}", engine.history().path().display()))?;
            ui::print_history(&records);
            Ok(())
        }
        Action::Info { paths } => inspect_all(&paths),
    }
}

fn follow<T>(config: &AppConfig, label: &str, handle: RunHandle<T>) -> Result<T> {
    let token = handle.cancel_token();
    if let Err(err) = ctrlc::set_handler(move || {
        warn!("interrupted; letting running jobs finish");
        token.cancel();
    }) {
        warn!(error = %err, "Ctrl-C will not cancel this run");
    }

    let progress = ProgressDispatcher::new(config.progress, label);
    for update in handle.progress() {
        progress.update(&update);
    }
    progress.finish();
    Ok(handle.summary()?)
}

fn finish(summary: &BatchSummary) -> Result<()> {
    if summary.failed > 0 {
        bail!("{} of {} files failed", summary.failed, summary.submitted);
    }
    Ok(())
}

fn inspect_all(paths: &[impl AsRef<Path>]) -> Result<()> {
    let mut failed = 0;
    for path in paths {
        match pixbatch::inspect(path.as_ref()) {
            Ok(info) => ui::print_info(&info),
            Err(err) => {
                failed += 1;
                eprintln!("✗ {err}");
            }
        }
    }
    if failed > 0 {
        bail!("{failed} of {} files could not be inspected", paths.len());
    }
    Ok(())
}
