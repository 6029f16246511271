use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::info;
use walkdir::WalkDir;

use crate::assets::AssetContexts;
use crate::error::PackError;
use crate::options::{AssetsScope, PackOptions};
use crate::report::{FileResult, Progress, RunReport};
use crate::resolve::absolutize;
use crate::rewrite::{document_dir, process_document};

const MARKDOWN_EXTENSIONS: &[&str] = &["md", "markdown"];

/// One user-supplied target expanded into concrete documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetPlan {
    pub target: PathBuf,
    /// Directory the per-target assets folder hangs off.
    pub root: PathBuf,
    pub documents: Vec<PathBuf>,
    /// Synthetic results for the target itself or entries the walk could not read.
    pub failures: Vec<FileResult>,
}

impl TargetPlan {
    fn assets_dir_for(&self, document: &Path, options: &PackOptions) -> PathBuf {
        match options.assets_scope {
            AssetsScope::PerDocument => document_dir(document).join(options.assets_dir_name()),
            AssetsScope::PerTarget => self.root.join(options.assets_dir_name()),
        }
    }
}

pub fn is_markdown(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            MARKDOWN_EXTENSIONS
                .iter()
                .any(|candidate| ext.eq_ignore_ascii_case(candidate))
        })
}

/// Directories are walked recursively (no symlinks, sorted); Markdown files are
/// taken as-is; anything else expands to nothing.
pub fn expand_target(target: &Path) -> TargetPlan {
    let target = absolutize(target);
    let mut plan = TargetPlan {
        root: target.clone(),
        target: target.clone(),
        documents: Vec::new(),
        failures: Vec::new(),
    };

    let metadata = match fs::metadata(&target) {
        Ok(metadata) => metadata,
        Err(error) => {
            plan.failures
                .push(FileResult::failed(&target, PackError::target(&target, error)));
            return plan;
        }
    };

    if metadata.is_dir() {
        for entry in WalkDir::new(&target).follow_links(false).sort_by_file_name() {
            match entry {
                Ok(entry) => {
                    if entry.file_type().is_file() && is_markdown(entry.path()) {
                        plan.documents.push(entry.into_path());
                    }
                }
                Err(error) => {
                    let path = error
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| target.clone());
                    plan.failures
                        .push(FileResult::failed(&path, PackError::target(&path, error)));
                }
            }
        }
    } else {
        plan.root = document_dir(&target);
        if is_markdown(&target) {
            plan.documents.push(target);
        }
    }
    plan
}

/// Validates options and expands every non-blank target. Nothing on disk is
/// modified before this succeeds.
pub fn plan_targets<P: AsRef<Path>>(
    targets: &[P],
    options: &PackOptions,
) -> Result<Vec<TargetPlan>> {
    options.validate()?;
    let selected: Vec<&Path> = targets
        .iter()
        .map(|target| target.as_ref())
        .filter(|path| !path.to_string_lossy().trim().is_empty())
        .collect();
    if selected.is_empty() {
        return Err(PackError::NoTargets.into());
    }
    Ok(selected.into_iter().map(expand_target).collect())
}

/// Processes every document of every target, one at a time.
pub fn run_pack<P: AsRef<Path>>(targets: &[P], options: &PackOptions) -> Result<RunReport> {
    let plans = plan_targets(targets, options)?;
    let mut report = RunReport::default();

    for plan in plans {
        let mut contexts = begin_target(&plan, &mut report, options);
        for document in &plan.documents {
            let assets_dir = plan.assets_dir_for(document, options);
            report.record_document(process_document(document, &assets_dir, options, &mut contexts));
        }
    }

    log_run(&report);
    Ok(report)
}

/// Same computation as [`run_pack`], yielding to the scheduler between
/// documents. Cancellation is observed only at document boundaries.
pub async fn run_pack_async<P, F>(
    targets: &[P],
    options: &PackOptions,
    mut on_progress: F,
    cancel: &CancellationToken,
) -> Result<RunReport>
where
    P: AsRef<Path>,
    F: FnMut(Progress),
{
    let plans = plan_targets(targets, options)?;
    let total = plans.iter().map(|plan| plan.documents.len()).sum();
    let mut done = 0usize;
    let mut report = RunReport::default();

    for plan in plans {
        let mut contexts = begin_target(&plan, &mut report, options);
        for document in &plan.documents {
            if cancel.is_cancelled() {
                report.cancelled = true;
                info!(done, total, "run cancelled");
                return Ok(report);
            }
            let assets_dir = plan.assets_dir_for(document, options);
            report.record_document(process_document(document, &assets_dir, options, &mut contexts));
            done += 1;
            on_progress(Progress { done, total });
            tokio::task::yield_now().await;
        }
    }

    on_progress(Progress { done, total });
    log_run(&report);
    Ok(report)
}

// Dedup scope is one target: a fresh registry per target.
fn begin_target(plan: &TargetPlan, report: &mut RunReport, options: &PackOptions) -> AssetContexts {
    for failure in &plan.failures {
        report.record_failure(failure.clone());
    }
    info!(
        target = %plan.target.display(),
        documents = plan.documents.len(),
        "packing target"
    );
    AssetContexts::new(options.naming_start)
}

fn log_run(report: &RunReport) {
    let summary = &report.summary;
    info!(
        files = summary.total_files,
        found = summary.total_images_found,
        copied = summary.total_copied,
        reused = summary.total_reused,
        errors = summary.total_errors,
        "run finished"
    );
}
