//! Cascade-failure re-validation.
//!
//! When a shared module throws during initialization, concurrent generation
//! surfaces one genuine failure plus a shower of uninitialized-binding
//! errors in the files that import the module. Re-running every source
//! sequentially against a fresh module registry separates the two: the file
//! whose evaluation trace contains the genuine error is the root cause,
//! cascade errors are dependents.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use genie_content::{BuildError, build_expected};
use genie_module::ModuleRegistry;
use genie_paths::display_relative;
use genie_types::{ErrorCause, Event, FileReport, FileStatus, GenieError, SharedSink};

use crate::{RunOptions, emit};

/// Message attached to files that fail only because of another file.
pub(crate) const DEPENDENT_MESSAGE: &str = "Failed due to dependency error";

/// Sequentially re-check every source and attribute failures.
///
/// Emits the per-file error completions for the files that failed in the
/// concurrent pass and returns the aggregate message plus their reports.
pub(crate) fn revalidate(
    opts: &RunOptions,
    sources: &[PathBuf],
    failed: &[(PathBuf, GenieError)],
    formatter_config: Option<&Path>,
    sink: &SharedSink,
) -> (String, Vec<FileReport>) {
    let registry = ModuleRegistry::new();
    let mut sequential: HashMap<PathBuf, ErrorCause> = HashMap::new();

    for source in sources {
        if let Err(error) =
            build_expected(source, &opts.cwd, formatter_config, &registry, None)
        {
            let cause = match error {
                BuildError::Load(cause) | BuildError::Render(cause) => cause,
            };
            sequential.insert(source.clone(), cause);
        }
    }

    let mut root_count = 0usize;
    let mut dependent_count = 0usize;
    let mut reports = Vec::new();

    for (source, original) in failed {
        let cause = sequential
            .get(source)
            .cloned()
            .or_else(|| original.cause().cloned())
            .unwrap_or_else(|| {
                ErrorCause::new(genie_types::CauseKind::Other, original.to_string())
            });

        let message = if cause.originates_in(source) {
            root_count += 1;
            cause.message.clone()
        } else {
            dependent_count += 1;
            DEPENDENT_MESSAGE.to_string()
        };

        emit(sink, Event::FileCompleted {
            path: source.clone(),
            status: FileStatus::Error,
            message: Some(message.clone()),
        });
        reports.push(FileReport {
            path: source.clone(),
            relative_path: display_relative(source, &opts.cwd),
            status: FileStatus::Error,
            message: Some(message),
        });
    }

    (
        format!("{root_count} root cause error(s), {dependent_count} dependent failure(s)"),
        reports,
    )
}
