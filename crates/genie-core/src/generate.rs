//! Generation orchestrator.
//!
//! Every discovered source runs its own pipeline concurrently (unbounded):
//! evaluate the generator, build the expected bytes, and write atomically
//! under the per-target cross-process lock. Success completions stream as
//! they happen; error completions are held back until the pass ends so the
//! cascade re-validator can re-attribute them when a shared module failed to
//! initialize.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use genie_content::{BuildError, build_expected, diff_summary};
use genie_discovery::{discover_sources, preflight_unique_targets};
use genie_module::ModuleRegistry;
use genie_paths::display_relative;
use genie_types::{
    ErrorCause, Event, FileReport, FileStatus, GenerateOutcome, GenieError, RunSummary,
    SharedSink,
};
use genie_validate::run_validation;
use genie_write::{READ_ONLY_MODE, atomic_write, set_read_only, with_target_lock};

use crate::revalidate;
use crate::{FILE_TIMEOUT, RunOptions, emit, load_with_timeout};

/// Generate every target under `opts.cwd`.
///
/// Per-file failures never interrupt siblings; they are accumulated and the
/// run fails with an aggregate error after every file has completed.
pub fn generate_all(opts: &RunOptions, sink: &SharedSink) -> Result<RunSummary, GenieError> {
    let mut sources = match &opts.sources {
        Some(explicit) => explicit.clone(),
        None => discover_sources(&opts.cwd)
            .map_err(|e| fail(sink, GenieError::Platform(e.to_string())))?,
    };
    sources.sort();

    emit(sink, Event::FilesDiscovered {
        count: sources.len(),
    });

    preflight_unique_targets(&sources)
        .map_err(|e| fail(sink, GenieError::Platform(e.to_string())))?;

    let registry = Arc::new(ModuleRegistry::new());
    let formatter_config = opts.resolved_formatter_config();
    let shared_opts = Arc::new(RunOptions {
        formatter_config: formatter_config.clone(),
        ..opts.clone()
    });

    let mut handles = Vec::with_capacity(sources.len());
    for source in &sources {
        let source = source.clone();
        let opts = Arc::clone(&shared_opts);
        let registry = Arc::clone(&registry);
        let sink = Arc::clone(sink);

        handles.push(std::thread::spawn(move || {
            emit(&sink, Event::FileStarted {
                path: source.clone(),
            });
            let result = generate_one(&source, &opts, &registry);
            if let Ok(outcome) = &result {
                emit(&sink, Event::FileCompleted {
                    path: source.clone(),
                    status: outcome.status(),
                    message: outcome.message(),
                });
            }
            (source, result)
        }));
    }

    let mut outcomes: HashMap<PathBuf, Result<GenerateOutcome, GenieError>> = HashMap::new();
    for handle in handles {
        match handle.join() {
            Ok((source, result)) => {
                outcomes.insert(source, result);
            }
            Err(_) => {
                // A panicking worker loses its source association; surface it
                // as a run-level failure.
                return Err(fail(
                    sink,
                    GenieError::Platform("generator worker panicked".to_string()),
                ));
            }
        }
    }

    let mut summary = RunSummary::default();
    let mut failed: Vec<(PathBuf, GenieError)> = Vec::new();

    for source in &sources {
        match outcomes.remove(source) {
            Some(Ok(outcome)) => summary.record(FileReport {
                path: source.clone(),
                relative_path: display_relative(source, &opts.cwd),
                status: outcome.status(),
                message: outcome.message(),
            }),
            Some(Err(error)) => failed.push((source.clone(), error)),
            None => {}
        }
    }

    if !failed.is_empty() {
        return Err(finish_failed(
            opts,
            sink,
            &sources,
            failed,
            summary,
            formatter_config.as_deref(),
        ));
    }

    if !opts.dry_run {
        if let Err(error) = run_validation(
            &opts.cwd,
            &sources,
            &HashMap::new(),
            &registry,
            &opts.validation,
        ) {
            return Err(fail(sink, error));
        }
    }

    emit(sink, Event::Complete {
        summary: summary.clone(),
    });
    Ok(summary)
}

/// Shape the aggregate failure, re-attributing cascades when present.
fn finish_failed(
    opts: &RunOptions,
    sink: &SharedSink,
    sources: &[PathBuf],
    failed: Vec<(PathBuf, GenieError)>,
    mut summary: RunSummary,
    formatter_config: Option<&Path>,
) -> GenieError {
    let has_cascade = failed
        .iter()
        .any(|(_, error)| error.cause().is_some_and(ErrorCause::is_cascade));

    let (message, reports) = if has_cascade {
        revalidate::revalidate(opts, sources, &failed, formatter_config, sink)
    } else {
        let mut reports = Vec::new();
        for (source, error) in &failed {
            let report = FileReport {
                path: source.clone(),
                relative_path: display_relative(source, &opts.cwd),
                status: FileStatus::Error,
                message: Some(error.to_string()),
            };
            emit(sink, Event::FileCompleted {
                path: source.clone(),
                status: FileStatus::Error,
                message: report.message.clone(),
            });
            reports.push(report);
        }
        (
            format!("{} file(s) failed to generate", reports.len()),
            reports,
        )
    };

    let failed_count = reports.len();
    for report in reports {
        summary.record(report);
    }

    emit(sink, Event::Complete {
        summary: summary.clone(),
    });
    fail(sink, GenieError::GenerationFailed {
        failed_count,
        message,
        files: summary.files,
    })
}

fn fail(sink: &SharedSink, error: GenieError) -> GenieError {
    emit(sink, Event::Error {
        message: error.to_string(),
    });
    error
}

/// Generate a single target.
pub(crate) fn generate_one(
    source: &PathBuf,
    opts: &RunOptions,
    registry: &Arc<ModuleRegistry>,
) -> Result<GenerateOutcome, GenieError> {
    let loaded = load_with_timeout(source, opts, registry, FILE_TIMEOUT)?;

    let expected = build_expected(
        source,
        &opts.cwd,
        opts.formatter_config.as_deref(),
        registry,
        Some(&loaded),
    )
    .map_err(|e| match e {
        BuildError::Load(cause) => GenieError::Import {
            path: source.clone(),
            cause,
        },
        BuildError::Render(cause) => GenieError::File {
            path: source.clone(),
            message: cause.message.clone(),
            cause,
        },
    })?;

    apply_expected(source, &expected, opts)
}

/// Compare the expected bytes against disk and write when they differ.
fn apply_expected(
    source: &PathBuf,
    expected: &genie_content::ExpectedContent,
    opts: &RunOptions,
) -> Result<GenerateOutcome, GenieError> {
    let target = &expected.target;
    let parent = target.parent().unwrap_or(Path::new(""));
    if !parent.is_dir() {
        return Ok(GenerateOutcome::Skipped {
            reason: format!("Parent directory missing: {}", parent.display()),
        });
    }

    let exists = target.exists();
    let current = if exists {
        Some(std::fs::read(target).map_err(|e| GenieError::File {
            path: source.clone(),
            message: format!("failed to read {}: {e}", target.display()),
            cause: ErrorCause::new(genie_types::CauseKind::Io, e.to_string()),
        })?)
    } else {
        None
    };

    let unchanged = current.as_deref() == Some(expected.bytes.as_slice());

    if opts.dry_run {
        return Ok(match (exists, unchanged) {
            (false, _) => GenerateOutcome::Created,
            (true, true) => GenerateOutcome::Unchanged,
            (true, false) => GenerateOutcome::Updated {
                diff_summary: Some(diff_summary(
                    current.as_deref().unwrap_or_default(),
                    &expected.bytes,
                )),
            },
        });
    }

    if unchanged {
        if opts.read_only {
            let _ = set_read_only(target);
        }
        return Ok(GenerateOutcome::Unchanged);
    }

    let mode = opts.read_only.then_some(READ_ONLY_MODE);
    with_target_lock(&opts.cwd, target, || {
        atomic_write(target, &expected.bytes, mode)
    })
    .map_err(|e| GenieError::File {
        path: source.clone(),
        message: format!("failed to write {}: {e}", target.display()),
        cause: ErrorCause::new(genie_types::CauseKind::Io, e.to_string()),
    })?;

    Ok(if exists {
        GenerateOutcome::Updated {
            diff_summary: Some(diff_summary(
                current.as_deref().unwrap_or_default(),
                &expected.bytes,
            )),
        }
    } else {
        GenerateOutcome::Created
    })
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use serial_test::serial;
    use tempfile::tempdir;

    use super::*;
    use crate::test_support::{events_of, sink, write};

    fn options(cwd: &Path) -> RunOptions {
        RunOptions::new(cwd)
    }

    fn json_generator(value: &str) -> String {
        format!(r#"{{"emit": {{"kind": "json", "value": {value}}}}}"#)
    }

    #[test]
    #[serial]
    fn empty_workspace_completes_with_zero_summary() {
        temp_env::with_var(genie_workspace::PROVIDER_ENV, None::<&str>, || {
            let td = tempdir().expect("tempdir");
            let (shared, collector) = sink();

            let summary = generate_all(&options(td.path()), &shared).expect("run");
            assert_eq!(summary.total(), 0);

            let events = events_of(&collector);
            assert!(matches!(events[0], Event::FilesDiscovered { count: 0 }));
            assert!(matches!(events.last(), Some(Event::Complete { .. })));
        });
    }

    #[test]
    #[serial]
    fn creates_updates_and_leaves_unchanged() {
        temp_env::with_var(genie_workspace::PROVIDER_ENV, None::<&str>, || {
            let td = tempdir().expect("tempdir");
            write(&td.path().join("megarepo.json"), "{}");
            let source = td.path().join("settings.json.genie.ts");
            write(&source, &json_generator(r#"{"a": 1}"#));

            let (shared, _) = sink();
            let summary = generate_all(&options(td.path()), &shared).expect("first run");
            assert_eq!(summary.created, 1);
            assert_eq!(
                fs::read_to_string(td.path().join("settings.json")).expect("read"),
                "{\n  \"a\": 1\n}\n"
            );

            // Second run, no changes: unchanged.
            let summary = generate_all(&options(td.path()), &shared).expect("second run");
            assert_eq!(summary.unchanged, 1);

            // Changed generator: updated with a diff summary.
            write(&source, &json_generator(r#"{"a": 1, "b": 2}"#));
            let (shared, collector) = sink();
            let summary = generate_all(&options(td.path()), &shared).expect("third run");
            assert_eq!(summary.updated, 1);

            let has_diff = events_of(&collector).iter().any(|e| {
                matches!(
                    e,
                    Event::FileCompleted {
                        status: FileStatus::Updated,
                        message: Some(m),
                        ..
                    } if m == "(+1 lines)"
                )
            });
            assert!(has_diff, "expected a (+1 lines) diff summary");
        });
    }

    #[test]
    #[serial]
    fn dry_run_never_writes() {
        temp_env::with_var(genie_workspace::PROVIDER_ENV, None::<&str>, || {
            let td = tempdir().expect("tempdir");
            write(&td.path().join("megarepo.json"), "{}");
            write(
                &td.path().join("settings.json.genie.ts"),
                &json_generator(r#"{"a": 1}"#),
            );

            let mut opts = options(td.path());
            opts.dry_run = true;
            let (shared, _) = sink();
            let summary = generate_all(&opts, &shared).expect("dry run");

            assert_eq!(summary.created, 1);
            assert!(!td.path().join("settings.json").exists());
        });
    }

    #[test]
    #[serial]
    fn missing_parent_directory_is_skipped() {
        temp_env::with_var(genie_workspace::PROVIDER_ENV, None::<&str>, || {
            let td = tempdir().expect("tempdir");
            write(&td.path().join("megarepo.json"), "{}");
            write(
                &td.path().join("real.json.genie.ts"),
                &json_generator("{}"),
            );

            // The target's directory vanished between evaluation and the
            // write phase.
            let source = td.path().join("real.json.genie.ts");
            let expected = genie_content::ExpectedContent {
                target: td.path().join("vanished/out.json"),
                bytes: b"{}\n".to_vec(),
            };
            let outcome =
                apply_expected(&source, &expected, &options(td.path())).expect("outcome");
            match outcome {
                GenerateOutcome::Skipped { reason } => {
                    assert!(reason.contains("Parent directory missing"), "{reason}");
                }
                other => panic!("unexpected outcome: {other:?}"),
            }
        });
    }

    #[test]
    #[serial]
    fn read_only_unchanged_restores_mode() {
        temp_env::with_var(genie_workspace::PROVIDER_ENV, None::<&str>, || {
            let td = tempdir().expect("tempdir");
            write(&td.path().join("megarepo.json"), "{}");
            write(
                &td.path().join("settings.json.genie.ts"),
                &json_generator(r#"{"a": 1}"#),
            );

            let mut opts = options(td.path());
            opts.read_only = true;
            let (shared, _) = sink();

            generate_all(&opts, &shared).expect("first");
            generate_all(&opts, &shared).expect("second");

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let mode = fs::metadata(td.path().join("settings.json"))
                    .expect("stat")
                    .permissions()
                    .mode()
                    & 0o777;
                assert_eq!(mode, 0o444);
            }
        });
    }

    #[test]
    #[serial]
    fn duplicate_targets_abort_before_any_load() {
        temp_env::with_var(genie_workspace::PROVIDER_ENV, None::<&str>, || {
            let td = tempdir().expect("tempdir");
            write(&td.path().join("megarepo.json"), "{}");
            write(&td.path().join("x/foo.genie.ts"), "this never parses");
            fs::create_dir_all(td.path().join("x/a")).expect("mkdir");

            // Explicit sources naming the same file through a dot-dot
            // segment collide on the normalized target.
            let mut opts = options(td.path());
            opts.sources = Some(vec![
                td.path().join("x/foo.genie.ts"),
                td.path().join("x/a/../foo.genie.ts"),
            ]);

            let (shared, collector) = sink();
            let err = generate_all(&opts, &shared).expect_err("must fail");
            let message = err.to_string();
            assert!(message.contains("(2x)"), "message: {message}");

            // No FileStarted events: preflight fired before any load.
            assert!(
                !events_of(&collector)
                    .iter()
                    .any(|e| matches!(e, Event::FileStarted { .. }))
            );
        });
    }

    #[test]
    #[serial]
    fn per_file_errors_become_error_completions() {
        temp_env::with_var(genie_workspace::PROVIDER_ENV, None::<&str>, || {
            let td = tempdir().expect("tempdir");
            write(&td.path().join("megarepo.json"), "{}");
            write(&td.path().join("ok.json.genie.ts"), &json_generator("{}"));
            write(
                &td.path().join("bad.json.genie.ts"),
                r#"{"data": {"$fail": "boom"}, "emit": {"kind": "text", "lines": []}}"#,
            );

            let (shared, collector) = sink();
            let err = generate_all(&options(td.path()), &shared).expect_err("must fail");

            match err {
                GenieError::GenerationFailed {
                    failed_count,
                    files,
                    ..
                } => {
                    assert_eq!(failed_count, 1);
                    assert_eq!(files.len(), 2);
                }
                other => panic!("unexpected error: {other}"),
            }

            let events = events_of(&collector);
            let error_completion = events.iter().any(|e| {
                matches!(
                    e,
                    Event::FileCompleted {
                        status: FileStatus::Error,
                        message: Some(m),
                        ..
                    } if m.contains("boom")
                )
            });
            assert!(error_completion);
            // The healthy sibling still generated.
            assert!(td.path().join("ok.json").exists());
        });
    }

    #[test]
    #[serial]
    fn determinism_second_run_is_all_unchanged() {
        temp_env::with_var(genie_workspace::PROVIDER_ENV, None::<&str>, || {
            let td = tempdir().expect("tempdir");
            write(&td.path().join("megarepo.json"), "{}");
            write(
                &td.path().join("a/settings.json.genie.ts"),
                &json_generator(r#"{"loc": "{{location}}"}"#),
            );
            write(
                &td.path().join("b/ci.yml.genie.ts"),
                r#"{"emit": {"kind": "text", "lines": ["jobs: []"]}}"#,
            );

            let (shared, _) = sink();
            generate_all(&options(td.path()), &shared).expect("first");
            let summary = generate_all(&options(td.path()), &shared).expect("second");
            assert_eq!(summary.unchanged, summary.total());
        });
    }
}
