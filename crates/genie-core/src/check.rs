//! Check orchestrator.
//!
//! Verifies up-to-dateness without mutation. Work is bounded by
//! `min(max(1, hw_parallelism), 12)` workers over a shared queue. Content
//! findings are per-file; any other failure class is fatal and interrupts
//! the remaining work: queued siblings complete synthetically and the run
//! fails naming the fatal file.
//!
//! Generators loaded during a fully successful check are handed to the
//! validation runner so no source is evaluated twice.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};

use genie_content::{BuildError, build_expected};
use genie_discovery::{discover_sources, preflight_unique_targets};
use genie_module::{LoadedGenerator, ModuleRegistry};
use genie_paths::display_relative;
use genie_types::{
    Event, FileReport, FileStatus, GenieError, RunSummary, SharedSink,
};
use genie_validate::run_validation;

use crate::{FILE_TIMEOUT, RunOptions, emit, load_with_timeout};

/// Completion message for siblings interrupted by a fatal error.
pub(crate) const CANCELLED_MESSAGE: &str = "Cancelled due to fatal error in another file";

/// Upper bound on check workers.
const MAX_WORKERS: usize = 12;

enum WorkerMessage {
    Started(usize),
    Finished(usize, Result<LoadedGenerator, GenieError>),
}

/// Number of check workers for this host.
fn worker_bound(requested: Option<usize>) -> usize {
    match requested {
        Some(n) => n.clamp(1, MAX_WORKERS),
        None => {
            let hw = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1);
            hw.max(1).min(MAX_WORKERS)
        }
    }
}

/// Check every target under `opts.cwd` against its generator.
pub fn check_all(opts: &RunOptions, sink: &SharedSink) -> Result<RunSummary, GenieError> {
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
    let shared_opts = Arc::new(RunOptions {
        formatter_config: opts.resolved_formatter_config(),
        ..opts.clone()
    });

    let queue: Arc<Mutex<VecDeque<(usize, PathBuf)>>> = Arc::new(Mutex::new(
        sources.iter().cloned().enumerate().collect(),
    ));
    let cancel = Arc::new(AtomicBool::new(false));
    let (sender, receiver) = mpsc::channel::<WorkerMessage>();

    let workers = worker_bound(opts.concurrency).min(sources.len().max(1));
    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let queue = Arc::clone(&queue);
        let cancel = Arc::clone(&cancel);
        let sender = sender.clone();
        let opts = Arc::clone(&shared_opts);
        let registry = Arc::clone(&registry);

        handles.push(std::thread::spawn(move || {
            loop {
                if cancel.load(Ordering::Relaxed) {
                    break;
                }
                let Some((index, source)) = queue.lock().ok().and_then(|mut q| q.pop_front())
                else {
                    break;
                };
                if sender.send(WorkerMessage::Started(index)).is_err() {
                    break;
                }
                let result = check_one(&source, &opts, &registry);
                if sender.send(WorkerMessage::Finished(index, result)).is_err() {
                    break;
                }
            }
        }));
    }
    drop(sender);

    let mut summary_slots: Vec<Option<FileReport>> = vec![None; sources.len()];
    let mut started: HashSet<usize> = HashSet::new();
    let mut preloaded: HashMap<PathBuf, LoadedGenerator> = HashMap::new();
    let mut check_failures = 0usize;
    let mut fatal: Option<(usize, String)> = None;
    let mut finished = 0usize;

    while finished < sources.len() {
        let message = match receiver.recv() {
            Ok(message) => message,
            Err(_) => {
                return Err(fail(
                    sink,
                    GenieError::Platform("check worker terminated unexpectedly".to_string()),
                ));
            }
        };
        match message {
            WorkerMessage::Started(index) => {
                started.insert(index);
                emit(sink, Event::FileStarted {
                    path: sources[index].clone(),
                });
            }
            WorkerMessage::Finished(index, result) => {
                finished += 1;
                let source = &sources[index];
                match result {
                    Ok(loaded) => {
                        emit(sink, Event::FileCompleted {
                            path: source.clone(),
                            status: FileStatus::Unchanged,
                            message: None,
                        });
                        summary_slots[index] = Some(FileReport {
                            path: source.clone(),
                            relative_path: display_relative(source, &opts.cwd),
                            status: FileStatus::Unchanged,
                            message: None,
                        });
                        preloaded.insert(source.clone(), loaded);
                    }
                    Err(GenieError::Check(message)) => {
                        check_failures += 1;
                        emit(sink, Event::FileCompleted {
                            path: source.clone(),
                            status: FileStatus::Error,
                            message: Some(message.clone()),
                        });
                        summary_slots[index] = Some(FileReport {
                            path: source.clone(),
                            relative_path: display_relative(source, &opts.cwd),
                            status: FileStatus::Error,
                            message: Some(message),
                        });
                    }
                    Err(error) => {
                        // Fatal class: interrupt everything else.
                        cancel.store(true, Ordering::Relaxed);
                        let message = error.to_string();
                        emit(sink, Event::FileCompleted {
                            path: source.clone(),
                            status: FileStatus::Error,
                            message: Some(message.clone()),
                        });
                        summary_slots[index] = Some(FileReport {
                            path: source.clone(),
                            relative_path: display_relative(source, &opts.cwd),
                            status: FileStatus::Error,
                            message: Some(message.clone()),
                        });
                        fatal = Some((index, message));
                        break;
                    }
                }
            }
        }
    }

    let mut summary = RunSummary::default();
    let mut interrupted = 0usize;

    if fatal.is_some() {
        // Synthetic completions for everything that never finished.
        for (index, slot) in summary_slots.iter_mut().enumerate() {
            if slot.is_some() {
                continue;
            }
            let source = &sources[index];
            if !started.contains(&index) {
                emit(sink, Event::FileStarted {
                    path: source.clone(),
                });
            }
            emit(sink, Event::FileCompleted {
                path: source.clone(),
                status: FileStatus::Error,
                message: Some(CANCELLED_MESSAGE.to_string()),
            });
            *slot = Some(FileReport {
                path: source.clone(),
                relative_path: display_relative(source, &opts.cwd),
                status: FileStatus::Error,
                message: Some(CANCELLED_MESSAGE.to_string()),
            });
            interrupted += 1;
        }
    }

    for slot in summary_slots.into_iter().flatten() {
        summary.record(slot);
    }

    if let Some((index, _)) = fatal {
        emit(sink, Event::Complete {
            summary: summary.clone(),
        });
        let message = format!(
            "Fatal check error in {}; interrupted {} sibling file(s)",
            display_relative(&sources[index], &opts.cwd),
            interrupted
        );
        let failed_count = summary.failed;
        return Err(fail(sink, GenieError::GenerationFailed {
            failed_count,
            message,
            files: summary.files,
        }));
    }

    if check_failures > 0 {
        emit(sink, Event::Complete {
            summary: summary.clone(),
        });
        let message = format!("{check_failures} file(s) failed the check");
        return Err(fail(sink, GenieError::GenerationFailed {
            failed_count: check_failures,
            message,
            files: summary.files,
        }));
    }

    for handle in handles {
        let _ = handle.join();
    }

    if let Err(error) = run_validation(
        &opts.cwd,
        &sources,
        &preloaded,
        &registry,
        &opts.validation,
    ) {
        return Err(fail(sink, error));
    }

    emit(sink, Event::Complete {
        summary: summary.clone(),
    });
    Ok(summary)
}

fn fail(sink: &SharedSink, error: GenieError) -> GenieError {
    emit(sink, Event::Error {
        message: error.to_string(),
    });
    error
}

/// Check one source: load, rebuild expected bytes, compare against disk.
fn check_one(
    source: &PathBuf,
    opts: &RunOptions,
    registry: &Arc<ModuleRegistry>,
) -> Result<LoadedGenerator, GenieError> {
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

    if !expected.target.exists() {
        return Err(GenieError::Check(
            "File does not exist. Run 'genie' to generate it.".to_string(),
        ));
    }

    let current = std::fs::read(&expected.target).map_err(|e| {
        GenieError::Platform(format!(
            "failed to read {}: {e}",
            expected.target.display()
        ))
    })?;

    if current != expected.bytes {
        return Err(GenieError::Check(
            "File content is out of date. Run 'genie' to regenerate it.".to_string(),
        ));
    }

    Ok(loaded)
}
