//! Core engine behind the `genie` CLI.
//!
//! The pipeline: discover `*.genie.ts` sources, evaluate each generator
//! document, build the expected target bytes, and write atomically when the
//! target differs (`generate_all`) or verify up-to-dateness without mutation
//! (`check_all`). A successful pass hands the loaded generators to the
//! validation runner.
//!
//! Progress is reported through an injected [`genie_types::EventSink`]; the
//! orchestrators never print.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use genie_module::{LoadedGenerator, ModuleRegistry, load_generator};
use genie_types::{CauseKind, ErrorCause, Event, GenieError};
use genie_validate::ValidationOptions;

pub mod check;
pub mod generate;
mod revalidate;

pub use check::check_all;
pub use generate::generate_all;
pub use genie_types::{EventSink, FileStatus, NullSink, RunSummary, SharedSink, VecSink};

/// Per-file timeout; covers module evaluation, where a non-settling
/// generator can otherwise stall the run.
pub const FILE_TIMEOUT: Duration = Duration::from_secs(120);

/// Runtime options shared by `generate_all` and `check_all`.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Working directory the run is scoped to.
    pub cwd: PathBuf,
    /// Explicit generator sources; discovery under `cwd` when empty.
    pub sources: Option<Vec<PathBuf>>,
    /// Generated files end up mode `0o444`.
    pub read_only: bool,
    /// Report what would change without mutating anything.
    pub dry_run: bool,
    /// Explicit formatter config path; convention discovery otherwise.
    pub formatter_config: Option<PathBuf>,
    /// Check-mode worker bound; `min(max(1, hw_parallelism), 12)` otherwise.
    pub concurrency: Option<usize>,
    /// Validation policy.
    pub validation: ValidationOptions,
}

impl RunOptions {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            ..Default::default()
        }
    }

    /// The formatter config actually used: explicit path or convention files
    /// under cwd.
    pub fn resolved_formatter_config(&self) -> Option<PathBuf> {
        genie_format::discover_config(&self.cwd, self.formatter_config.as_deref())
    }
}

pub(crate) fn emit(sink: &SharedSink, event: Event) {
    if let Ok(mut sink) = sink.lock() {
        sink.emit(event);
    }
}

/// Evaluate a generator module under the per-file timeout.
///
/// The evaluation runs on a helper thread; on timeout the thread is
/// abandoned and a file-scoped timeout error is returned.
pub(crate) fn load_with_timeout(
    source: &PathBuf,
    opts: &RunOptions,
    registry: &Arc<ModuleRegistry>,
    timeout: Duration,
) -> Result<LoadedGenerator, GenieError> {
    let (sender, receiver) = mpsc::channel();
    let thread_source = source.clone();
    let thread_cwd = opts.cwd.clone();
    let thread_registry = Arc::clone(registry);

    std::thread::spawn(move || {
        let result = load_generator(&thread_source, &thread_cwd, &thread_registry);
        let _ = sender.send(result);
    });

    match receiver.recv_timeout(timeout) {
        Ok(Ok(loaded)) => Ok(loaded),
        Ok(Err(cause)) => Err(GenieError::Import {
            path: source.clone(),
            cause,
        }),
        Err(_) => {
            let message = format!(
                "Generator evaluation timed out after {}",
                humantime::format_duration(timeout)
            );
            Err(GenieError::File {
                path: source.clone(),
                message: message.clone(),
                cause: ErrorCause::new(CauseKind::Timeout, message),
            })
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex;

    use genie_types::{Event, VecSink};

    use super::*;

    pub fn sink() -> (SharedSink, Arc<Mutex<VecSink>>) {
        let collector = Arc::new(Mutex::new(VecSink::default()));
        let shared: SharedSink = collector.clone();
        (shared, collector)
    }

    pub fn events_of(collector: &Arc<Mutex<VecSink>>) -> Vec<Event> {
        collector.lock().expect("sink lock").events.clone()
    }

    pub fn write(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("mkdir");
        }
        fs::write(path, content).expect("write");
    }
}
