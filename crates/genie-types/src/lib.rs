//! # Types
//!
//! Core domain types for Genie, including generation results, run events,
//! validation issues, and errors.
//!
//! This module defines the fundamental data structures used throughout Genie:
//! - [`GenerateOutcome`] - Per-file result of a generation pass
//! - [`Event`] - Run event emitted through an [`EventSink`]
//! - [`RunSummary`] - Aggregate per-status counts plus per-file reports
//! - [`Issue`] - Structured validation finding
//! - [`GenieError`] - Error taxonomy shared by the orchestrators
//!
//! ## Serialization
//!
//! Most types implement `Serialize` and `Deserialize` from `serde` so events
//! and summaries can be rendered or persisted by embedders.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-file status as reported through events and summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// The target did not exist and was written.
    Created,
    /// The target existed with different bytes and was rewritten.
    Updated,
    /// The target already had the expected bytes.
    Unchanged,
    /// Generation was skipped (e.g. missing parent directory).
    Skipped,
    /// Generation or verification failed.
    Error,
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileStatus::Created => write!(f, "created"),
            FileStatus::Updated => write!(f, "updated"),
            FileStatus::Unchanged => write!(f, "unchanged"),
            FileStatus::Skipped => write!(f, "skipped"),
            FileStatus::Error => write!(f, "error"),
        }
    }
}

/// Result of generating a single target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GenerateOutcome {
    /// Target did not exist before this run.
    Created,
    /// Target existed and its content changed.
    Updated {
        /// Brief human-readable delta, e.g. `(+3 lines)`.
        #[serde(skip_serializing_if = "Option::is_none")]
        diff_summary: Option<String>,
    },
    /// Target already matched the expected bytes.
    Unchanged,
    /// Generation did not run for this target.
    Skipped { reason: String },
}

impl GenerateOutcome {
    /// Map the outcome onto the event-facing status.
    pub fn status(&self) -> FileStatus {
        match self {
            GenerateOutcome::Created => FileStatus::Created,
            GenerateOutcome::Updated { .. } => FileStatus::Updated,
            GenerateOutcome::Unchanged => FileStatus::Unchanged,
            GenerateOutcome::Skipped { .. } => FileStatus::Skipped,
        }
    }

    /// Message attached to the completion event, if any.
    pub fn message(&self) -> Option<String> {
        match self {
            GenerateOutcome::Updated {
                diff_summary: Some(s),
            } => Some(s.clone()),
            GenerateOutcome::Skipped { reason } => Some(reason.clone()),
            _ => None,
        }
    }
}

/// Kind of an underlying error cause.
///
/// These mirror the failure classes a generator evaluation can produce and are
/// preserved verbatim across crate boundaries so the cascade re-validator can
/// inspect the original failure rather than a flattened message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CauseKind {
    /// The source was not a parseable generator document.
    Parse,
    /// An uninitialized-binding access (the cascade signal).
    Reference,
    /// A catalog composition produced contradictory entries.
    CatalogConflict,
    /// An override composition produced contradictory entries.
    OverrideConflict,
    /// The generator document has an invalid shape.
    Shape,
    /// A generator-authored failure (`$fail` directive).
    Generator,
    /// Module evaluation exceeded the per-file timeout.
    Timeout,
    /// Filesystem or platform failure.
    Io,
    /// Anything else.
    Other,
}

/// An error cause preserved verbatim for inspection.
///
/// `trace` carries the chain of file paths that were being evaluated when the
/// error was raised, outermost first. It is the stack-analog consumed by
/// root-cause attribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCause {
    pub kind: CauseKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trace: Vec<String>,
}

impl ErrorCause {
    pub fn new(kind: CauseKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            trace: Vec::new(),
        }
    }

    /// Record `path` as the outermost frame of the evaluation trace.
    pub fn push_frame(mut self, path: &Path) -> Self {
        let frame = path.to_string_lossy().into_owned();
        if !self.trace.contains(&frame) {
            self.trace.insert(0, frame);
        }
        self
    }

    /// True iff this cause is a secondary failure observed because a shared
    /// module failed to initialize.
    pub fn is_cascade(&self) -> bool {
        self.kind == CauseKind::Reference
            && self.message.starts_with("Cannot access ")
            && self.message.ends_with(" before initialization")
    }

    /// True iff this cause genuinely originates in `source_path`: it is not a
    /// cascade and its trace mentions the file.
    pub fn originates_in(&self, source_path: &Path) -> bool {
        if self.is_cascade() {
            return false;
        }
        let needle = source_path.to_string_lossy();
        self.trace.iter().any(|frame| frame.contains(needle.as_ref()))
    }
}

impl std::fmt::Display for ErrorCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ErrorCause {}

/// Coerce an arbitrary payload into a printable string.
///
/// Some runtimes surface error values whose `Display` is unreliable; this
/// keeps event rendering total.
pub fn safe_error_string(value: &dyn std::fmt::Debug) -> String {
    let rendered = format!("{value:?}");
    if rendered.is_empty() {
        "unknown error".to_string()
    } else {
        rendered
    }
}

/// Severity of a validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// A structured validation finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    /// Package the issue was found in.
    pub package_name: String,
    /// Dependency the issue refers to, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependency: Option<String>,
    pub message: String,
    /// Stable rule identifier, e.g. `recompose-peer-deps`.
    pub rule: String,
}

/// A single package manifest discovered by the workspace provider.
///
/// `path` is repo-relative with forward slashes. Field names follow the
/// manifest's own camelCase spelling on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageInfo {
    pub name: String,
    /// Repo-relative directory of the manifest; filled by the provider, not
    /// present in the manifest itself.
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scripts: Option<std::collections::BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<std::collections::BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev_dependencies: Option<std::collections::BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional_dependencies: Option<std::collections::BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_dependencies: Option<std::collections::BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_dependencies_meta: Option<std::collections::BTreeMap<String, PeerMeta>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patched_dependencies: Option<std::collections::BTreeMap<String, String>>,
}

/// Per-peer metadata (`peerDependenciesMeta` in a manifest).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerMeta {
    #[serde(default)]
    pub optional: bool,
}

/// The set of discovered package manifests plus a name-keyed index.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceGraph {
    pub packages: Vec<PackageInfo>,
    pub by_name: std::collections::BTreeMap<String, PackageInfo>,
}

impl WorkspaceGraph {
    pub fn new(packages: Vec<PackageInfo>) -> Self {
        let by_name = packages
            .iter()
            .map(|p| (p.name.clone(), p.clone()))
            .collect();
        Self { packages, by_name }
    }

    /// Look up the package whose repo-relative path equals `location`.
    pub fn package_at(&self, location: &str) -> Option<&PackageInfo> {
        self.packages.iter().find(|p| p.path == location)
    }
}

/// Per-file detail row in a run summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReport {
    pub path: PathBuf,
    pub relative_path: String,
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Aggregate per-status counts for a `generate_all` or `check_all` run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
    pub files: Vec<FileReport>,
}

impl RunSummary {
    /// Record one per-file report, bumping the matching counter.
    pub fn record(&mut self, report: FileReport) {
        match report.status {
            FileStatus::Created => self.created += 1,
            FileStatus::Updated => self.updated += 1,
            FileStatus::Unchanged => self.unchanged += 1,
            FileStatus::Skipped => self.skipped += 1,
            FileStatus::Error => self.failed += 1,
        }
        self.files.push(report);
    }

    pub fn total(&self) -> usize {
        self.created + self.updated + self.unchanged + self.skipped + self.failed
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// A run event.
///
/// The core emits these through an injected [`EventSink`]; the CLI renders
/// them and embedders may persist them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: Event,
}

impl RunEvent {
    pub fn now(event: Event) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Event payload variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    FilesDiscovered {
        count: usize,
    },
    FileStarted {
        path: PathBuf,
    },
    FileCompleted {
        path: PathBuf,
        status: FileStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Complete {
        summary: RunSummary,
    },
    Error {
        message: String,
    },
}

/// Consumer of run events.
///
/// Implementations must tolerate events arriving from multiple worker
/// threads; the orchestrators serialize access through a mutex.
pub trait EventSink {
    fn emit(&mut self, event: Event);
}

/// Shared handle the orchestrators emit through.
pub type SharedSink = Arc<Mutex<dyn EventSink + Send>>;

/// Sink that discards every event.
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&mut self, _event: Event) {}
}

/// Sink that collects events in memory (test helper).
#[derive(Debug, Default)]
pub struct VecSink {
    pub events: Vec<Event>,
}

impl EventSink for VecSink {
    fn emit(&mut self, event: Event) {
        self.events.push(event);
    }
}

/// Error taxonomy shared by the orchestrators.
///
/// Per-file failures in generation are captured and accumulated; in check
/// mode only [`GenieError::Check`] is per-file, every other class is fatal.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GenieError {
    /// A generator module failed to evaluate. The original cause is preserved
    /// verbatim for cascade inspection.
    #[error("failed to load generator {}: {cause}", .path.display())]
    Import { path: PathBuf, cause: ErrorCause },

    /// Per-file generation failure (timeout, write failure, formatter
    /// failure bubble-up).
    #[error("{message}")]
    File {
        path: PathBuf,
        message: String,
        cause: ErrorCause,
    },

    /// File missing or content mismatch in check mode. Non-fatal.
    #[error("{0}")]
    Check(String),

    /// I/O-level failure surfaced by the platform.
    #[error("{0}")]
    Platform(String),

    /// One or more issues of severity `error` were reported.
    #[error("{message}")]
    Validation { message: String, issues: Vec<Issue> },

    /// Aggregate generation failure.
    #[error("{message}")]
    GenerationFailed {
        failed_count: usize,
        message: String,
        files: Vec<FileReport>,
    },
}

impl GenieError {
    /// The preserved cause, for the error classes that carry one.
    pub fn cause(&self) -> Option<&ErrorCause> {
        match self {
            GenieError::Import { cause, .. } | GenieError::File { cause, .. } => Some(cause),
            _ => None,
        }
    }

    /// In check mode, everything except a content finding is fatal.
    pub fn is_fatal_in_check(&self) -> bool {
        !matches!(self, GenieError::Check(_))
    }
}
