//! Expected-content builder for Genie.
//!
//! Turns a loaded generator into the final target bytes: invoke `stringify`,
//! enrich the `$genie` provenance marker for `package.json` targets, prepend
//! the syntax-appropriate "DO NOT EDIT" prologue, and run the formatter.
//!
//! The prologue names the generator source's *basename*, not a relative
//! path, so runs from nested working directories produce identical bytes.

use std::path::{Path, PathBuf};

use genie_format::format_content;
use genie_module::{LoadedGenerator, ModuleRegistry, load_generator};
use genie_paths::{base_name, extension};
use genie_types::ErrorCause;

/// Warning text embedded in the `$genie` marker.
pub const GENIE_MARKER_WARNING: &str = "DO NOT EDIT - changes will be overwritten";

/// Expected bytes for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedContent {
    pub target: PathBuf,
    pub bytes: Vec<u8>,
}

/// Where a build failed, so orchestrators can shape the error class.
#[derive(Debug, Clone)]
pub enum BuildError {
    /// The generator module failed to evaluate.
    Load(ErrorCause),
    /// The loaded generator failed to produce content.
    Render(ErrorCause),
}

impl BuildError {
    pub fn cause(&self) -> &ErrorCause {
        match self {
            BuildError::Load(cause) | BuildError::Render(cause) => cause,
        }
    }
}

/// Build the expected bytes for `source`.
///
/// `preloaded` short-circuits module evaluation (check mode hands the
/// already-loaded generator back in so no source is evaluated twice).
pub fn build_expected(
    source: &Path,
    cwd: &Path,
    formatter_config: Option<&Path>,
    registry: &ModuleRegistry,
    preloaded: Option<&LoadedGenerator>,
) -> Result<ExpectedContent, BuildError> {
    let owned;
    let loaded = match preloaded {
        Some(loaded) => loaded,
        None => {
            owned = load_generator(source, cwd, registry).map_err(BuildError::Load)?;
            &owned
        }
    };

    let raw = loaded.stringify().map_err(BuildError::Render)?;

    let target = loaded.target.clone();
    let source_basename = base_name(source);

    let enriched = if base_name(&target) == "package.json" {
        enrich_genie_marker(&raw, &source_basename)
    } else {
        raw
    };

    let header = prologue(&target, &source_basename);
    let formatted = format_content(&target, &enriched, formatter_config);

    let mut bytes = Vec::with_capacity(header.len() + formatted.len());
    bytes.extend_from_slice(header.as_bytes());
    bytes.extend_from_slice(formatted.as_bytes());

    Ok(ExpectedContent { target, bytes })
}

/// The "DO NOT EDIT" prologue for a target, selected by extension and
/// basename.
///
/// Plain `.json` targets get no comment prologue; their provenance marker is
/// the in-document `$genie` object instead.
pub fn prologue(target: &Path, source_basename: &str) -> String {
    let name = base_name(target);
    let ext = extension(target);

    let line_comment = format!(
        "// Generated file - DO NOT EDIT\n// Source: {source_basename}\n"
    );

    if name.starts_with("tsconfig") && ext == "json" {
        return line_comment;
    }
    match ext.as_str() {
        "jsonc" => line_comment,
        "json" => String::new(),
        "yml" | "yaml" => format!(
            "# Generated file - DO NOT EDIT\n# Source: {source_basename}\n\n"
        ),
        _ => line_comment,
    }
}

/// Replace the value of a top-level `$genie` key with the provenance marker.
///
/// Applied only to `package.json` targets whose raw output parses as a JSON
/// object containing the key; parse failures leave the raw content untouched.
pub fn enrich_genie_marker(raw: &str, source_basename: &str) -> String {
    let Ok(mut value) = serde_json::from_str::<serde_json::Value>(raw) else {
        return raw.to_string();
    };
    let Some(object) = value.as_object_mut() else {
        return raw.to_string();
    };
    if !object.contains_key("$genie") {
        return raw.to_string();
    }

    object.insert(
        "$genie".to_string(),
        serde_json::json!({
            "source": source_basename,
            "warning": GENIE_MARKER_WARNING,
        }),
    );

    match serde_json::to_string_pretty(&value) {
        Ok(mut text) => {
            text.push('\n');
            text
        }
        Err(_) => raw.to_string(),
    }
}

/// A one-line summary of how `current` differs from `expected`.
///
/// Net line growth reports `(+N lines)`, net shrinkage `(-N lines)`, and an
/// equal-length rewrite `(content changed)`.
pub fn diff_summary(current: &[u8], expected: &[u8]) -> String {
    let current_lines = count_lines(current);
    let expected_lines = count_lines(expected);
    match expected_lines.cmp(&current_lines) {
        std::cmp::Ordering::Greater => format!("(+{} lines)", expected_lines - current_lines),
        std::cmp::Ordering::Less => format!("(-{} lines)", current_lines - expected_lines),
        std::cmp::Ordering::Equal => "(content changed)".to_string(),
    }
}

fn count_lines(bytes: &[u8]) -> usize {
    bytes.iter().filter(|b| **b == b'\n').count()
}
