//! Workspace providers for Genie.
//!
//! A provider discovers package manifests under a working directory. The
//! provider is selected by the `GENIE_WORKSPACE_PROVIDER` environment
//! variable (`pnpm`, `bun`, `manual`); without an override, the presence of
//! any `pnpm-workspace.yaml` selects `pnpm`, otherwise `manual`.
//!
//! # Example
//!
//! ```no_run
//! use genie_workspace::{build_workspace_graph, discover_package_manifests, select_provider};
//! use std::path::Path;
//!
//! let cwd = Path::new(".");
//! let provider = select_provider(cwd).expect("select provider");
//! let manifests = discover_package_manifests(cwd, provider).expect("discover");
//! let graph = build_workspace_graph(cwd, &manifests).expect("graph");
//! println!("{} workspace packages", graph.packages.len());
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use walkdir::WalkDir;

use genie_discovery::is_skipped_dir;
use genie_paths::to_forward_slashes;
use genie_types::{PackageInfo, PeerMeta, WorkspaceGraph};

/// Environment variable overriding provider detection.
pub const PROVIDER_ENV: &str = "GENIE_WORKSPACE_PROVIDER";

/// pnpm workspace marker file.
pub const PNPM_WORKSPACE_FILE: &str = "pnpm-workspace.yaml";

/// Package manifest file name.
pub const MANIFEST_FILE: &str = "package.json";

/// Which package-graph source to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// `pnpm-workspace.yaml` pattern matching.
    Pnpm,
    /// Reserved; selection fails with "not implemented".
    Bun,
    /// Every `package.json` under the working directory.
    Manual,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Pnpm => write!(f, "pnpm"),
            ProviderKind::Bun => write!(f, "bun"),
            ProviderKind::Manual => write!(f, "manual"),
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pnpm" => Ok(ProviderKind::Pnpm),
            "bun" => Ok(ProviderKind::Bun),
            "manual" => Ok(ProviderKind::Manual),
            other => bail!("unknown workspace provider: {}", other),
        }
    }
}

/// Select the provider for `cwd`.
///
/// Precedence: explicit env override, then `pnpm-workspace.yaml` detection,
/// then manual. The reserved `bun` provider fails here so the error surfaces
/// before any discovery work.
pub fn select_provider(cwd: &Path) -> Result<ProviderKind> {
    if let Ok(name) = std::env::var(PROVIDER_ENV) {
        let kind: ProviderKind = name.parse()?;
        if kind == ProviderKind::Bun {
            bail!("workspace provider 'bun' is not implemented");
        }
        return Ok(kind);
    }

    if !find_workspace_files(cwd)?.is_empty() {
        return Ok(ProviderKind::Pnpm);
    }
    Ok(ProviderKind::Manual)
}

/// Enumerate package manifests under `cwd` with the given provider.
pub fn discover_package_manifests(cwd: &Path, kind: ProviderKind) -> Result<Vec<PathBuf>> {
    match kind {
        ProviderKind::Pnpm => pnpm_manifests(cwd),
        ProviderKind::Bun => bail!("workspace provider 'bun' is not implemented"),
        ProviderKind::Manual => manual_manifests(cwd),
    }
}

/// Every `package.json` under `cwd`, honoring the discovery skip set.
fn manual_manifests(cwd: &Path) -> Result<Vec<PathBuf>> {
    walk_files_named(cwd, MANIFEST_FILE)
}

/// Manifests selected by `pnpm-workspace.yaml` package patterns.
///
/// Candidate directories are matched by their path relative to the directory
/// of the workspace file whose patterns are being applied. `*` matches one
/// path segment, `**` any number of segments.
fn pnpm_manifests(cwd: &Path) -> Result<Vec<PathBuf>> {
    let workspace_files = find_workspace_files(cwd)?;
    if workspace_files.is_empty() {
        bail!(
            "no {} found under {}",
            PNPM_WORKSPACE_FILE,
            cwd.display()
        );
    }

    let candidates = walk_files_named(cwd, MANIFEST_FILE)?;
    let mut selected = Vec::new();

    for workspace_file in &workspace_files {
        let yaml = fs::read_to_string(workspace_file)
            .with_context(|| format!("failed to read {}", workspace_file.display()))?;
        let patterns = parse_workspace_packages(&yaml);
        if patterns.is_empty() {
            continue;
        }
        let matcher = build_pattern_set(&patterns)
            .with_context(|| format!("invalid patterns in {}", workspace_file.display()))?;
        let base = workspace_file.parent().unwrap_or(cwd);

        for manifest in &candidates {
            let dir = manifest.parent().unwrap_or(cwd);
            let Ok(relative) = dir.strip_prefix(base) else {
                continue;
            };
            let rendered = to_forward_slashes(relative);
            if matcher.is_match(&rendered) && !selected.contains(manifest) {
                selected.push(manifest.clone());
            }
        }
    }

    Ok(selected)
}

fn build_pattern_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        // literal_separator keeps `*` within one path segment; `**` still
        // spans any number of segments.
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .with_context(|| format!("invalid workspace pattern: {}", pattern))?;
        builder.add(glob);
    }
    builder.build().context("failed to build workspace pattern set")
}

/// All `pnpm-workspace.yaml` files under `cwd`.
pub fn find_workspace_files(cwd: &Path) -> Result<Vec<PathBuf>> {
    walk_files_named(cwd, PNPM_WORKSPACE_FILE)
}

fn walk_files_named(cwd: &Path, file_name: &str) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let walker = WalkDir::new(cwd).into_iter().filter_entry(|entry| {
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            return true;
        }
        entry
            .file_name()
            .to_str()
            .map(|name| !is_skipped_dir(name))
            .unwrap_or(true)
    });

    for entry in walker {
        let entry =
            entry.with_context(|| format!("failed to walk directory {}", cwd.display()))?;
        if entry.file_type().is_file() && entry.file_name() == file_name {
            found.push(entry.into_path());
        }
    }
    found.sort();
    Ok(found)
}

/// Parse the `packages:` list out of a `pnpm-workspace.yaml`.
///
/// Tolerant minimal parser: supports the flow style
/// `packages: ["a/*", "b"]` and the block style with `- item` lines.
/// Quotes are optional, unknown keys are ignored, and a missing `packages`
/// key yields an empty list.
pub fn parse_workspace_packages(yaml: &str) -> Vec<String> {
    let mut patterns = Vec::new();
    let mut in_packages_block = false;

    for raw_line in yaml.lines() {
        let line = strip_comment(raw_line);
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if let Some(rest) = trimmed.strip_prefix("packages:") {
            let rest = rest.trim();
            if let Some(flow) = rest.strip_prefix('[') {
                let flow = flow.strip_suffix(']').unwrap_or(flow);
                for item in flow.split(',') {
                    push_pattern(&mut patterns, item);
                }
                in_packages_block = false;
            } else {
                in_packages_block = rest.is_empty();
            }
            continue;
        }

        if in_packages_block {
            if let Some(item) = trimmed.strip_prefix('-') {
                push_pattern(&mut patterns, item);
            } else {
                // Any other key ends the block.
                in_packages_block = false;
            }
        }
    }

    patterns
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

fn push_pattern(patterns: &mut Vec<String>, raw: &str) {
    let cleaned = raw.trim().trim_matches('"').trim_matches('\'').trim();
    if !cleaned.is_empty() {
        patterns.push(cleaned.to_string());
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawManifest {
    name: Option<String>,
    private: Option<bool>,
    scripts: Option<BTreeMap<String, String>>,
    dependencies: Option<BTreeMap<String, String>>,
    dev_dependencies: Option<BTreeMap<String, String>>,
    optional_dependencies: Option<BTreeMap<String, String>>,
    peer_dependencies: Option<BTreeMap<String, String>>,
    peer_dependencies_meta: Option<BTreeMap<String, PeerMeta>>,
    patched_dependencies: Option<BTreeMap<String, String>>,
    pnpm: Option<PnpmSection>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PnpmSection {
    patched_dependencies: Option<BTreeMap<String, String>>,
}

/// Build the workspace graph by reading each manifest as JSON.
///
/// Manifests without a `name` are skipped. Paths are relative to `cwd`,
/// forward-slashed, `"."` for `cwd` itself.
pub fn build_workspace_graph(cwd: &Path, manifests: &[PathBuf]) -> Result<WorkspaceGraph> {
    let mut packages = Vec::new();

    for manifest in manifests {
        let text = fs::read_to_string(manifest)
            .with_context(|| format!("failed to read manifest {}", manifest.display()))?;
        let raw: RawManifest = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse manifest {}", manifest.display()))?;

        let Some(name) = raw.name else {
            continue;
        };

        let dir = manifest.parent().unwrap_or(cwd);
        let relative = dir.strip_prefix(cwd).unwrap_or(dir);
        let rendered = to_forward_slashes(relative);
        let path = if rendered.is_empty() {
            ".".to_string()
        } else {
            rendered
        };

        let patched = raw
            .patched_dependencies
            .or(raw.pnpm.and_then(|p| p.patched_dependencies));

        packages.push(PackageInfo {
            name,
            path,
            private: raw.private,
            scripts: raw.scripts,
            dependencies: raw.dependencies,
            dev_dependencies: raw.dev_dependencies,
            optional_dependencies: raw.optional_dependencies,
            peer_dependencies: raw.peer_dependencies,
            peer_dependencies_meta: raw.peer_dependencies_meta,
            patched_dependencies: patched,
        });
    }

    Ok(WorkspaceGraph::new(packages))
}
