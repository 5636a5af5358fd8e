//! Workspace validation for Genie.
//!
//! After a successful generation or check pass, the validation runner builds
//! the workspace graph, invokes each generator's `validate` operation, and
//! runs the built-in validator plugins. Issues are aggregated across the
//! whole pass; the run fails only after every validator has reported, so the
//! user sees all findings in one report.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use genie_module::{LoadedGenerator, ModuleRegistry, load_generator};
use genie_paths::base_name;
use genie_types::{GenieError, Issue, PackageInfo, Severity, WorkspaceGraph};
use genie_workspace::{build_workspace_graph, discover_package_manifests, select_provider};

/// Env toggle requiring `package.json` generators to expose `validate`.
pub const REQUIRE_VALIDATE_ENV: &str = "GENIE_REQUIRE_PACKAGE_JSON_VALIDATE";

/// Dependency spec prefixes that resolve inside the workspace.
const WORKSPACE_SPEC_PREFIXES: [&str; 3] = ["workspace:", "file:", "link:"];

/// Options for one validation pass.
#[derive(Debug, Clone, Default)]
pub struct ValidationOptions {
    /// Fail `package.json` generators that lack a `validate` operation.
    pub require_package_json_validate: bool,
    /// Package-name globs excluded from the recomposition rule.
    pub exclude: Vec<String>,
}

impl ValidationOptions {
    /// Read the policy toggles from the environment.
    pub fn from_env() -> Self {
        Self {
            require_package_json_validate: std::env::var(REQUIRE_VALIDATE_ENV)
                .map(|v| v == "1")
                .unwrap_or(false),
            exclude: Vec::new(),
        }
    }
}

/// Scope a plugin runs at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginScope {
    /// Runs once per `package.json` target.
    PackageJson,
    /// Runs once over the whole workspace.
    All,
}

/// Context handed to validator plugins.
#[derive(Debug)]
pub struct PluginContext<'a> {
    pub cwd: &'a Path,
    pub workspace: &'a WorkspaceGraph,
}

/// An out-of-core validator.
///
/// A plugin failure does not abort the pass: it degrades to a single
/// `error`-severity issue with rule `validation-plugin-error`.
pub trait ValidatorPlugin {
    fn name(&self) -> &str;
    fn scope(&self) -> PluginScope;
    fn validate(&self, ctx: &PluginContext<'_>) -> Result<Vec<Issue>>;
}

/// Run the validation pass.
///
/// `preloaded` generators (from check mode) are reused so no source is
/// evaluated twice; missing entries are loaded through `registry`. Returns
/// every issue found; fails when any issue has severity `error`.
pub fn run_validation(
    cwd: &Path,
    sources: &[PathBuf],
    preloaded: &HashMap<PathBuf, LoadedGenerator>,
    registry: &ModuleRegistry,
    options: &ValidationOptions,
) -> Result<Vec<Issue>, GenieError> {
    let provider =
        select_provider(cwd).map_err(|e| GenieError::Platform(e.to_string()))?;
    let manifests = discover_package_manifests(cwd, provider)
        .map_err(|e| GenieError::Platform(e.to_string()))?;
    let graph = build_workspace_graph(cwd, &manifests)
        .map_err(|e| GenieError::Platform(e.to_string()))?;

    let mut issues = Vec::new();

    for source in sources {
        let loaded = match preloaded.get(source) {
            Some(loaded) => Some(loaded.clone()),
            None => match load_generator(source, cwd, registry) {
                Ok(loaded) => Some(loaded),
                Err(cause) => {
                    issues.push(Issue {
                        severity: Severity::Error,
                        package_name: location_of(source, cwd),
                        dependency: None,
                        message: format!(
                            "failed to load generator for validation: {}",
                            cause.message
                        ),
                        rule: "validation-import".to_string(),
                    });
                    None
                }
            },
        };

        let Some(mut loaded) = loaded else { continue };
        loaded.ctx.workspace = Some(graph.clone());

        if loaded.has_validate() {
            issues.extend(loaded.validate());
        } else if base_name(&loaded.target) == "package.json"
            && options.require_package_json_validate
        {
            issues.push(Issue {
                severity: Severity::Error,
                package_name: package_name_of_target(&loaded.target),
                dependency: None,
                message: "package.json generator must expose a validate operation"
                    .to_string(),
                rule: "package-json-validate-missing".to_string(),
            });
        }
    }

    let plugins = builtin_plugins(options);
    let ctx = PluginContext {
        cwd,
        workspace: &graph,
    };
    for plugin in &plugins {
        match plugin.validate(&ctx) {
            Ok(found) => issues.extend(found),
            Err(e) => issues.push(Issue {
                severity: Severity::Error,
                package_name: "unknown".to_string(),
                dependency: None,
                message: format!("validator '{}' failed: {e}", plugin.name()),
                rule: "validation-plugin-error".to_string(),
            }),
        }
    }

    let error_count = issues
        .iter()
        .filter(|i| i.severity == Severity::Error)
        .count();
    if error_count > 0 {
        return Err(GenieError::Validation {
            message: format_issue_report(&issues, error_count),
            issues,
        });
    }
    Ok(issues)
}

fn builtin_plugins(options: &ValidationOptions) -> Vec<Box<dyn ValidatorPlugin>> {
    vec![Box::new(RecompositionPlugin::new(options.exclude.clone()))]
}

fn location_of(source: &Path, cwd: &Path) -> String {
    let root = genie_paths::find_repo_root(source.parent().unwrap_or(cwd), cwd);
    genie_paths::compute_location(source, &root)
}

/// Package name taken from the existing target, or `"unknown"`.
fn package_name_of_target(target: &Path) -> String {
    std::fs::read_to_string(target)
        .ok()
        .and_then(|text| serde_json::from_str::<serde_json::Value>(&text).ok())
        .and_then(|value| value.get("name").and_then(|n| n.as_str().map(String::from)))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Multi-line error report, issues grouped by package.
fn format_issue_report(issues: &[Issue], error_count: usize) -> String {
    let mut by_package: Vec<(&str, Vec<&Issue>)> = Vec::new();
    for issue in issues {
        match by_package
            .iter()
            .position(|(name, _)| *name == issue.package_name)
        {
            Some(idx) => by_package[idx].1.push(issue),
            None => by_package.push((issue.package_name.as_str(), vec![issue])),
        }
    }

    let mut report = format!("validation failed with {error_count} error(s):\n");
    for (package, list) in by_package {
        report.push_str(&format!("\n{package}:\n"));
        for issue in list {
            let dependency = issue
                .dependency
                .as_deref()
                .map(|d| format!(" (dependency: {d})"))
                .unwrap_or_default();
            report.push_str(&format!(
                "  {}[{}] {}{}\n",
                issue.severity, issue.rule, issue.message, dependency
            ));
        }
    }
    report
}

/// Built-in recomposition rule.
///
/// Downstream packages that consume a workspace package via a `workspace:`,
/// `file:` or `link:` spec must re-declare the upstream's peer dependencies,
/// preserve `optional` peer metadata, and carry the upstream's patched
/// dependencies. Private downstream packages may satisfy a peer through any
/// dependency block.
pub struct RecompositionPlugin {
    exclude: Vec<String>,
}

impl RecompositionPlugin {
    pub fn new(exclude: Vec<String>) -> Self {
        Self { exclude }
    }

    fn exclusion_set(&self) -> Result<GlobSet> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.exclude {
            builder.add(GlobBuilder::new(pattern).literal_separator(false).build()?);
        }
        Ok(builder.build()?)
    }
}

impl ValidatorPlugin for RecompositionPlugin {
    fn name(&self) -> &str {
        "recomposition"
    }

    fn scope(&self) -> PluginScope {
        PluginScope::All
    }

    fn validate(&self, ctx: &PluginContext<'_>) -> Result<Vec<Issue>> {
        let excluded = self.exclusion_set()?;
        let mut issues = Vec::new();

        for package in &ctx.workspace.packages {
            if excluded.is_match(&package.name) {
                continue;
            }
            for upstream in workspace_dependencies(package, ctx.workspace) {
                check_recomposition(package, upstream, &mut issues);
            }
        }
        Ok(issues)
    }
}

/// Workspace packages this package consumes through local specs.
fn workspace_dependencies<'a>(
    package: &PackageInfo,
    workspace: &'a WorkspaceGraph,
) -> Vec<&'a PackageInfo> {
    let mut upstreams = Vec::new();
    let blocks = [
        package.dependencies.as_ref(),
        package.optional_dependencies.as_ref(),
    ];

    for block in blocks.into_iter().flatten() {
        for (name, spec) in block {
            if !WORKSPACE_SPEC_PREFIXES.iter().any(|p| spec.starts_with(p)) {
                continue;
            }
            if let Some(upstream) = workspace.by_name.get(name) {
                if upstream.name != package.name && !upstreams.iter().any(|u: &&PackageInfo| u.name == upstream.name) {
                    upstreams.push(upstream);
                }
            }
        }
    }
    upstreams
}

fn declares_peer(package: &PackageInfo, peer: &str, allow_any_block: bool) -> bool {
    let in_peers = package
        .peer_dependencies
        .as_ref()
        .is_some_and(|d| d.contains_key(peer));
    if in_peers || !allow_any_block {
        return in_peers;
    }
    package
        .dependencies
        .as_ref()
        .is_some_and(|d| d.contains_key(peer))
        || package
            .dev_dependencies
            .as_ref()
            .is_some_and(|d| d.contains_key(peer))
}

fn check_recomposition(package: &PackageInfo, upstream: &PackageInfo, issues: &mut Vec<Issue>) {
    let private = package.private.unwrap_or(false);

    if let Some(peers) = &upstream.peer_dependencies {
        for peer in peers.keys() {
            if !declares_peer(package, peer, private) {
                issues.push(Issue {
                    severity: Severity::Error,
                    package_name: package.name.clone(),
                    dependency: Some(peer.clone()),
                    message: format!(
                        "must re-declare peer dependency '{peer}' of workspace dependency '{}'",
                        upstream.name
                    ),
                    rule: "recompose-peer-deps".to_string(),
                });
                continue;
            }

            let upstream_optional = upstream
                .peer_dependencies_meta
                .as_ref()
                .and_then(|meta| meta.get(peer))
                .map(|m| m.optional)
                .unwrap_or(false);
            if upstream_optional {
                let downstream_optional = package
                    .peer_dependencies_meta
                    .as_ref()
                    .and_then(|meta| meta.get(peer))
                    .map(|m| m.optional)
                    .unwrap_or(false);
                if !downstream_optional {
                    issues.push(Issue {
                        severity: Severity::Error,
                        package_name: package.name.clone(),
                        dependency: Some(peer.clone()),
                        message: format!(
                            "peer dependency '{peer}' of '{}' is optional upstream; mark it optional here too",
                            upstream.name
                        ),
                        rule: "recompose-peer-meta".to_string(),
                    });
                }
            }
        }
    }

    if let Some(patches) = &upstream.patched_dependencies {
        for (patched, patch_file) in patches {
            let carried = package
                .patched_dependencies
                .as_ref()
                .is_some_and(|p| p.contains_key(patched));
            if !carried {
                issues.push(Issue {
                    severity: Severity::Error,
                    package_name: package.name.clone(),
                    dependency: Some(patched.clone()),
                    message: format!(
                        "must include patched dependency '{patched}' ({patch_file}) of workspace dependency '{}'",
                        upstream.name
                    ),
                    rule: "recompose-patches".to_string(),
                });
            }
        }
    }
}
