//! Generator document loading and evaluation for Genie.
//!
//! A generator source is a JSON *generator document*: data-as-code with an
//! `emit` operation producing the raw target content, an optional `data`
//! export for cross-generator composition, optional declarative `validate`
//! rules, and `imports` of other generator modules.
//!
//! Imported modules are evaluated through a per-run [`ModuleRegistry`]. A
//! module that fails to evaluate poisons its registry entry: the first
//! evaluator observes the genuine error, and every later accessor observes a
//! reference-kind error whose message matches
//! `Cannot access '<alias>' before initialization`, the cascade signal the
//! orchestrator uses for root-cause attribution.
//!
//! # Example document
//!
//! ```json
//! {
//!   "imports": { "shared": "../shared/versions.genie.ts" },
//!   "emit": {
//!     "kind": "json",
//!     "value": {
//!       "name": "@acme/{{location}}",
//!       "dependencies": { "$catalog": [{ "$import": "shared" }, { "react": "^19.0.0" }] }
//!     }
//!   }
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Deserialize;
use serde_json::{Map, Value};

use genie_paths::{compute_location, find_repo_root, normalize_lexically};
use genie_types::{CauseKind, ErrorCause, Issue, Severity, WorkspaceGraph};

/// Evaluation context handed to generator operations.
#[derive(Debug, Clone, Default)]
pub struct GeneratorContext {
    pub cwd: PathBuf,
    /// Package-relative location of the target under the repo root,
    /// forward-slashed, `"."` for the repo root.
    pub location: String,
    /// Workspace graph, present during validation.
    pub workspace: Option<WorkspaceGraph>,
}

/// The `emit` operation of a generator document.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Emit {
    /// Two-space-indented JSON plus trailing newline.
    Json { value: Value },
    /// Lines joined with `\n` plus trailing newline.
    Text { lines: Vec<String> },
    /// Raw template string, emitted as-is after substitution.
    Template { template: String },
}

/// Declarative validation rules a generator may expose.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "rule", rename_all = "kebab-case")]
pub enum ValidateRule {
    /// The package at the generator's location must declare `dependency`.
    RequireDependency { dependency: String },
    /// The package at the generator's location must not declare `dependency`.
    ForbidDependency { dependency: String },
    /// The package at the generator's location must define `script`.
    RequireScript { script: String },
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    #[serde(default)]
    imports: BTreeMap<String, String>,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    emit: Option<Emit>,
    #[serde(default)]
    validate: Option<Vec<ValidateRule>>,
}

/// A generator whose document evaluated successfully.
#[derive(Debug, Clone)]
pub struct LoadedGenerator {
    pub source: PathBuf,
    pub target: PathBuf,
    pub ctx: GeneratorContext,
    emit: Emit,
    data: Option<Value>,
    validate: Option<Vec<ValidateRule>>,
    /// alias -> imported module exports, resolved at load time.
    imports: BTreeMap<String, Value>,
}

impl LoadedGenerator {
    /// Structured export for cross-generator composition.
    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    /// Whether the generator exposes a `validate` operation.
    pub fn has_validate(&self) -> bool {
        self.validate.is_some()
    }

    /// Produce the raw target content (pre-format, pre-header).
    ///
    /// Deterministic for a fixed `(document, ctx)`.
    pub fn stringify(&self) -> Result<String, ErrorCause> {
        let rendered = match &self.emit {
            Emit::Json { value } => {
                let resolved = resolve_value(value, &self.imports)
                    .map_err(|e| e.push_frame(&self.source))?;
                let interpolated = interpolate_value(&resolved, &self.ctx);
                let mut text = serde_json::to_string_pretty(&interpolated).map_err(|e| {
                    ErrorCause::new(CauseKind::Other, format!("failed to render JSON: {e}"))
                        .push_frame(&self.source)
                })?;
                text.push('\n');
                text
            }
            Emit::Text { lines } => {
                if lines.is_empty() {
                    String::new()
                } else {
                    let mut text = lines
                        .iter()
                        .map(|line| interpolate(line, &self.ctx))
                        .collect::<Vec<_>>()
                        .join("\n");
                    text.push('\n');
                    text
                }
            }
            Emit::Template { template } => interpolate(template, &self.ctx),
        };
        Ok(rendered)
    }

    /// Run the generator's `validate` rules against the workspace in ctx.
    pub fn validate(&self) -> Vec<Issue> {
        let Some(rules) = &self.validate else {
            return Vec::new();
        };
        let Some(workspace) = &self.ctx.workspace else {
            return Vec::new();
        };

        let package = workspace.package_at(&self.ctx.location);
        let package_name = package
            .map(|p| p.name.clone())
            .unwrap_or_else(|| self.ctx.location.clone());

        let mut issues = Vec::new();
        for rule in rules {
            match rule {
                ValidateRule::RequireDependency { dependency } => {
                    let declared = package.is_some_and(|p| {
                        p.dependencies
                            .as_ref()
                            .is_some_and(|d| d.contains_key(dependency))
                    });
                    if !declared {
                        issues.push(Issue {
                            severity: Severity::Error,
                            package_name: package_name.clone(),
                            dependency: Some(dependency.clone()),
                            message: format!("missing required dependency '{dependency}'"),
                            rule: "require-dependency".to_string(),
                        });
                    }
                }
                ValidateRule::ForbidDependency { dependency } => {
                    let declared = package.is_some_and(|p| {
                        p.dependencies
                            .as_ref()
                            .is_some_and(|d| d.contains_key(dependency))
                    });
                    if declared {
                        issues.push(Issue {
                            severity: Severity::Error,
                            package_name: package_name.clone(),
                            dependency: Some(dependency.clone()),
                            message: format!("dependency '{dependency}' is forbidden here"),
                            rule: "forbid-dependency".to_string(),
                        });
                    }
                }
                ValidateRule::RequireScript { script } => {
                    let defined = package.is_some_and(|p| {
                        p.scripts
                            .as_ref()
                            .is_some_and(|s| s.contains_key(script))
                    });
                    if !defined {
                        issues.push(Issue {
                            severity: Severity::Error,
                            package_name: package_name.clone(),
                            dependency: None,
                            message: format!("missing required script '{script}'"),
                            rule: "require-script".to_string(),
                        });
                    }
                }
            }
        }
        issues
    }
}

/// Per-run module evaluation cache.
///
/// The registry is the analog of the host module cache: each run creates a
/// fresh one, so generator source is always re-evaluated per run, while
/// modules shared *within* a run evaluate exactly once.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: Mutex<HashMap<PathBuf, ModuleState>>,
    /// Serializes module-subgraph evaluation so exactly one evaluator
    /// observes a failing module's genuine error.
    eval_lock: Mutex<()>,
    evaluations: Mutex<usize>,
}

#[derive(Debug, Clone)]
enum ModuleState {
    Ready(Value),
    Poisoned,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of module files evaluated through this registry (test hook for
    /// evaluation-reuse guarantees).
    pub fn evaluation_count(&self) -> usize {
        *self.evaluations.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn bump_evaluations(&self) {
        *self.evaluations.lock().unwrap_or_else(|e| e.into_inner()) += 1;
    }

    fn lookup(&self, path: &Path) -> Option<ModuleState> {
        self.modules
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .cloned()
    }

    fn store(&self, path: &Path, state: ModuleState) {
        self.modules
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.to_path_buf(), state);
    }

    fn resolve_import(
        &self,
        importer: &Path,
        alias: &str,
        relative: &str,
    ) -> Result<Value, ErrorCause> {
        let base = importer.parent().unwrap_or(Path::new(""));
        let path = normalize_lexically(&base.join(relative));
        let _guard = self.eval_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut chain = vec![importer.to_path_buf()];
        self.evaluate_module(&path, alias, &mut chain)
    }

    fn evaluate_module(
        &self,
        path: &Path,
        alias: &str,
        chain: &mut Vec<PathBuf>,
    ) -> Result<Value, ErrorCause> {
        match self.lookup(path) {
            Some(ModuleState::Ready(value)) => return Ok(value),
            Some(ModuleState::Poisoned) => return Err(uninitialized_binding(alias)),
            None => {}
        }

        if chain.contains(&path.to_path_buf()) {
            // An import cycle behaves exactly like an uninitialized binding.
            return Err(uninitialized_binding(alias));
        }
        chain.push(path.to_path_buf());

        let result = self.evaluate_module_inner(path, chain);
        chain.pop();

        match result {
            Ok(value) => {
                self.store(path, ModuleState::Ready(value.clone()));
                Ok(value)
            }
            Err(cause) => {
                self.store(path, ModuleState::Poisoned);
                Err(cause.push_frame(path))
            }
        }
    }

    fn evaluate_module_inner(
        &self,
        path: &Path,
        chain: &mut Vec<PathBuf>,
    ) -> Result<Value, ErrorCause> {
        self.bump_evaluations();
        let raw = read_document(path)?;

        let mut imports = BTreeMap::new();
        let base = path.parent().unwrap_or(Path::new(""));
        for (alias, relative) in &raw.imports {
            let dep = normalize_lexically(&base.join(relative));
            let value = self.evaluate_module(&dep, alias, chain)?;
            imports.insert(alias.clone(), value);
        }

        match raw.data {
            Some(data) => resolve_value(&data, &imports),
            None => Ok(Value::Null),
        }
    }
}

fn uninitialized_binding(alias: &str) -> ErrorCause {
    ErrorCause::new(
        CauseKind::Reference,
        format!("Cannot access '{alias}' before initialization"),
    )
}

fn read_document(path: &Path) -> Result<RawDocument, ErrorCause> {
    let text = fs::read_to_string(path).map_err(|e| {
        ErrorCause::new(
            CauseKind::Io,
            format!("failed to read {}: {e}", path.display()),
        )
    })?;
    serde_json::from_str(&text).map_err(|e| {
        ErrorCause::new(
            CauseKind::Parse,
            format!("invalid generator document {}: {e}", path.display()),
        )
    })
}

/// Load a generator source, evaluating its document and imports.
///
/// `registry` must be the run's shared registry; causes are preserved
/// verbatim and carry the evaluation trace.
pub fn load_generator(
    source: &Path,
    cwd: &Path,
    registry: &ModuleRegistry,
) -> Result<LoadedGenerator, ErrorCause> {
    let Some(target) = genie_paths::target_path(source) else {
        return Err(ErrorCause::new(
            CauseKind::Shape,
            format!("not a generator source: {}", source.display()),
        ));
    };

    registry.bump_evaluations();
    let raw = read_document(source).map_err(|e| e.push_frame(source))?;

    let Some(emit) = raw.emit else {
        return Err(ErrorCause::new(
            CauseKind::Shape,
            format!(
                "generator document {} must expose an emit operation",
                source.display()
            ),
        )
        .push_frame(source));
    };

    let mut imports = BTreeMap::new();
    for (alias, relative) in &raw.imports {
        let value = registry
            .resolve_import(source, alias, relative)
            .map_err(|e| e.push_frame(source))?;
        imports.insert(alias.clone(), value);
    }

    let data = match raw.data {
        Some(data) => {
            Some(resolve_value(&data, &imports).map_err(|e| e.push_frame(source))?)
        }
        None => None,
    };

    let start_dir = source.parent().unwrap_or(cwd);
    let repo_root = find_repo_root(start_dir, cwd);
    let location = compute_location(source, &repo_root);

    Ok(LoadedGenerator {
        source: source.to_path_buf(),
        target,
        ctx: GeneratorContext {
            cwd: cwd.to_path_buf(),
            location,
            workspace: None,
        },
        emit,
        data,
        validate: raw.validate,
        imports,
    })
}

/// Resolve composition directives inside a value tree.
///
/// Directives are single-key objects (plus options):
/// `$import`, `$catalog`, `$overrides`, `$fail`.
fn resolve_value(value: &Value, imports: &BTreeMap<String, Value>) -> Result<Value, ErrorCause> {
    match value {
        Value::Object(map) => {
            if let Some(directive) = resolve_directive(map, imports)? {
                return Ok(directive);
            }
            let mut resolved = Map::new();
            for (key, entry) in map {
                resolved.insert(key.clone(), resolve_value(entry, imports)?);
            }
            Ok(Value::Object(resolved))
        }
        Value::Array(items) => {
            let mut resolved = Vec::with_capacity(items.len());
            for item in items {
                resolved.push(resolve_value(item, imports)?);
            }
            Ok(Value::Array(resolved))
        }
        other => Ok(other.clone()),
    }
}

fn resolve_directive(
    map: &Map<String, Value>,
    imports: &BTreeMap<String, Value>,
) -> Result<Option<Value>, ErrorCause> {
    if let Some(alias) = map.get("$import") {
        let Some(alias) = alias.as_str() else {
            return Err(ErrorCause::new(CauseKind::Shape, "$import expects an alias string"));
        };
        let Some(exported) = imports.get(alias) else {
            return Err(ErrorCause::new(
                CauseKind::Shape,
                format!("unknown import alias '{alias}'"),
            ));
        };
        let value = match map.get("path").and_then(Value::as_str) {
            Some(path) => walk_path(exported, path).ok_or_else(|| {
                ErrorCause::new(
                    CauseKind::Shape,
                    format!("import '{alias}' has no value at path '{path}'"),
                )
            })?,
            None => exported.clone(),
        };
        return Ok(Some(value));
    }

    if let Some(parts) = map.get("$catalog") {
        return merge_entries(parts, imports, "$catalog").map(Some);
    }
    if let Some(parts) = map.get("$overrides") {
        return merge_entries(parts, imports, "$overrides").map(Some);
    }

    if let Some(message) = map.get("$fail") {
        let message = message.as_str().unwrap_or("generator failure");
        return Err(ErrorCause::new(CauseKind::Generator, message.to_string()));
    }

    Ok(None)
}

fn walk_path(value: &Value, path: &str) -> Option<Value> {
    let mut current = value;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current.clone())
}

/// Merge name→spec maps, failing on contradictory entries.
///
/// The conflict class depends on the directive: `$catalog` raises a catalog
/// conflict, `$overrides` an override conflict. Both propagate as generator
/// evaluation failures.
fn merge_entries(
    parts: &Value,
    imports: &BTreeMap<String, Value>,
    directive: &str,
) -> Result<Value, ErrorCause> {
    let kind = if directive == "$catalog" {
        CauseKind::CatalogConflict
    } else {
        CauseKind::OverrideConflict
    };
    let label = if directive == "$catalog" {
        "catalog"
    } else {
        "override"
    };

    let Some(items) = parts.as_array() else {
        return Err(ErrorCause::new(
            CauseKind::Shape,
            format!("{directive} expects an array of entry maps"),
        ));
    };

    let mut merged = Map::new();
    for item in items {
        let resolved = resolve_value(item, imports)?;
        let Some(entries) = resolved.as_object() else {
            return Err(ErrorCause::new(
                CauseKind::Shape,
                format!("{directive} entries must be objects"),
            ));
        };
        for (name, spec) in entries {
            match merged.get(name) {
                Some(existing) if existing != spec => {
                    return Err(ErrorCause::new(
                        kind,
                        format!(
                            "{label} conflict for '{name}': {existing} vs {spec}",
                        ),
                    ));
                }
                _ => {
                    merged.insert(name.clone(), spec.clone());
                }
            }
        }
    }
    Ok(Value::Object(merged))
}

/// Substitute `{{location}}` and `{{cwd}}` placeholders.
///
/// Unknown placeholders are left untouched.
pub fn interpolate(text: &str, ctx: &GeneratorContext) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = after[..end].trim();
                match key {
                    "location" => out.push_str(&ctx.location),
                    "cwd" => out.push_str(&ctx.cwd.to_string_lossy()),
                    _ => {
                        out.push_str("{{");
                        out.push_str(&after[..end]);
                        out.push_str("}}");
                    }
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str("{{");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn interpolate_value(value: &Value, ctx: &GeneratorContext) -> Value {
    match value {
        Value::String(s) => Value::String(interpolate(s, ctx)),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| interpolate_value(v, ctx)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), interpolate_value(v, ctx)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    fn write(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("mkdir");
        }
        fs::write(path, content).expect("write");
    }

    fn load(source: &Path, cwd: &Path) -> Result<LoadedGenerator, ErrorCause> {
        let registry = ModuleRegistry::new();
        load_generator(source, cwd, &registry)
    }

    #[test]
    fn loads_minimal_document() {
        let td = tempdir().expect("tempdir");
        write(&td.path().join("megarepo.json"), "{}");
        let source = td.path().join("pkg/settings.json.genie.ts");
        write(
            &source,
            r#"{"emit": {"kind": "json", "value": {"a": 1}}}"#,
        );

        let loaded = load(&source, td.path()).expect("load");
        assert_eq!(loaded.target, td.path().join("pkg/settings.json"));
        assert_eq!(loaded.ctx.location, "pkg");
        assert_eq!(loaded.stringify().expect("stringify"), "{\n  \"a\": 1\n}\n");
    }

    #[test]
    fn missing_emit_is_a_shape_error() {
        let td = tempdir().expect("tempdir");
        let source = td.path().join("x.json.genie.ts");
        write(&source, r#"{"data": {}}"#);

        let err = load(&source, td.path()).expect_err("must fail");
        assert_eq!(err.kind, CauseKind::Shape);
        assert!(err.message.contains("emit"));
    }

    #[test]
    fn invalid_json_is_a_parse_error() {
        let td = tempdir().expect("tempdir");
        let source = td.path().join("x.json.genie.ts");
        write(&source, "not json");

        let err = load(&source, td.path()).expect_err("must fail");
        assert_eq!(err.kind, CauseKind::Parse);
        assert!(err.trace.iter().any(|f| f.contains("x.json.genie.ts")));
    }

    #[test]
    fn imports_compose_through_catalog() {
        let td = tempdir().expect("tempdir");
        write(
            &td.path().join("shared/versions.genie.ts"),
            r#"{"data": {"react": "^19.0.0", "typescript": "~5.6.0"}}"#,
        );
        let source = td.path().join("app/package.json.genie.ts");
        write(
            &source,
            r#"{
              "imports": {"shared": "../shared/versions.genie.ts"},
              "emit": {
                "kind": "json",
                "value": {"dependencies": {"$catalog": [{"$import": "shared"}, {"zod": "^4.0.0"}]}}
              }
            }"#,
        );

        let loaded = load(&source, td.path()).expect("load");
        let rendered = loaded.stringify().expect("stringify");
        assert!(rendered.contains("\"react\": \"^19.0.0\""));
        assert!(rendered.contains("\"zod\": \"^4.0.0\""));
    }

    #[test]
    fn catalog_conflict_fails_evaluation() {
        let td = tempdir().expect("tempdir");
        let source = td.path().join("x.json.genie.ts");
        write(
            &source,
            r#"{
              "data": {"$catalog": [{"react": "^18.0.0"}, {"react": "^19.0.0"}]},
              "emit": {"kind": "text", "lines": []}
            }"#,
        );

        let err = load(&source, td.path()).expect_err("must fail");
        assert_eq!(err.kind, CauseKind::CatalogConflict);
        assert!(err.message.contains("react"));
    }

    #[test]
    fn override_conflict_has_its_own_kind() {
        let td = tempdir().expect("tempdir");
        let source = td.path().join("x.json.genie.ts");
        write(
            &source,
            r#"{
              "data": {"$overrides": [{"lodash": "4.17.20"}, {"lodash": "4.17.21"}]},
              "emit": {"kind": "text", "lines": []}
            }"#,
        );

        let err = load(&source, td.path()).expect_err("must fail");
        assert_eq!(err.kind, CauseKind::OverrideConflict);
    }

    #[test]
    fn fail_directive_surfaces_generator_error() {
        let td = tempdir().expect("tempdir");
        let source = td.path().join("x.json.genie.ts");
        write(
            &source,
            r#"{"data": {"$fail": "boom"}, "emit": {"kind": "text", "lines": []}}"#,
        );

        let err = load(&source, td.path()).expect_err("must fail");
        assert_eq!(err.kind, CauseKind::Generator);
        assert_eq!(err.message, "boom");
    }

    #[test]
    fn poisoned_module_cascades_to_later_accessors() {
        let td = tempdir().expect("tempdir");
        write(
            &td.path().join("shared.genie.ts"),
            r#"{"data": {"$fail": "boom"}}"#,
        );
        let s1 = td.path().join("a.json.genie.ts");
        let s2 = td.path().join("b.json.genie.ts");
        let doc = r#"{
          "imports": {"shared": "./shared.genie.ts"},
          "emit": {"kind": "json", "value": {"v": {"$import": "shared"}}}
        }"#;
        write(&s1, doc);
        write(&s2, doc);

        let registry = ModuleRegistry::new();
        let first = load_generator(&s1, td.path(), &registry).expect_err("first fails");
        assert_eq!(first.kind, CauseKind::Generator);
        assert_eq!(first.message, "boom");
        assert!(first.originates_in(&s1));

        let second = load_generator(&s2, td.path(), &registry).expect_err("second fails");
        assert!(second.is_cascade());
        assert_eq!(
            second.message,
            "Cannot access 'shared' before initialization"
        );
    }

    #[test]
    fn import_cycles_read_as_uninitialized_bindings() {
        let td = tempdir().expect("tempdir");
        write(
            &td.path().join("a.genie.ts"),
            r#"{"imports": {"b": "./b.genie.ts"}, "data": {"$import": "b"}}"#,
        );
        write(
            &td.path().join("b.genie.ts"),
            r#"{"imports": {"a": "./a.genie.ts"}, "data": {"$import": "a"}}"#,
        );
        let source = td.path().join("x.json.genie.ts");
        write(
            &source,
            r#"{"imports": {"a": "./a.genie.ts"}, "emit": {"kind": "json", "value": {"$import": "a"}}}"#,
        );

        let err = load(&source, td.path()).expect_err("must fail");
        assert!(err.is_cascade(), "got: {err:?}");
    }

    #[test]
    fn shared_modules_evaluate_once_per_run() {
        let td = tempdir().expect("tempdir");
        write(&td.path().join("shared.genie.ts"), r#"{"data": {"x": 1}}"#);
        let doc = r#"{
          "imports": {"shared": "./shared.genie.ts"},
          "emit": {"kind": "json", "value": {"$import": "shared"}}
        }"#;
        let s1 = td.path().join("a.json.genie.ts");
        let s2 = td.path().join("b.json.genie.ts");
        write(&s1, doc);
        write(&s2, doc);

        let registry = ModuleRegistry::new();
        load_generator(&s1, td.path(), &registry).expect("load a");
        load_generator(&s2, td.path(), &registry).expect("load b");
        // Two top-level documents plus one shared module.
        assert_eq!(registry.evaluation_count(), 3);
    }

    #[test]
    fn interpolation_substitutes_ctx() {
        let ctx = GeneratorContext {
            cwd: PathBuf::from("/repo"),
            location: "packages/app".to_string(),
            workspace: None,
        };
        assert_eq!(
            interpolate("name: @acme/{{location}}", &ctx),
            "name: @acme/packages/app"
        );
        assert_eq!(interpolate("{{ cwd }}", &ctx), "/repo");
        assert_eq!(interpolate("{{unknown}}", &ctx), "{{unknown}}");
        assert_eq!(interpolate("open {{", &ctx), "open {{");
    }

    #[test]
    fn text_emit_joins_lines() {
        let td = tempdir().expect("tempdir");
        let source = td.path().join("notes.md.genie.ts");
        write(
            &source,
            r##"{"emit": {"kind": "text", "lines": ["# {{location}}", "", "hello"]}}"##,
        );

        let loaded = load(&source, td.path()).expect("load");
        assert_eq!(loaded.stringify().expect("stringify"), "# .\n\nhello\n");
    }

    #[test]
    fn validate_rules_check_workspace_dependencies() {
        let td = tempdir().expect("tempdir");
        write(&td.path().join("megarepo.json"), "{}");
        let source = td.path().join("packages/app/package.json.genie.ts");
        write(
            &source,
            r#"{
              "emit": {"kind": "text", "lines": []},
              "validate": [
                {"rule": "require-dependency", "dependency": "react"},
                {"rule": "forbid-dependency", "dependency": "left-pad"}
              ]
            }"#,
        );

        let mut loaded = load(&source, td.path()).expect("load");
        assert!(loaded.has_validate());

        let mut deps = std::collections::BTreeMap::new();
        deps.insert("left-pad".to_string(), "^1.3.0".to_string());
        loaded.ctx.workspace = Some(WorkspaceGraph::new(vec![genie_types::PackageInfo {
            name: "app".into(),
            path: "packages/app".into(),
            dependencies: Some(deps),
            ..Default::default()
        }]));

        let issues = loaded.validate();
        assert_eq!(issues.len(), 2);
        assert!(issues.iter().any(|i| i.rule == "require-dependency"));
        assert!(issues.iter().any(|i| i.rule == "forbid-dependency"));
    }

    #[test]
    fn require_script_rule_checks_package_scripts() {
        let td = tempdir().expect("tempdir");
        write(&td.path().join("megarepo.json"), "{}");
        let source = td.path().join("packages/app/package.json.genie.ts");
        write(
            &source,
            r#"{
              "emit": {"kind": "text", "lines": []},
              "validate": [
                {"rule": "require-script", "script": "build"},
                {"rule": "require-script", "script": "lint"}
              ]
            }"#,
        );

        let mut loaded = load(&source, td.path()).expect("load");

        let mut scripts = std::collections::BTreeMap::new();
        scripts.insert("build".to_string(), "tsc -b".to_string());
        loaded.ctx.workspace = Some(WorkspaceGraph::new(vec![genie_types::PackageInfo {
            name: "app".into(),
            path: "packages/app".into(),
            scripts: Some(scripts),
            ..Default::default()
        }]));

        let issues = loaded.validate();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].rule, "require-script");
        assert!(issues[0].message.contains("lint"));
        assert!(issues[0].dependency.is_none());
    }
}
