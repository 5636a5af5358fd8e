//! Formatting adapter for Genie generated files.
//!
//! Formatting is policy-driven and must never corrupt output: the native
//! in-process formatter (a JSON/YAML round-trip honoring `indentWidth`) is
//! preferred, the external `oxfmt` binary is the fallback, and on any failure
//! the raw content is kept. A formatter returning empty output for non-empty
//! input is treated as a parser corner case and the raw content wins.
//!
//! # Example
//!
//! ```
//! use genie_format::format_content;
//! use std::path::Path;
//!
//! let formatted = format_content(Path::new("settings.json"), "{\"a\":1}", None);
//! assert_eq!(formatted, "{\n  \"a\": 1\n}\n");
//! ```

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;

use serde::Deserialize;

use genie_paths::extension;

/// Target extensions eligible for formatting.
pub const SUPPORTED_EXTENSIONS: [&str; 4] = ["json", "jsonc", "yml", "yaml"];

/// Convention config files probed under the working directory, in order.
pub const CONFIG_CANDIDATES: [&str; 2] = [".oxfmtrc.json", "oxfmt.json"];

/// External formatter binary used as the fallback.
pub const FORMATTER_BINARY: &str = "oxfmt";

/// Formatter configuration, loaded from a JSON config file.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatterOptions {
    #[serde(default = "default_indent_width")]
    pub indent_width: usize,
}

fn default_indent_width() -> usize {
    2
}

impl Default for FormatterOptions {
    fn default() -> Self {
        Self { indent_width: 2 }
    }
}

/// Result of one formatter invocation: `code` plus collected errors.
#[derive(Debug, Clone, Default)]
struct FormatOutcome {
    code: String,
    errors: Vec<String>,
}

/// Locate the formatter config for `cwd`.
///
/// An explicit path wins; otherwise the convention candidates are probed in
/// order.
pub fn discover_config(cwd: &Path, explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    CONFIG_CANDIDATES
        .iter()
        .map(|name| cwd.join(name))
        .find(|candidate| candidate.is_file())
}

/// True when `target`'s extension is eligible for formatting.
pub fn is_supported(target: &Path) -> bool {
    SUPPORTED_EXTENSIONS.contains(&extension(target).as_str())
}

/// Format `raw` for `target`. Total: degrades to `raw` on any failure.
pub fn format_content(target: &Path, raw: &str, config_path: Option<&Path>) -> String {
    if !is_supported(target) {
        return raw.to_string();
    }

    let options = load_options(config_path);
    let native = native_format(target, raw, options);
    if native.errors.is_empty() {
        return keep_raw_when_emptied(native.code, raw);
    }

    match subprocess_format(target, raw, config_path) {
        Some(code) => keep_raw_when_emptied(code, raw),
        None => raw.to_string(),
    }
}

/// Empty formatter output for non-empty input loses data; keep the raw bytes.
fn keep_raw_when_emptied(code: String, raw: &str) -> String {
    if code.is_empty() && !raw.is_empty() {
        raw.to_string()
    } else {
        code
    }
}

fn load_options(config_path: Option<&Path>) -> FormatterOptions {
    let Some(path) = config_path else {
        return FormatterOptions::default();
    };
    fs::read_to_string(path)
        .ok()
        .and_then(|text| serde_json::from_str(&text).ok())
        .unwrap_or_default()
}

fn native_format(target: &Path, raw: &str, options: FormatterOptions) -> FormatOutcome {
    if raw.is_empty() {
        return FormatOutcome::default();
    }
    match extension(target).as_str() {
        "json" | "jsonc" => json_format(raw, options),
        "yml" | "yaml" => yaml_format(raw),
        _ => FormatOutcome {
            code: raw.to_string(),
            errors: Vec::new(),
        },
    }
}

fn json_format(raw: &str, options: FormatterOptions) -> FormatOutcome {
    let parsed: Result<serde_json::Value, _> = serde_json::from_str(raw);
    match parsed {
        Ok(value) => {
            let indent = b" ".repeat(options.indent_width.clamp(0, 16));
            let formatter = serde_json::ser::PrettyFormatter::with_indent(&indent);
            let mut buffer = Vec::new();
            let mut serializer =
                serde_json::Serializer::with_formatter(&mut buffer, formatter);
            match serde::Serialize::serialize(&value, &mut serializer) {
                Ok(()) => {
                    let mut code = String::from_utf8_lossy(&buffer).into_owned();
                    code.push('\n');
                    FormatOutcome {
                        code,
                        errors: Vec::new(),
                    }
                }
                Err(e) => FormatOutcome {
                    code: String::new(),
                    errors: vec![e.to_string()],
                },
            }
        }
        Err(e) => FormatOutcome {
            code: String::new(),
            errors: vec![e.to_string()],
        },
    }
}

fn yaml_format(raw: &str) -> FormatOutcome {
    let parsed: Result<serde_yaml::Value, _> = serde_yaml::from_str(raw);
    match parsed {
        Ok(value) => match serde_yaml::to_string(&value) {
            Ok(code) => FormatOutcome {
                code,
                errors: Vec::new(),
            },
            Err(e) => FormatOutcome {
                code: String::new(),
                errors: vec![e.to_string()],
            },
        },
        Err(e) => FormatOutcome {
            code: String::new(),
            errors: vec![e.to_string()],
        },
    }
}

/// Resolved path of the fallback binary, memoized once per process.
fn formatter_binary() -> Option<&'static Path> {
    static BINARY: OnceLock<Option<PathBuf>> = OnceLock::new();
    BINARY
        .get_or_init(|| which::which(FORMATTER_BINARY).ok())
        .as_deref()
}

fn subprocess_format(target: &Path, raw: &str, config_path: Option<&Path>) -> Option<String> {
    let binary = formatter_binary()?;

    let mut command = Command::new(binary);
    if let Some(config) = config_path {
        command.arg("-c").arg(config);
    }
    command
        .arg("--stdin-filepath")
        .arg(target)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn().ok()?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(raw.as_bytes()).ok()?;
    }
    let output = child.wait_with_output().ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn unsupported_extensions_pass_through() {
        let raw = "fn main() {}\n";
        assert_eq!(format_content(Path::new("main.rs"), raw, None), raw);
        assert_eq!(format_content(Path::new("Makefile"), raw, None), raw);
    }

    #[test]
    fn json_is_normalized_with_two_space_indent() {
        let formatted = format_content(Path::new("a.json"), "{\"b\":2,\"a\":1}", None);
        assert_eq!(formatted, "{\n  \"b\": 2,\n  \"a\": 1\n}\n");
    }

    #[test]
    fn indent_width_comes_from_config() {
        let td = tempdir().expect("tempdir");
        let config = td.path().join(".oxfmtrc.json");
        std::fs::write(&config, r#"{"indentWidth": 4}"#).expect("write config");

        let formatted = format_content(Path::new("a.json"), "{\"a\":1}", Some(&config));
        assert_eq!(formatted, "{\n    \"a\": 1\n}\n");
    }

    #[test]
    fn bad_config_degrades_to_defaults() {
        let td = tempdir().expect("tempdir");
        let config = td.path().join(".oxfmtrc.json");
        std::fs::write(&config, "nope").expect("write config");

        let formatted = format_content(Path::new("a.json"), "{\"a\":1}", Some(&config));
        assert_eq!(formatted, "{\n  \"a\": 1\n}\n");
    }

    #[test]
    fn yaml_round_trips() {
        let formatted = format_content(Path::new("a.yaml"), "a:   1\nb:\n -  x\n", None);
        assert_eq!(formatted, "a: 1\nb:\n- x\n");
    }

    #[test]
    fn empty_input_stays_empty() {
        assert_eq!(format_content(Path::new("a.json"), "", None), "");
    }

    #[test]
    fn unparseable_content_keeps_raw() {
        // `.jsonc` comments are not parseable natively; with no fallback
        // binary available the raw content must survive untouched.
        let raw = "// comment\n{\"a\": 1}\n";
        let formatted = format_content(Path::new("a.jsonc"), raw, None);
        if which::which(FORMATTER_BINARY).is_err() {
            assert_eq!(formatted, raw);
        }
    }

    #[test]
    fn formatting_is_idempotent() {
        for (name, input) in [
            ("a.json", "{\"z\": {\"y\": [1, 2]}}"),
            ("b.yaml", "root:\n  child: 1\nlist:\n  - a\n  - b\n"),
        ] {
            let once = format_content(Path::new(name), input, None);
            let twice = format_content(Path::new(name), &once, None);
            assert_eq!(once, twice, "second pass changed {name}");
        }
    }

    #[test]
    fn config_discovery_prefers_explicit_path() {
        let td = tempdir().expect("tempdir");
        std::fs::write(td.path().join("oxfmt.json"), "{}").expect("write");
        let explicit = td.path().join("custom.json");

        assert_eq!(
            discover_config(td.path(), Some(&explicit)),
            Some(explicit)
        );
        assert_eq!(
            discover_config(td.path(), None),
            Some(td.path().join("oxfmt.json"))
        );
        let empty = tempdir().expect("tempdir");
        assert_eq!(discover_config(empty.path(), None), None);
    }

    #[test]
    fn empty_output_safeguard_keeps_raw() {
        assert_eq!(keep_raw_when_emptied(String::new(), "data"), "data");
        assert_eq!(keep_raw_when_emptied(String::new(), ""), "");
        assert_eq!(keep_raw_when_emptied("x".to_string(), "data"), "x");
    }
}
