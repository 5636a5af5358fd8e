//! Generator source discovery for Genie.
//!
//! Enumerates every regular file ending in `.genie.ts` under a working
//! directory, skipping vendor and output directories, and runs the
//! duplicate-target preflight: no two sources may produce the same target.
//!
//! Result order is not part of the contract; callers sort when they need
//! stable output.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use walkdir::WalkDir;

use genie_paths::{GENERATOR_SUFFIX, normalize_lexically, target_path};

/// Directory names never descended into.
pub const SKIPPED_DIRS: [&str; 10] = [
    "node_modules",
    ".pnpm",
    ".pnpm-store",
    ".git",
    ".direnv",
    ".devenv",
    "dist",
    "tmp",
    "result",
    "repos",
];

/// True when a directory entry name is in the skip set.
pub fn is_skipped_dir(name: &str) -> bool {
    SKIPPED_DIRS.contains(&name)
}

/// Recursively enumerate generator sources under `cwd`.
///
/// Returns absolute paths of every regular file whose name ends in
/// `.genie.ts`. Unreadable directory entries fail the walk.
pub fn discover_sources(cwd: &Path) -> Result<Vec<PathBuf>> {
    let mut sources = Vec::new();

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
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        if name.ends_with(GENERATOR_SUFFIX) && name != GENERATOR_SUFFIX {
            sources.push(entry.into_path());
        }
    }

    Ok(sources)
}

/// Fail when two sources map to the same target path.
///
/// Targets are compared after lexical normalization so `/x/foo.genie.ts` and
/// `/x/a/../foo.genie.ts` collide. Runs before any module load.
pub fn preflight_unique_targets(sources: &[PathBuf]) -> Result<()> {
    let mut counts: BTreeMap<PathBuf, usize> = BTreeMap::new();
    for source in sources {
        let Some(target) = target_path(source) else {
            continue;
        };
        *counts.entry(normalize_lexically(&target)).or_default() += 1;
    }

    let duplicates: Vec<String> = counts
        .iter()
        .filter(|(_, count)| **count > 1)
        .map(|(target, count)| format!("{} ({}x)", target.display(), count))
        .collect();

    if !duplicates.is_empty() {
        bail!(
            "duplicate generator targets detected:\n  {}",
            duplicates.join("\n  ")
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("mkdir");
        }
        fs::write(path, "{}").expect("write");
    }

    #[test]
    fn finds_nested_sources() {
        let td = tempdir().expect("tempdir");
        touch(&td.path().join("package.json.genie.ts"));
        touch(&td.path().join("packages/app/tsconfig.json.genie.ts"));
        touch(&td.path().join("packages/app/readme.md"));

        let mut found = discover_sources(td.path()).expect("discover");
        found.sort();
        assert_eq!(found.len(), 2);
        assert!(found[0].ends_with("package.json.genie.ts"));
        assert!(found[1].ends_with("packages/app/tsconfig.json.genie.ts"));
    }

    #[test]
    fn skips_vendor_and_output_dirs() {
        let td = tempdir().expect("tempdir");
        touch(&td.path().join("node_modules/pkg/package.json.genie.ts"));
        touch(&td.path().join("dist/out.json.genie.ts"));
        touch(&td.path().join(".pnpm-store/x/y.json.genie.ts"));
        touch(&td.path().join("ok/settings.json.genie.ts"));

        let found = discover_sources(td.path()).expect("discover");
        assert_eq!(found.len(), 1);
        assert!(found[0].ends_with("ok/settings.json.genie.ts"));
    }

    #[test]
    fn skip_set_applies_to_directories_not_files() {
        let td = tempdir().expect("tempdir");
        // A file named like a skipped dir is still discovered.
        touch(&td.path().join("pkg/dist.genie.ts"));

        let found = discover_sources(td.path()).expect("discover");
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn bare_suffix_file_is_ignored() {
        let td = tempdir().expect("tempdir");
        touch(&td.path().join(".genie.ts"));

        let found = discover_sources(td.path()).expect("discover");
        assert!(found.is_empty());
    }

    #[test]
    fn unique_targets_pass_preflight() {
        let sources = vec![
            PathBuf::from("/x/foo.genie.ts"),
            PathBuf::from("/x/bar.genie.ts"),
        ];
        preflight_unique_targets(&sources).expect("preflight");
    }

    #[test]
    fn duplicate_targets_fail_with_count() {
        let sources = vec![
            PathBuf::from("/x/foo.genie.ts"),
            PathBuf::from("/x/a/../foo.genie.ts"),
        ];
        let err = preflight_unique_targets(&sources).expect_err("must fail");
        let message = err.to_string();
        assert!(message.contains("/x/foo (2x)"), "message: {message}");
    }
}
