//! Repo-root location and path conventions for Genie.
//!
//! The repo root is the nearest ancestor of a starting directory that
//! contains a `megarepo.json` or `.git` entry, falling back to the working
//! directory. Lookups are memoized for the lifetime of the process, keyed by
//! `(cwd, start_dir)`.
//!
//! # Example
//!
//! ```no_run
//! use genie_paths::{compute_location, find_repo_root, target_path};
//! use std::path::Path;
//!
//! let source = Path::new("/repo/packages/app/package.json.genie.ts");
//! let target = target_path(source).expect("generator suffix");
//! let root = find_repo_root(source.parent().unwrap(), Path::new("/repo"));
//! let location = compute_location(source, &root);
//! assert_eq!(location, "packages/app");
//! ```

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, OnceLock};

/// Exact suffix identifying a generator source. Treated purely as a string;
/// no language assumption is made about the file's contents.
pub const GENERATOR_SUFFIX: &str = ".genie.ts";

/// Marker files that identify the repo root.
pub const ROOT_MARKERS: [&str; 2] = ["megarepo.json", ".git"];

fn repo_root_cache() -> &'static Mutex<HashMap<(PathBuf, PathBuf), PathBuf>> {
    static CACHE: OnceLock<Mutex<HashMap<(PathBuf, PathBuf), PathBuf>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Find the repo root for `start_dir`.
///
/// Walks ancestors of `start_dir` (inclusive) and returns the first directory
/// containing a root marker; falls back to `cwd` when none is found. Results
/// are memoized per `(cwd, start_dir)` for the process lifetime.
pub fn find_repo_root(start_dir: &Path, cwd: &Path) -> PathBuf {
    let key = (cwd.to_path_buf(), start_dir.to_path_buf());
    if let Ok(cache) = repo_root_cache().lock() {
        if let Some(hit) = cache.get(&key) {
            return hit.clone();
        }
    }

    let root = locate_repo_root(start_dir).unwrap_or_else(|| cwd.to_path_buf());

    if let Ok(mut cache) = repo_root_cache().lock() {
        cache.insert(key, root.clone());
    }
    root
}

fn locate_repo_root(start_dir: &Path) -> Option<PathBuf> {
    let mut dir = Some(start_dir);
    while let Some(current) = dir {
        for marker in ROOT_MARKERS {
            if current.join(marker).exists() {
                return Some(current.to_path_buf());
            }
        }
        dir = current.parent();
    }
    None
}

/// Derive the target path for a generator source by stripping the suffix.
///
/// Returns `None` when the path does not end in [`GENERATOR_SUFFIX`].
pub fn target_path(source: &Path) -> Option<PathBuf> {
    let text = source.to_str()?;
    let stripped = text.strip_suffix(GENERATOR_SUFFIX)?;
    if stripped.is_empty() {
        return None;
    }
    Some(PathBuf::from(stripped))
}

/// Compute the target's package-relative location under the repo root.
///
/// The result uses forward slashes and is `"."` for the repo root itself.
pub fn compute_location(source: &Path, repo_root: &Path) -> String {
    let target = target_path(source).unwrap_or_else(|| source.to_path_buf());
    let dir = target.parent().unwrap_or(Path::new(""));
    let relative = dir.strip_prefix(repo_root).unwrap_or(dir);
    let location = to_forward_slashes(relative);
    if location.is_empty() {
        ".".to_string()
    } else {
        location
    }
}

/// Render a path with `/` separators regardless of platform.
pub fn to_forward_slashes(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Resolve `.` and `..` segments lexically, without touching the filesystem.
///
/// Used by the duplicate-target preflight so `/x/a/../foo` and `/x/foo`
/// compare equal before either target exists.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut parts: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                match parts.last() {
                    Some(Component::Normal(_)) => {
                        parts.pop();
                    }
                    Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                    _ => parts.push(component),
                }
            }
            other => parts.push(other),
        }
    }
    parts.iter().map(|c| c.as_os_str()).collect()
}

/// The file's basename.
///
/// Dotfiles keep their leading dot: `base_name(".bashrc") == ".bashrc"`.
pub fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// The file's extension, without the dot.
///
/// A leading dot does not start an extension: `extension(".bashrc") == ""`
/// while `extension(".config.json") == "json"`.
pub fn extension(path: &Path) -> String {
    let name = base_name(path);
    let head = name.chars().next().map_or(0, char::len_utf8);
    let rest = &name[head..];
    match rest.rfind('.') {
        Some(idx) if idx + 1 < rest.len() => rest[idx + 1..].to_string(),
        _ => String::new(),
    }
}

/// Compute `path` relative to `base`, forward-slashed, for display.
pub fn display_relative(path: &Path, base: &Path) -> String {
    let relative = path.strip_prefix(base).unwrap_or(path);
    let rendered = to_forward_slashes(relative);
    if rendered.is_empty() {
        ".".to_string()
    } else {
        rendered
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn target_path_strips_suffix() {
        assert_eq!(
            target_path(Path::new("/x/package.json.genie.ts")),
            Some(PathBuf::from("/x/package.json"))
        );
        assert_eq!(target_path(Path::new("/x/package.json")), None);
    }

    #[test]
    fn target_path_rejects_bare_suffix() {
        assert_eq!(target_path(Path::new(".genie.ts")), None);
    }

    #[test]
    fn repo_root_found_via_marker() {
        let td = tempdir().expect("tempdir");
        let root = td.path().join("repo");
        let nested = root.join("packages/app");
        fs::create_dir_all(&nested).expect("mkdir");
        fs::write(root.join("megarepo.json"), "{}").expect("write marker");

        assert_eq!(find_repo_root(&nested, td.path()), root);
    }

    #[test]
    fn repo_root_found_via_git_dir() {
        let td = tempdir().expect("tempdir");
        let root = td.path().join("repo");
        fs::create_dir_all(root.join(".git")).expect("mkdir");
        let nested = root.join("a/b");
        fs::create_dir_all(&nested).expect("mkdir");

        assert_eq!(find_repo_root(&nested, td.path()), root);
    }

    #[test]
    fn repo_root_falls_back_to_cwd() {
        let td = tempdir().expect("tempdir");
        let orphan = td.path().join("no-markers/here");
        fs::create_dir_all(&orphan).expect("mkdir");

        // No marker anywhere above a tempdir is not guaranteed, so assert the
        // fallback only when the walk genuinely finds nothing.
        if super::locate_repo_root(&orphan).is_none() {
            let cwd = td.path().join("cwd");
            assert_eq!(find_repo_root(&orphan, &cwd), cwd);
        }
    }

    #[test]
    fn repo_root_lookup_is_memoized() {
        let td = tempdir().expect("tempdir");
        let root = td.path().join("repo");
        let nested = root.join("pkg");
        fs::create_dir_all(&nested).expect("mkdir");
        fs::write(root.join("megarepo.json"), "{}").expect("write marker");

        let first = find_repo_root(&nested, td.path());
        // Removing the marker must not change the memoized answer.
        fs::remove_file(root.join("megarepo.json")).expect("rm marker");
        let second = find_repo_root(&nested, td.path());
        assert_eq!(first, second);
    }

    #[test]
    fn location_is_repo_relative_and_forward_slashed() {
        let source = Path::new("/repo/packages/app/package.json.genie.ts");
        assert_eq!(compute_location(source, Path::new("/repo")), "packages/app");
    }

    #[test]
    fn location_for_repo_root_is_dot() {
        let source = Path::new("/repo/tsconfig.json.genie.ts");
        assert_eq!(compute_location(source, Path::new("/repo")), ".");
    }

    #[test]
    fn normalize_resolves_dot_segments() {
        assert_eq!(
            normalize_lexically(Path::new("/x/a/../foo.genie.ts")),
            PathBuf::from("/x/foo.genie.ts")
        );
        assert_eq!(
            normalize_lexically(Path::new("/x/./y/./z")),
            PathBuf::from("/x/y/z")
        );
    }

    #[test]
    fn normalize_keeps_root_anchored_parent() {
        assert_eq!(normalize_lexically(Path::new("/../x")), PathBuf::from("/x"));
    }

    #[test]
    fn dotfile_basename_and_extension() {
        assert_eq!(base_name(Path::new("/home/u/.bashrc")), ".bashrc");
        assert_eq!(extension(Path::new("/home/u/.bashrc")), "");
        assert_eq!(extension(Path::new("/x/.config.json")), "json");
        assert_eq!(extension(Path::new("/x/tsconfig.json")), "json");
        assert_eq!(extension(Path::new("/x/Makefile")), "");
        assert_eq!(extension(Path::new("/x/archive.tar.gz")), "gz");
    }

    #[test]
    fn display_relative_falls_back_to_absolute() {
        assert_eq!(
            display_relative(Path::new("/repo/a/b.json"), Path::new("/repo")),
            "a/b.json"
        );
        assert_eq!(
            display_relative(Path::new("/elsewhere/b.json"), Path::new("/repo")),
            "elsewhere/b.json"
        );
    }
}
