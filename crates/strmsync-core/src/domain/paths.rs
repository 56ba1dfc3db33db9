//! Remote path helpers
//!
//! Remote paths are always `/`-separated, absolute, and carry no trailing
//! separator (the root is `/`). Backends that report paths differently
//! normalize through [`normalize_remote_path`] before anything else sees them.

use std::path::{Path, PathBuf};

/// Normalizes a remote path: leading `/`, no empty `.` or `..` segments, no
/// trailing `/`. Backslashes are treated as separators.
///
/// `..` is dropped rather than resolved, so a normalized path never climbs
/// above the root.
pub fn normalize_remote_path(path: &str) -> String {
    let segments: Vec<&str> = path.split(['/', '\\']).filter(|s| is_plain(s)).collect();
    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

fn is_plain(segment: &str) -> bool {
    !segment.is_empty() && segment != "." && segment != ".."
}

/// Joins a child name onto a remote parent path.
pub fn join_remote(parent: &str, name: &str) -> String {
    let parent = normalize_remote_path(parent);
    let name = name
        .split('/')
        .filter(|s| is_plain(s))
        .collect::<Vec<_>>()
        .join("/");
    if name.is_empty() {
        parent
    } else if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Returns the last segment of a remote path (`""` for the root).
pub fn leaf_name(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
}

/// Returns the parent of a remote path, or `None` for the root.
pub fn parent_path(path: &str) -> Option<String> {
    let normalized = normalize_remote_path(path);
    if normalized == "/" {
        return None;
    }
    match normalized.rfind('/') {
        Some(0) => Some("/".to_string()),
        Some(idx) => Some(normalized[..idx].to_string()),
        None => None,
    }
}

/// Splits a remote path into its segments, root excluded.
pub fn segments(path: &str) -> Vec<String> {
    normalize_remote_path(path)
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Strips `root` from `path`, returning the remainder without a leading `/`.
///
/// Returns `None` when `path` is not inside `root`.
pub fn relative_to(path: &str, root: &str) -> Option<String> {
    let path = normalize_remote_path(path);
    let root = normalize_remote_path(root);
    if root == "/" {
        return Some(path.trim_start_matches('/').to_string());
    }
    if path == root {
        return Some(String::new());
    }
    path.strip_prefix(&format!("{root}/")).map(str::to_string)
}

/// Maps a remote path under `source_root` onto the local mirror tree.
pub fn mirror_path(local_root: &Path, source_root: &str, remote_path: &str) -> PathBuf {
    let relative = relative_to(remote_path, source_root)
        .unwrap_or_else(|| normalize_remote_path(remote_path).trim_start_matches('/').to_string());
    relative
        .split('/')
        .filter(|s| is_plain(s))
        .fold(local_root.to_path_buf(), |acc, seg| acc.join(seg))
}
