use std::path::{Component, Path, PathBuf};

/// Lexically normalizes a path into the string key used for FileRecords,
/// queue coalescing and index ids.
///
/// Relative paths are resolved against `base`. `.` and `..` are folded
/// without touching the filesystem, so paths of already deleted files
/// normalize the same way they did while the file existed.
pub fn normalize_path(path: &Path, base: &Path) -> String {
    let joined: PathBuf = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };

    let mut out = PathBuf::new();
    for comp in joined.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out.to_string_lossy().into_owned()
}

/// True when `path` equals `root` or lies underneath it (both normalized).
pub fn is_within(path: &str, root: &str) -> bool {
    let root = root.trim_end_matches('/');
    path == root
        || (path.starts_with(root) && path.as_bytes().get(root.len()) == Some(&b'/'))
}
