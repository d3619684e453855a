//! Lexical path handling for sandboxed lookups.
//!
//! Nothing in here touches the file system. Symbolic links inside a root are followed when the
//! resolved path is opened.

use std::path::{Component, Path, PathBuf};

/// Normalizes `path` lexically.
///
/// `.` components are dropped, and `..` removes the preceding normal component. A `..`
/// directly below the root is dropped, a leading `..` of a relative path is kept.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match cleaned.components().next_back() {
                Some(Component::Normal(_)) => {
                    cleaned.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => cleaned.push(".."),
            },
            other => cleaned.push(other),
        }
    }

    cleaned
}

/// Resolves the user supplied `requested` path below `root`.
///
/// The requested path is always treated as relative, even with a leading `/`. Returns `None`
/// if the normalized result is not strictly inside the normalized `root`.
pub fn join_sandboxed(root: &Path, requested: &str) -> Option<PathBuf> {
    let root = clean_path(root);

    let mut joined = root.clone();
    for component in Path::new(requested).components() {
        match component {
            Component::Normal(_) | Component::ParentDir => joined.push(component),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }

    let joined = clean_path(&joined);
    (joined != root && joined.starts_with(&root)).then_some(joined)
}
