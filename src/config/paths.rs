//! Lexical path resolution. Nothing here touches the filesystem.

use std::path::{Component, Path, PathBuf};

/// Resolve `raw` against `base` and normalize the result
pub fn resolve(base: &Path, raw: &str) -> PathBuf {
    let raw = Path::new(raw.trim());
    if raw.is_absolute() {
        normalize(raw)
    } else {
        normalize(&base.join(raw))
    }
}

/// Drop `.` components and fold `..` into their parent
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                // `..` at the root stays at the root
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

pub(crate) fn display(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
