//! Path confinement for file tools. A requested path must resolve under the
//! agent's workspace root, both lexically and after following symlinks.

use std::path::{Component, Path, PathBuf};

use super::ToolError;

/// Collapses `.` and `..` without touching the filesystem.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                components.pop();
            }
            Component::CurDir => {}
            other => components.push(other),
        }
    }
    components.iter().collect()
}

/// Resolves `requested` (relative to `root`, or absolute) and rejects anything
/// that lands outside `root`.
pub fn resolve_in_workspace(root: &Path, requested: &str) -> Result<PathBuf, ToolError> {
    let denied = || ToolError::AccessDenied {
        path: requested.to_string(),
    };

    let input = Path::new(requested);
    let joined = if input.is_absolute() {
        input.to_path_buf()
    } else {
        root.join(input)
    };
    let resolved = normalize_path(&joined);
    let root = normalize_path(root);
    if !resolved.starts_with(&root) {
        return Err(denied());
    }

    // A symlink inside the workspace may still point outside of it.
    let canonical_root = root.canonicalize().unwrap_or_else(|_| root.clone());
    if let Some(existing) = resolved.ancestors().find(|p| p.exists()) {
        let canonical = existing.canonicalize().map_err(|_| denied())?;
        if !canonical.starts_with(&canonical_root) {
            return Err(denied());
        }
    }

    Ok(resolved)
}

/// The `/`-separated path of `requested` relative to `root`, or `None` when it
/// is denied or names the root itself. Spellings such as `a.txt` and
/// `./a.txt` map to the same value.
pub fn workspace_relative(root: &Path, requested: &str) -> Option<String> {
    let resolved = resolve_in_workspace(root, requested).ok()?;
    let relative = resolved.strip_prefix(normalize_path(root)).ok()?;
    let parts: Vec<_> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}
