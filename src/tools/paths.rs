use std::path::{Component, Path, PathBuf};

use crate::error::ToolError;

/// Resolve a client-supplied path inside `root`.
///
/// Absolute paths, `..` components and symlinks that leave the root are
/// rejected with a permission error. A missing target is a resource error.
pub fn resolve_project_path(root: &Path, requested: &str) -> Result<PathBuf, ToolError> {
    let relative = Path::new(requested);

    // Reject obvious traversal attempts before touching the filesystem
    if relative.is_absolute()
        || requested.starts_with('\\')
        || relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
    {
        return Err(ToolError::permission(format!(
            "Access denied: path '{requested}' escapes the project root"
        )));
    }

    let root_canonical = root.canonicalize().map_err(|e| {
        ToolError::resource(format!(
            "Project root '{}' not found: {e}",
            root.display()
        ))
    })?;

    // Canonicalize resolves symlinks and normalizes the path
    let canonical = root_canonical
        .join(relative)
        .canonicalize()
        .map_err(|_| ToolError::resource(format!("Path '{requested}' not found")))?;

    if !canonical.starts_with(&root_canonical) {
        return Err(ToolError::permission(format!(
            "Access denied: path '{requested}' escapes the project root"
        )));
    }

    Ok(canonical)
}

/// Path of `path` relative to `root`, with `/` separators.
pub fn display_relative(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let joined = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}
