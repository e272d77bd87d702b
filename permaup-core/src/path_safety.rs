use crate::error::{Error, Result};
use std::path::{Component, Path, PathBuf};

#[derive(Clone, Copy, Debug, Default)]
pub struct PathPolicy {
    pub follow_symlinks: bool,
}

/// Resolve a manifest filename under `root`. Rejects absolute paths and
/// `..`; symlinks are refused unless followed, and followed targets must
/// stay under `root`. Does not check that the file exists.
pub fn validate_path(root: &Path, rel: &Path, policy: PathPolicy) -> Result<PathBuf> {
    if rel.as_os_str().is_empty() {
        return Err(Error::InvalidInput("empty filename".into()));
    }
    if rel.is_absolute() || rel.has_root() {
        return Err(Error::InvalidInput(format!("absolute paths are not allowed: {:?}", rel)));
    }
    if rel.components().any(|c| matches!(c, Component::ParentDir | Component::Prefix(_))) {
        return Err(Error::InvalidInput(format!("parent traversal not allowed: {:?}", rel)));
    }
    let candidate = root.join(rel);
    if !policy.follow_symlinks {
        let mut cur = root.to_path_buf();
        for comp in rel.components() {
            cur.push(comp);
            if let Ok(m) = std::fs::symlink_metadata(&cur) {
                if m.file_type().is_symlink() {
                    return Err(Error::InvalidInput(format!(
                        "symlink in path (not following): {:?}",
                        cur
                    )));
                }
            }
        }
        return Ok(candidate);
    }
    let (Ok(root_can), Ok(cand_can)) =
        (std::fs::canonicalize(root), std::fs::canonicalize(&candidate))
    else {
        // nothing to escape through if it does not exist yet
        return Ok(candidate);
    };
    if !cand_can.starts_with(&root_can) {
        return Err(Error::InvalidInput(format!("path escapes upload directory: {:?}", rel)));
    }
    Ok(cand_can)
}

/// Path of an existing regular file named `filename` under `upload_dir`.
pub fn resolve_upload_file(upload_dir: &Path, filename: &str, policy: PathPolicy) -> Result<PathBuf> {
    let path = validate_path(upload_dir, Path::new(filename), policy)?;
    if !path.is_file() {
        return Err(Error::FileNotFound(path));
    }
    Ok(path)
}
