use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Clone, Copy, Debug, Default)]
pub struct PathPolicy {
    /// Reject manifest paths that could resolve outside the base directory.
    pub confine: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UnsafePath {
    #[error("absolute paths are not allowed: {0:?}")]
    Absolute(PathBuf),
    #[error("parent traversal not allowed: {0:?}")]
    ParentDir(PathBuf),
}

/// Join `rel` onto `base`. Under a confining policy `rel` must be relative and
/// free of `..` components; otherwise it is joined as written.
pub fn resolve(base: &Path, rel: &str, policy: PathPolicy) -> Result<PathBuf, UnsafePath> {
    let rel = Path::new(rel);
    if policy.confine {
        if rel.is_absolute() || rel.has_root() {
            return Err(UnsafePath::Absolute(rel.to_path_buf()));
        }
        for comp in rel.components() {
            if matches!(comp, Component::ParentDir | Component::Prefix(_)) {
                return Err(UnsafePath::ParentDir(rel.to_path_buf()));
            }
        }
    }
    Ok(base.join(rel))
}
