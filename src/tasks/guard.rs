//! Confinement and no-clobber checks shared by every task.
//!
//! A [`ConfinedPath`] can only be produced by [`PathGuard::confine`], so holding
//! one proves the path resolved (symlinks included) to somewhere under the root.

use crate::errors::TaskError;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct PathGuard {
    root: PathBuf,
}

/// A canonical, symlink-free path proven to lie under the guard's root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfinedPath(PathBuf);

impl ConfinedPath {
    pub fn as_path(&self) -> &Path { &self.0 }
}

impl AsRef<Path> for ConfinedPath {
    fn as_ref(&self) -> &Path { &self.0 }
}

impl fmt::Display for ConfinedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0.display()) }
}

impl PathGuard {
    /// `root` must already be canonical; see [`crate::config::canonical_root`].
    pub fn new(root: PathBuf) -> Self { Self { root } }

    pub fn root(&self) -> &Path { &self.root }

    /// Resolves `candidate` (absolute, or relative to the root) and checks that
    /// its segments start with the root's segments.
    ///
    /// A candidate that does not exist yet is resolved through its parent,
    /// which must exist; its last segment must be a plain name.
    pub fn confine(&self, candidate: &str) -> Result<ConfinedPath, TaskError> {
        let input = Path::new(candidate);
        let joined = if input.is_absolute() { input.to_path_buf() } else { self.root.join(input) };

        let canonical = match dunce::canonicalize(&joined) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => resolve_through_parent(&joined, candidate)?,
            Err(e) => return Err(TaskError::PathViolation(format!("{candidate}: {e}"))),
        };

        if !is_within(&canonical, &self.root) {
            warn!(candidate, resolved = %canonical.display(), "path escapes root");
            return Err(TaskError::PathViolation(format!("{candidate} resolves outside {}", self.root.display())));
        }
        debug!(candidate, resolved = %canonical.display(), "confined");
        Ok(ConfinedPath(canonical))
    }
}

fn resolve_through_parent(joined: &Path, candidate: &str) -> Result<PathBuf, TaskError> {
    let name = match joined.components().next_back() {
        Some(Component::Normal(name)) => name.to_owned(),
        _ => return Err(TaskError::PathViolation(format!("{candidate}: cannot be resolved"))),
    };
    let parent = joined
        .parent()
        .ok_or_else(|| TaskError::PathViolation(format!("{candidate}: has no parent")))?;
    let parent = dunce::canonicalize(parent)
        .map_err(|e| TaskError::PathViolation(format!("{candidate}: parent cannot be resolved: {e}")))?;
    Ok(parent.join(name))
}

/// Segment-wise containment: `/data-evil/x` is not inside `/data`.
pub fn is_within(path: &Path, root: &Path) -> bool {
    let mut segments = path.components();
    root.components().all(|r| segments.next() == Some(r))
}

/// Refuses when anything (file, directory, dangling symlink) already sits at `path`.
pub fn ensure_absent(path: &ConfinedPath) -> Result<(), TaskError> {
    match std::fs::symlink_metadata(path.as_path()) {
        Ok(_) => {
            warn!(path = %path, "output already exists");
            Err(TaskError::AlreadyExists(path.to_string()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(TaskError::internal(format!("{path}: {e}"))),
    }
}
