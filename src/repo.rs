//! Repository discovery and branch reading
//!
//! This module finds git working trees below a set of workspace roots and reads
//! the branch each one currently has checked out, either from the HEAD pointer
//! file or by asking `git` itself.

mod branch;
mod commit;
mod discovery;
mod error;

pub use branch::{BranchReadMode, BranchReader, parse_head};
pub use commit::{CommitSummary, head_commit_summary};
pub use discovery::{DEFAULT_DEPTH, discover, discover_with_depth};
pub use error::{BranchReadError, CommitReadError, DiscoveryError};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Sentinel branch name reported when HEAD points at a commit instead of a branch
pub const DETACHED_HEAD: &str = "HEAD";

/// Returns true when `branch` is the detached-HEAD sentinel
pub fn is_detached(branch: &str) -> bool {
    branch == DETACHED_HEAD
}

/// One discovered git working tree
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepositoryHandle {
    /// Absolute path of the working tree root (unique key)
    pub root: PathBuf,

    /// Resolved git directory (`<root>/.git`, or the target of a `gitdir:` file)
    pub git_dir: PathBuf,

    /// The HEAD pointer file inside `git_dir`
    pub head_path: PathBuf,
}

impl RepositoryHandle {
    /// Build a handle for `root` if it holds a `.git` directory or `gitdir:` file
    pub fn open(root: &Path) -> Result<Self, DiscoveryError> {
        let root = root
            .canonicalize()
            .map_err(|source| DiscoveryError::Unreadable {
                path: root.to_path_buf(),
                source,
            })?;
        let git_dir = resolve_git_dir(&root)?;
        let head_path = git_dir.join("HEAD");

        Ok(Self {
            root,
            git_dir,
            head_path,
        })
    }

    /// Short display name (last path component)
    pub fn name(&self) -> String {
        self.root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.root.display().to_string())
    }
}

/// Resolve the git directory for a working tree root.
///
/// Plain repositories have a `.git` directory. Linked worktrees and submodules
/// have a `.git` file with a single `gitdir: <path>` line, relative to the root
/// when not absolute.
pub fn resolve_git_dir(root: &Path) -> Result<PathBuf, DiscoveryError> {
    let dot_git = root.join(".git");
    let meta = std::fs::metadata(&dot_git).map_err(|_| DiscoveryError::NotARepository {
        path: root.to_path_buf(),
    })?;

    if meta.is_dir() {
        return Ok(dot_git);
    }

    let content =
        std::fs::read_to_string(&dot_git).map_err(|source| DiscoveryError::Unreadable {
            path: dot_git.clone(),
            source,
        })?;

    let target = content
        .lines()
        .find_map(|line| line.strip_prefix("gitdir:"))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| DiscoveryError::InvalidGitFile {
            path: dot_git.clone(),
        })?;

    let resolved = if Path::new(target).is_absolute() {
        PathBuf::from(target)
    } else {
        root.join(target)
    };

    Ok(resolved.canonicalize().unwrap_or(resolved))
}
