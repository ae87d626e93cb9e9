//! Workspace scan for git working trees

use super::RepositoryHandle;
use super::error::DiscoveryError;
use ignore::WalkBuilder;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Default scan depth: the root itself plus its immediate children
pub const DEFAULT_DEPTH: usize = 1;

/// Discover repositories in each workspace root and its immediate subfolders
pub fn discover(workspace_roots: &[PathBuf]) -> BTreeSet<RepositoryHandle> {
    discover_with_depth(workspace_roots, DEFAULT_DEPTH)
}

/// Discover repositories down to `depth` levels below each workspace root.
///
/// Never fails as a whole: folders that cannot be read are skipped with a
/// warning. The result is ordered, so identical inputs give identical sets.
pub fn discover_with_depth(workspace_roots: &[PathBuf], depth: usize) -> BTreeSet<RepositoryHandle> {
    let mut found = BTreeSet::new();

    for root in workspace_roots {
        scan_root(root, depth, &mut found);
    }

    tracing::debug!(count = found.len(), depth, "repository discovery finished");
    found
}

fn scan_root(root: &Path, depth: usize, found: &mut BTreeSet<RepositoryHandle>) {
    // Plain walk: gitignore rules must not hide nested repositories
    let walker = WalkBuilder::new(root)
        .max_depth(Some(depth))
        .standard_filters(false)
        .follow_links(false)
        .filter_entry(|entry| entry.file_name() != ".git")
        .build();

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(root = %root.display(), error = %e, "skipping unreadable folder");
                continue;
            }
        };

        if !entry.file_type().is_some_and(|t| t.is_dir()) {
            continue;
        }

        let path = entry.path();
        if !path.join(".git").exists() {
            continue;
        }

        match RepositoryHandle::open(path) {
            Ok(handle) => {
                tracing::debug!(repo = %handle.root.display(), "found repository");
                found.insert(handle);
            }
            Err(DiscoveryError::NotARepository { .. }) => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping folder");
            }
        }
    }
}
