//! Error types for repository discovery and branch reading

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while deciding whether a folder is a git working tree
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// No `.git` entry at this path
    #[error("Not a git repository: {path}")]
    NotARepository { path: PathBuf },

    /// The path (or its `.git` file) could not be read
    #[error("Cannot read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A `.git` file without a usable `gitdir:` line
    #[error("Invalid .git file at {path}: missing gitdir line")]
    InvalidGitFile { path: PathBuf },
}

/// Errors raised while reading the current branch.
///
/// These are "no signal this round" for the detector, never a branch change.
#[derive(Debug, Error)]
pub enum BranchReadError {
    /// The repository vanished or is not a working tree any more
    #[error("Not a git repository: {path}")]
    NotARepository { path: PathBuf },

    /// HEAD or the branch query was transiently unavailable (e.g. mid-checkout)
    #[error("Failed to read branch for {path}: {reason}")]
    Read { path: PathBuf, reason: String },
}

/// Errors raised while looking up the commit at HEAD
#[derive(Debug, Error)]
pub enum CommitReadError {
    #[error("Failed to open repository {path}: {reason}")]
    Open { path: PathBuf, reason: String },

    #[error("HEAD has no commit in {path}: {reason}")]
    NoCommit { path: PathBuf, reason: String },
}
