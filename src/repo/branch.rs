//! Current-branch lookup for a repository

use super::error::BranchReadError;
use super::{DETACHED_HEAD, RepositoryHandle};
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// How the current branch is obtained
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BranchReadMode {
    /// Parse `<git-dir>/HEAD` directly
    #[default]
    PointerFile,

    /// Run `git branch --show-current` in the working tree
    Subprocess,
}

/// Reads the checked-out branch of a repository. Stateless and side-effect free.
#[derive(Debug, Clone)]
pub struct BranchReader {
    mode: BranchReadMode,
    command_timeout: Duration,
}

impl BranchReader {
    pub fn new(mode: BranchReadMode, command_timeout: Duration) -> Self {
        Self {
            mode,
            command_timeout,
        }
    }

    pub fn mode(&self) -> BranchReadMode {
        self.mode
    }

    /// Read the current branch, or [`DETACHED_HEAD`] when HEAD is detached
    pub async fn read_branch(&self, handle: &RepositoryHandle) -> Result<String, BranchReadError> {
        match self.mode {
            BranchReadMode::PointerFile => read_pointer_file(handle),
            BranchReadMode::Subprocess => self.query_git(handle).await,
        }
    }

    async fn query_git(&self, handle: &RepositoryHandle) -> Result<String, BranchReadError> {
        tracing::trace!(repo = %handle.root.display(), "running git branch --show-current");

        let child = Command::new("git")
            .args(["branch", "--show-current"])
            .current_dir(&handle.root)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BranchReadError::Read {
                path: handle.root.clone(),
                reason: format!("failed to spawn git: {e}"),
            })?;

        let output = match tokio::time::timeout(self.command_timeout, child.wait_with_output()).await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(BranchReadError::Read {
                    path: handle.root.clone(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                tracing::warn!(repo = %handle.root.display(), timeout = ?self.command_timeout, "git branch query timed out");
                return Err(BranchReadError::Read {
                    path: handle.root.clone(),
                    reason: format!("git timed out after {:?}", self.command_timeout),
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("not a git repository") {
                return Err(BranchReadError::NotARepository {
                    path: handle.root.clone(),
                });
            }
            return Err(BranchReadError::Read {
                path: handle.root.clone(),
                reason: format!(
                    "git exited with {}: {}",
                    output.status.code().unwrap_or(-1),
                    stderr.trim()
                ),
            });
        }

        let branch = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if branch.is_empty() {
            Ok(DETACHED_HEAD.to_string())
        } else {
            Ok(branch)
        }
    }
}

fn read_pointer_file(handle: &RepositoryHandle) -> Result<String, BranchReadError> {
    let content = std::fs::read_to_string(&handle.head_path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound && !handle.git_dir.exists() {
            BranchReadError::NotARepository {
                path: handle.root.clone(),
            }
        } else {
            BranchReadError::Read {
                path: handle.root.clone(),
                reason: e.to_string(),
            }
        }
    })?;

    parse_head(&content).ok_or_else(|| BranchReadError::Read {
        path: handle.root.clone(),
        reason: format!("unrecognised HEAD content: {:?}", content.trim()),
    })
}

/// Parse HEAD pointer content into a branch name.
///
/// `ref: refs/heads/<name>` yields `<name>`, a raw object id yields
/// [`DETACHED_HEAD`]. Empty or unrecognised content (a half-written file)
/// yields `None`.
pub fn parse_head(content: &str) -> Option<String> {
    let content = content.trim();

    if let Some(target) = content.strip_prefix("ref:") {
        let target = target.trim();
        let name = target.strip_prefix("refs/heads/").unwrap_or(target);
        return (!name.is_empty()).then(|| name.to_string());
    }

    let is_object_id =
        matches!(content.len(), 40 | 64) && content.chars().all(|c| c.is_ascii_hexdigit());
    is_object_id.then(|| DETACHED_HEAD.to_string())
}
