//! HEAD commit lookup, used to describe commit-triggered time logs

use super::RepositoryHandle;
use super::error::CommitReadError;

/// The commit HEAD points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSummary {
    pub id: String,
    /// First line of the commit message
    pub summary: String,
}

/// Look up the commit at HEAD and its subject line
pub fn head_commit_summary(handle: &RepositoryHandle) -> Result<CommitSummary, CommitReadError> {
    let repo = gix::open(&handle.root).map_err(|e| CommitReadError::Open {
        path: handle.root.clone(),
        reason: e.to_string(),
    })?;

    let commit = repo.head_commit().map_err(|e| CommitReadError::NoCommit {
        path: handle.root.clone(),
        reason: e.to_string(),
    })?;

    let message = commit.message_raw_sloppy().to_string();
    let summary = message.lines().next().unwrap_or_default().trim().to_string();

    Ok(CommitSummary {
        id: commit.id.to_string(),
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn unborn_head_has_no_commit() {
        let tmp = TempDir::new().unwrap();
        let git = tmp.path().join(".git");
        fs::create_dir_all(git.join("objects")).unwrap();
        fs::create_dir_all(git.join("refs/heads")).unwrap();
        fs::write(git.join("HEAD"), "ref: refs/heads/main\n").unwrap();
        fs::write(
            git.join("config"),
            "[core]\n\trepositoryformatversion = 0\n\tbare = false\n",
        )
        .unwrap();

        let handle = RepositoryHandle::open(tmp.path()).unwrap();
        assert!(head_commit_summary(&handle).is_err());
    }
}
