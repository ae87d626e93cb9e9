//! Native integration built on git hooks
//!
//! `post-checkout` and `post-commit` hooks append one line per operation to
//! `<git-dir>/branchlink/events`:
//!
//! ```text
//! checkout 1760000000
//! commit 4b825dc642cb6eb9a060e54bf8d69288fbee4904
//! ```
//!
//! The integration is *inactive* until a hooked repository has written its
//! first line, so it activates lazily after the first git operation.

use super::native::{ActiveIntegration, Capability, VcsIntegration};
use super::{Signal, SignalSender, SignalSource, WatchError, WatchHandle};
use crate::repo::RepositoryHandle;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Marker line identifying hooks this tool wrote
pub const HOOK_MARKER: &str = "# installed by branchlink";

const EVENTS_DIR: &str = "branchlink";
const EVENTS_FILE: &str = "events";

const POST_CHECKOUT: &str = r#"#!/bin/sh
# installed by branchlink
# $3 is 1 for branch checkouts, 0 for file checkouts
[ "$3" = "1" ] || exit 0
dir="$(git rev-parse --git-dir)/branchlink"
mkdir -p "$dir" && echo "checkout $(date +%s)" >> "$dir/events"
exit 0
"#;

const POST_COMMIT: &str = r#"#!/bin/sh
# installed by branchlink
dir="$(git rev-parse --git-dir)/branchlink"
mkdir -p "$dir" && echo "commit $(git rev-parse HEAD)" >> "$dir/events"
exit 0
"#;

/// One parsed event-log line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookEvent {
    Checkout,
    Commit(String),
}

/// Parse a single event-log line; unknown lines are ignored
pub fn parse_event_line(line: &str) -> Option<HookEvent> {
    let mut parts = line.split_whitespace();
    match parts.next()? {
        "checkout" => Some(HookEvent::Checkout),
        "commit" => Some(HookEvent::Commit(parts.next()?.to_string())),
        _ => None,
    }
}

/// Where the event log for a repository lives
pub fn events_path(handle: &RepositoryHandle) -> PathBuf {
    handle.git_dir.join(EVENTS_DIR).join(EVENTS_FILE)
}

/// The hooks directory, shared by all worktrees of one repository
pub fn hooks_dir(handle: &RepositoryHandle) -> PathBuf {
    let common = std::fs::read_to_string(handle.git_dir.join("commondir"))
        .ok()
        .map(|c| handle.git_dir.join(c.trim()))
        .unwrap_or_else(|| handle.git_dir.clone());
    common.join("hooks")
}

fn hook_installed(path: &Path) -> bool {
    std::fs::read_to_string(path).is_ok_and(|content| content.contains(HOOK_MARKER))
}

/// Both hooks carry our marker
pub fn hooks_installed(handle: &RepositoryHandle) -> bool {
    let dir = hooks_dir(handle);
    hook_installed(&dir.join("post-checkout")) && hook_installed(&dir.join("post-commit"))
}

/// Outcome of installing one hook file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookInstall {
    Installed(PathBuf),
    AlreadyInstalled(PathBuf),
    /// A foreign hook exists; left untouched
    Skipped(PathBuf),
}

/// Write the `post-checkout` and `post-commit` hooks for a repository
pub fn install_hooks(handle: &RepositoryHandle) -> Result<Vec<HookInstall>, WatchError> {
    let dir = hooks_dir(handle);
    std::fs::create_dir_all(&dir)?;

    let mut results = Vec::new();
    for (name, script) in [("post-checkout", POST_CHECKOUT), ("post-commit", POST_COMMIT)] {
        let path = dir.join(name);
        if path.exists() {
            if hook_installed(&path) {
                results.push(HookInstall::AlreadyInstalled(path));
            } else {
                tracing::warn!(hook = %path.display(), "existing hook left in place");
                results.push(HookInstall::Skipped(path));
            }
            continue;
        }

        std::fs::write(&path, script)?;
        make_executable(&path)?;
        results.push(HookInstall::Installed(path));
    }

    Ok(results)
}

#[cfg(unix)]
fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Native integration over the git hooks of a fixed repository set
pub struct HookIntegration {
    handles: Vec<RepositoryHandle>,
}

impl HookIntegration {
    pub fn new(handles: impl IntoIterator<Item = RepositoryHandle>) -> Self {
        Self {
            handles: handles.into_iter().collect(),
        }
    }
}

impl VcsIntegration for HookIntegration {
    fn name(&self) -> &str {
        "git-hooks"
    }

    fn probe(&self) -> Capability {
        let installed: Vec<&RepositoryHandle> =
            self.handles.iter().filter(|h| hooks_installed(h)).collect();
        if installed.is_empty() {
            return Capability::Unavailable;
        }

        let active: Vec<RepositoryHandle> = installed
            .into_iter()
            .filter(|h| events_path(h).exists())
            .cloned()
            .collect();
        if active.is_empty() {
            return Capability::Inactive;
        }

        Capability::Active(Arc::new(HookSession { handles: active }))
    }
}

/// Active hook integration: repositories whose event log exists
struct HookSession {
    handles: Vec<RepositoryHandle>,
}

impl ActiveIntegration for HookSession {
    fn repositories(&self) -> Vec<PathBuf> {
        self.handles.iter().map(|h| h.root.clone()).collect()
    }

    fn subscribe(&self, repo: &Path, tx: SignalSender) -> Result<Box<dyn WatchHandle>, WatchError> {
        let handle = self
            .handles
            .iter()
            .find(|h| h.root == repo)
            .ok_or_else(|| WatchError::Attach {
                path: repo.to_path_buf(),
                reason: "repository is not tracked by the hook integration".to_string(),
            })?;
        Ok(Box::new(EventLogWatch::start(handle, tx)?))
    }
}

/// Tails a repository's event log and turns new lines into signals
struct EventLogWatch {
    repo: PathBuf,
    log_path: PathBuf,
    watcher: Option<RecommendedWatcher>,
}

impl EventLogWatch {
    fn start(handle: &RepositoryHandle, tx: SignalSender) -> Result<Self, WatchError> {
        let log_path = events_path(handle);
        // Earlier lines belong to previous runs; keep the log from growing forever
        if let Err(e) = truncate_log(&log_path) {
            tracing::debug!(log = %log_path.display(), error = %e, "cannot truncate hook event log");
        }
        let start = std::fs::metadata(&log_path).map(|m| m.len()).unwrap_or(0);
        let offset = Arc::new(Mutex::new(start));

        let repo = handle.root.clone();
        let cb_repo = repo.clone();
        let cb_log = log_path.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| {
                let Ok(event) = res else { return };
                if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
                    || !event.paths.iter().any(|p| p == &cb_log)
                {
                    return;
                }
                for line in read_new_lines(&cb_log, &offset) {
                    let signal = match parse_event_line(&line) {
                        Some(HookEvent::Checkout) => Signal::Recheck {
                            repo: cb_repo.clone(),
                            source: SignalSource::Native,
                        },
                        Some(HookEvent::Commit(sha)) => Signal::Commit {
                            repo: cb_repo.clone(),
                            commit: Some(sha),
                        },
                        None => continue,
                    };
                    let _ = tx.send(signal);
                }
            },
            Config::default(),
        )?;

        let dir = log_path.parent().unwrap_or(&handle.git_dir);
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|e| WatchError::Attach {
                path: dir.to_path_buf(),
                reason: e.to_string(),
            })?;

        tracing::debug!(repo = %repo.display(), log = %log_path.display(), "tailing hook event log");

        Ok(Self {
            repo,
            log_path,
            watcher: Some(watcher),
        })
    }
}

fn truncate_log(path: &Path) -> std::io::Result<()> {
    std::fs::OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(path)
        .map(|_| ())
}

/// Read complete lines appended since `offset`, advancing it.
/// A shrunk file (truncated or recreated) is read from the start.
fn read_new_lines(path: &Path, offset: &Mutex<u64>) -> Vec<String> {
    let Ok(mut pos) = offset.lock() else {
        return Vec::new();
    };
    let Ok(mut file) = std::fs::File::open(path) else {
        return Vec::new();
    };
    let len = file.metadata().map(|m| m.len()).unwrap_or(0);
    if len < *pos {
        *pos = 0;
    }
    if file.seek(SeekFrom::Start(*pos)).is_err() {
        return Vec::new();
    }

    let mut buf = String::new();
    if file.read_to_string(&mut buf).is_err() {
        return Vec::new();
    }

    // Leave a trailing partial line for the next event
    let complete = buf.rfind('\n').map(|i| i + 1).unwrap_or(0);
    *pos += complete as u64;
    buf[..complete].lines().map(str::to_string).collect()
}

impl WatchHandle for EventLogWatch {
    fn dispose(&mut self) {
        if self.watcher.take().is_some() {
            tracing::debug!(repo = %self.repo.display(), "hook event log watch disposed");
        }
    }

    fn is_disposed(&self) -> bool {
        self.watcher.is_none()
    }

    fn describe(&self) -> String {
        format!("native(git-hooks) {}", self.log_path.display())
    }
}

impl Drop for EventLogWatch {
    fn drop(&mut self) {
        self.dispose();
    }
}
