//! Filesystem strategy: watch each repository's HEAD pointer file
//!
//! git replaces HEAD by renaming `HEAD.lock` over it, which invalidates an
//! inotify watch on the file's inode. The watch is therefore placed on the
//! git directory (non-recursive) and every event not naming HEAD is dropped.

use super::{Signal, SignalSender, SignalSource, WatchError, WatchHandle};
use crate::repo::RepositoryHandle;
use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};

/// What a single notify event means for a HEAD file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadEvent {
    /// Written or (re)created: re-read the branch
    Changed,
    /// Removed: logged only, never treated as a branch change
    Removed,
    Ignored,
}

/// Classify a notify event against one HEAD path
pub fn classify(event: &Event, head_path: &Path) -> HeadEvent {
    if !event.paths.iter().any(|p| p == head_path) {
        return HeadEvent::Ignored;
    }

    match event.kind {
        EventKind::Create(_) => HeadEvent::Changed,
        EventKind::Modify(ModifyKind::Data(_))
        | EventKind::Modify(ModifyKind::Any)
        | EventKind::Modify(ModifyKind::Other) => HeadEvent::Changed,
        // HEAD.lock renamed onto HEAD
        EventKind::Modify(ModifyKind::Name(RenameMode::To))
        | EventKind::Modify(ModifyKind::Name(RenameMode::Both))
        | EventKind::Modify(ModifyKind::Name(RenameMode::Any)) => HeadEvent::Changed,
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => HeadEvent::Removed,
        EventKind::Remove(_) => HeadEvent::Removed,
        _ => HeadEvent::Ignored,
    }
}

/// A HEAD watch for one repository
pub struct HeadWatch {
    repo: PathBuf,
    head_path: PathBuf,
    watcher: Option<RecommendedWatcher>,
}

impl HeadWatch {
    /// Start watching `handle`'s HEAD file, forwarding rechecks to `tx`
    pub fn start(handle: &RepositoryHandle, tx: SignalSender) -> Result<Self, WatchError> {
        let repo = handle.root.clone();
        let head_path = handle.head_path.clone();

        let cb_repo = repo.clone();
        let cb_head = head_path.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => match classify(&event, &cb_head) {
                    HeadEvent::Changed => {
                        let _ = tx.send(Signal::Recheck {
                            repo: cb_repo.clone(),
                            source: SignalSource::FileWatch,
                        });
                    }
                    HeadEvent::Removed => {
                        tracing::debug!(repo = %cb_repo.display(), "HEAD removed (checkout in progress?)");
                    }
                    HeadEvent::Ignored => {}
                },
                Err(e) => {
                    tracing::warn!(repo = %cb_repo.display(), error = %e, "HEAD watcher error");
                }
            },
            Config::default(),
        )?;

        watcher
            .watch(&handle.git_dir, RecursiveMode::NonRecursive)
            .map_err(|e| WatchError::Attach {
                path: handle.git_dir.clone(),
                reason: e.to_string(),
            })?;

        tracing::debug!(repo = %repo.display(), head = %head_path.display(), "watching HEAD");

        Ok(Self {
            repo,
            head_path,
            watcher: Some(watcher),
        })
    }
}

impl WatchHandle for HeadWatch {
    fn dispose(&mut self) {
        if self.watcher.take().is_some() {
            tracing::debug!(repo = %self.repo.display(), "HEAD watch disposed");
        }
    }

    fn is_disposed(&self) -> bool {
        self.watcher.is_none()
    }

    fn describe(&self) -> String {
        format!("file-watch {}", self.head_path.display())
    }
}

impl Drop for HeadWatch {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Attach a HEAD watch to every handle; failures are logged and skipped
pub fn watch_all<'a>(
    handles: impl IntoIterator<Item = &'a RepositoryHandle>,
    tx: &SignalSender,
) -> Vec<Box<dyn WatchHandle>> {
    let mut watches: Vec<Box<dyn WatchHandle>> = Vec::new();
    for handle in handles {
        match HeadWatch::start(handle, tx.clone()) {
            Ok(watch) => watches.push(Box::new(watch)),
            Err(e) => {
                tracing::warn!(repo = %handle.root.display(), error = %e, "cannot watch HEAD");
            }
        }
    }
    watches
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind};
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    fn event(kind: EventKind, path: &Path) -> Event {
        Event::new(kind).add_path(path.to_path_buf())
    }

    #[test]
    fn classify_head_events() {
        let head = PathBuf::from("/repo/.git/HEAD");
        let lock = PathBuf::from("/repo/.git/HEAD.lock");

        assert_eq!(
            classify(&event(EventKind::Modify(ModifyKind::Data(DataChange::Content)), &head), &head),
            HeadEvent::Changed
        );
        assert_eq!(
            classify(&event(EventKind::Create(CreateKind::File), &head), &head),
            HeadEvent::Changed
        );
        assert_eq!(
            classify(&event(EventKind::Remove(RemoveKind::File), &head), &head),
            HeadEvent::Removed
        );
        assert_eq!(
            classify(&event(EventKind::Create(CreateKind::File), &lock), &head),
            HeadEvent::Ignored
        );
    }

    #[test]
    fn classify_rename_onto_head() {
        let head = PathBuf::from("/repo/.git/HEAD");
        let lock = PathBuf::from("/repo/.git/HEAD.lock");
        let rename = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(lock)
            .add_path(head.clone());
        assert_eq!(classify(&rename, &head), HeadEvent::Changed);
    }

    #[tokio::test]
    async fn head_rewrite_produces_signal() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join(".git")).unwrap();
        fs::write(tmp.path().join(".git/HEAD"), "ref: refs/heads/main\n").unwrap();
        let handle = RepositoryHandle::open(tmp.path()).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watch = HeadWatch::start(&handle, tx).unwrap();

        fs::write(&handle.head_path, "ref: refs/heads/feature/OT-3\n").unwrap();

        let signal = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            signal,
            Signal::Recheck {
                repo: handle.root.clone(),
                source: SignalSource::FileWatch
            }
        );

        watch.dispose();
        watch.dispose();
        assert!(watch.is_disposed());
    }
}
