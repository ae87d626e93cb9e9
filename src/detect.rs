//! Branch-change detection
//!
//! Two independent producers turn "something happened in repository X" into
//! [`Signal`]s on one channel:
//!
//! - **native** - git-hook based integration ([`hooks::HookIntegration`]),
//!   reached through the [`native::VcsIntegration`] capability seam
//! - **fs_watch** - a notify watcher on each repository's HEAD pointer file
//!
//! Both may run for the same repository at once. The [`detector`] re-reads the
//! branch for every signal and only emits when it actually changed.

pub mod detector;
pub mod fs_watch;
pub mod hooks;
pub mod native;

pub use detector::{
    BranchChangeDetector, BranchChangeEvent, BranchChangeListener, BranchInit, BranchState,
    ListenerError, RecheckOutcome,
};

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::mpsc;

/// Which strategy produced a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    Native,
    FileWatch,
    Manual,
}

impl std::fmt::Display for SignalSource {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            SignalSource::Native => write!(f, "native"),
            SignalSource::FileWatch => write!(f, "file-watch"),
            SignalSource::Manual => write!(f, "manual"),
        }
    }
}

/// A raw "go look again" notification for one repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// HEAD may have moved; re-read the branch
    Recheck { repo: PathBuf, source: SignalSource },

    /// A commit was created in the repository
    Commit {
        repo: PathBuf,
        commit: Option<String>,
    },
}

impl Signal {
    pub fn repo(&self) -> &PathBuf {
        match self {
            Signal::Recheck { repo, .. } | Signal::Commit { repo, .. } => repo,
        }
    }
}

pub type SignalSender = mpsc::UnboundedSender<Signal>;
pub type SignalReceiver = mpsc::UnboundedReceiver<Signal>;

/// Errors raised while attaching a strategy
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Failed to create watcher: {0}")]
    Watcher(#[from] notify::Error),

    #[error("Failed to watch {path}: {reason}")]
    Attach { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A live subscription that must be released on teardown.
///
/// `dispose` is idempotent: calling it twice is a no-op.
pub trait WatchHandle: Send + Sync {
    fn dispose(&mut self);

    fn is_disposed(&self) -> bool;

    /// One-line description for the `watchers` diagnostic command
    fn describe(&self) -> String;
}

/// Every handle attached for the current discovery run.
///
/// Replaced wholesale on refresh; disposes everything it owns when dropped.
#[derive(Default)]
pub struct WatchSet {
    handles: Vec<Box<dyn WatchHandle>>,
}

impl WatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, handle: Box<dyn WatchHandle>) {
        self.handles.push(handle);
    }

    pub fn extend(&mut self, handles: impl IntoIterator<Item = Box<dyn WatchHandle>>) {
        self.handles.extend(handles);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Describe every live handle
    pub fn describe(&self) -> Vec<String> {
        self.handles
            .iter()
            .filter(|h| !h.is_disposed())
            .map(|h| h.describe())
            .collect()
    }

    pub fn dispose_all(&mut self) {
        for handle in &mut self.handles {
            handle.dispose();
        }
        self.handles.clear();
    }
}

impl Drop for WatchSet {
    fn drop(&mut self) {
        self.dispose_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandle {
        disposed: bool,
        disposals: Arc<AtomicUsize>,
    }

    impl WatchHandle for CountingHandle {
        fn dispose(&mut self) {
            if !self.disposed {
                self.disposed = true;
                self.disposals.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn is_disposed(&self) -> bool {
            self.disposed
        }

        fn describe(&self) -> String {
            "counting".to_string()
        }
    }

    #[test]
    fn drop_disposes_every_handle_once() {
        let disposals = Arc::new(AtomicUsize::new(0));
        {
            let mut set = WatchSet::new();
            for _ in 0..3 {
                set.push(Box::new(CountingHandle {
                    disposed: false,
                    disposals: disposals.clone(),
                }));
            }
            assert_eq!(set.describe().len(), 3);
            set.dispose_all();
            set.dispose_all();
        }
        assert_eq!(disposals.load(Ordering::SeqCst), 3);
    }
}
