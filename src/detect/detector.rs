//! De-duplicating branch comparison core
//!
//! Every signal triggers a fresh read of the branch, but an event is only
//! emitted when the read differs from the last known branch. The read, the
//! compare and the state update for one repository happen under that
//! repository's lock, so racing strategies can never emit a transition twice
//! and listeners see one repository's transitions in order.

use crate::repo::{BranchReadError, BranchReader, RepositoryHandle};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;

/// Last known branch of one repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchState {
    pub repo: PathBuf,
    pub branch: String,
    pub observed_at: DateTime<Utc>,
}

/// A confirmed branch transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchChangeEvent {
    pub repo: PathBuf,
    pub previous_branch: String,
    pub new_branch: String,
    pub timestamp: DateTime<Utc>,
}

/// Initial branch of a repository, pushed to the UI without being a change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchInit {
    pub repo: PathBuf,
    pub branch: String,
    pub timestamp: DateTime<Utc>,
}

/// What a single recheck concluded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecheckOutcome {
    /// First observation (or startup confirmation of a remembered branch)
    Initialized(BranchInit),
    Unchanged,
    Changed(BranchChangeEvent),
    /// Branch could not be read; no signal this round
    Unreadable(String),
    /// The repository is not in the current discovered set
    UnknownRepository,
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct ListenerError(pub String);

/// Receives confirmed branch changes
pub trait BranchChangeListener: Send + Sync {
    fn on_branch_change(&self, event: &BranchChangeEvent) -> Result<(), ListenerError>;

    /// Baseline or startup confirmation of a repository's branch. Delivered in
    /// the same per-repository order as changes.
    fn on_branch_initialized(&self, _init: &BranchInit) -> Result<(), ListenerError> {
        Ok(())
    }
}

impl<F> BranchChangeListener for F
where
    F: Fn(&BranchChangeEvent) -> Result<(), ListenerError> + Send + Sync,
{
    fn on_branch_change(&self, event: &BranchChangeEvent) -> Result<(), ListenerError> {
        self(event)
    }
}

type Slot = Arc<tokio::sync::Mutex<Option<BranchState>>>;

pub struct BranchChangeDetector {
    reader: BranchReader,
    handles: RwLock<HashMap<PathBuf, RepositoryHandle>>,
    slots: Mutex<HashMap<PathBuf, Slot>>,
    listeners: RwLock<Vec<Arc<dyn BranchChangeListener>>>,
}

impl BranchChangeDetector {
    pub fn new(reader: BranchReader) -> Self {
        Self {
            reader,
            handles: RwLock::new(HashMap::new()),
            slots: Mutex::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn reader(&self) -> &BranchReader {
        &self.reader
    }

    /// Register a listener; listeners run in registration order
    pub fn on_branch_change(&self, listener: Arc<dyn BranchChangeListener>) {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.push(listener);
        }
    }

    /// Replace the repository set. State for repositories no longer present is dropped.
    pub fn set_repositories(&self, handles: &BTreeSet<RepositoryHandle>) {
        if let Ok(mut map) = self.handles.write() {
            *map = handles
                .iter()
                .map(|h| (h.root.clone(), h.clone()))
                .collect();
        }
        if let Ok(mut slots) = self.slots.lock() {
            slots.retain(|repo, _| handles.iter().any(|h| &h.root == repo));
        }
    }

    pub fn repositories(&self) -> Vec<RepositoryHandle> {
        let mut handles: Vec<_> = self
            .handles
            .read()
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        handles.sort();
        handles
    }

    pub fn handle(&self, repo: &Path) -> Option<RepositoryHandle> {
        self.handles.read().ok()?.get(repo).cloned()
    }

    /// Remember a branch from a previous run as the baseline for `repo`.
    ///
    /// Has no effect once the repository has been observed in this process.
    pub async fn seed(&self, repo: &Path, branch: &str) {
        let slot = self.slot(repo);
        let mut state = slot.lock().await;
        if state.is_none() {
            tracing::debug!(repo = %repo.display(), branch, "seeding remembered branch");
            *state = Some(BranchState {
                repo: repo.to_path_buf(),
                branch: branch.to_string(),
                observed_at: Utc::now(),
            });
        }
    }

    /// Read every repository once at startup.
    ///
    /// Repositories whose branch matches the remembered one (or that have no
    /// memory) report `Initialized`; a remembered branch that differs from
    /// disk is a real change and is dispatched to listeners.
    pub async fn initialize(&self) -> Vec<RecheckOutcome> {
        let mut outcomes = Vec::new();
        for handle in self.repositories() {
            outcomes.push(self.check(&handle.root, true).await);
        }
        outcomes
    }

    /// Re-read `repo`'s branch and emit an event if it changed
    pub async fn recheck(&self, repo: &Path) -> RecheckOutcome {
        self.check(repo, false).await
    }

    /// Current state of every observed repository
    pub async fn snapshot(&self) -> Vec<BranchState> {
        let slots: Vec<Slot> = self
            .slots
            .lock()
            .map(|s| s.values().cloned().collect())
            .unwrap_or_default();

        let mut states = Vec::new();
        for slot in slots {
            if let Some(state) = slot.lock().await.clone() {
                states.push(state);
            }
        }
        states.sort_by(|a, b| a.repo.cmp(&b.repo));
        states
    }

    fn slot(&self, repo: &Path) -> Slot {
        match self.slots.lock() {
            Ok(mut slots) => slots.entry(repo.to_path_buf()).or_default().clone(),
            Err(poisoned) => poisoned
                .into_inner()
                .entry(repo.to_path_buf())
                .or_default()
                .clone(),
        }
    }

    async fn check(&self, repo: &Path, initializing: bool) -> RecheckOutcome {
        let Some(handle) = self.handle(repo) else {
            tracing::debug!(repo = %repo.display(), "signal for unknown repository");
            return RecheckOutcome::UnknownRepository;
        };

        let slot = self.slot(repo);
        let mut state = slot.lock().await;

        let branch = match self.reader.read_branch(&handle).await {
            Ok(branch) => branch,
            Err(e) => {
                match &e {
                    BranchReadError::NotARepository { .. } => {
                        tracing::warn!(repo = %repo.display(), error = %e, "repository disappeared")
                    }
                    BranchReadError::Read { .. } => {
                        tracing::debug!(repo = %repo.display(), error = %e, "branch unreadable, skipping signal")
                    }
                }
                return RecheckOutcome::Unreadable(e.to_string());
            }
        };

        let now = Utc::now();
        let previous = match state.as_ref() {
            None => {
                *state = Some(BranchState {
                    repo: repo.to_path_buf(),
                    branch: branch.clone(),
                    observed_at: now,
                });
                tracing::info!(repo = %repo.display(), branch, "baseline branch recorded");
                return self.initialized(repo, branch, now);
            }
            Some(current) if current.branch == branch => {
                if initializing {
                    return self.initialized(repo, branch, now);
                }
                return RecheckOutcome::Unchanged;
            }
            Some(current) => current.branch.clone(),
        };

        let event = BranchChangeEvent {
            repo: repo.to_path_buf(),
            previous_branch: previous,
            new_branch: branch.clone(),
            timestamp: now,
        };
        *state = Some(BranchState {
            repo: repo.to_path_buf(),
            branch,
            observed_at: now,
        });

        tracing::info!(
            repo = %repo.display(),
            from = %event.previous_branch,
            to = %event.new_branch,
            "branch changed"
        );

        // Still holding the repository lock: keeps per-repository delivery ordered
        self.dispatch(&event);
        RecheckOutcome::Changed(event)
    }

    /// Must be called with the repository lock held
    fn initialized(&self, repo: &Path, branch: String, timestamp: DateTime<Utc>) -> RecheckOutcome {
        let init = BranchInit {
            repo: repo.to_path_buf(),
            branch,
            timestamp,
        };
        self.notify(|listener| listener.on_branch_initialized(&init));
        RecheckOutcome::Initialized(init)
    }

    fn dispatch(&self, event: &BranchChangeEvent) {
        self.notify(|listener| listener.on_branch_change(event));
    }

    fn notify(&self, call: impl Fn(&dyn BranchChangeListener) -> Result<(), ListenerError>) {
        let listeners: Vec<Arc<dyn BranchChangeListener>> = self
            .listeners
            .read()
            .map(|l| l.clone())
            .unwrap_or_default();

        for (index, listener) in listeners.iter().enumerate() {
            if let Err(e) = call(listener.as_ref()) {
                tracing::warn!(listener = index, error = %e, "branch listener failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::{BranchReadMode, DETACHED_HEAD};
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Workspace {
        _tmp: TempDir,
        handles: BTreeSet<RepositoryHandle>,
    }

    impl Workspace {
        fn new(repos: &[(&str, &str)]) -> Self {
            let tmp = TempDir::new().unwrap();
            let mut handles = BTreeSet::new();
            for (name, branch) in repos {
                let root = tmp.path().join(name);
                fs::create_dir_all(root.join(".git")).unwrap();
                fs::write(root.join(".git/HEAD"), format!("ref: refs/heads/{branch}\n")).unwrap();
                handles.insert(RepositoryHandle::open(&root).unwrap());
            }
            Self { _tmp: tmp, handles }
        }

        fn repo(&self, name: &str) -> PathBuf {
            self.handles
                .iter()
                .find(|h| h.root.ends_with(name))
                .unwrap()
                .root
                .clone()
        }

        fn checkout(&self, name: &str, branch: &str) {
            fs::write(
                self.repo(name).join(".git/HEAD"),
                format!("ref: refs/heads/{branch}\n"),
            )
            .unwrap();
        }
    }

    fn detector(ws: &Workspace) -> (Arc<BranchChangeDetector>, Arc<Mutex<Vec<BranchChangeEvent>>>) {
        let reader = BranchReader::new(BranchReadMode::PointerFile, Duration::from_secs(1));
        let detector = Arc::new(BranchChangeDetector::new(reader));
        detector.set_repositories(&ws.handles);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        detector.on_branch_change(Arc::new(move |e: &BranchChangeEvent| -> Result<(), ListenerError> {
            sink.lock().unwrap().push(e.clone());
            Ok(())
        }));
        (detector, seen)
    }

    #[tokio::test]
    async fn first_observation_is_baseline() {
        let ws = Workspace::new(&[("a", "main")]);
        let (detector, seen) = detector(&ws);

        let outcome = detector.recheck(&ws.repo("a")).await;
        assert!(matches!(outcome, RecheckOutcome::Initialized(ref i) if i.branch == "main"));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn repeated_signals_without_change_emit_nothing() {
        let ws = Workspace::new(&[("a", "main")]);
        let (detector, seen) = detector(&ws);
        detector.initialize().await;

        for _ in 0..20 {
            assert_eq!(detector.recheck(&ws.repo("a")).await, RecheckOutcome::Unchanged);
        }
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_signals_emit_exactly_once() {
        let ws = Workspace::new(&[("a", "main")]);
        let (detector, seen) = detector(&ws);
        detector.initialize().await;
        ws.checkout("a", "feature/OT-3");

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..16 {
            let detector = detector.clone();
            let repo = ws.repo("a");
            tasks.spawn(async move { detector.recheck(&repo).await });
        }
        let mut changed = 0;
        while let Some(outcome) = tasks.join_next().await {
            if matches!(outcome.unwrap(), RecheckOutcome::Changed(_)) {
                changed += 1;
            }
        }

        assert_eq!(changed, 1);
        let events = seen.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].previous_branch, "main");
        assert_eq!(events[0].new_branch, "feature/OT-3");
    }

    #[tokio::test]
    async fn only_changed_repository_fires() {
        let ws = Workspace::new(&[("a", "main"), ("b", "develop")]);
        let (detector, seen) = detector(&ws);
        detector.initialize().await;
        let before_b = detector
            .snapshot()
            .await
            .into_iter()
            .find(|s| s.repo == ws.repo("b"))
            .unwrap();

        ws.checkout("a", "feature/OT-3");
        detector.recheck(&ws.repo("a")).await;
        detector.recheck(&ws.repo("b")).await;

        let events = seen.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].repo, ws.repo("a"));
        let after_b = detector
            .snapshot()
            .await
            .into_iter()
            .find(|s| s.repo == ws.repo("b"))
            .unwrap();
        assert_eq!(before_b, after_b);
    }

    #[tokio::test]
    async fn remembered_branch_suppresses_startup_event() {
        let ws = Workspace::new(&[("a", "feature/X-1")]);
        let (detector, seen) = detector(&ws);
        detector.seed(&ws.repo("a"), "feature/X-1").await;

        let outcomes = detector.initialize().await;
        assert!(matches!(outcomes[0], RecheckOutcome::Initialized(_)));
        assert_eq!(detector.recheck(&ws.repo("a")).await, RecheckOutcome::Unchanged);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn remembered_branch_detects_offline_switch() {
        let ws = Workspace::new(&[("a", "feature/X-2")]);
        let (detector, seen) = detector(&ws);
        detector.seed(&ws.repo("a"), "feature/X-1").await;

        detector.initialize().await;
        let events = seen.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].previous_branch, "feature/X-1");
    }

    #[tokio::test]
    async fn unreadable_head_is_not_a_change() {
        let ws = Workspace::new(&[("a", "main")]);
        let (detector, seen) = detector(&ws);
        detector.initialize().await;

        fs::write(ws.repo("a").join(".git/HEAD"), "").unwrap();
        assert!(matches!(
            detector.recheck(&ws.repo("a")).await,
            RecheckOutcome::Unreadable(_)
        ));

        ws.checkout("a", "main");
        assert_eq!(detector.recheck(&ws.repo("a")).await, RecheckOutcome::Unchanged);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn detached_head_is_reported_as_sentinel() {
        let ws = Workspace::new(&[("a", "main")]);
        let (detector, seen) = detector(&ws);
        detector.initialize().await;

        fs::write(
            ws.repo("a").join(".git/HEAD"),
            "4b825dc642cb6eb9a060e54bf8d69288fbee4904\n",
        )
        .unwrap();
        detector.recheck(&ws.repo("a")).await;
        assert_eq!(seen.lock().unwrap()[0].new_branch, DETACHED_HEAD);
    }

    #[tokio::test]
    async fn failing_listener_does_not_block_others() {
        let ws = Workspace::new(&[("a", "main")]);
        let reader = BranchReader::new(BranchReadMode::PointerFile, Duration::from_secs(1));
        let detector = BranchChangeDetector::new(reader);
        detector.set_repositories(&ws.handles);

        let order = Arc::new(Mutex::new(Vec::new()));
        let first = order.clone();
        detector.on_branch_change(Arc::new(move |_: &BranchChangeEvent| -> Result<(), ListenerError> {
            first.lock().unwrap().push("first");
            Err(ListenerError("boom".to_string()))
        }));
        let second = order.clone();
        detector.on_branch_change(Arc::new(move |_: &BranchChangeEvent| -> Result<(), ListenerError> {
            second.lock().unwrap().push("second");
            Ok(())
        }));

        detector.initialize().await;
        ws.checkout("a", "develop");
        detector.recheck(&ws.repo("a")).await;
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn dropped_repository_loses_state() {
        let ws = Workspace::new(&[("a", "main"), ("b", "main")]);
        let (detector, _seen) = detector(&ws);
        detector.initialize().await;
        assert_eq!(detector.snapshot().await.len(), 2);

        let only_a: BTreeSet<_> = ws
            .handles
            .iter()
            .filter(|h| h.root == ws.repo("a"))
            .cloned()
            .collect();
        detector.set_repositories(&only_a);
        assert_eq!(detector.snapshot().await.len(), 1);
        assert_eq!(
            detector.recheck(&ws.repo("b")).await,
            RecheckOutcome::UnknownRepository
        );
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl BranchChangeListener for Recorder {
        fn on_branch_change(&self, event: &BranchChangeEvent) -> Result<(), ListenerError> {
            self.0
                .lock()
                .unwrap()
                .push(format!("change {} -> {}", event.previous_branch, event.new_branch));
            Ok(())
        }

        fn on_branch_initialized(&self, init: &BranchInit) -> Result<(), ListenerError> {
            self.0.lock().unwrap().push(format!("init {}", init.branch));
            Ok(())
        }
    }

    #[tokio::test]
    async fn baseline_is_delivered_to_listeners_before_changes() {
        let ws = Workspace::new(&[("a", "main")]);
        let reader = BranchReader::new(BranchReadMode::PointerFile, Duration::from_secs(1));
        let detector = BranchChangeDetector::new(reader);
        detector.set_repositories(&ws.handles);
        let recorder = Arc::new(Recorder::default());
        detector.on_branch_change(recorder.clone());

        detector.recheck(&ws.repo("a")).await;
        detector.recheck(&ws.repo("a")).await;
        ws.checkout("a", "feature/OT-3");
        detector.recheck(&ws.repo("a")).await;
        detector.initialize().await;

        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec!["init main", "change main -> feature/OT-3", "init feature/OT-3"]
        );
    }
}
