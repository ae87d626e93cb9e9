//! Process wiring
//!
//! The engine owns the watches and the detector and runs one event loop over
//! three inputs: raw [`Signal`]s from both strategies, native-activation
//! results, and [`EngineCommand`]s from the UI or CLI. Rechecks run as their
//! own tasks so a slow branch read never stalls the loop.
//!
//! The [`AutomationOrchestrator`] lives in a second task and receives
//! initializations, branch changes and commits over a channel, in the order
//! the detector produced them.

use crate::automation::{
    AutoTimerState, AutomationOrchestrator, CommitLogOutcome, CurrentBranchInfo,
};
use crate::config::Config;
use crate::detect::hooks::HookIntegration;
use crate::detect::native::{self, ActivationPolicy, Capability, VcsIntegration};
use crate::detect::{
    BranchChangeDetector, BranchChangeEvent, BranchChangeListener, BranchInit, BranchState,
    ListenerError, RecheckOutcome, Signal, SignalReceiver, SignalSender, SignalSource, WatchSet,
    fs_watch,
};
use crate::repo::{
    BranchReader, CommitReadError, RepositoryHandle, discover_with_depth, head_commit_summary,
};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Builds the native integration for a discovered repository set
pub type IntegrationFactory =
    Box<dyn Fn(&BTreeSet<RepositoryHandle>) -> Arc<dyn VcsIntegration> + Send + Sync>;

/// The git-hook integration over every discovered repository
pub fn hook_integration() -> IntegrationFactory {
    Box::new(|handles: &BTreeSet<RepositoryHandle>| {
        Arc::new(HookIntegration::new(handles.iter().cloned())) as Arc<dyn VcsIntegration>
    })
}

/// Settings the engine needs beyond its collaborators
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub workspace_roots: Vec<PathBuf>,
    pub discovery_depth: usize,
    pub reader: BranchReader,
    /// `None` disables the native strategy
    pub activation: Option<ActivationPolicy>,
}

impl EngineOptions {
    pub fn from_config(workspace_roots: Vec<PathBuf>, config: &Config) -> Self {
        Self {
            workspace_roots,
            discovery_depth: config.discovery.depth,
            reader: BranchReader::new(
                config.detection.branch_reader,
                config.detection.command_timeout(),
            ),
            activation: config
                .detection
                .native
                .then(|| config.detection.activation_policy()),
        }
    }
}

/// Commands accepted by a running engine
pub enum EngineCommand {
    /// Rediscover repositories and rebuild every watch
    Refresh,
    /// Re-read every repository's branch now
    Recheck,
    ToggleAutoStart(oneshot::Sender<bool>),
    ToggleAutoLog(oneshot::Sender<bool>),
    /// Log the running timer with a supplied message, even if auto-log is off
    LogCommit {
        message: String,
        reply: oneshot::Sender<CommitLogOutcome>,
    },
    Status(oneshot::Sender<EngineStatus>),
    /// Describe every live watch
    Watchers(oneshot::Sender<Vec<String>>),
    /// Raw HEAD pointer file of every repository
    HeadContents(oneshot::Sender<Vec<(PathBuf, String)>>),
    Shutdown,
}

/// State of the native strategy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum NativeStatus {
    Disabled,
    Probing,
    Unavailable,
    Inactive,
    Active { repositories: usize },
}

impl std::fmt::Display for NativeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            NativeStatus::Disabled => write!(f, "disabled"),
            NativeStatus::Probing => write!(f, "probing"),
            NativeStatus::Unavailable => write!(f, "unavailable"),
            NativeStatus::Inactive => write!(f, "inactive"),
            NativeStatus::Active { repositories } => {
                write!(f, "active ({repositories} repositories)")
            }
        }
    }
}

/// What the automation task currently holds
#[derive(Debug, Clone, Serialize)]
pub struct AutomationSnapshot {
    pub settings: AutoTimerState,
    pub current: Option<CurrentBranchInfo>,
    pub tracking: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub repositories: Vec<BranchState>,
    pub native: NativeStatus,
    pub watches: usize,
    pub automation: Option<AutomationSnapshot>,
}

/// Cloneable front end for a running engine
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<EngineCommand>,
}

impl EngineHandle {
    pub fn send(&self, command: EngineCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    pub fn refresh(&self) -> bool {
        self.send(EngineCommand::Refresh)
    }

    pub fn shutdown(&self) -> bool {
        self.send(EngineCommand::Shutdown)
    }

    pub async fn toggle_auto_start(&self) -> Option<bool> {
        self.request(EngineCommand::ToggleAutoStart).await
    }

    pub async fn toggle_auto_log(&self) -> Option<bool> {
        self.request(EngineCommand::ToggleAutoLog).await
    }

    pub async fn log_commit(&self, message: &str) -> Option<CommitLogOutcome> {
        let message = message.to_string();
        self.request(|reply| EngineCommand::LogCommit { message, reply })
            .await
    }

    pub async fn status(&self) -> Option<EngineStatus> {
        self.request(EngineCommand::Status).await
    }

    pub async fn current_branch_info(&self) -> Option<CurrentBranchInfo> {
        self.status().await?.automation?.current
    }

    pub async fn watchers(&self) -> Option<Vec<String>> {
        self.request(EngineCommand::Watchers).await
    }

    pub async fn head_contents(&self) -> Option<Vec<(PathBuf, String)>> {
        self.request(EngineCommand::HeadContents).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> EngineCommand,
    ) -> Option<T> {
        let (tx, rx) = oneshot::channel();
        if !self.send(command(tx)) {
            return None;
        }
        rx.await.ok()
    }
}

/// Inputs of the automation task
enum AutomationInput {
    Initialized(BranchInit),
    Changed(BranchChangeEvent),
    Commit { repo: PathBuf, message: String },
    ToggleAutoStart(oneshot::Sender<bool>),
    ToggleAutoLog(oneshot::Sender<bool>),
    LogCommit {
        message: String,
        reply: oneshot::Sender<CommitLogOutcome>,
    },
    Snapshot(oneshot::Sender<AutomationSnapshot>),
}

/// Forwards detector notifications to the automation task, in the order the
/// detector produced them
struct AutomationListener(mpsc::UnboundedSender<AutomationInput>);

impl AutomationListener {
    fn forward(&self, input: AutomationInput) -> Result<(), ListenerError> {
        self.0
            .send(input)
            .map_err(|_| ListenerError("automation task stopped".to_string()))
    }
}

impl BranchChangeListener for AutomationListener {
    fn on_branch_change(&self, event: &BranchChangeEvent) -> Result<(), ListenerError> {
        self.forward(AutomationInput::Changed(event.clone()))
    }

    fn on_branch_initialized(&self, init: &BranchInit) -> Result<(), ListenerError> {
        self.forward(AutomationInput::Initialized(init.clone()))
    }
}

async fn drive_automation(
    mut orchestrator: AutomationOrchestrator,
    mut inputs: mpsc::UnboundedReceiver<AutomationInput>,
) {
    while let Some(input) = inputs.recv().await {
        match input {
            AutomationInput::Initialized(init) => orchestrator.on_initialize(&init).await,
            AutomationInput::Changed(event) => orchestrator.on_branch_change(&event).await,
            AutomationInput::Commit { repo, message } => {
                let outcome = orchestrator.on_commit(Some(&repo), &message).await;
                tracing::debug!(?outcome, "commit handled");
            }
            AutomationInput::ToggleAutoStart(reply) => {
                let _ = reply.send(orchestrator.toggle_auto_start().await);
            }
            AutomationInput::ToggleAutoLog(reply) => {
                let _ = reply.send(orchestrator.toggle_auto_log());
            }
            AutomationInput::LogCommit { message, reply } => {
                let _ = reply.send(orchestrator.log_commit(&message).await);
            }
            AutomationInput::Snapshot(reply) => {
                let _ = reply.send(AutomationSnapshot {
                    settings: orchestrator.settings().clone(),
                    current: orchestrator.current_branch_info().cloned(),
                    tracking: orchestrator.tracking().map(str::to_string),
                });
            }
        }
    }
    tracing::debug!("automation task stopped");
}

pub struct Engine {
    options: EngineOptions,
    integration: IntegrationFactory,
    detector: Arc<BranchChangeDetector>,
    automation: mpsc::UnboundedSender<AutomationInput>,
    automation_task: JoinHandle<()>,
    signal_tx: SignalSender,
    signal_rx: SignalReceiver,
    command_tx: mpsc::UnboundedSender<EngineCommand>,
    command_rx: mpsc::UnboundedReceiver<EngineCommand>,
    activation_tx: mpsc::UnboundedSender<(u64, Capability)>,
    activation_rx: mpsc::UnboundedReceiver<(u64, Capability)>,
    /// Bumped on every refresh; stale activation results are dropped
    generation: u64,
    activation_cancel: CancellationToken,
    handles: BTreeSet<RepositoryHandle>,
    watches: WatchSet,
    native: NativeStatus,
}

impl Engine {
    /// Discover repositories, attach both strategies and report each
    /// repository's initial branch to the orchestrator.
    pub async fn start(
        options: EngineOptions,
        orchestrator: AutomationOrchestrator,
        integration: IntegrationFactory,
    ) -> Self {
        let detector = Arc::new(BranchChangeDetector::new(options.reader.clone()));
        let remembered = orchestrator.remembered_branch().cloned();

        let (automation, automation_rx) = mpsc::unbounded_channel();
        let automation_task = tokio::spawn(drive_automation(orchestrator, automation_rx));

        detector.on_branch_change(Arc::new(AutomationListener(automation.clone())));

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (activation_tx, activation_rx) = mpsc::unbounded_channel();

        let mut engine = Self {
            options,
            integration,
            detector,
            automation,
            automation_task,
            signal_tx,
            signal_rx,
            command_tx,
            command_rx,
            activation_tx,
            activation_rx,
            generation: 0,
            activation_cancel: CancellationToken::new(),
            handles: BTreeSet::new(),
            watches: WatchSet::new(),
            native: NativeStatus::Disabled,
        };

        engine.rebuild();
        if let Some(last) = remembered
            && engine.detector.handle(&last.repo_path).is_some()
        {
            engine
                .detector
                .seed(&last.repo_path, &last.branch_name)
                .await;
        }
        engine.initialize().await;
        engine
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            commands: self.command_tx.clone(),
        }
    }

    pub fn detector(&self) -> &Arc<BranchChangeDetector> {
        &self.detector
    }

    pub fn repositories(&self) -> &BTreeSet<RepositoryHandle> {
        &self.handles
    }

    /// Rediscover and rebuild all watches, then re-initialize.
    ///
    /// Watches are replaced wholesale; branch state survives for repositories
    /// that are still present.
    pub async fn refresh(&mut self) {
        tracing::info!("refreshing repositories");
        self.rebuild();
        self.initialize().await;
    }

    /// Process signals and commands until cancelled or shut down.
    /// Every watch is disposed before this returns.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(signal) = self.signal_rx.recv() => self.on_signal(signal),
                Some((generation, capability)) = self.activation_rx.recv() => {
                    self.on_activation(generation, capability);
                }
                command = self.command_rx.recv() => match command {
                    Some(EngineCommand::Shutdown) | None => break,
                    Some(command) => self.on_command(command).await,
                },
            }
        }
        self.shutdown().await;
    }

    async fn shutdown(self) {
        let Self {
            mut watches,
            activation_cancel,
            automation,
            automation_task,
            detector,
            ..
        } = self;

        activation_cancel.cancel();
        tracing::info!(watches = watches.len(), "disposing watches");
        watches.dispose_all();

        // The detector's listener holds the other automation sender; once both
        // are gone the automation task drains its queue and stops
        drop(detector);
        drop(automation);
        if let Err(e) = automation_task.await {
            tracing::warn!(error = %e, "automation task ended abnormally");
        }
    }

    fn rebuild(&mut self) {
        self.watches.dispose_all();
        self.activation_cancel.cancel();
        self.activation_cancel = CancellationToken::new();
        self.generation += 1;

        self.handles = discover_with_depth(&self.options.workspace_roots, self.options.discovery_depth);
        self.detector.set_repositories(&self.handles);
        tracing::info!(repositories = self.handles.len(), "repositories discovered");

        self.watches
            .extend(fs_watch::watch_all(&self.handles, &self.signal_tx));

        match self.options.activation {
            None => self.native = NativeStatus::Disabled,
            Some(_) if self.handles.is_empty() => self.native = NativeStatus::Unavailable,
            Some(policy) => {
                self.native = NativeStatus::Probing;
                let integration = (self.integration)(&self.handles);
                let cancel = self.activation_cancel.clone();
                let tx = self.activation_tx.clone();
                let generation = self.generation;
                tokio::spawn(async move {
                    let capability =
                        native::activate_with_retry(integration.as_ref(), policy, &cancel).await;
                    let _ = tx.send((generation, capability));
                });
            }
        }
    }

    async fn initialize(&self) {
        // Initializations and changes reach the orchestrator through the listener
        for outcome in self.detector.initialize().await {
            if let RecheckOutcome::Unreadable(reason) = outcome {
                tracing::debug!(%reason, "branch unreadable at startup");
            }
        }
    }

    fn on_activation(&mut self, generation: u64, capability: Capability) {
        if generation != self.generation {
            tracing::debug!(generation, "stale activation result ignored");
            return;
        }
        self.native = match capability {
            Capability::Unavailable => NativeStatus::Unavailable,
            Capability::Inactive => NativeStatus::Inactive,
            Capability::Active(active) => {
                let (subscriptions, covered) =
                    native::attach(active.as_ref(), &self.handles, &self.signal_tx);
                tracing::info!(
                    native = covered.len(),
                    total = self.handles.len(),
                    "native subscriptions attached"
                );
                self.watches.extend(subscriptions);
                NativeStatus::Active {
                    repositories: covered.len(),
                }
            }
        };
    }

    fn on_signal(&self, signal: Signal) {
        match signal {
            Signal::Recheck { repo, source } => self.spawn_recheck(repo, source),
            Signal::Commit { repo, commit } => {
                let Some(handle) = self.detector.handle(&repo) else {
                    return;
                };
                let automation = self.automation.clone();
                tokio::spawn(async move {
                    match commit_message(handle).await {
                        Ok(message) => {
                            let _ = automation.send(AutomationInput::Commit { repo, message });
                        }
                        Err(e) => {
                            tracing::warn!(repo = %repo.display(), commit = ?commit, error = %e, "commit message unavailable");
                        }
                    }
                });
            }
        }
    }

    fn spawn_recheck(&self, repo: PathBuf, source: SignalSource) {
        let detector = self.detector.clone();
        tokio::spawn(async move {
            tracing::trace!(repo = %repo.display(), %source, "recheck");
            detector.recheck(&repo).await;
        });
    }

    async fn on_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Refresh => self.refresh().await,
            EngineCommand::Recheck => {
                for handle in &self.handles {
                    self.spawn_recheck(handle.root.clone(), SignalSource::Manual);
                }
            }
            EngineCommand::ToggleAutoStart(reply) => {
                let _ = self.automation.send(AutomationInput::ToggleAutoStart(reply));
            }
            EngineCommand::ToggleAutoLog(reply) => {
                let _ = self.automation.send(AutomationInput::ToggleAutoLog(reply));
            }
            EngineCommand::LogCommit { message, reply } => {
                let _ = self
                    .automation
                    .send(AutomationInput::LogCommit { message, reply });
            }
            EngineCommand::Status(reply) => {
                let detector = self.detector.clone();
                let automation = self.automation.clone();
                let native = self.native.clone();
                let watches = self.watches.len();
                tokio::spawn(async move {
                    let (tx, rx) = oneshot::channel();
                    let snapshot = if automation.send(AutomationInput::Snapshot(tx)).is_ok() {
                        rx.await.ok()
                    } else {
                        None
                    };
                    let _ = reply.send(EngineStatus {
                        repositories: detector.snapshot().await,
                        native,
                        watches,
                        automation: snapshot,
                    });
                });
            }
            EngineCommand::Watchers(reply) => {
                let _ = reply.send(self.watches.describe());
            }
            EngineCommand::HeadContents(reply) => {
                let _ = reply.send(head_contents(&self.handles));
            }
            EngineCommand::Shutdown => {}
        }
    }
}

async fn commit_message(handle: RepositoryHandle) -> Result<String, CommitReadError> {
    let root = handle.root.clone();
    tokio::task::spawn_blocking(move || head_commit_summary(&handle))
        .await
        .map_err(|e| CommitReadError::Open {
            path: root,
            reason: e.to_string(),
        })?
        .map(|commit| commit.summary)
}

/// Raw pointer-file contents, or the read error, for each repository
pub fn head_contents<'a>(
    handles: impl IntoIterator<Item = &'a RepositoryHandle>,
) -> Vec<(PathBuf, String)> {
    handles
        .into_iter()
        .map(|h| {
            let content = std::fs::read_to_string(&h.head_path)
                .map(|c| c.trim_end().to_string())
                .unwrap_or_else(|e| format!("<unreadable: {e}>"));
            (h.root.clone(), content)
        })
        .collect()
}
