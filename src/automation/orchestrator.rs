//! Reacts to branch changes and commits
//!
//! The orchestrator owns the timer and the persisted [`AutoTimerState`]. It is
//! driven from a single task, so every method takes `&mut self`. Nothing here
//! returns an error to the caller: failures become [`UiMessage`]
//! notifications and, for commits, a [`CommitLogOutcome`].

use super::accounting::{self, AccountingSystem};
use super::state::{AutoTimerState, LastBranchInfo, StateStore};
use super::timer::WorkTimer;
use super::ui::{UiMessage, UiSink};
use crate::detect::{BranchChangeEvent, BranchInit};
use crate::ticket::{Correlation, TicketCorrelator, TicketInfo, TrackerError, WorklogEntry};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const REAUTH_HINT: &str = "The issue tracker rejected the stored credentials. Re-authenticate and refresh.";

/// Branch and ticket the automation currently follows
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrentBranchInfo {
    pub repo: PathBuf,
    pub branch: String,
    pub ticket: Option<TicketInfo>,
}

/// Result of one step of a commit log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum StepOutcome {
    Succeeded,
    Failed(String),
    Skipped(String),
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StepOutcome::Succeeded)
    }
}

/// What happened when time was logged for a commit.
///
/// The two systems are reported separately; a secondary failure after a
/// primary success is a partial success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitLogOutcome {
    pub ticket_id: Option<String>,
    pub minutes: u32,
    pub primary: StepOutcome,
    pub secondary: StepOutcome,
}

impl CommitLogOutcome {
    fn skipped(reason: &str) -> Self {
        Self {
            ticket_id: None,
            minutes: 0,
            primary: StepOutcome::Skipped(reason.to_string()),
            secondary: StepOutcome::Skipped(reason.to_string()),
        }
    }
}

pub struct AutomationOrchestrator {
    correlator: Arc<TicketCorrelator>,
    accounting: Option<Arc<dyn AccountingSystem>>,
    timer: Box<dyn WorkTimer>,
    store: Arc<dyn StateStore>,
    ui: Arc<dyn UiSink>,
    state: AutoTimerState,
    current: Option<CurrentBranchInfo>,
}

impl AutomationOrchestrator {
    /// Build an orchestrator; persisted settings are loaded once, here
    pub fn new(
        correlator: Arc<TicketCorrelator>,
        accounting: Option<Arc<dyn AccountingSystem>>,
        timer: Box<dyn WorkTimer>,
        store: Arc<dyn StateStore>,
        ui: Arc<dyn UiSink>,
    ) -> Self {
        let state = AutoTimerState::load(store.as_ref());
        tracing::debug!(
            auto_start = state.auto_start,
            auto_log = state.auto_log,
            remembered = ?state.last_branch_info.as_ref().map(|b| &b.branch_name),
            "automation state loaded"
        );
        Self {
            correlator,
            accounting,
            timer,
            store,
            ui,
            state,
            current: None,
        }
    }

    pub fn settings(&self) -> &AutoTimerState {
        &self.state
    }

    /// Branch remembered from the previous run
    pub fn remembered_branch(&self) -> Option<&LastBranchInfo> {
        self.state.last_branch_info.as_ref()
    }

    pub fn current_branch_info(&self) -> Option<&CurrentBranchInfo> {
        self.current.as_ref()
    }

    /// Ticket the timer is running for
    pub fn tracking(&self) -> Option<&str> {
        self.timer.running()
    }

    /// A repository's branch as first seen by this process.
    ///
    /// The remembered repository wins the "current" slot; otherwise the first
    /// repository reported takes it.
    pub async fn on_initialize(&mut self, init: &BranchInit) {
        let remembered_repo = self
            .state
            .last_branch_info
            .as_ref()
            .is_some_and(|b| b.repo_path == init.repo);
        let claims_current = match &self.current {
            None => true,
            Some(current) => current.repo == init.repo || remembered_repo,
        };

        let (ticket, checked) = if !claims_current || !self.state.auto_start {
            (None, false)
        } else if self.known_ticketless(&init.repo, &init.branch) {
            tracing::debug!(branch = %init.branch, "branch remembered as ticketless, skipping lookup");
            (None, true)
        } else {
            self.correlate(&init.branch).await
        };

        self.ui.publish(UiMessage::BranchInitialized {
            repo: init.repo.clone(),
            branch: init.branch.clone(),
            ticket: ticket.clone(),
        });

        if !claims_current {
            return;
        }

        if let Some(ticket) = &ticket
            && self.timer.running() != Some(ticket.ticket_id.as_str())
        {
            self.stop_unlogged();
            self.start_timer(&ticket.ticket_id);
        }

        self.set_current(&init.repo, &init.branch, ticket, checked);
    }

    pub async fn on_branch_change(&mut self, event: &BranchChangeEvent) {
        tracing::info!(
            repo = %event.repo.display(),
            from = %event.previous_branch,
            to = %event.new_branch,
            "branch changed"
        );

        // Time on the old branch is never logged implicitly
        self.stop_unlogged();

        let (ticket, checked) = if self.state.auto_start {
            self.correlate(&event.new_branch).await
        } else {
            (None, false)
        };

        self.ui.publish(UiMessage::BranchChanged {
            repo: event.repo.clone(),
            previous_branch: event.previous_branch.clone(),
            new_branch: event.new_branch.clone(),
            ticket: ticket.clone(),
        });

        if let Some(ticket) = &ticket {
            self.start_timer(&ticket.ticket_id);
        }

        self.set_current(&event.repo, &event.new_branch, ticket, checked);
    }

    /// A commit happened. Logs time only when auto-log is on.
    ///
    /// `repo` is `None` for commits not tied to a repository; a commit in a
    /// repository other than the current one is ignored.
    pub async fn on_commit(&mut self, repo: Option<&Path>, message: &str) -> CommitLogOutcome {
        if !self.state.auto_log {
            tracing::debug!("auto-log disabled, commit ignored");
            return CommitLogOutcome::skipped("auto-log is disabled");
        }
        if let (Some(repo), Some(current)) = (repo, &self.current)
            && current.repo != repo
        {
            tracing::debug!(repo = %repo.display(), "commit outside the tracked repository");
            return CommitLogOutcome::skipped("commit is not in the tracked repository");
        }
        self.log_commit(message).await
    }

    /// Log the running timer against its ticket with `message` as the
    /// description, regardless of auto-log. The timer restarts afterwards.
    pub async fn log_commit(&mut self, message: &str) -> CommitLogOutcome {
        let Some(run) = self.timer.stop() else {
            return CommitLogOutcome::skipped("no ticket is being tracked");
        };
        let minutes = run.minutes();
        let ticket_id = run.ticket_id.clone();
        let description = message.trim().to_string();

        let entry = WorklogEntry {
            ticket_id: ticket_id.clone(),
            minutes,
            description: description.clone(),
        };

        let primary = match self.correlator.log_work(&entry).await {
            Ok(()) => {
                tracing::info!(ticket = %ticket_id, minutes, "worklog submitted");
                self.ui.publish(UiMessage::TimeLogged {
                    ticket_id: ticket_id.clone(),
                    minutes,
                    description: description.clone(),
                });
                StepOutcome::Succeeded
            }
            Err(e) => {
                tracing::warn!(ticket = %ticket_id, minutes, error = %e, "worklog failed");
                self.notify_tracker_failure(
                    &e,
                    format!("Could not log {minutes}m on {ticket_id}: {e}"),
                );
                StepOutcome::Failed(e.to_string())
            }
        };

        let secondary = if !primary.is_success() {
            StepOutcome::Skipped("primary worklog failed".to_string())
        } else if let Some(system) = self.accounting.clone() {
            let key = self.project_key(&ticket_id);
            let note = format!("{ticket_id}: {description}");
            let today = chrono::Local::now().date_naive();
            match accounting::log_time(system.as_ref(), &key, minutes, &note, today).await {
                Ok(receipt) => {
                    self.ui.publish(UiMessage::info(format!(
                        "Booked {minutes}m on {} / {} ({} confidence)",
                        receipt.project.name, receipt.choice.service.name, receipt.choice.confidence
                    )));
                    StepOutcome::Succeeded
                }
                Err(e) => {
                    tracing::warn!(ticket = %ticket_id, error = %e, "accounting entry failed");
                    self.ui.publish(UiMessage::warning(format!(
                        "Logged {minutes}m on {ticket_id}, but the accounting entry failed: {e}"
                    )));
                    StepOutcome::Failed(e.to_string())
                }
            }
        } else {
            StepOutcome::Skipped("no accounting system configured".to_string())
        };

        self.ui.publish(UiMessage::TimerStopped {
            ticket_id: ticket_id.clone(),
            minutes,
            logged: primary.is_success(),
        });

        // Work continues on the same ticket after a commit
        self.start_timer(&ticket_id);

        CommitLogOutcome {
            ticket_id: Some(ticket_id),
            minutes,
            primary,
            secondary,
        }
    }

    /// Flip auto-start. Turning it on begins tracking the current branch.
    pub async fn toggle_auto_start(&mut self) -> bool {
        self.state.auto_start = !self.state.auto_start;
        self.persist();
        self.publish_settings();

        if self.state.auto_start
            && self.timer.running().is_none()
            && let Some(current) = self.current.clone()
        {
            let (ticket, checked) = self.correlate(&current.branch).await;
            if let Some(ticket) = &ticket {
                self.start_timer(&ticket.ticket_id);
            }
            self.set_current(&current.repo, &current.branch, ticket, checked);
        }
        self.state.auto_start
    }

    pub fn toggle_auto_log(&mut self) -> bool {
        self.state.auto_log = !self.state.auto_log;
        self.persist();
        self.publish_settings();
        self.state.auto_log
    }

    /// The verified ticket, and whether the answer is settled (a transient
    /// failure is not)
    async fn correlate(&self, branch: &str) -> (Option<TicketInfo>, bool) {
        match self.correlator.correlate_detailed(branch).await {
            Correlation::Found(ticket) => (Some(ticket), true),
            Correlation::NoTicket => (None, true),
            Correlation::Unverified { ticket_id, error } => {
                if error.requires_reauth() {
                    self.ui.publish(UiMessage::warning(REAUTH_HINT));
                } else if let Some(id) = &ticket_id {
                    self.ui.publish(UiMessage::info(format!(
                        "{id} could not be verified ({error}); not tracking"
                    )));
                }
                let settled = ticket_id.is_some() && matches!(error, TrackerError::NotFound(_));
                (None, settled)
            }
        }
    }

    fn known_ticketless(&self, repo: &Path, branch: &str) -> bool {
        self.state.last_branch_info.as_ref().is_some_and(|last| {
            last.repo_path == repo
                && last.branch_name == branch
                && last.ticket_checked
                && last.ticket_id.is_none()
        })
    }

    fn start_timer(&mut self, ticket_id: &str) {
        match self.timer.start(ticket_id) {
            Ok(started_at) => self.ui.publish(UiMessage::TimerStarted {
                ticket_id: ticket_id.to_string(),
                started_at,
            }),
            Err(e) => {
                tracing::warn!(ticket = ticket_id, error = %e, "timer did not start");
                // Back to "not tracking"
                self.timer.stop();
                self.ui
                    .publish(UiMessage::error(format!("Timer for {ticket_id} not started: {e}")));
            }
        }
    }

    fn stop_unlogged(&mut self) {
        if let Some(run) = self.timer.stop() {
            let minutes = run.minutes();
            self.ui.publish(UiMessage::TimerStopped {
                ticket_id: run.ticket_id,
                minutes,
                logged: false,
            });
        }
    }

    fn set_current(
        &mut self,
        repo: &Path,
        branch: &str,
        ticket: Option<TicketInfo>,
        ticket_checked: bool,
    ) {
        let ticket_id = ticket.as_ref().map(|t| t.ticket_id.clone());
        self.current = Some(CurrentBranchInfo {
            repo: repo.to_path_buf(),
            branch: branch.to_string(),
            ticket,
        });

        let last = LastBranchInfo {
            branch_name: branch.to_string(),
            repo_path: repo.to_path_buf(),
            ticket_id,
            ticket_checked,
        };
        if self.state.last_branch_info.as_ref() != Some(&last) {
            self.state.last_branch_info = Some(last);
            self.persist();
        }
    }

    fn project_key(&self, ticket_id: &str) -> String {
        self.current
            .as_ref()
            .and_then(|c| c.ticket.as_ref())
            .filter(|t| t.ticket_id == ticket_id)
            .map(|t| t.project_key.clone())
            .unwrap_or_else(|| crate::ticket::project_key(ticket_id).to_string())
    }

    fn notify_tracker_failure(&self, error: &TrackerError, message: String) {
        if error.requires_reauth() {
            self.ui.publish(UiMessage::warning(REAUTH_HINT));
        }
        self.ui.publish(UiMessage::error(message));
    }

    fn publish_settings(&self) {
        self.ui.publish(UiMessage::SettingsChanged {
            auto_start: self.state.auto_start,
            auto_log: self.state.auto_log,
        });
    }

    fn persist(&self) {
        if let Err(e) = self.state.save(self.store.as_ref()) {
            tracing::warn!(error = %e, "automation state not saved");
            self.ui
                .publish(UiMessage::warning(format!("Settings could not be saved: {e}")));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::state::MemoryStore;
    use crate::automation::timer::{LocalTimer, TimerError, TimerRun};
    use crate::testing::{FakeAccounting, FakeTracker, RecordingSink};
    use crate::ticket::CorrelatorOptions;
    use chrono::{DateTime, Utc};
    use std::time::Duration;

    struct Harness {
        tracker: Arc<FakeTracker>,
        accounting: Arc<FakeAccounting>,
        store: Arc<MemoryStore>,
        sink: Arc<RecordingSink>,
    }

    impl Harness {
        fn new(tracker: FakeTracker, accounting: FakeAccounting) -> Self {
            Self {
                tracker: Arc::new(tracker),
                accounting: Arc::new(accounting),
                store: Arc::new(MemoryStore::new()),
                sink: Arc::new(RecordingSink::new()),
            }
        }

        fn orchestrator_with_timer(&self, timer: Box<dyn WorkTimer>) -> AutomationOrchestrator {
            let correlator = Arc::new(TicketCorrelator::new(
                self.tracker.clone(),
                CorrelatorOptions::default(),
            ));
            AutomationOrchestrator::new(
                correlator,
                Some(self.accounting.clone()),
                timer,
                self.store.clone(),
                self.sink.clone(),
            )
        }

        fn orchestrator(&self) -> AutomationOrchestrator {
            self.orchestrator_with_timer(Box::new(LocalTimer::new()))
        }

        fn enable(&self, auto_start: bool, auto_log: bool) {
            AutoTimerState {
                auto_start,
                auto_log,
                ..AutoTimerState::default()
            }
            .save(self.store.as_ref())
            .unwrap();
        }
    }

    fn change(from: &str, to: &str) -> BranchChangeEvent {
        BranchChangeEvent {
            repo: PathBuf::from("/ws/a"),
            previous_branch: from.to_string(),
            new_branch: to.to_string(),
            timestamp: Utc::now(),
        }
    }

    fn init(branch: &str) -> BranchInit {
        BranchInit {
            repo: PathBuf::from("/ws/a"),
            branch: branch.to_string(),
            timestamp: Utc::now(),
        }
    }

    struct BrokenTimer;

    impl WorkTimer for BrokenTimer {
        fn start(&mut self, _ticket_id: &str) -> Result<DateTime<Utc>, TimerError> {
            Err(TimerError::StartFailed("clock unavailable".to_string()))
        }

        fn stop(&mut self) -> Option<TimerRun> {
            None
        }

        fn running(&self) -> Option<&str> {
            None
        }
    }

    #[tokio::test]
    async fn branch_change_starts_timer_for_verified_ticket() {
        let h = Harness::new(
            FakeTracker::new().with_ticket("OT-3", "Login"),
            FakeAccounting::new(),
        );
        h.enable(true, false);
        let mut o = h.orchestrator();

        o.on_branch_change(&change("main", "feature/OT-3-login")).await;

        assert_eq!(o.tracking(), Some("OT-3"));
        let current = o.current_branch_info().unwrap();
        assert_eq!(current.branch, "feature/OT-3-login");
        assert_eq!(current.ticket.as_ref().unwrap().summary.as_deref(), Some("Login"));

        let saved = AutoTimerState::load(h.store.as_ref()).last_branch_info.unwrap();
        assert_eq!(saved.ticket_id.as_deref(), Some("OT-3"));
        assert!(h.sink.contains(|m| matches!(m, UiMessage::TimerStarted { ticket_id, .. } if ticket_id == "OT-3")));
    }

    #[tokio::test]
    async fn unverified_ticket_never_starts_timer() {
        let h = Harness::new(FakeTracker::new(), FakeAccounting::new());
        h.enable(true, true);
        let mut o = h.orchestrator();

        o.on_branch_change(&change("main", "feature/OT-404")).await;

        assert!(o.tracking().is_none());
        assert!(o.current_branch_info().unwrap().ticket.is_none());
        let saved = AutoTimerState::load(h.store.as_ref()).last_branch_info.unwrap();
        assert_eq!(saved.branch_name, "feature/OT-404");
        assert_eq!(saved.ticket_id, None);
    }

    #[tokio::test]
    async fn auto_start_off_only_records_branch() {
        let h = Harness::new(
            FakeTracker::new().with_ticket("OT-3", "Login"),
            FakeAccounting::new(),
        );
        let mut o = h.orchestrator();

        o.on_branch_change(&change("main", "feature/OT-3")).await;

        assert!(o.tracking().is_none());
        assert_eq!(h.tracker.calls(), 0);
        assert_eq!(
            o.remembered_branch().unwrap().branch_name,
            "feature/OT-3"
        );
    }

    #[tokio::test]
    async fn switching_branch_stops_timer_without_logging() {
        let h = Harness::new(
            FakeTracker::new()
                .with_ticket("OT-3", "Login")
                .with_ticket("OT-4", "Logout"),
            FakeAccounting::new(),
        );
        h.enable(true, true);
        let mut o = h.orchestrator();

        o.on_branch_change(&change("main", "OT-3")).await;
        o.on_branch_change(&change("OT-3", "OT-4")).await;

        assert_eq!(o.tracking(), Some("OT-4"));
        assert!(h.tracker.worklogs().is_empty());
        assert!(h.sink.contains(|m| matches!(
            m,
            UiMessage::TimerStopped { ticket_id, logged: false, .. } if ticket_id == "OT-3"
        )));
    }

    #[tokio::test]
    async fn commit_logs_to_both_systems_and_restarts_timer() {
        let h = Harness::new(
            FakeTracker::new().with_ticket("OT-3", "Login"),
            FakeAccounting::new(),
        );
        h.enable(true, true);
        let mut o = h.orchestrator();
        o.on_branch_change(&change("main", "feature/OT-3")).await;

        let outcome = o
            .on_commit(Some(Path::new("/ws/a")), "Add login form\n")
            .await;

        assert_eq!(outcome.primary, StepOutcome::Succeeded);
        assert_eq!(outcome.secondary, StepOutcome::Succeeded);
        assert_eq!(outcome.minutes, 1);

        let worklogs = h.tracker.worklogs();
        assert_eq!(worklogs.len(), 1);
        assert_eq!(worklogs[0].ticket_id, "OT-3");
        assert_eq!(worklogs[0].description, "Add login form");
        assert_eq!(h.accounting.entries().len(), 1);
        assert_eq!(o.tracking(), Some("OT-3"));
    }

    #[tokio::test]
    async fn secondary_failure_keeps_primary_success() {
        let h = Harness::new(
            FakeTracker::new().with_ticket("OT-3", "Login"),
            FakeAccounting::new().failing(),
        );
        h.enable(true, true);
        let mut o = h.orchestrator();
        o.on_branch_change(&change("main", "OT-3")).await;

        let outcome = o.on_commit(None, "wip").await;

        assert_eq!(outcome.primary, StepOutcome::Succeeded);
        assert!(matches!(outcome.secondary, StepOutcome::Failed(_)));
        assert_eq!(h.tracker.worklogs().len(), 1);
        assert!(h.sink.contains(|m| matches!(m, UiMessage::TimeLogged { .. })));
        assert!(h.sink.contains(|m| matches!(
            m,
            UiMessage::Notification { level: crate::automation::NotificationLevel::Warning, .. }
        )));
    }

    #[tokio::test]
    async fn primary_failure_skips_secondary() {
        let h = Harness::new(
            FakeTracker::new().with_ticket("OT-3", "Login").failing_worklog(),
            FakeAccounting::new(),
        );
        h.enable(true, true);
        let mut o = h.orchestrator();
        o.on_branch_change(&change("main", "OT-3")).await;

        let outcome = o.on_commit(None, "wip").await;

        assert!(matches!(outcome.primary, StepOutcome::Failed(_)));
        assert!(matches!(outcome.secondary, StepOutcome::Skipped(_)));
        assert!(h.accounting.entries().is_empty());
    }

    #[tokio::test]
    async fn commit_ignored_when_auto_log_off_but_manual_log_works() {
        let h = Harness::new(
            FakeTracker::new().with_ticket("OT-3", "Login"),
            FakeAccounting::new(),
        );
        h.enable(true, false);
        let mut o = h.orchestrator();
        o.on_branch_change(&change("main", "OT-3")).await;

        let outcome = o.on_commit(None, "wip").await;
        assert!(matches!(outcome.primary, StepOutcome::Skipped(_)));
        assert!(h.tracker.worklogs().is_empty());

        let outcome = o.log_commit("manual entry").await;
        assert_eq!(outcome.primary, StepOutcome::Succeeded);
        assert_eq!(h.tracker.worklogs().len(), 1);
    }

    #[tokio::test]
    async fn commit_in_other_repository_is_ignored() {
        let h = Harness::new(
            FakeTracker::new().with_ticket("OT-3", "Login"),
            FakeAccounting::new(),
        );
        h.enable(true, true);
        let mut o = h.orchestrator();
        o.on_branch_change(&change("main", "OT-3")).await;

        let outcome = o.on_commit(Some(Path::new("/ws/b")), "elsewhere").await;
        assert!(matches!(outcome.primary, StepOutcome::Skipped(_)));
        assert_eq!(o.tracking(), Some("OT-3"));
    }

    #[tokio::test]
    async fn timer_start_failure_rolls_back_to_not_tracking() {
        let h = Harness::new(
            FakeTracker::new().with_ticket("OT-3", "Login"),
            FakeAccounting::new(),
        );
        h.enable(true, true);
        let mut o = h.orchestrator_with_timer(Box::new(BrokenTimer));

        o.on_branch_change(&change("main", "OT-3")).await;

        assert!(o.tracking().is_none());
        assert!(h.sink.contains(|m| matches!(
            m,
            UiMessage::Notification { level: crate::automation::NotificationLevel::Error, .. }
        )));
        let outcome = o.on_commit(None, "nothing to log").await;
        assert!(matches!(outcome.primary, StepOutcome::Skipped(_)));
    }

    #[tokio::test]
    async fn auth_failure_suggests_reauthentication() {
        let h = Harness::new(FakeTracker::new().unauthorized(), FakeAccounting::new());
        h.enable(true, false);
        let mut o = h.orchestrator();

        o.on_branch_change(&change("main", "OT-3")).await;

        assert!(o.tracking().is_none());
        assert!(h.sink.contains(|m| matches!(
            m,
            UiMessage::Notification { message, .. } if message == REAUTH_HINT
        )));
    }

    #[tokio::test]
    async fn toggles_persist_immediately() {
        let h = Harness::new(FakeTracker::new(), FakeAccounting::new());
        let mut o = h.orchestrator();

        assert!(o.toggle_auto_start().await);
        assert!(o.toggle_auto_log());
        assert!(!o.toggle_auto_log());

        let saved = AutoTimerState::load(h.store.as_ref());
        assert!(saved.auto_start);
        assert!(!saved.auto_log);
        assert_eq!(
            h.sink
                .messages()
                .iter()
                .filter(|m| matches!(m, UiMessage::SettingsChanged { .. }))
                .count(),
            3
        );
    }

    #[tokio::test]
    async fn enabling_auto_start_tracks_current_branch() {
        let h = Harness::new(
            FakeTracker::new().with_ticket("OT-3", "Login"),
            FakeAccounting::new(),
        );
        let mut o = h.orchestrator();
        o.on_initialize(&init("feature/OT-3")).await;
        assert!(o.tracking().is_none());

        o.toggle_auto_start().await;
        assert_eq!(o.tracking(), Some("OT-3"));
    }

    #[tokio::test]
    async fn remembered_ticketless_branch_skips_lookup() {
        let h = Harness::new(FakeTracker::new(), FakeAccounting::new());
        AutoTimerState {
            auto_start: true,
            last_branch_info: Some(LastBranchInfo {
                branch_name: "main".to_string(),
                repo_path: PathBuf::from("/ws/a"),
                ticket_id: None,
                ticket_checked: true,
            }),
            ..AutoTimerState::default()
        }
        .save(h.store.as_ref())
        .unwrap();
        let mut o = h.orchestrator();

        o.on_initialize(&init("main")).await;

        assert_eq!(h.tracker.calls(), 0);
        assert_eq!(o.current_branch_info().unwrap().branch, "main");
    }

    #[tokio::test]
    async fn branch_recorded_without_lookup_is_looked_up_later() {
        let h = Harness::new(
            FakeTracker::new().with_ticket("OT-3", "Login"),
            FakeAccounting::new(),
        );
        // Recorded while auto-start was off, then auto-start enabled elsewhere
        let mut o = h.orchestrator();
        o.on_branch_change(&change("main", "feature/OT-3")).await;
        h.enable(true, false);
        let mut state = AutoTimerState::load(h.store.as_ref());
        state.last_branch_info = o.remembered_branch().cloned();
        state.save(h.store.as_ref()).unwrap();

        let mut o = h.orchestrator();
        o.on_initialize(&init("feature/OT-3")).await;
        assert_eq!(o.tracking(), Some("OT-3"));
    }

    #[tokio::test]
    async fn transient_failure_is_not_remembered_as_ticketless() {
        let h = Harness::new(
            FakeTracker::new()
                .with_ticket("OT-3", "Login")
                .with_delay(Duration::from_millis(200)),
            FakeAccounting::new(),
        );
        h.enable(true, false);
        let correlator = Arc::new(TicketCorrelator::new(
            h.tracker.clone(),
            CorrelatorOptions {
                request_timeout: Duration::from_millis(10),
                ..CorrelatorOptions::default()
            },
        ));
        let mut o = AutomationOrchestrator::new(
            correlator,
            None,
            Box::new(LocalTimer::new()),
            h.store.clone(),
            h.sink.clone(),
        );

        o.on_branch_change(&change("main", "feature/OT-3")).await;

        assert!(o.tracking().is_none());
        assert!(!o.remembered_branch().unwrap().ticket_checked);
    }

    #[tokio::test]
    async fn initialize_resumes_tracking_remembered_ticket() {
        let h = Harness::new(
            FakeTracker::new().with_ticket("X-1", "Resume"),
            FakeAccounting::new(),
        );
        AutoTimerState {
            auto_start: true,
            last_branch_info: Some(LastBranchInfo {
                branch_name: "feature/X-1".to_string(),
                repo_path: PathBuf::from("/ws/a"),
                ticket_id: Some("X-1".to_string()),
                ticket_checked: true,
            }),
            ..AutoTimerState::default()
        }
        .save(h.store.as_ref())
        .unwrap();
        let mut o = h.orchestrator();

        o.on_initialize(&init("feature/X-1")).await;

        assert_eq!(o.tracking(), Some("X-1"));
        assert!(h.sink.contains(|m| matches!(m, UiMessage::BranchInitialized { .. })));
        assert!(!h.sink.contains(|m| matches!(m, UiMessage::BranchChanged { .. })));
    }
}
