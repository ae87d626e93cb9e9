//! Automations driven by branch changes and commits
//!
//! The [`orchestrator`](orchestrator::AutomationOrchestrator) correlates the
//! branch with a ticket, starts a timer when auto-start is on and logs the
//! elapsed time on commit when auto-log is on. Time is logged to the issue
//! tracker first and then, best-effort, to the accounting system.

pub mod accounting;
pub mod orchestrator;
pub mod state;
pub mod timer;
pub mod ui;

pub use accounting::{
    AccountingCredentials, AccountingError, AccountingSystem, Confidence, HttpAccounting,
    TimeEntryReceipt,
};
pub use orchestrator::{AutomationOrchestrator, CommitLogOutcome, CurrentBranchInfo, StepOutcome};
pub use state::{AutoTimerState, JsonFileStore, LastBranchInfo, MemoryStore, StateStore};
pub use timer::{LocalTimer, TimerError, TimerRun, WorkTimer};
pub use ui::{NotificationLevel, UiMessage, UiSink};
