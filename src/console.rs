use branchlink::automation::{
    AutoTimerState, CommitLogOutcome, NotificationLevel, StepOutcome, UiMessage, UiSink,
};
use branchlink::engine::EngineStatus;
use branchlink::repo::{RepositoryHandle, is_detached};
use branchlink::ticket::TicketInfo;
use colored::{ColoredString, Colorize};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Prints UI messages to stdout, colored or as JSON lines
pub struct ConsoleSink {
    json: bool,
}

impl ConsoleSink {
    pub fn new(json: bool) -> Self {
        Self { json }
    }
}

impl UiSink for ConsoleSink {
    fn publish(&self, message: UiMessage) {
        if self.json {
            match serde_json::to_string(&message) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(error = %e, "cannot serialize UI message"),
            }
            return;
        }
        println!("{}", render(&message));
    }
}

fn branch_colored(branch: &str) -> ColoredString {
    if branch == "main" || branch == "master" {
        branch.bright_white().bold()
    } else if is_detached(branch) {
        "detached".bright_yellow()
    } else {
        branch.bright_magenta()
    }
}

fn ticket_colored(ticket: Option<&TicketInfo>) -> String {
    match ticket {
        Some(ticket) => ticket.to_string().bright_cyan().to_string(),
        None => "no ticket".dimmed().to_string(),
    }
}

fn repo_name(path: &Path) -> ColoredString {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
        .bright_blue()
}

fn render(message: &UiMessage) -> String {
    match message {
        UiMessage::BranchInitialized {
            repo,
            branch,
            ticket,
        } => format!(
            "{} [{}] {}",
            repo_name(repo),
            branch_colored(branch),
            ticket_colored(ticket.as_ref())
        ),
        UiMessage::BranchChanged {
            repo,
            previous_branch,
            new_branch,
            ticket,
        } => format!(
            "{} {} {} {} {}",
            repo_name(repo),
            branch_colored(previous_branch),
            "→".dimmed(),
            branch_colored(new_branch),
            ticket_colored(ticket.as_ref())
        ),
        UiMessage::TimerStarted {
            ticket_id,
            started_at,
        } => format!(
            "{} timer started for {} at {}",
            "⏱".green(),
            ticket_id.bright_cyan(),
            started_at.with_timezone(&chrono::Local).format("%H:%M")
        ),
        UiMessage::TimerStopped {
            ticket_id,
            minutes,
            logged,
        } => {
            let state = if *logged {
                "logged".green()
            } else {
                "not logged".yellow()
            };
            format!(
                "{} timer stopped for {} after {}m ({})",
                "⏹".dimmed(),
                ticket_id.bright_cyan(),
                minutes,
                state
            )
        }
        UiMessage::TimeLogged {
            ticket_id,
            minutes,
            description,
        } => format!(
            "{} logged {}m on {}: {}",
            "✓".green().bold(),
            minutes,
            ticket_id.bright_cyan(),
            description
        ),
        UiMessage::SettingsChanged {
            auto_start,
            auto_log,
        } => format!(
            "auto-start {}, auto-log {}",
            on_off(*auto_start),
            on_off(*auto_log)
        ),
        UiMessage::Notification { level, message } => match level {
            NotificationLevel::Info => format!("{} {}", "ℹ".bright_blue(), message),
            NotificationLevel::Warning => format!("{} {}", "⚠".yellow().bold(), message.yellow()),
            NotificationLevel::Error => format!("{} {}", "✗".red().bold(), message.red()),
        },
    }
}

fn on_off(flag: bool) -> ColoredString {
    if flag { "on".green().bold() } else { "off".dimmed() }
}

/// One repository row of the one-shot status command
#[derive(Debug, Serialize)]
pub struct RepoStatus {
    pub path: PathBuf,
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub ticket: Option<TicketInfo>,
}

#[derive(Debug, Serialize)]
struct StatusOutput<'a> {
    repositories: &'a [RepoStatus],
    settings: &'a AutoTimerState,
}

pub fn show_status(repos: &[RepoStatus], settings: &AutoTimerState, json: bool) {
    if json {
        let output = StatusOutput {
            repositories: repos,
            settings,
        };
        match serde_json::to_string_pretty(&output) {
            Ok(text) => println!("{text}"),
            Err(e) => eprintln!("Error: {e}"),
        }
        return;
    }

    println!("{}", "Repositories:".bright_cyan().bold());
    if repos.is_empty() {
        println!("  {}", "none found".dimmed());
    }
    for repo in repos {
        let branch = match (&repo.branch, &repo.error) {
            (Some(branch), _) => branch_colored(branch).to_string(),
            (None, Some(error)) => format!("unreadable: {error}").red().to_string(),
            (None, None) => "?".dimmed().to_string(),
        };
        println!(
            "  {}: {} [{}] {}",
            repo_name(&repo.path),
            repo.path.display().to_string().white(),
            branch,
            ticket_colored(repo.ticket.as_ref())
        );
    }

    show_settings(settings);
}

fn show_settings(settings: &AutoTimerState) {
    println!("\n{}", "Automation:".bright_cyan().bold());
    println!("  auto-start: {}", on_off(settings.auto_start));
    println!("  auto-log:   {}", on_off(settings.auto_log));
    if let Some(last) = &settings.last_branch_info {
        println!(
            "  last seen:  {} in {} ({})",
            branch_colored(&last.branch_name),
            last.repo_path.display(),
            last.ticket_id.as_deref().unwrap_or("no ticket")
        );
    }
}

/// Status of a running engine, for the `status` console command
pub fn show_engine_status(status: &EngineStatus) {
    println!("{}", "Repositories:".bright_cyan().bold());
    for state in &status.repositories {
        println!(
            "  {}: [{}] since {}",
            repo_name(&state.repo),
            branch_colored(&state.branch),
            state
                .observed_at
                .with_timezone(&chrono::Local)
                .format("%H:%M:%S")
        );
    }
    println!(
        "\n{} native {}, {} watch(es)",
        "Detection:".bright_cyan().bold(),
        status.native,
        status.watches
    );

    let Some(automation) = &status.automation else {
        println!("{}", "automation stopped".red());
        return;
    };
    show_settings(&automation.settings);
    if let Some(current) = &automation.current {
        println!(
            "  current:    {} [{}] {}",
            repo_name(&current.repo),
            branch_colored(&current.branch),
            ticket_colored(current.ticket.as_ref())
        );
    }
    match &automation.tracking {
        Some(ticket) => println!("  tracking:   {}", ticket.bright_cyan()),
        None => println!("  tracking:   {}", "nothing".dimmed()),
    }
}

pub fn show_watchers(watchers: &[String]) {
    println!("{}", format!("{} watch(es):", watchers.len()).bright_cyan().bold());
    for watcher in watchers {
        println!("  {watcher}");
    }
}

pub fn show_heads(heads: &[(PathBuf, String)]) {
    for (repo, content) in heads {
        println!("{} {}", repo_name(repo), content);
    }
}

pub fn show_commit_outcome(outcome: &CommitLogOutcome) {
    let step = |outcome: &StepOutcome| match outcome {
        StepOutcome::Succeeded => "ok".green().to_string(),
        StepOutcome::Failed(reason) => format!("failed: {reason}").red().to_string(),
        StepOutcome::Skipped(reason) => format!("skipped: {reason}").dimmed().to_string(),
    };
    println!(
        "{} {}m on {}: tracker {}, accounting {}",
        "commit".bright_cyan().bold(),
        outcome.minutes,
        outcome.ticket_id.as_deref().unwrap_or("-"),
        step(&outcome.primary),
        step(&outcome.secondary)
    );
}

pub fn show_hook_install(handle: &RepositoryHandle, results: &[branchlink::detect::hooks::HookInstall]) {
    use branchlink::detect::hooks::HookInstall;

    println!("{}", repo_name(&handle.root));
    for result in results {
        match result {
            HookInstall::Installed(path) => {
                println!("  {} {}", "installed".green(), path.display())
            }
            HookInstall::AlreadyInstalled(path) => {
                println!("  {} {}", "present".dimmed(), path.display())
            }
            HookInstall::Skipped(path) => println!(
                "  {} {} (existing hook, not ours)",
                "skipped".yellow(),
                path.display()
            ),
        }
    }
}
