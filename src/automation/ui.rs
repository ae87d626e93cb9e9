//! Messages pushed to the UI layer
//!
//! One variant per event kind; sinks match exhaustively.

use crate::ticket::TicketInfo;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiMessage {
    /// Initial branch of a repository (startup or refresh)
    BranchInitialized {
        repo: PathBuf,
        branch: String,
        ticket: Option<TicketInfo>,
    },

    BranchChanged {
        repo: PathBuf,
        previous_branch: String,
        new_branch: String,
        ticket: Option<TicketInfo>,
    },

    TimerStarted {
        ticket_id: String,
        started_at: DateTime<Utc>,
    },

    TimerStopped {
        ticket_id: String,
        minutes: u32,
        logged: bool,
    },

    TimeLogged {
        ticket_id: String,
        minutes: u32,
        description: String,
    },

    SettingsChanged {
        auto_start: bool,
        auto_log: bool,
    },

    Notification {
        level: NotificationLevel,
        message: String,
    },
}

impl UiMessage {
    pub fn info(message: impl Into<String>) -> Self {
        UiMessage::Notification {
            level: NotificationLevel::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        UiMessage::Notification {
            level: NotificationLevel::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        UiMessage::Notification {
            level: NotificationLevel::Error,
            message: message.into(),
        }
    }
}

/// Receives UI messages. Must not block.
pub trait UiSink: Send + Sync {
    fn publish(&self, message: UiMessage);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_tagged() {
        let json = serde_json::to_value(UiMessage::SettingsChanged {
            auto_start: true,
            auto_log: false,
        })
        .unwrap();
        assert_eq!(json["type"], "settings_changed");
        assert_eq!(json["auto_start"], true);

        let json = serde_json::to_value(UiMessage::warning("re-authenticate")).unwrap();
        assert_eq!(json["type"], "notification");
        assert_eq!(json["level"], "warning");
    }
}
