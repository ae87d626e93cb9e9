//! Issue-tracker boundary

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Display fields of a ticket
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketFields {
    pub summary: Option<String>,
    pub status: Option<String>,
    pub description: Option<String>,
}

/// One free-text search result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub ticket_id: String,
    pub summary: Option<String>,
}

/// A time log against a ticket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorklogEntry {
    pub ticket_id: String,
    pub minutes: u32,
    pub description: String,
}

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Ticket {0} not found")]
    NotFound(String),

    #[error("Not authenticated with the issue tracker (HTTP 401)")]
    Unauthorized,

    #[error("Access denied by the issue tracker (HTTP 403)")]
    Forbidden,

    #[error("Issue tracker request timed out")]
    Timeout,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Issue tracker returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unexpected response from issue tracker: {0}")]
    Decode(String),

    #[error("Issue tracker is not configured")]
    NotConfigured,
}

impl TrackerError {
    /// 401/403: the user should re-authenticate
    pub fn requires_reauth(&self) -> bool {
        matches!(self, TrackerError::Unauthorized | TrackerError::Forbidden)
    }
}

impl From<reqwest::Error> for TrackerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TrackerError::Timeout
        } else if err.is_decode() {
            TrackerError::Decode(err.to_string())
        } else {
            TrackerError::Network(err.to_string())
        }
    }
}

/// The handful of issue-tracker calls the engine depends on
#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// Succeeds only if the ticket exists and is visible to the user
    async fn verify_ticket(&self, ticket_id: &str) -> Result<(), TrackerError>;

    async fn fetch_fields(&self, ticket_id: &str) -> Result<TicketFields, TrackerError>;

    async fn search(&self, text: &str) -> Result<Vec<SearchHit>, TrackerError>;

    async fn add_worklog(&self, entry: &WorklogEntry) -> Result<(), TrackerError>;
}

/// Stand-in used when no tracker is configured: every call fails, so no
/// ticket is ever confirmed
pub struct UnconfiguredTracker;

#[async_trait]
impl IssueTracker for UnconfiguredTracker {
    async fn verify_ticket(&self, _ticket_id: &str) -> Result<(), TrackerError> {
        Err(TrackerError::NotConfigured)
    }

    async fn fetch_fields(&self, _ticket_id: &str) -> Result<TicketFields, TrackerError> {
        Err(TrackerError::NotConfigured)
    }

    async fn search(&self, _text: &str) -> Result<Vec<SearchHit>, TrackerError> {
        Err(TrackerError::NotConfigured)
    }

    async fn add_worklog(&self, _entry: &WorklogEntry) -> Result<(), TrackerError> {
        Err(TrackerError::NotConfigured)
    }
}
