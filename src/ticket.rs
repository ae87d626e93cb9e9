//! Ticket identifiers: extraction from branch names and remote verification

mod correlator;
mod extract;
mod jira;
mod tracker;

pub use correlator::{Correlation, CorrelatorOptions, TicketCorrelator};
pub use extract::{extract_ticket_id, project_key};
pub use jira::{JiraClient, JiraCredentials};
pub use tracker::{
    IssueTracker, SearchHit, TicketFields, TrackerError, UnconfiguredTracker, WorklogEntry,
};

use serde::{Deserialize, Serialize};

/// A verified ticket linked to a branch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketInfo {
    /// e.g. `PROJ-123`
    pub ticket_id: String,

    /// Alphabetic prefix, e.g. `PROJ`
    pub project_key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TicketInfo {
    /// Bare id/key pair without display fields
    pub fn bare(ticket_id: &str) -> Self {
        Self {
            ticket_id: ticket_id.to_string(),
            project_key: project_key(ticket_id).to_string(),
            summary: None,
            status: None,
            description: None,
        }
    }

    pub fn with_fields(mut self, fields: TicketFields) -> Self {
        self.summary = fields.summary;
        self.status = fields.status;
        self.description = fields.description;
        self
    }
}

impl std::fmt::Display for TicketInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match &self.summary {
            Some(summary) => write!(f, "{}: {}", self.ticket_id, summary),
            None => write!(f, "{}", self.ticket_id),
        }
    }
}
