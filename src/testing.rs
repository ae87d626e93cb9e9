//! In-memory collaborators for unit tests

use crate::automation::accounting::{
    AccountingError, AccountingSystem, Person, Project, Service, ServiceUsage, TimeEntry,
};
use crate::automation::ui::{UiMessage, UiSink};
use crate::ticket::{IssueTracker, SearchHit, TicketFields, TrackerError, WorklogEntry};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Default)]
pub struct FakeTracker {
    tickets: HashMap<String, String>,
    search_hits: Vec<String>,
    failing_fields: bool,
    failing_worklog: bool,
    unauthorized: bool,
    delay: Option<Duration>,
    calls: AtomicUsize,
    field_fetches: AtomicUsize,
    worklogs: Mutex<Vec<WorklogEntry>>,
}

impl FakeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ticket(mut self, id: &str, summary: &str) -> Self {
        self.tickets.insert(id.to_string(), summary.to_string());
        self
    }

    /// Ticket ids returned, in order, by every search
    pub fn with_search_hits(mut self, ids: &[&str]) -> Self {
        self.search_hits = ids.iter().map(|id| id.to_string()).collect();
        self
    }

    pub fn failing_fields(mut self) -> Self {
        self.failing_fields = true;
        self
    }

    pub fn failing_worklog(mut self) -> Self {
        self.failing_worklog = true;
        self
    }

    pub fn unauthorized(mut self) -> Self {
        self.unauthorized = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn field_fetches(&self) -> usize {
        self.field_fetches.load(Ordering::SeqCst)
    }

    pub fn worklogs(&self) -> Vec<WorklogEntry> {
        self.worklogs.lock().unwrap().clone()
    }

    async fn enter(&self) -> Result<(), TrackerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.unauthorized {
            return Err(TrackerError::Unauthorized);
        }
        Ok(())
    }
}

#[async_trait]
impl IssueTracker for FakeTracker {
    async fn verify_ticket(&self, ticket_id: &str) -> Result<(), TrackerError> {
        self.enter().await?;
        if self.tickets.contains_key(ticket_id) {
            Ok(())
        } else {
            Err(TrackerError::NotFound(ticket_id.to_string()))
        }
    }

    async fn fetch_fields(&self, ticket_id: &str) -> Result<TicketFields, TrackerError> {
        self.enter().await?;
        self.field_fetches.fetch_add(1, Ordering::SeqCst);
        if self.failing_fields {
            return Err(TrackerError::Network("connection reset".to_string()));
        }
        let summary = self
            .tickets
            .get(ticket_id)
            .ok_or_else(|| TrackerError::NotFound(ticket_id.to_string()))?;
        Ok(TicketFields {
            summary: Some(summary.clone()),
            status: Some("In Progress".to_string()),
            description: None,
        })
    }

    async fn search(&self, _text: &str) -> Result<Vec<SearchHit>, TrackerError> {
        self.enter().await?;
        Ok(self
            .search_hits
            .iter()
            .map(|id| SearchHit {
                ticket_id: id.clone(),
                summary: self.tickets.get(id).cloned(),
            })
            .collect())
    }

    async fn add_worklog(&self, entry: &WorklogEntry) -> Result<(), TrackerError> {
        self.enter().await?;
        if self.failing_worklog {
            return Err(TrackerError::Status {
                status: 500,
                body: "internal error".to_string(),
            });
        }
        self.worklogs.lock().unwrap().push(entry.clone());
        Ok(())
    }
}

/// One person, one project per key ("OT"), two services
#[derive(Default)]
pub struct FakeAccounting {
    failing: bool,
    entries: Mutex<Vec<TimeEntry>>,
}

impl FakeAccounting {
    pub fn new() -> Self {
        Self::default()
    }

    /// Submissions fail; lookups still work
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn entries(&self) -> Vec<TimeEntry> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl AccountingSystem for FakeAccounting {
    async fn find_person(&self) -> Result<Person, AccountingError> {
        Ok(Person {
            id: "p1".to_string(),
            name: "Dev Eloper".to_string(),
        })
    }

    async fn find_projects(&self, query: &str) -> Result<Vec<Project>, AccountingError> {
        Ok(vec![Project {
            id: format!("proj-{query}"),
            name: query.to_string(),
        }])
    }

    async fn services(&self, _project_id: &str) -> Result<Vec<Service>, AccountingError> {
        Ok(vec![
            Service {
                id: "dev".to_string(),
                name: "Development".to_string(),
            },
            Service {
                id: "qa".to_string(),
                name: "QA".to_string(),
            },
        ])
    }

    async fn service_usage(
        &self,
        _project_id: &str,
        person_id: Option<&str>,
    ) -> Result<Vec<ServiceUsage>, AccountingError> {
        Ok(match person_id {
            Some(_) => vec![ServiceUsage {
                service_id: "qa".to_string(),
                entries: 2,
            }],
            None => Vec::new(),
        })
    }

    async fn submit_time_entry(&self, entry: &TimeEntry) -> Result<(), AccountingError> {
        if self.failing {
            return Err(AccountingError::Status {
                status: 503,
                body: "maintenance".to_string(),
            });
        }
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<UiMessage>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<UiMessage> {
        self.messages.lock().unwrap().clone()
    }

    pub fn contains(&self, pred: impl Fn(&UiMessage) -> bool) -> bool {
        self.messages.lock().unwrap().iter().any(pred)
    }
}

impl UiSink for RecordingSink {
    fn publish(&self, message: UiMessage) {
        self.messages.lock().unwrap().push(message);
    }
}
