//! Secondary time-accounting system
//!
//! Logging here is best-effort: a failure never undoes the issue-tracker
//! worklog that precedes it.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AccountingError {
    #[error("Accounting request timed out")]
    Timeout,

    #[error("Accounting network error: {0}")]
    Network(String),

    #[error("Accounting system returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unexpected response from accounting system: {0}")]
    Decode(String),

    #[error("No accounting project matches '{0}'")]
    ProjectNotFound(String),

    #[error("Several accounting projects match '{query}': {candidates}")]
    AmbiguousProject { query: String, candidates: String },

    #[error("Project '{0}' has no services to book time on")]
    NoService(String),
}

impl From<reqwest::Error> for AccountingError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AccountingError::Timeout
        } else if err.is_decode() {
            AccountingError::Decode(err.to_string())
        } else {
            AccountingError::Network(err.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Person {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub id: String,
    pub name: String,
}

/// How many time entries were booked on a service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUsage {
    pub service_id: String,
    pub entries: u32,
}

/// How sure the service pick is; shown to the user, not used for branching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Confidence::High => write!(f, "HIGH"),
            Confidence::Medium => write!(f, "MEDIUM"),
            Confidence::Low => write!(f, "LOW"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceChoice {
    pub service: Service,
    pub confidence: Confidence,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeEntry {
    pub person_id: String,
    pub service_id: String,
    pub date: NaiveDate,
    pub minutes: u32,
    pub note: String,
}

/// What was booked in the accounting system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeEntryReceipt {
    pub project: Project,
    pub choice: ServiceChoice,
    pub minutes: u32,
}

#[async_trait]
pub trait AccountingSystem: Send + Sync {
    /// The person the credentials belong to
    async fn find_person(&self) -> Result<Person, AccountingError>;

    async fn find_projects(&self, query: &str) -> Result<Vec<Project>, AccountingError>;

    async fn services(&self, project_id: &str) -> Result<Vec<Service>, AccountingError>;

    /// Entry counts per service in a project, optionally for one person only
    async fn service_usage(
        &self,
        project_id: &str,
        person_id: Option<&str>,
    ) -> Result<Vec<ServiceUsage>, AccountingError>;

    async fn submit_time_entry(&self, entry: &TimeEntry) -> Result<(), AccountingError>;
}

/// Pick the project for a ticket's project key.
///
/// A case-insensitive exact name match wins; otherwise exactly one project
/// must carry the key as a whole word of its name.
pub fn pick_project(projects: Vec<Project>, project_key: &str) -> Result<Project, AccountingError> {
    let key = project_key.to_lowercase();
    let mut matching: Vec<Project> = projects
        .into_iter()
        .filter(|p| has_word(&p.name, &key))
        .collect();

    if let Some(pos) = matching.iter().position(|p| p.name.to_lowercase() == key) {
        return Ok(matching.swap_remove(pos));
    }

    match matching.len() {
        0 => Err(AccountingError::ProjectNotFound(project_key.to_string())),
        1 => Ok(matching.remove(0)),
        _ => Err(AccountingError::AmbiguousProject {
            query: project_key.to_string(),
            candidates: matching
                .iter()
                .map(|p| p.name.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        }),
    }
}

fn has_word(name: &str, lowercase_word: &str) -> bool {
    name.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| word == lowercase_word)
}

/// Pick the best-fit service.
///
/// The person's own most-used service is HIGH confidence, the project's
/// most-used service is MEDIUM, any available service is LOW.
pub fn pick_service(
    services: &[Service],
    personal_usage: &[ServiceUsage],
    project_usage: &[ServiceUsage],
) -> Option<ServiceChoice> {
    let by_id: HashMap<&str, &Service> = services.iter().map(|s| (s.id.as_str(), s)).collect();

    let most_used = |usage: &[ServiceUsage]| -> Option<Service> {
        usage
            .iter()
            .filter(|u| u.entries > 0)
            .filter_map(|u| by_id.get(u.service_id.as_str()).map(|s| (u.entries, *s)))
            // Ties go to the service listed first
            .min_by(|(a, sa), (b, sb)| {
                b.cmp(a).then_with(|| {
                    let ia = services.iter().position(|s| s.id == sa.id);
                    let ib = services.iter().position(|s| s.id == sb.id);
                    ia.cmp(&ib)
                })
            })
            .map(|(_, s)| s.clone())
    };

    if let Some(service) = most_used(personal_usage) {
        return Some(ServiceChoice {
            service,
            confidence: Confidence::High,
        });
    }
    if let Some(service) = most_used(project_usage) {
        return Some(ServiceChoice {
            service,
            confidence: Confidence::Medium,
        });
    }
    services.first().map(|s| ServiceChoice {
        service: s.clone(),
        confidence: Confidence::Low,
    })
}

/// Book `minutes` against the project for `project_key`
pub async fn log_time(
    system: &dyn AccountingSystem,
    project_key: &str,
    minutes: u32,
    note: &str,
    date: NaiveDate,
) -> Result<TimeEntryReceipt, AccountingError> {
    let person = system.find_person().await?;
    let project = pick_project(system.find_projects(project_key).await?, project_key)?;
    let services = system.services(&project.id).await?;

    // Usage lookups only refine the pick
    let personal = system
        .service_usage(&project.id, Some(person.id.as_str()))
        .await
        .unwrap_or_else(|e| {
            tracing::debug!(error = %e, "personal service usage unavailable");
            Vec::new()
        });
    let popular = if personal.is_empty() {
        system
            .service_usage(&project.id, None)
            .await
            .unwrap_or_else(|e| {
                tracing::debug!(error = %e, "project service usage unavailable");
                Vec::new()
            })
    } else {
        Vec::new()
    };

    let choice = pick_service(&services, &personal, &popular)
        .ok_or_else(|| AccountingError::NoService(project.name.clone()))?;

    tracing::info!(
        project = %project.name,
        service = %choice.service.name,
        confidence = %choice.confidence,
        minutes,
        "submitting accounting time entry"
    );

    system
        .submit_time_entry(&TimeEntry {
            person_id: person.id,
            service_id: choice.service.id.clone(),
            date,
            minutes,
            note: note.to_string(),
        })
        .await?;

    Ok(TimeEntryReceipt {
        project,
        choice,
        minutes,
    })
}

/// Connection settings for [`HttpAccounting`]
#[derive(Debug, Clone)]
pub struct AccountingCredentials {
    pub token: String,
    pub organization_id: String,
}

/// JSON:API accounting client (Productive-style resource layout)
pub struct HttpAccounting {
    client: reqwest::Client,
    base_url: String,
    credentials: AccountingCredentials,
}

#[derive(Debug, Deserialize)]
struct Document<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct Resource {
    id: String,
    #[serde(default)]
    attributes: Value,
    #[serde(default)]
    relationships: Value,
}

impl Resource {
    fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(Value::as_str)
    }

    fn related_id(&self, name: &str) -> Option<&str> {
        self.relationships
            .get(name)
            .and_then(|r| r.get("data"))
            .and_then(|d| d.get("id"))
            .and_then(Value::as_str)
    }
}

const PAGE_SIZE: &str = "200";

impl HttpAccounting {
    pub fn new(
        base_url: &str,
        credentials: AccountingCredentials,
        timeout: Duration,
    ) -> Result<Self, AccountingError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AccountingError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}/{}", self.base_url, path))
            .header("X-Auth-Token", &self.credentials.token)
            .header("X-Organization-Id", &self.credentials.organization_id)
            .header("Content-Type", "application/vnd.api+json")
    }

    async fn fetch<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, AccountingError> {
        tracing::debug!(path, "accounting GET");
        let response = self
            .request(reqwest::Method::GET, path)
            .query(query)
            .send()
            .await?;
        let response = check_status(response).await?;
        let doc: Document<T> = response.json().await?;
        Ok(doc.data)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, AccountingError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(AccountingError::Status { status, body })
}

fn count_usage(entries: &[Resource]) -> Vec<ServiceUsage> {
    let mut counts: Vec<ServiceUsage> = Vec::new();
    for service_id in entries.iter().filter_map(|e| e.related_id("service")) {
        match counts.iter_mut().find(|u| u.service_id == service_id) {
            Some(usage) => usage.entries += 1,
            None => counts.push(ServiceUsage {
                service_id: service_id.to_string(),
                entries: 1,
            }),
        }
    }
    counts
}

#[async_trait]
impl AccountingSystem for HttpAccounting {
    async fn find_person(&self) -> Result<Person, AccountingError> {
        let person: Resource = self.fetch("people/me", &[]).await?;
        let name = [person.attr("first_name"), person.attr("last_name")]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        Ok(Person {
            id: person.id,
            name,
        })
    }

    async fn find_projects(&self, query: &str) -> Result<Vec<Project>, AccountingError> {
        let projects: Vec<Resource> = self
            .fetch("projects", &[("filter[query]", query), ("page[size]", PAGE_SIZE)])
            .await?;
        Ok(projects
            .into_iter()
            .map(|p| Project {
                name: p.attr("name").unwrap_or_default().to_string(),
                id: p.id,
            })
            .collect())
    }

    async fn services(&self, project_id: &str) -> Result<Vec<Service>, AccountingError> {
        let services: Vec<Resource> = self
            .fetch(
                "services",
                &[("filter[project_id]", project_id), ("page[size]", PAGE_SIZE)],
            )
            .await?;
        Ok(services
            .into_iter()
            .map(|s| Service {
                name: s.attr("name").unwrap_or_default().to_string(),
                id: s.id,
            })
            .collect())
    }

    async fn service_usage(
        &self,
        project_id: &str,
        person_id: Option<&str>,
    ) -> Result<Vec<ServiceUsage>, AccountingError> {
        let mut query = vec![("filter[project_id]", project_id), ("page[size]", PAGE_SIZE)];
        if let Some(person_id) = person_id {
            query.push(("filter[person_id]", person_id));
        }
        let entries: Vec<Resource> = self.fetch("time_entries", &query).await?;
        Ok(count_usage(&entries))
    }

    async fn submit_time_entry(&self, entry: &TimeEntry) -> Result<(), AccountingError> {
        let body = json!({
            "data": {
                "type": "time_entries",
                "attributes": {
                    "date": entry.date.format("%Y-%m-%d").to_string(),
                    "time": entry.minutes,
                    "note": entry.note,
                },
                "relationships": {
                    "person": { "data": { "type": "people", "id": entry.person_id } },
                    "service": { "data": { "type": "services", "id": entry.service_id } },
                }
            }
        });

        let response = self
            .request(reqwest::Method::POST, "time_entries")
            .json(&body)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}
