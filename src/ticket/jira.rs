//! Jira REST client (v2 endpoints)

use super::tracker::{IssueTracker, SearchHit, TicketFields, TrackerError, WorklogEntry};
use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const MAX_SEARCH_RESULTS: u32 = 5;

/// Basic-auth credentials (account email + API token)
#[derive(Debug, Clone)]
pub struct JiraCredentials {
    pub email: String,
    pub token: String,
}

pub struct JiraClient {
    client: reqwest::Client,
    base_url: String,
    credentials: JiraCredentials,
}

impl JiraClient {
    /// Every request is bounded by `timeout`; a timeout is a failed lookup
    pub fn new(
        base_url: &str,
        credentials: JiraCredentials,
        timeout: Duration,
    ) -> Result<Self, TrackerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TrackerError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    fn issue_url(&self, ticket_id: &str) -> String {
        format!("{}/rest/api/2/issue/{}", self.base_url, ticket_id)
    }

    async fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<Response, TrackerError> {
        tracing::debug!(url, "jira GET");
        let response = self
            .client
            .get(url)
            .basic_auth(&self.credentials.email, Some(&self.credentials.token))
            .header("Accept", "application/json")
            .query(query)
            .send()
            .await?;
        Ok(response)
    }
}

/// Map non-success statuses to typed errors
async fn check_status(response: Response, ticket_id: &str) -> Result<Response, TrackerError> {
    match response.status() {
        s if s.is_success() => Ok(response),
        StatusCode::NOT_FOUND => Err(TrackerError::NotFound(ticket_id.to_string())),
        StatusCode::UNAUTHORIZED => Err(TrackerError::Unauthorized),
        StatusCode::FORBIDDEN => Err(TrackerError::Forbidden),
        status => {
            let body = response.text().await.unwrap_or_default();
            Err(TrackerError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }
}

/// Turn a branch name into a JQL text query
fn search_jql(text: &str) -> String {
    let words: String = text
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    let words = words.split_whitespace().collect::<Vec<_>>().join(" ");
    format!("text ~ \"{words}\" ORDER BY updated DESC")
}

#[derive(Debug, Deserialize)]
struct IssueResponse {
    key: String,
    #[serde(default)]
    fields: IssueFields,
}

#[derive(Debug, Default, Deserialize)]
struct IssueFields {
    summary: Option<String>,
    status: Option<StatusField>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusField {
    name: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    issues: Vec<IssueResponse>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WorklogRequest<'a> {
    time_spent_seconds: u64,
    comment: &'a str,
}

#[async_trait]
impl IssueTracker for JiraClient {
    async fn verify_ticket(&self, ticket_id: &str) -> Result<(), TrackerError> {
        let response = self
            .get(&self.issue_url(ticket_id), &[("fields", "key")])
            .await?;
        let issue: IssueResponse = check_status(response, ticket_id).await?.json().await?;

        // Moved issues answer with their new key
        if issue.key != ticket_id {
            tracing::debug!(requested = ticket_id, actual = %issue.key, "ticket key redirected");
        }
        Ok(())
    }

    async fn fetch_fields(&self, ticket_id: &str) -> Result<TicketFields, TrackerError> {
        let response = self
            .get(
                &self.issue_url(ticket_id),
                &[("fields", "summary,status,description")],
            )
            .await?;
        let issue: IssueResponse = check_status(response, ticket_id).await?.json().await?;

        Ok(TicketFields {
            summary: issue.fields.summary,
            status: issue.fields.status.map(|s| s.name),
            description: issue.fields.description,
        })
    }

    async fn search(&self, text: &str) -> Result<Vec<SearchHit>, TrackerError> {
        let url = format!("{}/rest/api/2/search", self.base_url);
        let jql = search_jql(text);
        let max = MAX_SEARCH_RESULTS.to_string();
        let response = self
            .get(
                &url,
                &[
                    ("jql", jql.as_str()),
                    ("maxResults", max.as_str()),
                    ("fields", "summary"),
                ],
            )
            .await?;
        let results: SearchResponse = check_status(response, text).await?.json().await?;

        Ok(results
            .issues
            .into_iter()
            .map(|issue| SearchHit {
                ticket_id: issue.key,
                summary: issue.fields.summary,
            })
            .collect())
    }

    async fn add_worklog(&self, entry: &WorklogEntry) -> Result<(), TrackerError> {
        let url = format!("{}/worklog", self.issue_url(&entry.ticket_id));
        let body = WorklogRequest {
            time_spent_seconds: u64::from(entry.minutes) * 60,
            comment: &entry.description,
        };

        tracing::info!(ticket = %entry.ticket_id, minutes = entry.minutes, "submitting jira worklog");
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.credentials.email, Some(&self.credentials.token))
            .json(&body)
            .send()
            .await?;
        check_status(response, &entry.ticket_id).await?;
        Ok(())
    }
}
