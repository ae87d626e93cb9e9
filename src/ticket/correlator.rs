//! Branch name → verified ticket

use super::extract::extract_ticket_id;
use super::tracker::{IssueTracker, SearchHit, TicketFields, TrackerError, WorklogEntry};
use super::TicketInfo;
use crate::repo::is_detached;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Words shorter than this are ignored when matching search results
const MIN_MATCH_WORD: usize = 3;

#[derive(Debug, Clone, Copy)]
pub struct CorrelatorOptions {
    /// Bound on every tracker call; a timeout counts as a failed lookup
    pub request_timeout: Duration,

    /// Only accept a search hit whose summary covers the branch's words
    pub strict_search_match: bool,

    /// How long fetched display fields are reused; zero disables the cache
    pub enrichment_ttl: Duration,
}

impl Default for CorrelatorOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            strict_search_match: true,
            enrichment_ttl: Duration::from_secs(60),
        }
    }
}

/// Result of correlating one branch
#[derive(Debug)]
pub enum Correlation {
    Found(TicketInfo),

    /// No candidate ticket for this branch
    NoTicket,

    /// A lookup failed; the candidate (if any) must not drive automation
    Unverified {
        ticket_id: Option<String>,
        error: TrackerError,
    },
}

impl Correlation {
    pub fn ticket(&self) -> Option<&TicketInfo> {
        match self {
            Correlation::Found(ticket) => Some(ticket),
            _ => None,
        }
    }

    pub fn into_ticket(self) -> Option<TicketInfo> {
        match self {
            Correlation::Found(ticket) => Some(ticket),
            _ => None,
        }
    }

    /// The tracker rejected our credentials
    pub fn requires_reauth(&self) -> bool {
        matches!(self, Correlation::Unverified { error, .. } if error.requires_reauth())
    }
}

pub struct TicketCorrelator {
    tracker: Arc<dyn IssueTracker>,
    options: CorrelatorOptions,
    fields_cache: Mutex<HashMap<String, (Instant, TicketFields)>>,
}

impl TicketCorrelator {
    pub fn new(tracker: Arc<dyn IssueTracker>, options: CorrelatorOptions) -> Self {
        Self {
            tracker,
            options,
            fields_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn tracker(&self) -> &Arc<dyn IssueTracker> {
        &self.tracker
    }

    /// The verified ticket for `branch`, or `None`
    pub async fn correlate(&self, branch: &str) -> Option<TicketInfo> {
        self.correlate_detailed(branch).await.into_ticket()
    }

    /// Like [`correlate`](Self::correlate) but keeps the reason for a miss
    pub async fn correlate_detailed(&self, branch: &str) -> Correlation {
        if is_detached(branch) {
            return Correlation::NoTicket;
        }

        let ticket_id = match extract_ticket_id(branch) {
            Some(id) => id,
            None => match self.search_fallback(branch).await {
                Ok(Some(id)) => id,
                Ok(None) => return Correlation::NoTicket,
                Err(error) => {
                    tracing::debug!(branch, error = %error, "ticket search failed");
                    return Correlation::Unverified {
                        ticket_id: None,
                        error,
                    };
                }
            },
        };

        if let Err(error) = self.bounded(self.tracker.verify_ticket(&ticket_id)).await {
            tracing::info!(branch, ticket = %ticket_id, error = %error, "ticket not verified");
            return Correlation::Unverified {
                ticket_id: Some(ticket_id),
                error,
            };
        }

        let ticket = TicketInfo::bare(&ticket_id);
        match self.fields(&ticket_id).await {
            Ok(fields) => Correlation::Found(ticket.with_fields(fields)),
            Err(error) => {
                tracing::debug!(ticket = %ticket_id, error = %error, "enrichment failed, using bare ticket");
                Correlation::Found(ticket)
            }
        }
    }

    /// Submit a worklog under the same timeout as every other tracker call
    pub async fn log_work(&self, entry: &WorklogEntry) -> Result<(), TrackerError> {
        self.bounded(self.tracker.add_worklog(entry)).await
    }

    async fn search_fallback(&self, branch: &str) -> Result<Option<String>, TrackerError> {
        let hits = self.bounded(self.tracker.search(branch)).await?;
        let chosen = if self.options.strict_search_match {
            hits.into_iter().find(|hit| plausible_match(branch, hit))
        } else {
            hits.into_iter().next()
        };

        if let Some(hit) = &chosen {
            tracing::debug!(branch, ticket = %hit.ticket_id, "ticket found by search");
        }
        Ok(chosen.map(|hit| hit.ticket_id))
    }

    async fn fields(&self, ticket_id: &str) -> Result<TicketFields, TrackerError> {
        let ttl = self.options.enrichment_ttl;
        if !ttl.is_zero()
            && let Ok(cache) = self.fields_cache.lock()
            && let Some((fetched, fields)) = cache.get(ticket_id)
            && fetched.elapsed() < ttl
        {
            return Ok(fields.clone());
        }

        let fields = self.bounded(self.tracker.fetch_fields(ticket_id)).await?;
        if !ttl.is_zero()
            && let Ok(mut cache) = self.fields_cache.lock()
        {
            cache.insert(ticket_id.to_string(), (Instant::now(), fields.clone()));
        }
        Ok(fields)
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, TrackerError>>,
    ) -> Result<T, TrackerError> {
        tokio::time::timeout(self.options.request_timeout, call)
            .await
            .unwrap_or(Err(TrackerError::Timeout))
    }
}

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= MIN_MATCH_WORD)
        .map(str::to_lowercase)
        .collect()
}

/// A search hit is plausible when its summary contains every significant
/// word of the branch's last path segment.
fn plausible_match(branch: &str, hit: &SearchHit) -> bool {
    let segment = branch.rsplit('/').next().unwrap_or(branch);
    let wanted = words(segment);
    let Some(summary) = &hit.summary else {
        return false;
    };
    let have: HashSet<String> = words(summary).into_iter().collect();

    !wanted.is_empty() && wanted.iter().all(|w| have.contains(w))
}
