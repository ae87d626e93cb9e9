//! Native VCS-integration seam
//!
//! The integration may be missing, present but not yet active, or active.
//! Callers match on [`Capability`] instead of probing for optional pieces.

use super::{SignalSender, WatchError, WatchHandle};
use crate::repo::RepositoryHandle;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Result of probing the host for a native integration
#[derive(Clone)]
pub enum Capability {
    /// Not installed at all; rely on the filesystem strategy
    Unavailable,
    /// Installed but not ready yet; may activate later
    Inactive,
    Active(Arc<dyn ActiveIntegration>),
}

impl std::fmt::Debug for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Capability::Unavailable => write!(f, "Unavailable"),
            Capability::Inactive => write!(f, "Inactive"),
            Capability::Active(active) => {
                write!(f, "Active({} repositories)", active.repositories().len())
            }
        }
    }
}

/// A source of native repository notifications
pub trait VcsIntegration: Send + Sync {
    fn name(&self) -> &str;

    fn probe(&self) -> Capability;
}

/// An integration that is ready to deliver notifications
pub trait ActiveIntegration: Send + Sync {
    /// Repository roots the integration currently tracks
    fn repositories(&self) -> Vec<PathBuf>;

    /// Subscribe to state changes for one tracked repository
    fn subscribe(&self, repo: &Path, tx: SignalSender) -> Result<Box<dyn WatchHandle>, WatchError>;
}

/// Bounded retry schedule for lazy activation
#[derive(Debug, Clone, Copy)]
pub struct ActivationPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ActivationPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

/// Probe until the integration is active, unavailable, or attempts run out.
///
/// `Inactive` is retried with capped exponential backoff; `Unavailable` returns
/// immediately. Cancellation returns the last probe result.
pub async fn activate_with_retry(
    integration: &dyn VcsIntegration,
    policy: ActivationPolicy,
    cancel: &CancellationToken,
) -> Capability {
    let mut backoff = policy.initial_backoff;
    let attempts = policy.max_attempts.max(1);

    for attempt in 1..=attempts {
        match integration.probe() {
            Capability::Active(active) => {
                tracing::info!(integration = integration.name(), attempt, "native integration active");
                return Capability::Active(active);
            }
            Capability::Unavailable => {
                tracing::debug!(integration = integration.name(), "native integration unavailable");
                return Capability::Unavailable;
            }
            Capability::Inactive if attempt == attempts => break,
            Capability::Inactive => {
                tracing::debug!(
                    integration = integration.name(),
                    attempt,
                    backoff = ?backoff,
                    "native integration inactive, retrying"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Capability::Inactive,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(policy.max_backoff);
            }
        }
    }

    tracing::info!(
        integration = integration.name(),
        attempts,
        "native integration still inactive, using file watching only"
    );
    Capability::Inactive
}

/// Subscribe to every discovered repository the integration tracks.
///
/// Returns the handles plus the roots that got a native subscription; the rest
/// are covered by the filesystem strategy alone.
pub fn attach(
    active: &dyn ActiveIntegration,
    handles: &BTreeSet<RepositoryHandle>,
    tx: &SignalSender,
) -> (Vec<Box<dyn WatchHandle>>, BTreeSet<PathBuf>) {
    let tracked: BTreeSet<PathBuf> = active.repositories().into_iter().collect();
    let mut subscriptions: Vec<Box<dyn WatchHandle>> = Vec::new();
    let mut covered = BTreeSet::new();

    for handle in handles.iter().filter(|h| tracked.contains(&h.root)) {
        match active.subscribe(&handle.root, tx.clone()) {
            Ok(sub) => {
                covered.insert(handle.root.clone());
                subscriptions.push(sub);
            }
            Err(e) => {
                tracing::warn!(repo = %handle.root.display(), error = %e, "native subscription failed");
            }
        }
    }

    (subscriptions, covered)
}
