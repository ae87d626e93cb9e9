//! Work timer scoped to one ticket

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimerError {
    #[error("A timer is already running for {0}")]
    AlreadyRunning(String),

    #[error("Timer could not be started: {0}")]
    StartFailed(String),
}

/// A finished timer run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerRun {
    pub ticket_id: String,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

impl TimerRun {
    /// Elapsed time in whole minutes, rounded up, at least one
    pub fn minutes(&self) -> u32 {
        let secs = self.elapsed.as_secs();
        u32::try_from(secs.div_ceil(60)).unwrap_or(u32::MAX).max(1)
    }
}

pub trait WorkTimer: Send + Sync {
    fn start(&mut self, ticket_id: &str) -> Result<DateTime<Utc>, TimerError>;

    /// Stop the running timer, if any
    fn stop(&mut self) -> Option<TimerRun>;

    /// Ticket of the running timer
    fn running(&self) -> Option<&str>;
}

/// In-process timer on the monotonic clock
#[derive(Debug, Default)]
pub struct LocalTimer {
    running: Option<(String, DateTime<Utc>, Instant)>,
}

impl LocalTimer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkTimer for LocalTimer {
    fn start(&mut self, ticket_id: &str) -> Result<DateTime<Utc>, TimerError> {
        if let Some((running, _, _)) = &self.running {
            return Err(TimerError::AlreadyRunning(running.clone()));
        }
        let now = Utc::now();
        self.running = Some((ticket_id.to_string(), now, Instant::now()));
        tracing::debug!(ticket = ticket_id, "timer started");
        Ok(now)
    }

    fn stop(&mut self) -> Option<TimerRun> {
        let (ticket_id, started_at, started) = self.running.take()?;
        let run = TimerRun {
            ticket_id,
            started_at,
            elapsed: started.elapsed(),
        };
        tracing::debug!(ticket = %run.ticket_id, elapsed = ?run.elapsed, "timer stopped");
        Some(run)
    }

    fn running(&self) -> Option<&str> {
        self.running.as_ref().map(|(id, _, _)| id.as_str())
    }
}
