//! Fallback polling of the job list while jobs are active.

use std::sync::Arc;
use std::time::Duration;

use tracing::Instrument;

use crate::cache::{CacheStore, QueryKey};
use crate::gateway::GatewayError;
use crate::sync::queries::Queries;
use crate::sync::task::TaskHandle;

/// Result of one poll tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Refetched; this many jobs are still active.
    Refreshed { active: usize },
    /// No active jobs, nothing fetched.
    Idle,
}

/// Re-reads the owner's job list on a fixed interval while any cached job
/// is non-terminal. The loop exits on its own once none are left.
pub struct PollScheduler {
    cache: Arc<CacheStore>,
    queries: Arc<Queries>,
    owner_id: String,
    interval: Duration,
}

impl PollScheduler {
    pub fn new(
        cache: Arc<CacheStore>,
        queries: Arc<Queries>,
        owner_id: &str,
        interval: Duration,
    ) -> Self {
        Self {
            cache,
            queries,
            owner_id: owner_id.to_string(),
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// One poll: invalidate and refetch the job list if any job is active.
    pub async fn tick(&self) -> Result<PollOutcome, GatewayError> {
        if self.cache.active_job_count(&self.owner_id) == 0 {
            return Ok(PollOutcome::Idle);
        }

        let key = QueryKey::jobs(&self.owner_id);
        self.cache.jobs().invalidate_key(&key);
        let jobs = self.queries.fetch_jobs(&self.owner_id).await?;
        let active = jobs.iter().filter(|job| !job.is_terminal()).count();
        Ok(PollOutcome::Refreshed { active })
    }

    /// Starts the polling loop.
    pub fn spawn(self: &Arc<Self>) -> TaskHandle {
        let poller = Arc::clone(self);
        TaskHandle::spawn(&format!("poll[{}]", self.owner_id), move |mut shutdown| {
            async move {
                let mut timer = tokio::time::interval(poller.interval);
                timer.tick().await; // skip immediate first tick

                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = timer.tick() => {}
                    }

                    let span = tracing::info_span!("poll", owner = %poller.owner_id);
                    match poller.tick().instrument(span).await {
                        Ok(PollOutcome::Idle) | Ok(PollOutcome::Refreshed { active: 0 }) => {
                            log::debug!("No active jobs for {}, polling stops", poller.owner_id);
                            break;
                        }
                        Ok(PollOutcome::Refreshed { active }) => {
                            log::debug!("Polled jobs for {}: {} active", poller.owner_id, active);
                        }
                        Err(e) => {
                            log::warn!("Job poll for {} failed: {}", poller.owner_id, e);
                        }
                    }
                }
            }
        })
    }
}
