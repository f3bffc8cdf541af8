//! Timeout reconciler: force-fails jobs stuck past their deadline and
//! replays parked corrective writes.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::Instrument;

use crate::cache::{CacheStore, QueryKey};
use crate::gateway::{GatewayError, JobFilter, JobGateway};
use crate::model::{Job, JobPatch, JobStatus};
use crate::sync::corrections::PendingCorrections;
use crate::sync::task::TaskHandle;

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Jobs this sweep moved to `failed`.
    pub failed: usize,
    /// Jobs that reached a terminal status on their own before the write.
    pub already_terminal: usize,
    /// Parked corrective writes the store accepted this sweep.
    pub corrected: usize,
    /// Writes that failed for any other reason; retried next sweep.
    pub errors: usize,
}

/// Periodically fails jobs whose worker never reported back.
pub struct TimeoutReconciler {
    jobs: Arc<dyn JobGateway>,
    cache: Arc<CacheStore>,
    owner_id: String,
    interval: Duration,
    processing_deadline: Duration,
    pending_deadline: Option<Duration>,
    corrections: Option<Arc<PendingCorrections>>,
}

fn minutes(d: Duration) -> u64 {
    d.as_secs().div_ceil(60)
}

impl TimeoutReconciler {
    pub fn new(
        jobs: Arc<dyn JobGateway>,
        cache: Arc<CacheStore>,
        owner_id: &str,
        interval: Duration,
        processing_deadline: Duration,
    ) -> Self {
        Self {
            jobs,
            cache,
            owner_id: owner_id.to_string(),
            interval,
            processing_deadline,
            pending_deadline: None,
            corrections: None,
        }
    }

    /// Also fail jobs that stay `pending` longer than `deadline`.
    pub fn with_pending_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.pending_deadline = deadline;
        self
    }

    /// Replays writes parked in `corrections` on every sweep.
    pub fn with_corrections(mut self, corrections: Arc<PendingCorrections>) -> Self {
        self.corrections = Some(corrections);
        self
    }

    fn cutoff(now: DateTime<Utc>, deadline: Duration) -> DateTime<Utc> {
        chrono::Duration::from_std(deadline)
            .ok()
            .and_then(|d| now.checked_sub_signed(d))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Runs one sweep as of `now`.
    ///
    /// A listing failure aborts the sweep. A write rejected because the job
    /// already finished is counted, not raised.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, GatewayError> {
        let mut report = SweepReport::default();
        self.replay_corrections(&mut report).await;

        let filter = JobFilter::for_owner(&self.owner_id)
            .with_status(JobStatus::Processing)
            .started_before(Self::cutoff(now, self.processing_deadline));
        let stuck = self.jobs.list_jobs(&filter).await?.data;
        let message = format!(
            "Job timed out after {} minutes without a result",
            minutes(self.processing_deadline)
        );
        self.fail_all(&stuck, &message, now, &mut report).await;

        if let Some(pending_deadline) = self.pending_deadline {
            let filter = JobFilter::for_owner(&self.owner_id)
                .with_status(JobStatus::Pending)
                .created_before(Self::cutoff(now, pending_deadline));
            let never_started = self.jobs.list_jobs(&filter).await?.data;
            let message = format!(
                "Scraper did not pick up the job within {} minutes",
                minutes(pending_deadline)
            );
            self.fail_all(&never_started, &message, now, &mut report).await;
        }

        if report.failed > 0 || report.already_terminal > 0 || report.corrected > 0 {
            self.cache
                .jobs()
                .invalidate_key(&QueryKey::jobs(&self.owner_id));
        }
        Ok(report)
    }

    async fn replay_corrections(&self, report: &mut SweepReport) {
        let Some(corrections) = &self.corrections else {
            return;
        };
        for (job_id, patch) in corrections.snapshot() {
            match self.jobs.update_job(&job_id, &patch).await {
                Ok(job) => {
                    log::info!("Corrective write for job {} landed ({})", job_id, job.status);
                    corrections.resolve(&job_id);
                    report.corrected += 1;
                }
                Err(e) if e.is_terminal_conflict() => {
                    log::debug!("Job {} settled before its corrective write", job_id);
                    corrections.resolve(&job_id);
                    report.already_terminal += 1;
                }
                Err(GatewayError::NotFound { .. }) => {
                    corrections.resolve(&job_id);
                }
                Err(e) => {
                    log::warn!("Corrective write for job {} failed again: {}", job_id, e);
                    report.errors += 1;
                }
            }
        }
    }

    async fn fail_all(
        &self,
        jobs: &[Job],
        message: &str,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) {
        for job in jobs {
            match self
                .jobs
                .update_job(&job.id, &JobPatch::failed(message, now))
                .await
            {
                Ok(_) => {
                    log::warn!("Job {} exceeded its deadline, marked failed", job.id);
                    report.failed += 1;
                }
                Err(e) if e.is_terminal_conflict() => {
                    log::debug!("Job {} finished before the timeout write", job.id);
                    report.already_terminal += 1;
                }
                Err(e) => {
                    log::error!("Failed to time out job {}: {}", job.id, e);
                    report.errors += 1;
                }
            }
        }
    }

    /// Starts the sweep loop.
    pub fn spawn(self: &Arc<Self>) -> TaskHandle {
        let reconciler = Arc::clone(self);
        TaskHandle::spawn(&format!("timeout[{}]", self.owner_id), move |mut shutdown| {
            async move {
                let mut timer = tokio::time::interval(reconciler.interval);
                timer.tick().await; // skip immediate first tick

                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = timer.tick() => {}
                    }

                    let span =
                        tracing::info_span!("timeout_sweep", owner = %reconciler.owner_id);
                    match reconciler.sweep(Utc::now()).instrument(span).await {
                        Ok(report) if report.failed > 0 || report.corrected > 0 => {
                            log::info!(
                                "Timeout sweep for {}: {} jobs failed, {} corrections applied",
                                reconciler.owner_id,
                                report.failed,
                                report.corrected
                            );
                        }
                        Ok(_) => {}
                        Err(e) => {
                            log::warn!("Timeout sweep for {} failed: {}", reconciler.owner_id, e);
                        }
                    }
                }
            }
        })
    }
}
