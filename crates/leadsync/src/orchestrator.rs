//! Job orchestration: create with duplicate gate, cancel, delete.

use std::sync::Arc;

use chrono::Utc;

use crate::cache::{CacheStore, QueryScope};
use crate::error::{Result, SyncError};
use crate::gateway::{JobGateway, ScrapeTrigger, TriggerRequest};
use crate::model::{Job, JobParams, JobPatch, JobStatus, NewJob};
use crate::sync::invalidation::{settle, settle_completed_job};
use crate::sync::{OptimisticMutation, PendingCorrections};

const JOB_SCOPES: &[QueryScope] = &[QueryScope::Jobs];

/// Whether a matching completed job should stop a create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Return [`CreateJobOutcome::DuplicateFound`] instead of creating.
    Ask,
    /// The user confirmed; create regardless.
    Proceed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CreateJobOutcome {
    /// The job exists and its worker was started.
    Created(Job),
    /// A completed job with the same category and locality exists. Nothing
    /// was written.
    DuplicateFound { previous: Job },
}

/// Creates, cancels and deletes jobs against the store and the cache.
#[derive(Clone)]
pub struct JobOrchestrator {
    cache: Arc<CacheStore>,
    jobs: Arc<dyn JobGateway>,
    trigger: Arc<dyn ScrapeTrigger>,
    corrections: Arc<PendingCorrections>,
}

impl JobOrchestrator {
    pub fn new(
        cache: Arc<CacheStore>,
        jobs: Arc<dyn JobGateway>,
        trigger: Arc<dyn ScrapeTrigger>,
    ) -> Self {
        Self {
            cache,
            jobs,
            trigger,
            corrections: Arc::new(PendingCorrections::new()),
        }
    }

    /// Corrective writes that could not be stored yet. The timeout
    /// reconciler replays them.
    pub fn corrections(&self) -> &Arc<PendingCorrections> {
        &self.corrections
    }

    /// Most recent completed job of `owner_id` requested with the same
    /// category and locality.
    pub fn find_duplicate(&self, owner_id: &str, params: &JobParams) -> Option<Job> {
        self.cache
            .jobs()
            .find_where(JOB_SCOPES, |job| {
                job.owner_id == owner_id
                    && job.status == JobStatus::Completed
                    && job.matches_intent(params)
            })
            .into_iter()
            .max_by_key(|job| job.created_at)
    }

    /// Creates a job and starts its worker.
    ///
    /// A placeholder row is shown in every job view of the owner while the
    /// create is in flight, then swapped for the stored row. If the trigger
    /// call fails the job is written as `failed` before the error returns.
    ///
    /// Past the duplicate gate the work runs on its own task: dropping the
    /// returned future does not strand the placeholder or the stored job.
    pub async fn create_job(
        &self,
        owner_id: &str,
        params: JobParams,
        policy: DuplicatePolicy,
    ) -> Result<CreateJobOutcome> {
        params.validate().map_err(SyncError::InvalidParams)?;

        if policy == DuplicatePolicy::Ask {
            if let Some(previous) = self.find_duplicate(owner_id, &params) {
                log::info!(
                    "Found completed job {} for {} in {}, asking before creating another",
                    previous.id,
                    params.category,
                    params.locality
                );
                return Ok(CreateJobOutcome::DuplicateFound { previous });
            }
        }

        let new_job = NewJob {
            owner_id: owner_id.to_string(),
            params,
        };
        let placeholder = Job::placeholder(&new_job, Utc::now());
        let placeholder_id = placeholder.id.clone();

        let this = self.clone();
        let outcome =
            tokio::spawn(async move { this.run_create(new_job, placeholder).await }).await;
        match outcome {
            Ok(result) => result,
            Err(e) => {
                log::error!("Create task for {} ended abnormally: {}", owner_id, e);
                self.cache.jobs().update_where(JOB_SCOPES, |_, entry| {
                    entry.remove_where(|job| job.id == placeholder_id) > 0
                });
                settle(self.cache.jobs(), JOB_SCOPES);
                Err(SyncError::CreateAborted {
                    owner_id: owner_id.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn run_create(&self, new_job: NewJob, placeholder: Job) -> Result<CreateJobOutcome> {
        let owner_id = new_job.owner_id.as_str();
        let placeholder_id = placeholder.id.clone();

        let job = OptimisticMutation::new(self.cache.jobs(), "create job", JOB_SCOPES)
            .run_then(
                |key, entry| {
                    if key.owner_id() != owner_id {
                        return false;
                    }
                    entry.prepend(placeholder.clone());
                    true
                },
                self.jobs.create_job(&new_job),
                |cache, created: &Job| {
                    cache.update_where(JOB_SCOPES, |_, entry| {
                        if entry.contains(&created.id) {
                            // A refetch already brought the stored row in.
                            entry.remove_where(|job| job.id == placeholder_id) > 0
                        } else {
                            entry.swap(&placeholder_id, created.clone())
                        }
                    });
                },
            )
            .await?;

        log::info!("Created job {} for {}", job.id, owner_id);

        if let Err(e) = self.trigger.trigger(&TriggerRequest::for_job(&job)).await {
            log::error!("Scraper trigger failed for job {}: {}", job.id, e);
            self.mark_trigger_failed(&job, &e.to_string()).await;
            return Err(SyncError::TriggerFailed {
                job_id: job.id,
                source: e,
            });
        }

        Ok(CreateJobOutcome::Created(job))
    }

    /// Writes the corrective `failed` status for a job whose worker never
    /// started.
    ///
    /// If that write fails too, the cache keeps the stored `pending` row, so
    /// the job stays active, and the write is parked for the reconciler.
    async fn mark_trigger_failed(&self, job: &Job, reason: &str) {
        let patch = JobPatch::failed(format!("Failed to start scraper: {}", reason), Utc::now());

        match self.jobs.update_job(&job.id, &patch).await {
            Ok(failed) => {
                self.cache.jobs().update_where(JOB_SCOPES, |_, entry| {
                    entry.patch_where(|j| j.id == failed.id, |j| *j = failed.clone()) > 0
                });
            }
            Err(e) if e.is_terminal_conflict() => {
                log::debug!("Job {} settled before its corrective write", job.id);
            }
            Err(e) => {
                log::error!(
                    "Corrective write for job {} failed, retrying on the next sweep: {}",
                    job.id,
                    e
                );
                self.corrections.push(&job.id, patch);
            }
        }
        settle(self.cache.jobs(), JOB_SCOPES);
    }

    /// Forces a job to `failed` as a user cancellation.
    ///
    /// If the job reached a terminal status first, the stored row is
    /// returned and cached instead.
    pub async fn cancel_job(&self, job_id: &str) -> Result<Job> {
        if job_id.starts_with(crate::model::PLACEHOLDER_PREFIX) {
            return Err(SyncError::InvalidParams(
                "job is still being created".to_string(),
            ));
        }

        let now = Utc::now();
        let patch = JobPatch::failed("Cancelled by user", now);
        let result = OptimisticMutation::new(self.cache.jobs(), "cancel job", JOB_SCOPES)
            .run(
                |_, entry| {
                    entry.patch_where(
                        |job| job.id == job_id && !job.is_terminal(),
                        |job| patch.apply_to(job, now),
                    ) > 0
                },
                self.jobs.update_job(job_id, &patch),
            )
            .await;

        match result {
            Ok(job) => {
                log::info!("Cancelled job {}", job_id);
                Ok(job)
            }
            Err(e) if e.is_terminal_conflict() => {
                let job = self.jobs.get_job(job_id).await?;
                log::info!("Job {} already {}, nothing to cancel", job_id, job.status);
                self.cache
                    .jobs()
                    .update_where(JOB_SCOPES, |_, entry| entry.replace(&job));
                // The completion notice was refused while the cancel was
                // showing, so its lead invalidation happens here.
                settle_completed_job(&self.cache, &job);
                Ok(job)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Deletes a job from the store and every job view.
    pub async fn delete_job(&self, job_id: &str) -> Result<()> {
        OptimisticMutation::new(self.cache.jobs(), "delete job", JOB_SCOPES)
            .run(
                |_, entry| entry.remove_where(|job| job.id == job_id) > 0,
                self.jobs.delete_job(job_id),
            )
            .await?;
        log::info!("Deleted job {}", job_id);
        Ok(())
    }
}
