//! Durable store and change feed backed by the bundled SQLite database.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use super::{
    ChangeKind, FeedSubscription, GatewayError, JobChange, JobChangeFeed, JobFilter, JobGateway,
    LeadGateway, ListPage, SubscriptionFilter, JOBS_TABLE,
};
use crate::cache::LeadQuery;
use crate::db::job_repo::{self, GuardedUpdate, JobRow, JobRowFilter};
use crate::db::lead_repo::{self, LeadRow};
use crate::db::{format_timestamp, Database};
use crate::model::{Job, JobPatch, JobStatus, Lead, LeadPatch, NewJob, NewLead};

/// Default buffer of each subscriber's event queue.
const DEFAULT_FEED_CAPACITY: usize = 64;

/// SQLite implementation of the job/lead store and job change feed.
///
/// Enforces job monotonicity on every update and publishes every job write
/// to subscribers whose filter matches. Statements run on tokio's blocking
/// pool, never on a runtime worker.
pub struct SqliteBackend {
    db: Database,
    changes: broadcast::Sender<JobChange>,
    subscriptions: Mutex<HashMap<String, JoinHandle<()>>>,
    feed_capacity: usize,
}

impl SqliteBackend {
    pub fn new(db: Database) -> Self {
        Self::with_feed_capacity(db, DEFAULT_FEED_CAPACITY)
    }

    pub fn with_feed_capacity(db: Database, feed_capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(feed_capacity.max(1) * 4);
        Self {
            db,
            changes,
            subscriptions: Mutex::new(HashMap::new()),
            feed_capacity: feed_capacity.max(1),
        }
    }

    /// Opens (or creates) a file-backed store.
    pub fn open(path: &Path) -> Result<Self, GatewayError> {
        Ok(Self::new(Database::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self, GatewayError> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Number of live feed subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.lock_subscriptions().len()
    }

    /// Closes every live subscription, as a lost realtime connection would.
    /// Subscribers observe the end of their event stream.
    pub fn close_feeds(&self) {
        let handles: Vec<(String, JoinHandle<()>)> = self.lock_subscriptions().drain().collect();
        for (id, handle) in handles {
            log::info!("Closing change feed subscription {}", id);
            handle.abort();
        }
    }

    fn lock_subscriptions(&self) -> MutexGuard<'_, HashMap<String, JoinHandle<()>>> {
        match self.subscriptions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Subscription registry lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn publish(&self, kind: ChangeKind, record: &Job) {
        // No subscribers is fine
        let _ = self.changes.send(JobChange {
            kind,
            record: record.clone(),
        });
    }

    /// Runs `f` against the database on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T, GatewayError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, GatewayError> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| GatewayError::Unavailable(format!("database task failed: {}", e)))?
    }
}

fn load_job(db: &Database, id: &str) -> Result<Job, GatewayError> {
    match job_repo::find_by_id(db, id)? {
        Some(row) => Ok(row.to_job()?),
        None => Err(GatewayError::NotFound {
            entity: "job",
            id: id.to_string(),
        }),
    }
}

#[async_trait]
impl JobGateway for SqliteBackend {
    async fn create_job(&self, new_job: &NewJob) -> Result<Job, GatewayError> {
        new_job.params.validate().map_err(GatewayError::Rejected)?;

        let now = Utc::now();
        let mut job = Job::placeholder(new_job, now);
        job.id = uuid::Uuid::new_v4().to_string();
        let row = JobRow::from_job(&job, now);
        self.blocking(move |db| Ok(job_repo::insert(db, &row)?))
            .await?;

        log::info!(
            "Created job {} ({} in {}) for {}",
            job.id,
            job.category,
            job.locality,
            job.owner_id
        );
        self.publish(ChangeKind::Insert, &job);
        Ok(job)
    }

    async fn update_job(&self, id: &str, patch: &JobPatch) -> Result<Job, GatewayError> {
        let now = Utc::now();
        let job_id = id.to_string();
        let guarded = patch.clone();
        let outcome = self
            .blocking(move |db| {
                Ok(job_repo::update_guarded(db, &job_id, |current| {
                    let next_status = guarded.status.unwrap_or(current.status);
                    if !current.status.can_transition_to(next_status) {
                        return None;
                    }
                    let mut next = current.clone();
                    guarded.apply_to(&mut next, now);
                    Some(next)
                })?)
            })
            .await?;

        match outcome {
            GuardedUpdate::Updated(job) => {
                log::debug!("Job {} updated (status: {})", job.id, job.status);
                self.publish(ChangeKind::Update, &job);
                Ok(job)
            }
            GuardedUpdate::Refused(current) if current.is_terminal() => {
                Err(GatewayError::TerminalConflict {
                    id: current.id,
                    status: current.status,
                })
            }
            GuardedUpdate::Refused(current) => Err(GatewayError::Rejected(format!(
                "job {} cannot move from {} to {}",
                current.id,
                current.status,
                patch.status.unwrap_or(current.status)
            ))),
            GuardedUpdate::NotFound => Err(GatewayError::NotFound {
                entity: "job",
                id: id.to_string(),
            }),
        }
    }

    async fn delete_job(&self, id: &str) -> Result<(), GatewayError> {
        let job_id = id.to_string();
        let job = self
            .blocking(move |db| {
                let job = load_job(db, &job_id)?;
                job_repo::delete(db, &job_id)?;
                Ok(job)
            })
            .await?;
        log::info!("Deleted job {}", id);
        self.publish(ChangeKind::Delete, &job);
        Ok(())
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<ListPage<Job>, GatewayError> {
        let row_filter = JobRowFilter {
            owner_id: filter.owner_id.clone(),
            statuses: filter
                .statuses
                .iter()
                .map(|s: &JobStatus| s.as_str().to_string())
                .collect(),
            started_before: filter.started_before.map(format_timestamp),
            created_before: filter.created_before.map(format_timestamp),
            limit: filter.page.map(|p| p.limit()),
            offset: filter.page.map(|p| p.offset()),
        };
        self.blocking(move |db| {
            let (rows, count) = job_repo::query(db, &row_filter)?;
            let data = rows
                .iter()
                .map(JobRow::to_job)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ListPage { data, count })
        })
        .await
    }

    async fn get_job(&self, id: &str) -> Result<Job, GatewayError> {
        let job_id = id.to_string();
        self.blocking(move |db| load_job(db, &job_id)).await
    }
}

#[async_trait]
impl LeadGateway for SqliteBackend {
    async fn create_lead(&self, new_lead: &NewLead) -> Result<Lead, GatewayError> {
        let lead = Lead {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: new_lead.owner_id.clone(),
            business_name: new_lead.business_name.clone(),
            email: new_lead.email.clone(),
            status: new_lead.status,
            next_task_date: new_lead.next_task_date,
            strategy_id: new_lead.strategy_id.clone(),
            current_step_index: new_lead.current_step_index,
            notes: None,
            source_job_id: new_lead.source_job_id.clone(),
            created_at: Utc::now(),
        };
        let row = LeadRow::from_lead(&lead);
        self.blocking(move |db| Ok(lead_repo::insert(db, &row)?))
            .await?;
        Ok(lead)
    }

    async fn update_leads(
        &self,
        ids: &[String],
        patch: &LeadPatch,
    ) -> Result<Vec<Lead>, GatewayError> {
        if patch.is_empty() {
            return Err(GatewayError::Rejected("empty lead patch".to_string()));
        }
        let (ids_owned, patch) = (ids.to_vec(), patch.clone());
        let updated = self
            .blocking(move |db| Ok(lead_repo::update_many(db, &ids_owned, &patch)?))
            .await?;
        log::debug!("Updated {} of {} leads", updated.len(), ids.len());
        Ok(updated)
    }

    async fn delete_leads(&self, ids: &[String]) -> Result<(), GatewayError> {
        let ids_owned = ids.to_vec();
        let removed = self
            .blocking(move |db| Ok(lead_repo::delete_many(db, &ids_owned)?))
            .await?;
        log::debug!("Deleted {} of {} leads", removed, ids.len());
        Ok(())
    }

    async fn list_leads(&self, query: &LeadQuery) -> Result<ListPage<Lead>, GatewayError> {
        let query = query.clone();
        self.blocking(move |db| {
            let (rows, count) = lead_repo::query(db, &query)?;
            let data = rows
                .iter()
                .map(LeadRow::to_lead)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ListPage { data, count })
        })
        .await
    }

    async fn task_queue(&self, owner_id: &str) -> Result<Vec<Lead>, GatewayError> {
        let owner_id = owner_id.to_string();
        self.blocking(move |db| {
            let rows = lead_repo::task_queue(db, &owner_id)?;
            Ok(rows
                .iter()
                .map(LeadRow::to_lead)
                .collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    async fn get_lead(&self, id: &str) -> Result<Lead, GatewayError> {
        let lead_id = id.to_string();
        self.blocking(move |db| {
            let found = lead_repo::find_by_id(db, &lead_id)?;
            match found {
                Some(row) => Ok(row.to_lead()?),
                None => Err(GatewayError::NotFound {
                    entity: "lead",
                    id: lead_id,
                }),
            }
        })
        .await
    }
}

#[async_trait]
impl JobChangeFeed for SqliteBackend {
    async fn subscribe(&self, filter: SubscriptionFilter) -> Result<FeedSubscription, GatewayError> {
        if filter.table != JOBS_TABLE {
            return Err(GatewayError::Rejected(format!(
                "no change feed for table '{}'",
                filter.table
            )));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(self.feed_capacity);
        let mut changes = self.changes.subscribe();
        let sub_id = id.clone();

        let handle = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => {
                        if !filter.matches(&change) {
                            continue;
                        }
                        if tx.send(change).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!(
                            "Change feed subscription {} lagged, {} events dropped",
                            sub_id,
                            skipped
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        self.lock_subscriptions().insert(id.clone(), handle);
        log::debug!("Opened change feed subscription {}", id);
        Ok(FeedSubscription { id, events: rx })
    }

    async fn unsubscribe(&self, subscription_id: &str) -> Result<(), GatewayError> {
        match self.lock_subscriptions().remove(subscription_id) {
            Some(handle) => {
                handle.abort();
                log::debug!("Closed change feed subscription {}", subscription_id);
                Ok(())
            }
            None => Err(GatewayError::NotFound {
                entity: "subscription",
                id: subscription_id.to_string(),
            }),
        }
    }
}

impl Drop for SqliteBackend {
    fn drop(&mut self) {
        for (_, handle) in self.lock_subscriptions().drain() {
            handle.abort();
        }
    }
}
