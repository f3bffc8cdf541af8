//! One owner session of the sync engine.
//!
//! [`SyncEngine`] wires the cache, the store gateways, the change listener,
//! background reconciliation, job orchestration and bulk lead writes
//! together. Presentation code supplies the owner and reads the cache.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::Instrument;

use crate::bulk::BulkLeadMutator;
use crate::cache::CacheStore;
use crate::config::{ConfigError, SyncConfig};
use crate::db::Database;
use crate::error::{Result, SyncError};
use crate::gateway::{
    HttpScrapeTrigger, JobChangeFeed, JobGateway, LeadGateway, ScrapeTrigger, SqliteBackend,
};
use crate::model::{Job, JobParams, Lead, LeadPatch};
use crate::orchestrator::{CreateJobOutcome, DuplicatePolicy, JobOrchestrator};
use crate::sync::{
    ChangeListener, PollScheduler, Queries, ReconciliationSupervisor, TimeoutReconciler,
};

struct Session {
    owner_id: String,
    supervisor: Arc<ReconciliationSupervisor>,
}

pub struct SyncEngine {
    config: SyncConfig,
    cache: Arc<CacheStore>,
    jobs: Arc<dyn JobGateway>,
    queries: Arc<Queries>,
    listener: ChangeListener,
    orchestrator: JobOrchestrator,
    bulk: BulkLeadMutator,
    session: Mutex<Option<Session>>,
}

impl SyncEngine {
    /// Builds an engine over one store that serves jobs, leads and the
    /// change feed.
    pub fn new<S>(config: SyncConfig, store: Arc<S>, trigger: Arc<dyn ScrapeTrigger>) -> Self
    where
        S: JobGateway + LeadGateway + JobChangeFeed + 'static,
    {
        Self::from_parts(config, store.clone(), store.clone(), store, trigger)
    }

    pub fn from_parts(
        config: SyncConfig,
        jobs: Arc<dyn JobGateway>,
        leads: Arc<dyn LeadGateway>,
        feed: Arc<dyn JobChangeFeed>,
        trigger: Arc<dyn ScrapeTrigger>,
    ) -> Self {
        let cache = Arc::new(CacheStore::new(config.cache_event_capacity));
        let queries = Arc::new(Queries::new(cache.clone(), jobs.clone(), leads.clone()));
        Self {
            listener: ChangeListener::new(feed, cache.clone()),
            orchestrator: JobOrchestrator::new(cache.clone(), jobs.clone(), trigger),
            bulk: BulkLeadMutator::new(cache.clone(), leads),
            config,
            cache,
            jobs,
            queries,
            session: Mutex::new(None),
        }
    }

    /// Builds an engine over the bundled SQLite store and the HTTP trigger
    /// from `config.trigger`. `None` opens an in-memory database.
    pub fn with_sqlite(config: SyncConfig, path: Option<&Path>) -> Result<Self> {
        let trigger_config = config.trigger.as_ref().ok_or_else(|| ConfigError::Validation {
            message: "trigger configuration is required".to_string(),
        })?;
        let trigger = Arc::new(HttpScrapeTrigger::from_config(trigger_config)?);

        let db = match path {
            Some(path) => Database::open(path)?,
            None => Database::open_in_memory()?,
        };
        let store = Arc::new(SqliteBackend::with_feed_capacity(
            db,
            config.change_feed_capacity,
        ));
        Ok(Self::new(config, store, trigger))
    }

    /// Starts a session for `owner_id`: loads the job list, subscribes to job
    /// updates and hands the poll/timeout loops to the supervisor.
    ///
    /// A running session for another owner is ended first. Starting the same
    /// owner again is a no-op.
    pub async fn start(&self, owner_id: &str) -> Result<()> {
        let mut session = self.session.lock().await;
        if let Some(current) = session.as_ref() {
            if current.owner_id == owner_id {
                log::debug!("Session for {} already running", owner_id);
                return Ok(());
            }
        }
        if let Some(previous) = session.take() {
            self.end_session(previous).await;
        }

        let span = tracing::info_span!("start_session", owner = %owner_id);
        let jobs = self.queries.fetch_jobs(owner_id).instrument(span).await?;
        log::info!("Loaded {} jobs for {}", jobs.len(), owner_id);

        if let Err(e) = self.listener.subscribe(owner_id).await {
            log::warn!(
                "Job updates unavailable for {}, relying on polling: {}",
                owner_id,
                e
            );
        }

        let poller = Arc::new(PollScheduler::new(
            self.cache.clone(),
            self.queries.clone(),
            owner_id,
            self.config.poll_interval(),
        ));
        let reconciler = Arc::new(
            TimeoutReconciler::new(
                self.jobs.clone(),
                self.cache.clone(),
                owner_id,
                self.config.timeout_sweep_interval(),
                self.config.processing_deadline(),
            )
            .with_pending_deadline(self.config.pending_deadline())
            .with_corrections(self.orchestrator.corrections().clone()),
        );
        let supervisor =
            ReconciliationSupervisor::new(self.cache.clone(), poller, reconciler, owner_id);
        supervisor.start();

        *session = Some(Session {
            owner_id: owner_id.to_string(),
            supervisor,
        });
        Ok(())
    }

    /// Ends the current session and starts one for `owner_id`.
    pub async fn switch_owner(&self, owner_id: &str) -> Result<()> {
        log::info!("Switching owner to {}", owner_id);
        self.start(owner_id).await
    }

    /// Ends the current session, if any. Idempotent.
    pub async fn shutdown(&self) {
        let previous = self.session.lock().await.take();
        if let Some(previous) = previous {
            self.end_session(previous).await;
        }
    }

    async fn end_session(&self, session: Session) {
        session.supervisor.shutdown();
        self.listener.unsubscribe().await;
        let dropped = self.cache.jobs().clear_owner(&session.owner_id)
            + self.cache.leads().clear_owner(&session.owner_id);
        log::info!(
            "Ended session for {} ({} cached views dropped)",
            session.owner_id,
            dropped
        );
    }

    pub async fn owner_id(&self) -> Option<String> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|session| session.owner_id.clone())
    }

    async fn require_owner(&self) -> Result<String> {
        self.owner_id().await.ok_or(SyncError::NotStarted)
    }

    /// True while the poll loop of the current session runs.
    pub async fn is_polling(&self) -> bool {
        self.session
            .lock()
            .await
            .as_ref()
            .is_some_and(|session| session.supervisor.is_polling())
    }

    pub async fn is_sweeping(&self) -> bool {
        self.session
            .lock()
            .await
            .as_ref()
            .is_some_and(|session| session.supervisor.is_sweeping())
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn queries(&self) -> &Arc<Queries> {
        &self.queries
    }

    pub fn listener(&self) -> &ChangeListener {
        &self.listener
    }

    pub fn orchestrator(&self) -> &JobOrchestrator {
        &self.orchestrator
    }

    pub fn bulk(&self) -> &BulkLeadMutator {
        &self.bulk
    }

    /// Creates a job for the session owner.
    pub async fn create_job(
        &self,
        params: JobParams,
        policy: DuplicatePolicy,
    ) -> Result<CreateJobOutcome> {
        let owner_id = self.require_owner().await?;
        self.orchestrator.create_job(&owner_id, params, policy).await
    }

    pub async fn cancel_job(&self, job_id: &str) -> Result<Job> {
        self.require_owner().await?;
        self.orchestrator.cancel_job(job_id).await
    }

    pub async fn delete_job(&self, job_id: &str) -> Result<()> {
        self.require_owner().await?;
        self.orchestrator.delete_job(job_id).await
    }

    pub async fn bulk_update(&self, ids: &[String], patch: &LeadPatch) -> Result<Vec<Lead>> {
        self.require_owner().await?;
        self.bulk.bulk_update(ids, patch).await
    }

    pub async fn bulk_assign_strategy(
        &self,
        ids: &[String],
        strategy_id: Option<&str>,
    ) -> Result<Vec<Lead>> {
        self.require_owner().await?;
        self.bulk.bulk_assign_strategy(ids, strategy_id).await
    }

    pub async fn bulk_delete(&self, ids: &[String]) -> Result<()> {
        self.require_owner().await?;
        self.bulk.bulk_delete(ids).await
    }

    /// Re-reads every stale view of the session owner.
    pub async fn refresh_stale(&self) -> Result<usize> {
        let owner_id = self.require_owner().await?;
        Ok(self.queries.refetch_stale(&owner_id).await)
    }
}
