//! Test doubles for the store and trigger boundaries.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use leadsync::cache::LeadQuery;
use leadsync::gateway::{
    FeedSubscription, GatewayError, JobChangeFeed, JobFilter, JobGateway, LeadGateway, ListPage,
    ScrapeTrigger, SqliteBackend, SubscriptionFilter, TriggerError, TriggerRequest,
};
use leadsync::model::{Job, JobPatch, Lead, LeadPatch, NewJob, NewLead};

fn offline() -> GatewayError {
    GatewayError::Unavailable("injected failure".to_string())
}

/// Wraps the SQLite store, counting calls and failing writes on demand.
pub struct FlakyStore {
    pub inner: Arc<SqliteBackend>,
    pub fail_job_writes: AtomicBool,
    pub fail_lead_writes: AtomicBool,
    pub job_updates: AtomicUsize,
    pub job_lists: AtomicUsize,
    /// When set, `create_job` commits, signals `created`, then waits here.
    hold_create: Mutex<Option<Arc<Notify>>>,
    pub created: Notify,
}

impl FlakyStore {
    pub fn new(inner: Arc<SqliteBackend>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fail_job_writes: AtomicBool::new(false),
            fail_lead_writes: AtomicBool::new(false),
            job_updates: AtomicUsize::new(0),
            job_lists: AtomicUsize::new(0),
            hold_create: Mutex::new(None),
            created: Notify::new(),
        })
    }

    /// Makes the next creates wait on the returned handle after committing.
    pub fn hold_creates(&self) -> Arc<Notify> {
        let release = Arc::new(Notify::new());
        *self.hold_create.lock().unwrap() = Some(release.clone());
        release
    }

    pub fn job_updates(&self) -> usize {
        self.job_updates.load(Ordering::SeqCst)
    }

    pub fn job_lists(&self) -> usize {
        self.job_lists.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobGateway for FlakyStore {
    async fn create_job(&self, new_job: &NewJob) -> Result<Job, GatewayError> {
        if self.fail_job_writes.load(Ordering::SeqCst) {
            return Err(offline());
        }
        let job = self.inner.create_job(new_job).await?;
        let hold = self.hold_create.lock().unwrap().clone();
        if let Some(release) = hold {
            self.created.notify_one();
            release.notified().await;
        }
        Ok(job)
    }

    async fn update_job(&self, id: &str, patch: &JobPatch) -> Result<Job, GatewayError> {
        self.job_updates.fetch_add(1, Ordering::SeqCst);
        if self.fail_job_writes.load(Ordering::SeqCst) {
            return Err(offline());
        }
        self.inner.update_job(id, patch).await
    }

    async fn delete_job(&self, id: &str) -> Result<(), GatewayError> {
        if self.fail_job_writes.load(Ordering::SeqCst) {
            return Err(offline());
        }
        self.inner.delete_job(id).await
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<ListPage<Job>, GatewayError> {
        self.job_lists.fetch_add(1, Ordering::SeqCst);
        self.inner.list_jobs(filter).await
    }

    async fn get_job(&self, id: &str) -> Result<Job, GatewayError> {
        self.inner.get_job(id).await
    }
}

#[async_trait]
impl LeadGateway for FlakyStore {
    async fn create_lead(&self, new_lead: &NewLead) -> Result<Lead, GatewayError> {
        self.inner.create_lead(new_lead).await
    }

    async fn update_leads(&self, ids: &[String], patch: &LeadPatch) -> Result<Vec<Lead>, GatewayError> {
        if self.fail_lead_writes.load(Ordering::SeqCst) {
            return Err(offline());
        }
        self.inner.update_leads(ids, patch).await
    }

    async fn delete_leads(&self, ids: &[String]) -> Result<(), GatewayError> {
        if self.fail_lead_writes.load(Ordering::SeqCst) {
            return Err(offline());
        }
        self.inner.delete_leads(ids).await
    }

    async fn list_leads(&self, query: &LeadQuery) -> Result<ListPage<Lead>, GatewayError> {
        self.inner.list_leads(query).await
    }

    async fn task_queue(&self, owner_id: &str) -> Result<Vec<Lead>, GatewayError> {
        self.inner.task_queue(owner_id).await
    }

    async fn get_lead(&self, id: &str) -> Result<Lead, GatewayError> {
        self.inner.get_lead(id).await
    }
}

#[async_trait]
impl JobChangeFeed for FlakyStore {
    async fn subscribe(&self, filter: SubscriptionFilter) -> Result<FeedSubscription, GatewayError> {
        self.inner.subscribe(filter).await
    }

    async fn unsubscribe(&self, subscription_id: &str) -> Result<(), GatewayError> {
        self.inner.unsubscribe(subscription_id).await
    }
}

/// Records every trigger call; optionally answers with a non-2xx status.
#[derive(Default)]
pub struct RecordingTrigger {
    reject_with: Option<u16>,
    calls: Mutex<Vec<TriggerRequest>>,
}

impl RecordingTrigger {
    pub fn accepting() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn rejecting(status: u16) -> Arc<Self> {
        Arc::new(Self {
            reject_with: Some(status),
            ..Default::default()
        })
    }

    pub fn calls(&self) -> Vec<TriggerRequest> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ScrapeTrigger for RecordingTrigger {
    async fn trigger(&self, request: &TriggerRequest) -> Result<(), TriggerError> {
        self.calls.lock().unwrap().push(request.clone());
        match self.reject_with {
            Some(status) => Err(TriggerError::Rejected {
                status,
                body: "worker unavailable".to_string(),
            }),
            None => Ok(()),
        }
    }
}
