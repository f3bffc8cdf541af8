//! Remote request gateway.
//!
//! The durable store, its change feed and the scrape trigger are reached
//! only through the traits defined here. [`SqliteBackend`] implements the
//! store and feed locally; [`HttpScrapeTrigger`] calls the scraping worker.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::cache::{LeadQuery, PageRequest};
use crate::model::{Job, JobPatch, JobStatus, Lead, LeadPatch, NewJob, NewLead};

pub mod error;
pub mod sqlite;
pub mod trigger;

pub use error::{GatewayError, TriggerError};
pub use sqlite::SqliteBackend;
pub use trigger::HttpScrapeTrigger;

/// Name of the job table as seen by change-feed subscribers.
pub const JOBS_TABLE: &str = "scrape_jobs";

/// Filter for job list reads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobFilter {
    pub owner_id: Option<String>,
    /// Empty means any status.
    pub statuses: Vec<JobStatus>,
    /// Only jobs whose `started_at` precedes this instant.
    pub started_before: Option<DateTime<Utc>>,
    /// Only jobs whose `created_at` precedes this instant.
    pub created_before: Option<DateTime<Utc>>,
    pub page: Option<PageRequest>,
}

impl JobFilter {
    pub fn for_owner(owner_id: &str) -> Self {
        Self {
            owner_id: Some(owner_id.to_string()),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn started_before(mut self, cutoff: DateTime<Utc>) -> Self {
        self.started_before = Some(cutoff);
        self
    }

    pub fn created_before(mut self, cutoff: DateTime<Utc>) -> Self {
        self.created_before = Some(cutoff);
        self
    }
}

/// One page of a list read plus the total number of matching rows.
#[derive(Debug, Clone, PartialEq)]
pub struct ListPage<E> {
    pub data: Vec<E>,
    pub count: u64,
}

/// Row-change event kinds published by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A row snapshot pushed by the change feed.
#[derive(Debug, Clone, PartialEq)]
pub struct JobChange {
    pub kind: ChangeKind,
    pub record: Job,
}

/// What a change-feed subscription listens to.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionFilter {
    pub owner_id: String,
    pub table: String,
    pub events: Vec<ChangeKind>,
}

impl SubscriptionFilter {
    /// Update events on the owner's jobs.
    pub fn job_updates(owner_id: &str) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            table: JOBS_TABLE.to_string(),
            events: vec![ChangeKind::Update],
        }
    }

    pub fn matches(&self, change: &JobChange) -> bool {
        self.events.contains(&change.kind) && change.record.owner_id == self.owner_id
    }
}

/// A live change-feed subscription. The receiver yields `None` once the
/// feed is closed on the store side.
#[derive(Debug)]
pub struct FeedSubscription {
    pub id: String,
    pub events: mpsc::Receiver<JobChange>,
}

/// Payload of the scrape trigger call, in the worker's wire names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerRequest {
    pub job_id: String,
    #[serde(rename = "user_id")]
    pub owner_id: String,
    #[serde(rename = "niche")]
    pub category: String,
    #[serde(rename = "location")]
    pub locality: String,
    #[serde(rename = "limit")]
    pub target_count: u32,
    #[serde(rename = "increase_radius")]
    pub expand_radius: bool,
}

impl TriggerRequest {
    pub fn for_job(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            owner_id: job.owner_id.clone(),
            category: job.category.clone(),
            locality: job.locality.clone(),
            target_count: job.target_count,
            expand_radius: job.expand_radius,
        }
    }
}

/// Durable store operations on jobs. Identities are always store-assigned.
#[async_trait]
pub trait JobGateway: Send + Sync {
    async fn create_job(&self, new_job: &NewJob) -> Result<Job, GatewayError>;

    /// Applies `patch`. Writes to a terminal job fail with
    /// [`GatewayError::TerminalConflict`].
    async fn update_job(&self, id: &str, patch: &JobPatch) -> Result<Job, GatewayError>;

    async fn delete_job(&self, id: &str) -> Result<(), GatewayError>;

    async fn list_jobs(&self, filter: &JobFilter) -> Result<ListPage<Job>, GatewayError>;

    async fn get_job(&self, id: &str) -> Result<Job, GatewayError>;
}

/// Durable store operations on leads.
#[async_trait]
pub trait LeadGateway: Send + Sync {
    async fn create_lead(&self, new_lead: &NewLead) -> Result<Lead, GatewayError>;

    /// Applies one patch to many leads atomically, returning the updated rows.
    async fn update_leads(&self, ids: &[String], patch: &LeadPatch)
        -> Result<Vec<Lead>, GatewayError>;

    async fn delete_leads(&self, ids: &[String]) -> Result<(), GatewayError>;

    async fn list_leads(&self, query: &LeadQuery) -> Result<ListPage<Lead>, GatewayError>;

    /// Leads with a scheduled next task, earliest first.
    async fn task_queue(&self, owner_id: &str) -> Result<Vec<Lead>, GatewayError>;

    async fn get_lead(&self, id: &str) -> Result<Lead, GatewayError>;
}

/// Push channel for job row changes.
#[async_trait]
pub trait JobChangeFeed: Send + Sync {
    async fn subscribe(&self, filter: SubscriptionFilter) -> Result<FeedSubscription, GatewayError>;

    async fn unsubscribe(&self, subscription_id: &str) -> Result<(), GatewayError>;
}

/// Starts the external scraping worker for a job.
#[async_trait]
pub trait ScrapeTrigger: Send + Sync {
    async fn trigger(&self, request: &TriggerRequest) -> Result<(), TriggerError>;
}
