//! Read path: fetches views through the gateway into the cache.

use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::{CacheEntry, CacheStore, LeadQuery, QueryKey, QueryScope};
use crate::gateway::{GatewayError, JobFilter, JobGateway, LeadGateway};
use crate::model::{Job, JobStatus, Lead};

/// Loads job lists, lead lists and task queues into the cache.
pub struct Queries {
    cache: Arc<CacheStore>,
    jobs: Arc<dyn JobGateway>,
    leads: Arc<dyn LeadGateway>,
}

impl Queries {
    pub fn new(
        cache: Arc<CacheStore>,
        jobs: Arc<dyn JobGateway>,
        leads: Arc<dyn LeadGateway>,
    ) -> Self {
        Self { cache, jobs, leads }
    }

    /// Fetches the owner's full job list.
    ///
    /// Jobs that turned `completed` since the last read may have imported
    /// leads, so lead views are invalidated when that happens.
    pub async fn fetch_jobs(&self, owner_id: &str) -> Result<Vec<Job>, GatewayError> {
        let key = QueryKey::jobs(owner_id);
        let page = self.jobs.list_jobs(&JobFilter::for_owner(owner_id)).await?;

        let previous: HashMap<String, JobStatus> = self
            .cache
            .jobs()
            .get(&key)
            .map(|entry| {
                entry
                    .items()
                    .iter()
                    .map(|job| (job.id.clone(), job.status))
                    .collect()
            })
            .unwrap_or_default();
        let newly_completed = page.data.iter().any(|job| {
            job.status == JobStatus::Completed
                && previous
                    .get(&job.id)
                    .is_some_and(|status| *status != JobStatus::Completed)
        });

        self.cache
            .jobs()
            .set_fetched(key.clone(), CacheEntry::Collection(page.data));
        if newly_completed {
            log::debug!("Job completed for {}, invalidating lead views", owner_id);
            self.cache
                .leads()
                .invalidate(&[QueryScope::Leads, QueryScope::TaskQueue]);
        }

        Ok(self
            .cache
            .jobs()
            .get(&key)
            .map(|entry| entry.items().to_vec())
            .unwrap_or_default())
    }

    /// Fetches one lead list view, as a page envelope when `query` is paged.
    pub async fn fetch_leads(&self, query: &LeadQuery) -> Result<CacheEntry<Lead>, GatewayError> {
        let page = self.leads.list_leads(query).await?;
        let entry = match query.page {
            Some(_) => CacheEntry::page(page.data, page.count),
            None => CacheEntry::Collection(page.data),
        };
        self.cache
            .leads()
            .set_fetched(QueryKey::Leads(query.clone()), entry.clone());
        Ok(entry)
    }

    pub async fn fetch_task_queue(&self, owner_id: &str) -> Result<Vec<Lead>, GatewayError> {
        let leads = self.leads.task_queue(owner_id).await?;
        self.cache.leads().set_fetched(
            QueryKey::task_queue(owner_id),
            CacheEntry::Collection(leads.clone()),
        );
        Ok(leads)
    }

    /// Re-reads a single view.
    pub async fn refetch(&self, key: &QueryKey) -> Result<(), GatewayError> {
        match key {
            QueryKey::Jobs { owner_id } => self.fetch_jobs(owner_id).await.map(|_| ()),
            QueryKey::Leads(query) => self.fetch_leads(query).await.map(|_| ()),
            QueryKey::TaskQueue { owner_id } => self.fetch_task_queue(owner_id).await.map(|_| ()),
        }
    }

    /// Re-reads every stale view of `owner_id`. Failures are logged and the
    /// view stays stale. Returns how many views were refreshed.
    pub async fn refetch_stale(&self, owner_id: &str) -> usize {
        let mut keys = self.cache.jobs().stale_keys(&[QueryScope::Jobs]);
        keys.extend(
            self.cache
                .leads()
                .stale_keys(&[QueryScope::Leads, QueryScope::TaskQueue]),
        );

        let mut refreshed = 0;
        for key in keys.iter().filter(|key| key.owner_id() == owner_id) {
            match self.refetch(key).await {
                Ok(()) => refreshed += 1,
                Err(e) => log::warn!("Failed to refetch {}: {}", key, e),
            }
        }
        refreshed
    }
}
