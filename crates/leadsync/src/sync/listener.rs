//! Change-notification listener.
//!
//! Holds at most one live, owner-scoped subscription to job updates and
//! patches the job cache in place as notifications arrive.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::cache::{CacheStore, QueryScope};
use crate::gateway::{
    ChangeKind, FeedSubscription, GatewayError, JobChange, JobChangeFeed, SubscriptionFilter,
};
use crate::sync::invalidation::settle_completed_job;
use crate::sync::task::TaskHandle;

/// What a single notification did to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOutcome {
    /// Replaced the cached copy in this many views.
    Applied(usize),
    /// The job is not in any cached view.
    NotCached,
    /// Refused: the notification would regress a cached job's status.
    Stale,
    /// Not an update event.
    Ignored,
}

/// Applies one feed notification to the cache.
///
/// The cached row is replaced wholesale unless that would move its status
/// backwards. A completed job invalidates lead views, since the worker may
/// have imported new leads.
pub fn apply_change(cache: &CacheStore, change: &JobChange) -> ChangeOutcome {
    if change.kind != ChangeKind::Update {
        return ChangeOutcome::Ignored;
    }
    let record = &change.record;

    let mut present = false;
    let touched = cache.jobs().update_where(&[QueryScope::Jobs], |key, entry| {
        if key.owner_id() != record.owner_id || !entry.contains(&record.id) {
            return false;
        }
        present = true;
        entry.replace(record)
    });

    let outcome = if !touched.is_empty() {
        ChangeOutcome::Applied(touched.len())
    } else if present {
        log::debug!(
            "Ignoring notification for job {}: cached status is ahead of {}",
            record.id,
            record.status
        );
        ChangeOutcome::Stale
    } else {
        ChangeOutcome::NotCached
    };

    if outcome != ChangeOutcome::Stale {
        settle_completed_job(cache, record);
    }

    outcome
}

struct ActiveSubscription {
    owner_id: String,
    subscription_id: String,
    pump: TaskHandle,
}

/// Keeps one job-update subscription alive and feeds it into the cache.
pub struct ChangeListener {
    feed: Arc<dyn JobChangeFeed>,
    cache: Arc<CacheStore>,
    active: Mutex<Option<ActiveSubscription>>,
}

impl ChangeListener {
    pub fn new(feed: Arc<dyn JobChangeFeed>, cache: Arc<CacheStore>) -> Self {
        Self {
            feed,
            cache,
            active: Mutex::new(None),
        }
    }

    /// Subscribes to `owner_id`'s job updates, tearing down any previous
    /// subscription first.
    pub async fn subscribe(&self, owner_id: &str) -> Result<(), GatewayError> {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            self.teardown(previous).await;
        }

        let FeedSubscription { id, mut events } = self
            .feed
            .subscribe(SubscriptionFilter::job_updates(owner_id))
            .await?;

        let cache = Arc::clone(&self.cache);
        let owner = owner_id.to_string();
        let pump = TaskHandle::spawn(&format!("change-feed[{}]", owner_id), move |mut shutdown| {
            async move {
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        event = events.recv() => match event {
                            Some(change) => {
                                apply_change(&cache, &change);
                            }
                            None => {
                                log::warn!(
                                    "Change feed for {} closed; polling continues as fallback",
                                    owner
                                );
                                break;
                            }
                        },
                    }
                }
            }
        });

        log::info!("Subscribed to job updates for {}", owner_id);
        *active = Some(ActiveSubscription {
            owner_id: owner_id.to_string(),
            subscription_id: id,
            pump,
        });
        Ok(())
    }

    /// Ends the live subscription, if any. Feed errors are logged, not raised.
    pub async fn unsubscribe(&self) {
        let previous = self.active.lock().await.take();
        if let Some(previous) = previous {
            self.teardown(previous).await;
        }
    }

    async fn teardown(&self, mut subscription: ActiveSubscription) {
        subscription.pump.stop();
        if let Err(e) = self.feed.unsubscribe(&subscription.subscription_id).await {
            log::warn!(
                "Unsubscribe for {} failed: {}",
                subscription.owner_id,
                e
            );
        }
        log::info!("Unsubscribed from job updates for {}", subscription.owner_id);
    }

    /// Owner of the live subscription.
    pub async fn owner_id(&self) -> Option<String> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|active| active.owner_id.clone())
    }

    /// True while a subscription exists and its event stream is open.
    pub async fn is_connected(&self) -> bool {
        self.active
            .lock()
            .await
            .as_ref()
            .is_some_and(|active| active.pump.is_running())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheEntry, LeadQuery, QueryKey};
    use crate::model::job::tests::sample_job;
    use crate::model::lead::tests::sample_lead;
    use crate::model::{Job, JobStatus};

    fn cache_with(jobs: Vec<Job>) -> CacheStore {
        let cache = CacheStore::new(16);
        cache
            .jobs()
            .set(QueryKey::jobs("owner-1"), CacheEntry::Collection(jobs));
        cache
    }

    fn update(job: Job) -> JobChange {
        JobChange {
            kind: ChangeKind::Update,
            record: job,
        }
    }

    #[test]
    fn test_update_replaces_cached_job() {
        let cache = cache_with(vec![sample_job("j1", JobStatus::Pending)]);
        let mut job = sample_job("j1", JobStatus::Processing);
        job.progress = Some(40);

        assert_eq!(apply_change(&cache, &update(job.clone())), ChangeOutcome::Applied(1));
        let cached = cache.jobs().get(&QueryKey::jobs("owner-1")).unwrap();
        assert_eq!(cached.find("j1").unwrap(), &job);
    }

    #[test]
    fn test_regression_is_ignored() {
        let cache = cache_with(vec![sample_job("j1", JobStatus::Failed)]);
        let outcome = apply_change(&cache, &update(sample_job("j1", JobStatus::Processing)));

        assert_eq!(outcome, ChangeOutcome::Stale);
        let cached = cache.jobs().get(&QueryKey::jobs("owner-1")).unwrap();
        assert_eq!(cached.find("j1").unwrap().status, JobStatus::Failed);
    }

    #[test]
    fn test_completed_invalidates_leads() {
        let cache = cache_with(vec![sample_job("j1", JobStatus::Processing)]);
        let leads = QueryKey::Leads(LeadQuery::all("owner-1"));
        cache
            .leads()
            .set(leads.clone(), CacheEntry::Collection(vec![sample_lead("l1")]));

        apply_change(&cache, &update(sample_job("j1", JobStatus::Completed)));
        assert!(cache.leads().is_stale(&leads));
    }

    #[test]
    fn test_non_update_and_unknown_rows() {
        let cache = cache_with(vec![]);
        let change = JobChange {
            kind: ChangeKind::Insert,
            record: sample_job("j1", JobStatus::Pending),
        };
        assert_eq!(apply_change(&cache, &change), ChangeOutcome::Ignored);
        assert_eq!(
            apply_change(&cache, &update(sample_job("j9", JobStatus::Processing))),
            ChangeOutcome::NotCached
        );
    }
}
