//! Reactive query cache.
//!
//! Holds one materialized view per [`QueryKey`], tracks staleness, and
//! publishes every change on a broadcast channel so views can re-render.
//! Locks are never held across an `.await`.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use super::entry::{CacheEntry, Entity};
use super::key::{QueryKey, QueryScope};
use crate::model::{Job, Lead};

/// What happened to a cached view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEventKind {
    /// The view's data changed.
    Updated,
    /// The view was marked stale and should be refetched.
    Invalidated,
    /// The view was dropped.
    Removed,
}

/// Change notification for cache subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEvent {
    pub key: QueryKey,
    pub kind: CacheEventKind,
}

#[derive(Debug, Clone)]
struct CachedQuery<E> {
    entry: CacheEntry<E>,
    stale: bool,
    updated_at: DateTime<Utc>,
}

/// Cache of views over one entity type.
pub struct QueryCache<E> {
    entries: RwLock<HashMap<QueryKey, CachedQuery<E>>>,
    events: broadcast::Sender<CacheEvent>,
}

impl<E: Entity> QueryCache<E> {
    pub fn new(event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            entries: RwLock::new(HashMap::new()),
            events,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<QueryKey, CachedQuery<E>>> {
        match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Query cache lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<QueryKey, CachedQuery<E>>> {
        match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Query cache lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn emit(&self, key: QueryKey, kind: CacheEventKind) {
        // No subscribers is fine
        let _ = self.events.send(CacheEvent { key, kind });
    }

    /// Subscribes to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    pub fn get(&self, key: &QueryKey) -> Option<CacheEntry<E>> {
        self.read().get(key).map(|cached| cached.entry.clone())
    }

    pub fn contains_key(&self, key: &QueryKey) -> bool {
        self.read().contains_key(key)
    }

    pub fn is_stale(&self, key: &QueryKey) -> bool {
        self.read().get(key).is_some_and(|cached| cached.stale)
    }

    pub fn updated_at(&self, key: &QueryKey) -> Option<DateTime<Utc>> {
        self.read().get(key).map(|cached| cached.updated_at)
    }

    /// Stores a view verbatim and marks it fresh.
    pub fn set(&self, key: QueryKey, entry: CacheEntry<E>) {
        self.write().insert(
            key.clone(),
            CachedQuery {
                entry,
                stale: false,
                updated_at: Utc::now(),
            },
        );
        self.emit(key, CacheEventKind::Updated);
    }

    /// Stores freshly fetched rows, merged against what is cached so that
    /// refused regressions and in-flight placeholders survive.
    pub fn set_fetched(&self, key: QueryKey, fetched: CacheEntry<E>) {
        {
            let mut entries = self.write();
            let entry = match entries.get(&key) {
                Some(cached) => cached.entry.merge_fetched(fetched),
                None => fetched,
            };
            entries.insert(
                key.clone(),
                CachedQuery {
                    entry,
                    stale: false,
                    updated_at: Utc::now(),
                },
            );
        }
        self.emit(key, CacheEventKind::Updated);
    }

    pub fn remove(&self, key: &QueryKey) -> bool {
        let removed = self.write().remove(key).is_some();
        if removed {
            self.emit(key.clone(), CacheEventKind::Removed);
        }
        removed
    }

    /// Keys currently cached in any of the scopes.
    pub fn keys(&self, scopes: &[QueryScope]) -> Vec<QueryKey> {
        self.read()
            .keys()
            .filter(|key| scopes.contains(&key.scope()))
            .cloned()
            .collect()
    }

    pub fn stale_keys(&self, scopes: &[QueryScope]) -> Vec<QueryKey> {
        self.read()
            .iter()
            .filter(|(key, cached)| cached.stale && scopes.contains(&key.scope()))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Marks every view in the scopes stale. Returns how many were marked.
    pub fn invalidate(&self, scopes: &[QueryScope]) -> usize {
        let keys: Vec<QueryKey> = {
            let mut entries = self.write();
            entries
                .iter_mut()
                .filter(|(key, _)| scopes.contains(&key.scope()))
                .map(|(key, cached)| {
                    cached.stale = true;
                    key.clone()
                })
                .collect()
        };
        let count = keys.len();
        for key in keys {
            self.emit(key, CacheEventKind::Invalidated);
        }
        count
    }

    /// Marks a single view stale.
    pub fn invalidate_key(&self, key: &QueryKey) -> bool {
        let found = match self.write().get_mut(key) {
            Some(cached) => {
                cached.stale = true;
                true
            }
            None => false,
        };
        if found {
            self.emit(key.clone(), CacheEventKind::Invalidated);
        }
        found
    }

    /// Distinct rows matching `pred` across all views in the scopes.
    pub fn find_where<P>(&self, scopes: &[QueryScope], mut pred: P) -> Vec<E>
    where
        P: FnMut(&E) -> bool,
    {
        let entries = self.read();
        let mut seen = std::collections::HashSet::new();
        let mut found = Vec::new();
        for (key, cached) in entries.iter() {
            if !scopes.contains(&key.scope()) {
                continue;
            }
            for item in cached.entry.items() {
                if pred(item) && seen.insert(item.id().to_string()) {
                    found.push(item.clone());
                }
            }
        }
        found
    }

    /// Copies of every view in the scopes.
    pub fn snapshot(&self, scopes: &[QueryScope]) -> Vec<(QueryKey, CacheEntry<E>)> {
        self.read()
            .iter()
            .filter(|(key, _)| scopes.contains(&key.scope()))
            .map(|(key, cached)| (key.clone(), cached.entry.clone()))
            .collect()
    }

    /// Snapshots then mutates every view in the scopes under one write lock.
    ///
    /// Returns the pre-mutation copies of the views `op` reported as changed.
    pub fn update_where<F>(
        &self,
        scopes: &[QueryScope],
        mut op: F,
    ) -> Vec<(QueryKey, CacheEntry<E>)>
    where
        F: FnMut(&QueryKey, &mut CacheEntry<E>) -> bool,
    {
        let touched: Vec<(QueryKey, CacheEntry<E>)> = {
            let mut entries = self.write();
            let mut touched = Vec::new();
            for (key, cached) in entries.iter_mut() {
                if !scopes.contains(&key.scope()) {
                    continue;
                }
                let before = cached.entry.clone();
                if op(key, &mut cached.entry) {
                    cached.updated_at = Utc::now();
                    touched.push((key.clone(), before));
                }
            }
            touched
        };
        for (key, _) in &touched {
            self.emit(key.clone(), CacheEventKind::Updated);
        }
        touched
    }

    /// Puts views back exactly as captured.
    pub fn restore(&self, views: Vec<(QueryKey, CacheEntry<E>)>) {
        let keys: Vec<QueryKey> = {
            let mut entries = self.write();
            views
                .into_iter()
                .map(|(key, entry)| {
                    let stale = entries.get(&key).is_some_and(|cached| cached.stale);
                    entries.insert(
                        key.clone(),
                        CachedQuery {
                            entry,
                            stale,
                            updated_at: Utc::now(),
                        },
                    );
                    key
                })
                .collect()
        };
        for key in keys {
            self.emit(key, CacheEventKind::Updated);
        }
    }

    /// Drops every view belonging to `owner_id`.
    pub fn clear_owner(&self, owner_id: &str) -> usize {
        let removed: Vec<QueryKey> = {
            let mut entries = self.write();
            let keys: Vec<QueryKey> = entries
                .keys()
                .filter(|key| key.owner_id() == owner_id)
                .cloned()
                .collect();
            for key in &keys {
                entries.remove(key);
            }
            keys
        };
        let count = removed.len();
        for key in removed {
            self.emit(key, CacheEventKind::Removed);
        }
        count
    }
}

/// The shared cache: job views and lead views (lists and task queue).
pub struct CacheStore {
    jobs: QueryCache<Job>,
    leads: QueryCache<Lead>,
}

impl CacheStore {
    pub fn new(event_capacity: usize) -> Self {
        Self {
            jobs: QueryCache::new(event_capacity),
            leads: QueryCache::new(event_capacity),
        }
    }

    pub fn jobs(&self) -> &QueryCache<Job> {
        &self.jobs
    }

    pub fn leads(&self) -> &QueryCache<Lead> {
        &self.leads
    }

    /// Jobs of `owner_id` that have not reached a terminal status.
    pub fn active_job_count(&self, owner_id: &str) -> usize {
        self.jobs
            .get(&QueryKey::jobs(owner_id))
            .map(|entry| {
                entry
                    .items()
                    .iter()
                    .filter(|job| !job.is_terminal())
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn clear_owner(&self, owner_id: &str) {
        let jobs = self.jobs.clear_owner(owner_id);
        let leads = self.leads.clear_owner(owner_id);
        log::debug!(
            "Cleared {} job views and {} lead views for owner {}",
            jobs,
            leads,
            owner_id
        );
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(256)
    }
}
