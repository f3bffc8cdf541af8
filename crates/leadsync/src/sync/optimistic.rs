//! Optimistic writes with snapshot rollback.
//!
//! A mutation patches every live view in its scopes before the durable write
//! is issued, keeps pre-mutation copies of the views it touched, restores
//! them verbatim if the write fails, and settle-invalidates either way.

use std::fmt::Display;
use std::future::Future;

use crate::cache::{CacheEntry, Entity, QueryCache, QueryKey, QueryScope};
use crate::sync::invalidation::settle;

/// Pre-mutation copies of every view an optimistic write changed.
#[derive(Debug, Clone)]
pub struct Snapshot<E> {
    views: Vec<(QueryKey, CacheEntry<E>)>,
}

impl<E: Entity> Snapshot<E> {
    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn keys(&self) -> Vec<&QueryKey> {
        self.views.iter().map(|(key, _)| key).collect()
    }

    /// Puts every captured view back exactly as it was.
    pub fn restore(self, cache: &QueryCache<E>) {
        let count = self.views.len();
        cache.restore(self.views);
        log::debug!("Rolled back {} views", count);
    }
}

/// Applies `op` to every view in `scopes` and snapshots the views it changed.
///
/// `op` returns whether it modified the entry.
pub fn apply<E, Op>(cache: &QueryCache<E>, scopes: &[QueryScope], op: Op) -> Snapshot<E>
where
    E: Entity,
    Op: FnMut(&QueryKey, &mut CacheEntry<E>) -> bool,
{
    Snapshot {
        views: cache.update_where(scopes, op),
    }
}

/// One optimistic write against one entity cache.
pub struct OptimisticMutation<'a, E> {
    cache: &'a QueryCache<E>,
    label: String,
    patch_scopes: Vec<QueryScope>,
    settle_scopes: Vec<QueryScope>,
}

impl<'a, E: Entity> OptimisticMutation<'a, E> {
    /// Patches and settles the same scopes unless [`settle_on`] says otherwise.
    ///
    /// [`settle_on`]: OptimisticMutation::settle_on
    pub fn new(cache: &'a QueryCache<E>, label: impl Into<String>, scopes: &[QueryScope]) -> Self {
        Self {
            cache,
            label: label.into(),
            patch_scopes: scopes.to_vec(),
            settle_scopes: scopes.to_vec(),
        }
    }

    pub fn settle_on(mut self, scopes: &[QueryScope]) -> Self {
        self.settle_scopes = scopes.to_vec();
        self
    }

    /// Applies `op`, awaits `durable`, rolls back on failure, then settles.
    pub async fn run<Op, Fut, T, Er>(self, op: Op, durable: Fut) -> Result<T, Er>
    where
        Op: FnMut(&QueryKey, &mut CacheEntry<E>) -> bool,
        Fut: Future<Output = Result<T, Er>>,
        Er: Display,
    {
        self.run_then(op, durable, |_, _| {}).await
    }

    /// Like [`run`](OptimisticMutation::run), with `reconcile` applied to the
    /// cache after a successful write and before settling.
    pub async fn run_then<Op, Fut, T, Er, R>(
        self,
        op: Op,
        durable: Fut,
        reconcile: R,
    ) -> Result<T, Er>
    where
        Op: FnMut(&QueryKey, &mut CacheEntry<E>) -> bool,
        Fut: Future<Output = Result<T, Er>>,
        Er: Display,
        R: FnOnce(&QueryCache<E>, &T),
    {
        let snapshot = apply(self.cache, &self.patch_scopes, op);
        log::debug!(
            "{}: optimistically patched {} views",
            self.label,
            snapshot.len()
        );

        let result = durable.await;
        match &result {
            Ok(value) => reconcile(self.cache, value),
            Err(e) => {
                log::warn!("{} failed, rolling back: {}", self.label, e);
                snapshot.restore(self.cache);
            }
        }

        settle(self.cache, &self.settle_scopes);
        result
    }
}
