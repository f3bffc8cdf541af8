//! Settle-time invalidation.

use crate::cache::{CacheStore, Entity, QueryCache, QueryScope};
use crate::model::{Job, JobStatus, LeadPatch};

/// Marks every view in `scopes` stale so the next read refetches it.
pub fn settle<E: Entity>(cache: &QueryCache<E>, scopes: &[QueryScope]) -> usize {
    let marked = cache.invalidate(scopes);
    log::debug!("Settled {} views in {:?}", marked, scopes);
    marked
}

/// Invalidates every lead view once `job` is completed, since its worker
/// may have imported leads. Returns how many views were marked.
pub fn settle_completed_job(cache: &CacheStore, job: &Job) -> usize {
    if job.status != JobStatus::Completed {
        return 0;
    }
    let marked = settle(cache.leads(), &[QueryScope::Leads, QueryScope::TaskQueue]);
    log::debug!("Job {} completed, invalidated {} lead views", job.id, marked);
    marked
}

/// Scopes to invalidate after a lead write.
///
/// Lead lists always refetch. The task queue refetches only when the patch
/// touches a field the queue is derived from; `None` stands for deletion,
/// which always affects the queue.
pub fn lead_settle_scopes(patch: Option<&LeadPatch>) -> Vec<QueryScope> {
    match patch {
        Some(patch) if !patch.touches_task_queue() => vec![QueryScope::Leads],
        _ => vec![QueryScope::Leads, QueryScope::TaskQueue],
    }
}
