//! Corrective job writes waiting for a retry.
//!
//! When the trigger fails and the follow-up `failed` write fails too, the
//! store still holds the job as `pending`. The write is parked here and the
//! timeout reconciler replays it until the store accepts or settles it.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::model::JobPatch;

#[derive(Default)]
pub struct PendingCorrections {
    writes: Mutex<HashMap<String, JobPatch>>,
}

impl PendingCorrections {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, JobPatch>> {
        match self.writes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Corrections lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Parks `patch` for `job_id`, replacing an earlier one.
    pub fn push(&self, job_id: &str, patch: JobPatch) {
        self.lock().insert(job_id.to_string(), patch);
    }

    /// Copies of every parked write.
    pub fn snapshot(&self) -> Vec<(String, JobPatch)> {
        self.lock()
            .iter()
            .map(|(id, patch)| (id.clone(), patch.clone()))
            .collect()
    }

    /// Drops the parked write for `job_id`. Returns whether one existed.
    pub fn resolve(&self, job_id: &str) -> bool {
        self.lock().remove(job_id).is_some()
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.lock().contains_key(job_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_push_replaces_and_resolve_clears() {
        let corrections = PendingCorrections::new();
        corrections.push("j1", JobPatch::failed("first", Utc::now()));
        corrections.push("j1", JobPatch::failed("second", Utc::now()));
        assert_eq!(corrections.len(), 1);
        assert_eq!(
            corrections.snapshot()[0].1.error_message.as_deref(),
            Some("second")
        );

        assert!(corrections.resolve("j1"));
        assert!(!corrections.resolve("j1"));
        assert!(corrections.is_empty());
    }
}
