//! Optimistic bulk writes on leads.
//!
//! Every call patches all live lead views (lists, pages and the task queue)
//! at once, so a failed write restores all of them together.

use std::collections::HashSet;
use std::sync::Arc;

use crate::cache::{CacheStore, QueryScope};
use crate::error::Result;
use crate::gateway::LeadGateway;
use crate::model::{Lead, LeadPatch};
use crate::sync::invalidation::lead_settle_scopes;
use crate::sync::OptimisticMutation;

const LEAD_SCOPES: &[QueryScope] = &[QueryScope::Leads, QueryScope::TaskQueue];

pub struct BulkLeadMutator {
    cache: Arc<CacheStore>,
    leads: Arc<dyn LeadGateway>,
}

impl BulkLeadMutator {
    pub fn new(cache: Arc<CacheStore>, leads: Arc<dyn LeadGateway>) -> Self {
        Self { cache, leads }
    }

    /// Applies one patch to every lead in `ids`.
    ///
    /// The patch is normalized first, so a terminal status also clears the
    /// next task date. Empty `ids` or an empty patch write nothing.
    pub async fn bulk_update(&self, ids: &[String], patch: &LeadPatch) -> Result<Vec<Lead>> {
        if ids.is_empty() || patch.is_empty() {
            return Ok(Vec::new());
        }

        let patch = patch.normalized();
        let targets: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let settle_scopes = lead_settle_scopes(Some(&patch));

        let updated = OptimisticMutation::new(self.cache.leads(), "bulk update leads", LEAD_SCOPES)
            .settle_on(&settle_scopes)
            .run(
                |_, entry| {
                    entry.patch_where(
                        |lead| targets.contains(lead.id.as_str()),
                        |lead| patch.apply_to(lead),
                    ) > 0
                },
                self.leads.update_leads(ids, &patch),
            )
            .await?;

        log::info!(
            "Updated {} leads ({:?})",
            updated.len(),
            patch.touched_fields()
        );
        Ok(updated)
    }

    /// Assigns a strategy to every lead in `ids`, or clears it with `None`.
    ///
    /// Either way the sequence restarts: step index 0, no next task date.
    pub async fn bulk_assign_strategy(
        &self,
        ids: &[String],
        strategy_id: Option<&str>,
    ) -> Result<Vec<Lead>> {
        self.bulk_update(ids, &LeadPatch::assign_strategy(strategy_id))
            .await
    }

    /// Deletes every lead in `ids` from the store and from all views.
    pub async fn bulk_delete(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let targets: HashSet<&str> = ids.iter().map(String::as_str).collect();
        OptimisticMutation::new(self.cache.leads(), "bulk delete leads", LEAD_SCOPES)
            .settle_on(&lead_settle_scopes(None))
            .run(
                |_, entry| entry.remove_where(|lead| targets.contains(lead.id.as_str())) > 0,
                self.leads.delete_leads(ids),
            )
            .await?;

        log::info!("Deleted {} leads", ids.len());
        Ok(())
    }
}
