//! Query keys identifying cached views.

use serde::{Deserialize, Serialize};

use crate::model::LeadStatus;

/// Page request for paginated views. Pages are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl PageRequest {
    pub fn new(page: u32, per_page: u32) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.max(1),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.per_page)
    }

    pub fn limit(&self) -> u64 {
        u64::from(self.per_page)
    }
}

/// Filter and pagination of a lead list view.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct LeadQuery {
    pub owner_id: String,
    pub status: Option<LeadStatus>,
    pub strategy_id: Option<String>,
    /// `None` materializes as a flat collection, `Some` as a page envelope.
    pub page: Option<PageRequest>,
}

impl LeadQuery {
    pub fn all(owner_id: &str) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            ..Default::default()
        }
    }

    pub fn paged(owner_id: &str, page: PageRequest) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            page: Some(page),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: LeadStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// Identifies one cached view.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKey {
    /// The owner's full job list.
    Jobs { owner_id: String },
    /// A lead list view.
    Leads(LeadQuery),
    /// Leads with a scheduled next task, ordered by due date.
    TaskQueue { owner_id: String },
}

/// Coarse grouping of keys used for invalidation and optimistic patches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryScope {
    Jobs,
    Leads,
    TaskQueue,
}

impl QueryKey {
    pub fn jobs(owner_id: &str) -> Self {
        QueryKey::Jobs {
            owner_id: owner_id.to_string(),
        }
    }

    pub fn task_queue(owner_id: &str) -> Self {
        QueryKey::TaskQueue {
            owner_id: owner_id.to_string(),
        }
    }

    pub fn scope(&self) -> QueryScope {
        match self {
            QueryKey::Jobs { .. } => QueryScope::Jobs,
            QueryKey::Leads(_) => QueryScope::Leads,
            QueryKey::TaskQueue { .. } => QueryScope::TaskQueue,
        }
    }

    pub fn owner_id(&self) -> &str {
        match self {
            QueryKey::Jobs { owner_id } | QueryKey::TaskQueue { owner_id } => owner_id,
            QueryKey::Leads(query) => &query.owner_id,
        }
    }
}

impl std::fmt::Display for QueryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryKey::Jobs { owner_id } => write!(f, "jobs[{}]", owner_id),
            QueryKey::TaskQueue { owner_id } => write!(f, "tasks[{}]", owner_id),
            QueryKey::Leads(query) => {
                write!(f, "leads[{}", query.owner_id)?;
                if let Some(status) = query.status {
                    write!(f, ",status={}", status)?;
                }
                if let Some(ref strategy) = query.strategy_id {
                    write!(f, ",strategy={}", strategy)?;
                }
                if let Some(page) = query.page {
                    write!(f, ",page={}x{}", page.page, page.per_page)?;
                }
                write!(f, "]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_offsets() {
        let page = PageRequest::new(3, 25);
        assert_eq!(page.offset(), 50);
        assert_eq!(page.limit(), 25);
        assert_eq!(PageRequest::new(0, 0), PageRequest::new(1, 1));
    }

    #[test]
    fn test_key_scopes() {
        assert_eq!(QueryKey::jobs("o").scope(), QueryScope::Jobs);
        assert_eq!(QueryKey::task_queue("o").scope(), QueryScope::TaskQueue);
        assert_eq!(
            QueryKey::Leads(LeadQuery::all("o")).scope(),
            QueryScope::Leads
        );
    }

    #[test]
    fn test_key_display() {
        let key = QueryKey::Leads(
            LeadQuery::paged("o", PageRequest::new(2, 10)).with_status(LeadStatus::New),
        );
        assert_eq!(key.to_string(), "leads[o,status=new,page=2x10]");
        assert_eq!(QueryKey::jobs("o").to_string(), "jobs[o]");
    }
}
