//! Lead records and the field rules applied to every write.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Outreach status of a lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    New,
    Contacted,
    InProgress,
    Replied,
    Qualified,
    Converted,
    Lost,
    DoNotContact,
}

impl LeadStatus {
    /// Terminal statuses end the outreach sequence; no further tasks apply.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LeadStatus::Converted | LeadStatus::Lost | LeadStatus::DoNotContact
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::New => "new",
            LeadStatus::Contacted => "contacted",
            LeadStatus::InProgress => "in_progress",
            LeadStatus::Replied => "replied",
            LeadStatus::Qualified => "qualified",
            LeadStatus::Converted => "converted",
            LeadStatus::Lost => "lost",
            LeadStatus::DoNotContact => "do_not_contact",
        }
    }
}

impl std::fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LeadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(LeadStatus::New),
            "contacted" => Ok(LeadStatus::Contacted),
            "in_progress" => Ok(LeadStatus::InProgress),
            "replied" => Ok(LeadStatus::Replied),
            "qualified" => Ok(LeadStatus::Qualified),
            "converted" => Ok(LeadStatus::Converted),
            "lost" => Ok(LeadStatus::Lost),
            "do_not_contact" => Ok(LeadStatus::DoNotContact),
            _ => Err(format!("Invalid lead status: {}", s)),
        }
    }
}

/// A sales lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub id: String,
    pub owner_id: String,
    pub business_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub status: LeadStatus,
    pub next_task_date: Option<NaiveDate>,
    pub strategy_id: Option<String>,
    pub current_step_index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Job that imported this lead, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_job_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Create request for a lead.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLead {
    pub owner_id: String,
    pub business_name: String,
    pub email: Option<String>,
    pub status: LeadStatus,
    pub next_task_date: Option<NaiveDate>,
    pub strategy_id: Option<String>,
    pub current_step_index: u32,
    pub source_job_id: Option<String>,
}

impl NewLead {
    pub fn new(owner_id: &str, business_name: &str) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            business_name: business_name.to_string(),
            email: None,
            status: LeadStatus::New,
            next_task_date: None,
            strategy_id: None,
            current_step_index: 0,
            source_job_id: None,
        }
    }
}

/// Lead fields a patch can touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeadField {
    Status,
    NextTaskDate,
    StrategyId,
    CurrentStepIndex,
    Notes,
}

/// Fields the task queue view is derived from.
pub const TASK_FIELDS: [LeadField; 4] = [
    LeadField::Status,
    LeadField::NextTaskDate,
    LeadField::StrategyId,
    LeadField::CurrentStepIndex,
];

/// Partial update of one or many leads.
///
/// Nullable columns use `Option<Option<T>>`: the outer `None` leaves the
/// column alone, `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeadPatch {
    pub status: Option<LeadStatus>,
    pub next_task_date: Option<Option<NaiveDate>>,
    pub strategy_id: Option<Option<String>>,
    pub current_step_index: Option<u32>,
    pub notes: Option<Option<String>>,
}

impl LeadPatch {
    pub fn status(status: LeadStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Assigns (or with `None`, clears) an outreach strategy.
    pub fn assign_strategy(strategy_id: Option<&str>) -> Self {
        Self {
            strategy_id: Some(strategy_id.map(str::to_string)),
            ..Default::default()
        }
    }

    pub fn notes(notes: Option<&str>) -> Self {
        Self {
            notes: Some(notes.map(str::to_string)),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.touched_fields().is_empty()
    }

    /// Returns the patch with the dependent-field rules folded in:
    /// a terminal status clears `next_task_date`, and any strategy change
    /// resets the step index and clears `next_task_date`.
    pub fn normalized(&self) -> Self {
        let mut patch = self.clone();
        if patch.status.is_some_and(|s| s.is_terminal()) {
            patch.next_task_date = Some(None);
        }
        if patch.strategy_id.is_some() {
            patch.current_step_index = Some(0);
            patch.next_task_date = Some(None);
        }
        patch
    }

    pub fn touched_fields(&self) -> Vec<LeadField> {
        let mut fields = Vec::new();
        if self.status.is_some() {
            fields.push(LeadField::Status);
        }
        if self.next_task_date.is_some() {
            fields.push(LeadField::NextTaskDate);
        }
        if self.strategy_id.is_some() {
            fields.push(LeadField::StrategyId);
        }
        if self.current_step_index.is_some() {
            fields.push(LeadField::CurrentStepIndex);
        }
        if self.notes.is_some() {
            fields.push(LeadField::Notes);
        }
        fields
    }

    /// True when the patch changes anything the task queue depends on.
    pub fn touches_task_queue(&self) -> bool {
        self.touched_fields()
            .iter()
            .any(|field| TASK_FIELDS.contains(field))
    }

    /// Applies the patch as given. Callers normalize first.
    pub fn apply_to(&self, lead: &mut Lead) {
        if let Some(status) = self.status {
            lead.status = status;
        }
        if let Some(date) = self.next_task_date {
            lead.next_task_date = date;
        }
        if let Some(ref strategy) = self.strategy_id {
            lead.strategy_id = strategy.clone();
        }
        if let Some(step) = self.current_step_index {
            lead.current_step_index = step;
        }
        if let Some(ref notes) = self.notes {
            lead.notes = notes.clone();
        }
    }
}
