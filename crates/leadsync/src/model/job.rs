//! Scrape job model and lifecycle rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix of locally generated placeholder identities.
pub const PLACEHOLDER_PREFIX: &str = "optimistic-";

/// Lifecycle status of a job.
///
/// Transitions only move forward: pending → processing → completed | failed.
/// A pending job may also be forced straight to failed (cancellation, trigger
/// failure, pending deadline).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Returns true for statuses no further transition may leave.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Processing => 1,
            JobStatus::Completed | JobStatus::Failed => 2,
        }
    }

    /// Whether a job currently in `self` may move to `next`.
    ///
    /// Staying in a non-terminal status is allowed (progress updates).
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        !self.is_terminal() && next.rank() >= self.rank()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

/// Stage reported by the scraping worker while processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Scraping,
    Enriching,
    Finalizing,
}

impl JobStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStage::Scraping => "scraping",
            JobStage::Enriching => "enriching",
            JobStage::Finalizing => "finalizing",
        }
    }

    /// Parses a stored stage string. Unknown values degrade to `None`.
    pub fn parse(s: Option<&str>, job_id: &str) -> Option<Self> {
        match s {
            None => None,
            Some("scraping") => Some(JobStage::Scraping),
            Some("enriching") => Some(JobStage::Enriching),
            Some("finalizing") => Some(JobStage::Finalizing),
            Some(other) => {
                log::warn!("Unknown stage '{}' for job {}, ignoring", other, job_id);
                None
            }
        }
    }
}

impl std::fmt::Display for JobStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStage::Scraping => write!(f, "Scraping"),
            JobStage::Enriching => write!(f, "Enriching"),
            JobStage::Finalizing => write!(f, "Finalizing"),
        }
    }
}

/// Parameters of a scrape request as entered by the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobParams {
    /// Business category to search for (e.g. "architects").
    pub category: String,
    /// Locality to search in (e.g. "austin").
    pub locality: String,
    /// Number of leads the worker should aim for.
    pub target_count: u32,
    /// Whether the worker may widen the search radius.
    pub expand_radius: bool,
}

/// Upper bound on `target_count` accepted by the worker.
pub const MAX_TARGET_COUNT: u32 = 500;

impl JobParams {
    pub fn new(category: &str, locality: &str, target_count: u32) -> Self {
        Self {
            category: category.to_string(),
            locality: locality.to_string(),
            target_count,
            expand_radius: true,
        }
    }

    /// Checks the parameters before anything is written.
    pub fn validate(&self) -> Result<(), String> {
        if self.category.trim().is_empty() {
            return Err("category must not be empty".to_string());
        }
        if self.locality.trim().is_empty() {
            return Err("locality must not be empty".to_string());
        }
        if self.target_count == 0 || self.target_count > MAX_TARGET_COUNT {
            return Err(format!(
                "target count must be between 1 and {}, got {}",
                MAX_TARGET_COUNT, self.target_count
            ));
        }
        Ok(())
    }

    /// Case- and whitespace-insensitive identity used for duplicate detection.
    pub fn duplicate_key(&self) -> (String, String) {
        duplicate_key(&self.category, &self.locality)
    }
}

fn duplicate_key(category: &str, locality: &str) -> (String, String) {
    (
        category.trim().to_lowercase(),
        locality.trim().to_lowercase(),
    )
}

/// Create request sent to the store. Carries no identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub owner_id: String,
    pub params: JobParams,
}

/// A tracked scrape job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Store-assigned identity (or a placeholder while a create is in flight).
    pub id: String,
    /// Owning user.
    pub owner_id: String,
    pub category: String,
    pub locality: String,
    pub target_count: u32,
    pub expand_radius: bool,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<JobStage>,
    /// Percentage within the current stage, 0-100.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leads_found: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leads_imported: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leads_skipped: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Builds the optimistic placeholder shown while a create is in flight.
    pub fn placeholder(new_job: &NewJob, now: DateTime<Utc>) -> Self {
        Self {
            id: format!("{}{}", PLACEHOLDER_PREFIX, uuid::Uuid::new_v4()),
            owner_id: new_job.owner_id.clone(),
            category: new_job.params.category.clone(),
            locality: new_job.params.locality.clone(),
            target_count: new_job.params.target_count,
            expand_radius: new_job.params.expand_radius,
            status: JobStatus::Pending,
            stage: None,
            progress: None,
            stage_message: None,
            leads_found: None,
            leads_imported: None,
            leads_skipped: None,
            error_message: None,
            created_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_placeholder(&self) -> bool {
        self.id.starts_with(PLACEHOLDER_PREFIX)
    }

    /// True when this job was requested with the same category and locality.
    pub fn matches_intent(&self, params: &JobParams) -> bool {
        duplicate_key(&self.category, &self.locality) == params.duplicate_key()
    }

    /// Whether `incoming` may replace this cached copy.
    ///
    /// A regression in status is refused, and a terminal job may only be
    /// replaced by a copy carrying the same terminal status.
    pub fn accepts_replacement(&self, incoming: &Job) -> bool {
        if self.status.is_terminal() {
            return incoming.status == self.status;
        }
        self.status.can_transition_to(incoming.status)
    }
}

/// Partial update of a job. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub stage: Option<JobStage>,
    pub progress: Option<u8>,
    pub stage_message: Option<String>,
    pub leads_found: Option<u32>,
    pub leads_imported: Option<u32>,
    pub leads_skipped: Option<u32>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobPatch {
    /// Forced terminal write used by cancellation, trigger failure and the
    /// timeout reconciler.
    pub fn failed(message: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            error_message: Some(message.into()),
            completed_at: Some(now),
            ..Default::default()
        }
    }

    /// Worker progress report.
    pub fn progress(stage: JobStage, progress: u8, message: &str) -> Self {
        Self {
            status: Some(JobStatus::Processing),
            stage: Some(stage),
            progress: Some(progress.min(100)),
            stage_message: Some(message.to_string()),
            ..Default::default()
        }
    }

    /// Worker completion report.
    pub fn completed(found: u32, imported: u32, skipped: u32) -> Self {
        Self {
            status: Some(JobStatus::Completed),
            progress: Some(100),
            leads_found: Some(found),
            leads_imported: Some(imported),
            leads_skipped: Some(skipped),
            ..Default::default()
        }
    }

    /// Applies the patch, stamping `started_at` / `completed_at` where the
    /// lifecycle requires them.
    pub fn apply_to(&self, job: &mut Job, now: DateTime<Utc>) {
        if let Some(status) = self.status {
            job.status = status;
        }
        if self.stage.is_some() {
            job.stage = self.stage;
        }
        if self.progress.is_some() {
            job.progress = self.progress;
        }
        if let Some(ref message) = self.stage_message {
            job.stage_message = Some(message.clone());
        }
        if self.leads_found.is_some() {
            job.leads_found = self.leads_found;
        }
        if self.leads_imported.is_some() {
            job.leads_imported = self.leads_imported;
        }
        if self.leads_skipped.is_some() {
            job.leads_skipped = self.leads_skipped;
        }
        if let Some(ref error) = self.error_message {
            job.error_message = Some(error.clone());
        }
        if self.started_at.is_some() {
            job.started_at = self.started_at;
        }
        if self.completed_at.is_some() {
            job.completed_at = self.completed_at;
        }

        if job.status == JobStatus::Processing && job.started_at.is_none() {
            job.started_at = Some(now);
        }
        if job.status.is_terminal() {
            if job.completed_at.is_none() {
                job.completed_at = Some(now);
            }
        } else {
            job.completed_at = None;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_job(id: &str, status: JobStatus) -> Job {
        let now = Utc::now();
        let new_job = NewJob {
            owner_id: "owner-1".to_string(),
            params: JobParams::new("Architects", "Austin", 50),
        };
        let mut job = Job::placeholder(&new_job, now);
        job.id = id.to_string();
        job.status = status;
        if status != JobStatus::Pending {
            job.started_at = Some(now);
        }
        if status.is_terminal() {
            job.completed_at = Some(now);
        }
        job
    }

    #[test]
    fn test_status_transitions_are_monotonic() {
        use JobStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Pending.can_transition_to(Failed));
        assert!(Processing.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(!Processing.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Failed));
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("running".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_unknown_stage_is_ignored() {
        assert_eq!(JobStage::parse(Some("enriching"), "j"), Some(JobStage::Enriching));
        assert_eq!(JobStage::parse(Some("teleporting"), "j"), None);
        assert_eq!(JobStage::parse(None, "j"), None);
    }

    #[test]
    fn test_params_validation() {
        assert!(JobParams::new("architects", "austin", 50).validate().is_ok());
        assert!(JobParams::new("  ", "austin", 50).validate().is_err());
        assert!(JobParams::new("architects", "", 50).validate().is_err());
        assert!(JobParams::new("architects", "austin", 0).validate().is_err());
        assert!(JobParams::new("architects", "austin", MAX_TARGET_COUNT + 1)
            .validate()
            .is_err());
    }

    #[test]
    fn test_intent_match_ignores_case_and_padding() {
        let job = sample_job("j1", JobStatus::Completed);
        assert!(job.matches_intent(&JobParams::new(" ARCHITECTS", "austin ", 10)));
        assert!(!job.matches_intent(&JobParams::new("architects", "dallas", 10)));
    }

    #[test]
    fn test_placeholder_identity() {
        let new_job = NewJob {
            owner_id: "o".to_string(),
            params: JobParams::new("a", "b", 1),
        };
        let job = Job::placeholder(&new_job, Utc::now());
        assert!(job.is_placeholder());
        assert_eq!(job.status, JobStatus::Pending);
        assert!(!sample_job("real-id", JobStatus::Pending).is_placeholder());
    }

    #[test]
    fn test_terminal_job_refuses_regression() {
        let cached = sample_job("j1", JobStatus::Completed);
        let stale = sample_job("j1", JobStatus::Processing);
        let other_terminal = sample_job("j1", JobStatus::Failed);
        let same = sample_job("j1", JobStatus::Completed);

        assert!(!cached.accepts_replacement(&stale));
        assert!(!cached.accepts_replacement(&other_terminal));
        assert!(cached.accepts_replacement(&same));

        let processing = sample_job("j1", JobStatus::Processing);
        assert!(!processing.accepts_replacement(&sample_job("j1", JobStatus::Pending)));
        assert!(processing.accepts_replacement(&other_terminal));
    }

    #[test]
    fn test_patch_stamps_lifecycle_timestamps() {
        let now = Utc::now();
        let mut job = sample_job("j1", JobStatus::Pending);

        JobPatch::progress(JobStage::Scraping, 10, "Searching").apply_to(&mut job, now);
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.started_at, Some(now));
        assert!(job.completed_at.is_none());

        JobPatch::completed(40, 35, 5).apply_to(&mut job, now);
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.completed_at, Some(now));
        assert_eq!(job.leads_imported, Some(35));
    }

    #[test]
    fn test_failed_patch_carries_message() {
        let now = Utc::now();
        let mut job = sample_job("j1", JobStatus::Processing);
        JobPatch::failed("Job timed out", now).apply_to(&mut job, now);
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("Job timed out"));
        assert_eq!(job.completed_at, Some(now));
    }

    #[test]
    fn test_progress_is_clamped() {
        let patch = JobPatch::progress(JobStage::Enriching, 250, "x");
        assert_eq!(patch.progress, Some(100));
    }
}
