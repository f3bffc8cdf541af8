//! Entities tracked by the cache: scrape jobs and leads.

pub mod job;
pub mod lead;

pub use job::{
    Job, JobParams, JobPatch, JobStage, JobStatus, NewJob, MAX_TARGET_COUNT, PLACEHOLDER_PREFIX,
};
pub use lead::{Lead, LeadField, LeadPatch, LeadStatus, NewLead, TASK_FIELDS};
