//! Job repository: CRUD operations for the `scrape_jobs` table.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::model::{Job, JobStage, JobStatus};

const TABLE: &str = "scrape_jobs";

/// A raw job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub owner_id: String,
    pub category: String,
    pub locality: String,
    pub target_count: u32,
    pub expand_radius: bool,
    pub status: String,
    pub stage: Option<String>,
    pub progress: Option<u8>,
    pub stage_message: Option<String>,
    pub leads_found: Option<u32>,
    pub leads_imported: Option<u32>,
    pub leads_skipped: Option<u32>,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            owner_id: row.get("owner_id")?,
            category: row.get("category")?,
            locality: row.get("locality")?,
            target_count: row.get("target_count")?,
            expand_radius: row.get("expand_radius")?,
            status: row.get("status")?,
            stage: row.get("stage")?,
            progress: row.get("progress")?,
            stage_message: row.get("stage_message")?,
            leads_found: row.get("leads_found")?,
            leads_imported: row.get("leads_imported")?,
            leads_skipped: row.get("leads_skipped")?,
            error_message: row.get("error_message")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
        })
    }

    pub fn from_job(job: &Job, updated_at: DateTime<Utc>) -> Self {
        Self {
            id: job.id.clone(),
            owner_id: job.owner_id.clone(),
            category: job.category.clone(),
            locality: job.locality.clone(),
            target_count: job.target_count,
            expand_radius: job.expand_radius,
            status: job.status.as_str().to_string(),
            stage: job.stage.map(|s| s.as_str().to_string()),
            progress: job.progress,
            stage_message: job.stage_message.clone(),
            leads_found: job.leads_found,
            leads_imported: job.leads_imported,
            leads_skipped: job.leads_skipped,
            error_message: job.error_message.clone(),
            created_at: format_timestamp(job.created_at),
            updated_at: format_timestamp(updated_at),
            started_at: job.started_at.map(format_timestamp),
            completed_at: job.completed_at.map(format_timestamp),
        }
    }

    pub fn to_job(&self) -> Result<Job, DatabaseError> {
        let status = self
            .status
            .parse::<JobStatus>()
            .map_err(|reason| DatabaseError::CorruptRow {
                table: TABLE,
                id: self.id.clone(),
                reason,
            })?;
        let optional_ts = |value: &Option<String>| -> Result<Option<DateTime<Utc>>, DatabaseError> {
            value
                .as_deref()
                .map(|s| parse_timestamp(TABLE, &self.id, s))
                .transpose()
        };

        Ok(Job {
            id: self.id.clone(),
            owner_id: self.owner_id.clone(),
            category: self.category.clone(),
            locality: self.locality.clone(),
            target_count: self.target_count,
            expand_radius: self.expand_radius,
            status,
            stage: JobStage::parse(self.stage.as_deref(), &self.id),
            progress: self.progress,
            stage_message: self.stage_message.clone(),
            leads_found: self.leads_found,
            leads_imported: self.leads_imported,
            leads_skipped: self.leads_skipped,
            error_message: self.error_message.clone(),
            created_at: parse_timestamp(TABLE, &self.id, &self.created_at)?,
            started_at: optional_ts(&self.started_at)?,
            completed_at: optional_ts(&self.completed_at)?,
        })
    }
}

/// Query filter parameters for job listing.
#[derive(Debug, Default, Clone)]
pub struct JobRowFilter {
    pub owner_id: Option<String>,
    pub statuses: Vec<String>,
    pub started_before: Option<String>,
    pub created_before: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Outcome of a guarded update.
#[derive(Debug)]
pub enum GuardedUpdate {
    Updated(Job),
    /// The guard refused the write; carries the current row.
    Refused(Job),
    NotFound,
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO scrape_jobs (id, owner_id, category, locality, target_count,
             expand_radius, status, stage, progress, stage_message, leads_found,
             leads_imported, leads_skipped, error_message, created_at, updated_at,
             started_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            params![
                job.id,
                job.owner_id,
                job.category,
                job.locality,
                job.target_count,
                job.expand_radius,
                job.status,
                job.stage,
                job.progress,
                job.stage_message,
                job.leads_found,
                job.leads_imported,
                job.leads_skipped,
                job.error_message,
                job.created_at,
                job.updated_at,
                job.started_at,
                job.completed_at,
            ],
        )?;
        Ok(())
    })
}

fn write_row(conn: &Connection, job: &JobRow) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE scrape_jobs SET status=?2, stage=?3, progress=?4, stage_message=?5,
         leads_found=?6, leads_imported=?7, leads_skipped=?8, error_message=?9,
         updated_at=?10, started_at=?11, completed_at=?12
         WHERE id=?1",
        params![
            job.id,
            job.status,
            job.stage,
            job.progress,
            job.stage_message,
            job.leads_found,
            job.leads_imported,
            job.leads_skipped,
            job.error_message,
            job.updated_at,
            job.started_at,
            job.completed_at,
        ],
    )?;
    Ok(())
}

fn find_in(conn: &Connection, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM scrape_jobs WHERE id = ?1",
            params![id],
            JobRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| find_in(conn, id))
}

/// Reads, decides and writes under one connection lock.
///
/// `decide` receives the current job and returns the replacement to write,
/// or `None` to refuse.
pub fn update_guarded<F>(db: &Database, id: &str, decide: F) -> Result<GuardedUpdate, DatabaseError>
where
    F: FnOnce(&Job) -> Option<Job>,
{
    db.with_conn(|conn| {
        let current = match find_in(conn, id)? {
            Some(row) => row.to_job()?,
            None => return Ok(GuardedUpdate::NotFound),
        };
        match decide(&current) {
            Some(next) => {
                write_row(conn, &JobRow::from_job(&next, Utc::now()))?;
                Ok(GuardedUpdate::Updated(next))
            }
            None => Ok(GuardedUpdate::Refused(current)),
        }
    })
}

/// Deletes a job. Returns whether a row was removed.
pub fn delete(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let removed = conn.execute("DELETE FROM scrape_jobs WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    })
}

/// Queries jobs with filters, returning (rows, total_count).
pub fn query(db: &Database, filter: &JobRowFilter) -> Result<(Vec<JobRow>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ref owner_id) = filter.owner_id {
            conditions.push(format!("owner_id = ?{}", param_values.len() + 1));
            param_values.push(Box::new(owner_id.clone()));
        }
        if !filter.statuses.is_empty() {
            let mut placeholders = Vec::new();
            for status in &filter.statuses {
                placeholders.push(format!("?{}", param_values.len() + 1));
                param_values.push(Box::new(status.clone()));
            }
            conditions.push(format!("status IN ({})", placeholders.join(", ")));
        }
        if let Some(ref started_before) = filter.started_before {
            conditions.push(format!(
                "started_at IS NOT NULL AND started_at < ?{}",
                param_values.len() + 1
            ));
            param_values.push(Box::new(started_before.clone()));
        }
        if let Some(ref created_before) = filter.created_before {
            conditions.push(format!("created_at < ?{}", param_values.len() + 1));
            param_values.push(Box::new(created_before.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        // Count total matching rows.
        let count_sql = format!("SELECT COUNT(*) FROM scrape_jobs {}", where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        // Fetch paginated results; -1 means no limit in SQLite.
        let limit = filter.limit.map(|l| l as i64).unwrap_or(-1);
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT * FROM scrape_jobs {} ORDER BY created_at DESC LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<JobRow> = stmt
            .query_map(params_ref.as_slice(), JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}
