//! Lead repository: CRUD and bulk operations for the `leads` table.

use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::cache::LeadQuery;
use crate::model::{Lead, LeadPatch, LeadStatus};

const TABLE: &str = "leads";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// A raw lead row from the database.
#[derive(Debug, Clone)]
pub struct LeadRow {
    pub id: String,
    pub owner_id: String,
    pub business_name: String,
    pub email: Option<String>,
    pub status: String,
    pub next_task_date: Option<String>,
    pub strategy_id: Option<String>,
    pub current_step_index: u32,
    pub notes: Option<String>,
    pub source_job_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl LeadRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            owner_id: row.get("owner_id")?,
            business_name: row.get("business_name")?,
            email: row.get("email")?,
            status: row.get("status")?,
            next_task_date: row.get("next_task_date")?,
            strategy_id: row.get("strategy_id")?,
            current_step_index: row.get("current_step_index")?,
            notes: row.get("notes")?,
            source_job_id: row.get("source_job_id")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    pub fn from_lead(lead: &Lead) -> Self {
        Self {
            id: lead.id.clone(),
            owner_id: lead.owner_id.clone(),
            business_name: lead.business_name.clone(),
            email: lead.email.clone(),
            status: lead.status.as_str().to_string(),
            next_task_date: lead
                .next_task_date
                .map(|d| d.format(DATE_FORMAT).to_string()),
            strategy_id: lead.strategy_id.clone(),
            current_step_index: lead.current_step_index,
            notes: lead.notes.clone(),
            source_job_id: lead.source_job_id.clone(),
            created_at: format_timestamp(lead.created_at),
            updated_at: format_timestamp(Utc::now()),
        }
    }

    pub fn to_lead(&self) -> Result<Lead, DatabaseError> {
        let corrupt = |reason: String| DatabaseError::CorruptRow {
            table: TABLE,
            id: self.id.clone(),
            reason,
        };
        let status = self.status.parse::<LeadStatus>().map_err(corrupt)?;
        let next_task_date = self
            .next_task_date
            .as_deref()
            .map(|s| {
                NaiveDate::parse_from_str(s, DATE_FORMAT)
                    .map_err(|e| corrupt(format!("bad next_task_date '{}': {}", s, e)))
            })
            .transpose()?;

        Ok(Lead {
            id: self.id.clone(),
            owner_id: self.owner_id.clone(),
            business_name: self.business_name.clone(),
            email: self.email.clone(),
            status,
            next_task_date,
            strategy_id: self.strategy_id.clone(),
            current_step_index: self.current_step_index,
            notes: self.notes.clone(),
            source_job_id: self.source_job_id.clone(),
            created_at: parse_timestamp(TABLE, &self.id, &self.created_at)?,
        })
    }
}

/// Inserts a new lead row.
pub fn insert(db: &Database, lead: &LeadRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO leads (id, owner_id, business_name, email, status, next_task_date,
             strategy_id, current_step_index, notes, source_job_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                lead.id,
                lead.owner_id,
                lead.business_name,
                lead.email,
                lead.status,
                lead.next_task_date,
                lead.strategy_id,
                lead.current_step_index,
                lead.notes,
                lead.source_job_id,
                lead.created_at,
                lead.updated_at,
            ],
        )?;
        Ok(())
    })
}

fn find_in(conn: &Connection, id: &str) -> Result<Option<LeadRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM leads WHERE id = ?1",
            params![id],
            LeadRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Finds a lead by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<LeadRow>, DatabaseError> {
    db.with_conn(|conn| find_in(conn, id))
}

/// Applies one patch to every listed lead in a single transaction.
///
/// The patch is normalized first. Unknown ids are skipped; the updated
/// leads are returned.
pub fn update_many(
    db: &Database,
    ids: &[String],
    patch: &LeadPatch,
) -> Result<Vec<Lead>, DatabaseError> {
    let patch = patch.normalized();
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        let mut updated = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(row) = find_in(&tx, id)? else {
                log::debug!("Lead {} not found during bulk update", id);
                continue;
            };
            let mut lead = row.to_lead()?;
            patch.apply_to(&mut lead);
            let row = LeadRow::from_lead(&lead);
            tx.execute(
                "UPDATE leads SET status=?2, next_task_date=?3, strategy_id=?4,
                 current_step_index=?5, notes=?6, updated_at=?7 WHERE id=?1",
                params![
                    row.id,
                    row.status,
                    row.next_task_date,
                    row.strategy_id,
                    row.current_step_index,
                    row.notes,
                    row.updated_at,
                ],
            )?;
            updated.push(lead);
        }
        tx.commit()?;
        Ok(updated)
    })
}

/// Deletes every listed lead. Returns the number of rows removed.
pub fn delete_many(db: &Database, ids: &[String]) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        let mut removed = 0;
        for id in ids {
            removed += tx.execute("DELETE FROM leads WHERE id = ?1", params![id])?;
        }
        tx.commit()?;
        Ok(removed)
    })
}

/// Queries leads for a list view, returning (rows, total_count).
pub fn query(db: &Database, query: &LeadQuery) -> Result<(Vec<LeadRow>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = vec!["owner_id = ?1".to_string()];
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> =
            vec![Box::new(query.owner_id.clone())];

        if let Some(status) = query.status {
            conditions.push(format!("status = ?{}", param_values.len() + 1));
            param_values.push(Box::new(status.as_str().to_string()));
        }
        if let Some(ref strategy_id) = query.strategy_id {
            conditions.push(format!("strategy_id = ?{}", param_values.len() + 1));
            param_values.push(Box::new(strategy_id.clone()));
        }

        let where_clause = format!("WHERE {}", conditions.join(" AND "));

        let count_sql = format!("SELECT COUNT(*) FROM leads {}", where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        let (limit, offset) = match query.page {
            Some(page) => (page.limit() as i64, page.offset() as i64),
            None => (-1, 0),
        };
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT * FROM leads {} ORDER BY created_at DESC, id ASC LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<LeadRow> = stmt
            .query_map(params_ref.as_slice(), LeadRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

/// Leads of `owner_id` with a scheduled next task, earliest first.
pub fn task_queue(db: &Database, owner_id: &str) -> Result<Vec<LeadRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM leads WHERE owner_id = ?1 AND next_task_date IS NOT NULL
             ORDER BY next_task_date ASC, id ASC",
        )?;
        let rows = stmt
            .query_map(params![owner_id], LeadRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::PageRequest;
    use crate::model::lead::tests::sample_lead;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn seed(db: &Database, ids: &[&str]) {
        for id in ids {
            insert(db, &LeadRow::from_lead(&sample_lead(id))).unwrap();
        }
    }

    #[test]
    fn test_insert_and_find() {
        let db = test_db();
        let lead = sample_lead("l1");
        insert(&db, &LeadRow::from_lead(&lead)).unwrap();

        let found = find_by_id(&db, "l1").unwrap().unwrap().to_lead().unwrap();
        assert_eq!(found, lead);
    }

    #[test]
    fn test_update_many_normalizes() {
        let db = test_db();
        seed(&db, &["a", "b"]);

        let ids = vec!["a".to_string(), "b".to_string(), "ghost".to_string()];
        let updated = update_many(&db, &ids, &LeadPatch::assign_strategy(None)).unwrap();
        assert_eq!(updated.len(), 2);

        let lead = find_by_id(&db, "b").unwrap().unwrap().to_lead().unwrap();
        assert_eq!(lead.strategy_id, None);
        assert_eq!(lead.current_step_index, 0);
        assert_eq!(lead.next_task_date, None);
    }

    #[test]
    fn test_delete_many() {
        let db = test_db();
        seed(&db, &["a", "b", "c"]);
        let removed = delete_many(&db, &["a".to_string(), "c".to_string()]).unwrap();
        assert_eq!(removed, 2);
        assert!(find_by_id(&db, "b").unwrap().is_some());
    }

    #[test]
    fn test_query_paged_with_count() {
        let db = test_db();
        seed(&db, &["a", "b", "c"]);

        let (rows, total) =
            query(&db, &LeadQuery::paged("owner-1", PageRequest::new(2, 2))).unwrap();
        assert_eq!(total, 3);
        assert_eq!(rows.len(), 1);

        let (rows, total) =
            query(&db, &LeadQuery::all("owner-1").with_status(LeadStatus::New)).unwrap();
        assert_eq!(total, 0);
        assert!(rows.is_empty());
    }

    #[test]
    fn test_task_queue_orders_by_due_date() {
        let db = test_db();
        let mut late = sample_lead("late");
        late.next_task_date = NaiveDate::from_ymd_opt(2024, 3, 1);
        let early = sample_lead("early");
        let mut idle = sample_lead("idle");
        idle.next_task_date = None;
        for lead in [&late, &early, &idle] {
            insert(&db, &LeadRow::from_lead(lead)).unwrap();
        }

        let rows = task_queue(&db, "owner-1").unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["early", "late"]);
    }
}
