//! Engine construction, fixtures and seeding helpers.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use leadsync::cache::QueryKey;
use leadsync::db::job_repo::{self, JobRow};
use leadsync::db::lead_repo::{self, LeadRow};
use leadsync::gateway::{JobChangeFeed, JobGateway, LeadGateway, ScrapeTrigger, SqliteBackend};
use leadsync::model::{Job, JobParams, JobStatus, Lead, LeadStatus, NewJob};
use leadsync::{SyncConfig, SyncEngine};

pub const OWNER: &str = "owner-1";

pub fn memory_store() -> Arc<SqliteBackend> {
    Arc::new(SqliteBackend::open_in_memory().expect("Failed to open in-memory store"))
}

/// Default intervals: poll every 5 s, sweep every 30 s, 15-minute deadline.
pub fn test_config() -> SyncConfig {
    SyncConfig::default()
}

pub fn engine_over<S>(store: Arc<S>, trigger: Arc<dyn ScrapeTrigger>) -> Arc<SyncEngine>
where
    S: JobGateway + LeadGateway + JobChangeFeed + 'static,
{
    Arc::new(SyncEngine::new(test_config(), store, trigger))
}

/// A job row as the store would hold it.
pub fn job_fixture(id: &str, status: JobStatus, category: &str, locality: &str) -> Job {
    let now = Utc::now();
    let mut job = Job::placeholder(
        &NewJob {
            owner_id: OWNER.to_string(),
            params: JobParams::new(category, locality, 50),
        },
        now,
    );
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

pub fn processing_since(id: &str, started_at: DateTime<Utc>) -> Job {
    let mut job = job_fixture(id, JobStatus::Processing, "architects", "austin");
    job.created_at = started_at;
    job.started_at = Some(started_at);
    job
}

/// A lead mid-sequence: in progress, strategy S1, step 3, task due 2024-01-01.
pub fn lead_fixture(id: &str) -> Lead {
    Lead {
        id: id.to_string(),
        owner_id: OWNER.to_string(),
        business_name: format!("Studio {}", id),
        email: Some(format!("{}@example.com", id)),
        status: LeadStatus::InProgress,
        next_task_date: NaiveDate::from_ymd_opt(2024, 1, 1),
        strategy_id: Some("S1".to_string()),
        current_step_index: 3,
        notes: None,
        source_job_id: None,
        created_at: Utc::now(),
    }
}

pub fn seed_job(store: &SqliteBackend, job: &Job) {
    job_repo::insert(store.database(), &JobRow::from_job(job, Utc::now()))
        .expect("Failed to seed job");
}

pub fn seed_leads(store: &SqliteBackend, leads: &[Lead]) {
    for lead in leads {
        lead_repo::insert(store.database(), &LeadRow::from_lead(lead)).expect("Failed to seed lead");
    }
}

pub fn ids(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|id| id.to_string()).collect()
}

/// Lets spawned feed, pump and watcher tasks run.
pub async fn drain() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

pub fn cached_jobs(engine: &SyncEngine) -> Vec<Job> {
    engine
        .cache()
        .jobs()
        .get(&QueryKey::jobs(OWNER))
        .map(|entry| entry.items().to_vec())
        .unwrap_or_default()
}

/// Serves one canned HTTP response on a local port. Returns the URL.
pub async fn serve_once(status_line: &'static str, body: &'static str) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test server");
    let url = format!("http://{}/webhook/scrape", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut raw = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&raw).to_string();
            if let Some(split) = text.find("\r\n\r\n") {
                let content_length = text[..split]
                    .lines()
                    .find_map(|line| {
                        line.to_ascii_lowercase()
                            .strip_prefix("content-length:")
                            .and_then(|v| v.trim().parse::<usize>().ok())
                    })
                    .unwrap_or(0);
                if raw.len() >= split + 4 + content_length {
                    break;
                }
            }
        }
        let response = format!(
            "{}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status_line,
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        let _ = socket.shutdown().await;
    });

    (url, handle)
}
