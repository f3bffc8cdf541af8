//! Bulk lead writes across every live view shape.

mod common;

use std::sync::atomic::Ordering;

use leadsync::cache::{CacheEntry, LeadQuery, PageRequest, QueryKey, QueryScope};
use leadsync::gateway::LeadGateway;
use leadsync::model::{Lead, LeadPatch, LeadStatus};
use leadsync::{SyncEngine, SyncError};

use common::*;

fn list_key() -> QueryKey {
    QueryKey::Leads(LeadQuery::all(OWNER))
}

fn page_key() -> QueryKey {
    QueryKey::Leads(LeadQuery::paged(OWNER, PageRequest::new(1, 2)))
}

fn task_key() -> QueryKey {
    QueryKey::task_queue(OWNER)
}

/// Loads the flat list, the first page and the task queue.
async fn load_views(engine: &SyncEngine) {
    let queries = engine.queries();
    queries.fetch_leads(&LeadQuery::all(OWNER)).await.unwrap();
    queries
        .fetch_leads(&LeadQuery::paged(OWNER, PageRequest::new(1, 2)))
        .await
        .unwrap();
    queries.fetch_task_queue(OWNER).await.unwrap();
}

fn view(engine: &SyncEngine, key: &QueryKey) -> CacheEntry<Lead> {
    engine.cache().leads().get(key).expect("view should be cached")
}

#[tokio::test]
async fn test_clearing_strategy_resets_leads_in_every_view() {
    let store = memory_store();
    seed_leads(&store, &[lead_fixture("a"), lead_fixture("b"), lead_fixture("c")]);
    let engine = engine_over(store.clone(), RecordingTrigger::accepting());
    engine.start(OWNER).await.unwrap();
    load_views(&engine).await;
    assert!(matches!(view(&engine, &page_key()), CacheEntry::Page(_)));

    let updated = engine
        .bulk_assign_strategy(&ids(&["a", "b"]), None)
        .await
        .unwrap();
    assert_eq!(updated.len(), 2);

    for key in [list_key(), page_key(), task_key()] {
        let entry = view(&engine, &key);
        for id in ["a", "b"] {
            if let Some(lead) = entry.find(id) {
                assert_eq!(lead.strategy_id, None, "{} in {}", id, key);
                assert_eq!(lead.current_step_index, 0, "{} in {}", id, key);
                assert_eq!(lead.next_task_date, None, "{} in {}", id, key);
                assert_eq!(lead.status, LeadStatus::InProgress);
            }
        }
        assert!(engine.cache().leads().is_stale(&key));
    }
    assert_eq!(
        view(&engine, &list_key()).find("c").unwrap().strategy_id.as_deref(),
        Some("S1")
    );

    let stored = store.get_lead("a").await.unwrap();
    assert_eq!(stored.strategy_id, None);
    assert_eq!(stored.current_step_index, 0);
    assert_eq!(stored.next_task_date, None);

    // The refetched queue no longer holds the cleared leads.
    engine.refresh_stale().await.unwrap();
    let queue = view(&engine, &task_key());
    assert_eq!(queue.items().len(), 1);
    assert_eq!(queue.items()[0].id, "c");

    engine.shutdown().await;
}

#[tokio::test]
async fn test_failed_bulk_write_restores_exact_prior_views() {
    let store = memory_store();
    seed_leads(&store, &[lead_fixture("a"), lead_fixture("b"), lead_fixture("c")]);
    let flaky = FlakyStore::new(store.clone());
    let engine = engine_over(flaky.clone(), RecordingTrigger::accepting());
    engine.start(OWNER).await.unwrap();
    load_views(&engine).await;

    let before = engine
        .cache()
        .leads()
        .snapshot(&[QueryScope::Leads, QueryScope::TaskQueue]);
    assert_eq!(before.len(), 3);

    flaky.fail_lead_writes.store(true, Ordering::SeqCst);
    let err = engine
        .bulk_assign_strategy(&ids(&["a", "b", "c"]), None)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Gateway(_)));

    for (key, entry) in &before {
        assert_eq!(&view(&engine, key), entry, "{} was not restored", key);
    }
    assert_eq!(store.get_lead("a").await.unwrap().current_step_index, 3);

    let err = engine.bulk_delete(&ids(&["a"])).await.unwrap_err();
    assert!(matches!(err, SyncError::Gateway(_)));
    for (key, entry) in &before {
        assert_eq!(&view(&engine, key), entry, "{} was not restored", key);
    }

    engine.shutdown().await;
}

#[tokio::test]
async fn test_terminal_status_clears_next_task() {
    let store = memory_store();
    seed_leads(&store, &[lead_fixture("a"), lead_fixture("b")]);
    let engine = engine_over(store.clone(), RecordingTrigger::accepting());
    engine.start(OWNER).await.unwrap();
    load_views(&engine).await;

    engine
        .bulk_update(&ids(&["a"]), &LeadPatch::status(LeadStatus::Lost))
        .await
        .unwrap();

    let lead = view(&engine, &list_key()).find("a").cloned().unwrap();
    assert_eq!(lead.status, LeadStatus::Lost);
    assert_eq!(lead.next_task_date, None);
    assert_eq!(lead.strategy_id.as_deref(), Some("S1"));
    assert_eq!(store.get_lead("a").await.unwrap().next_task_date, None);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_unrelated_edit_leaves_task_queue_fresh() {
    let store = memory_store();
    seed_leads(&store, &[lead_fixture("a")]);
    let engine = engine_over(store.clone(), RecordingTrigger::accepting());
    engine.start(OWNER).await.unwrap();
    load_views(&engine).await;

    engine
        .bulk_update(&ids(&["a"]), &LeadPatch::notes(Some("prefers email")))
        .await
        .unwrap();

    assert!(engine.cache().leads().is_stale(&list_key()));
    assert!(engine.cache().leads().is_stale(&page_key()));
    assert!(!engine.cache().leads().is_stale(&task_key()));

    engine.shutdown().await;
}

#[tokio::test]
async fn test_bulk_delete_keeps_page_count_consistent() {
    let store = memory_store();
    seed_leads(&store, &[lead_fixture("a"), lead_fixture("b"), lead_fixture("c")]);
    let engine = engine_over(store.clone(), RecordingTrigger::accepting());
    engine.start(OWNER).await.unwrap();
    load_views(&engine).await;
    assert_eq!(view(&engine, &page_key()).total(), 3);

    engine.bulk_delete(&ids(&["a"])).await.unwrap();

    let page = view(&engine, &page_key());
    assert_eq!(page.total(), 2);
    assert!(page.find("a").is_none());
    assert!(view(&engine, &task_key()).find("a").is_none());
    assert!(engine.cache().leads().is_stale(&task_key()));

    let listed = store.list_leads(&LeadQuery::all(OWNER)).await.unwrap();
    assert_eq!(listed.count, 2);

    engine.shutdown().await;
}
