//! Integration tests for entity persistence through [`Index`].

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use sirius_search::error::{ConcurrencyError, EntityError, IndexError};
use sirius_search::schema::Entity;
use sirius_search::{DelayLineConfig, Index, IndexConfig, ReindexStatus};

use common::{Account, Customer, Ticket, create_index, create_index_with, seed_customers};

fn lock_error() -> IndexError {
    ConcurrencyError::OptimisticLock {
        entity_type: "Customer".to_string(),
        id: "c1".to_string(),
        expected_version: 1,
        actual_version: Some(2),
    }
    .into()
}

// ============================================================================
// Create / Find
// ============================================================================

#[tokio::test]
async fn test_create_then_find() {
    let (index, store) = create_index();

    let mut customer = Customer::new("Ada Lovelace", "active", "uk").with_email("ada@example.com");
    index.create(&mut customer).await.unwrap();

    assert!(!customer.is_new());
    assert_eq!(customer.version(), 1);
    assert_eq!(store.document_count("crm-customer"), 1);

    let found: Customer = index.find(customer.id()).await.unwrap().unwrap();
    assert_eq!(found, customer);
    assert_eq!(found.version(), 1);
}

#[tokio::test]
async fn test_find_special_ids() {
    let (index, _) = create_index();

    let blank: Customer = index.find("new").await.unwrap().unwrap();
    assert!(blank.is_new());

    assert!(index.find::<Customer>("").await.unwrap().is_none());
    assert!(index.find::<Customer>("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_create_uses_computed_id_and_hooks() {
    let (index, _) = create_index();

    let mut account = Account::new("  acme ");
    index.create(&mut account).await.unwrap();
    assert_eq!(account.id(), "ACME");

    let mut duplicate = Account::new("acme");
    let err = index.create(&mut duplicate).await.unwrap_err();
    assert!(matches!(
        err,
        IndexError::Entity(EntityError::AlreadyExists { ref id, .. }) if id == "ACME"
    ));
    assert!(duplicate.is_new());
}

#[tokio::test]
async fn test_create_rejects_persisted_entity() {
    let (index, _) = create_index();

    let mut customer = Customer::new("Ada", "active", "uk");
    index.create(&mut customer).await.unwrap();

    let err = index.create(&mut customer).await.unwrap_err();
    assert!(matches!(
        err,
        IndexError::Entity(EntityError::InvalidState { .. })
    ));
}

#[tokio::test]
async fn test_save_check_failure_passes_through() {
    let (index, store) = create_index();

    let mut account = Account::new("   ");
    let err = index.create(&mut account).await.unwrap_err();
    assert!(matches!(
        err,
        IndexError::Entity(EntityError::CheckFailed { .. })
    ));
    assert_eq!(store.document_count("crm-account"), 0);
}

// ============================================================================
// Optimistic Locking
// ============================================================================

#[tokio::test]
async fn test_update_increments_version() {
    let (index, _) = create_index();

    let mut customer = Customer::new("Ada", "active", "uk");
    index.create(&mut customer).await.unwrap();

    customer.status = "blocked".to_string();
    index.update(&mut customer).await.unwrap();
    assert_eq!(customer.version(), 2);

    let found: Customer = index.find(customer.id()).await.unwrap().unwrap();
    assert_eq!(found.status, "blocked");
    assert_eq!(found.version(), 2);
}

#[tokio::test]
async fn test_update_of_new_entity_creates_it() {
    let (index, _) = create_index();

    let mut customer = Customer::new("Ada", "active", "uk");
    index.update(&mut customer).await.unwrap();
    assert!(!customer.is_new());
    assert_eq!(customer.version(), 1);
}

#[tokio::test]
async fn test_stale_try_update_reports_lock_failure() {
    let (index, _) = create_index();

    let mut customer = Customer::new("Ada", "active", "uk");
    index.create(&mut customer).await.unwrap();

    let mut first: Customer = index.find(customer.id()).await.unwrap().unwrap();
    let mut second: Customer = index.find(customer.id()).await.unwrap().unwrap();

    first.country = "fr".to_string();
    index.try_update(&mut first).await.unwrap();

    second.country = "de".to_string();
    let err = index.try_update(&mut second).await.unwrap_err();
    assert!(err.is_optimistic_lock());
    assert_eq!(second.version(), 1);

    let stored: Customer = index.find(customer.id()).await.unwrap().unwrap();
    assert_eq!(stored.country, "fr");
    assert_eq!(index.metrics().snapshot().optimistic_lock_errors, 1);
}

#[tokio::test]
async fn test_stale_update_is_fatal() {
    let (index, _) = create_index();

    let mut customer = Customer::new("Ada", "active", "uk");
    index.create(&mut customer).await.unwrap();

    let mut stale = customer.clone();
    index.update(&mut customer).await.unwrap();

    let err = index.update(&mut stale).await.unwrap_err();
    assert!(err.is_handled());
    assert!(!err.is_optimistic_lock());
}

#[tokio::test]
async fn test_override_ignores_version() {
    let (index, _) = create_index();

    let mut customer = Customer::new("Ada", "active", "uk");
    index.create(&mut customer).await.unwrap();

    let mut stale = customer.clone();
    index.update(&mut customer).await.unwrap();

    stale.name = "Ada King".to_string();
    index.override_entity(&mut stale).await.unwrap();
    assert_eq!(stale.version(), 3);

    let stored: Customer = index.find(customer.id()).await.unwrap().unwrap();
    assert_eq!(stored.name, "Ada King");
}

// ============================================================================
// Delete
// ============================================================================

#[tokio::test]
async fn test_delete() {
    let (index, store) = create_index();

    let mut customer = Customer::new("Ada", "active", "uk");
    index.create(&mut customer).await.unwrap();

    index.delete(&customer).await.unwrap();
    assert_eq!(store.document_count("crm-customer"), 0);
    assert!(index.find::<Customer>(customer.id()).await.unwrap().is_none());

    // Deleting again is a no-op
    index.delete(&customer).await.unwrap();
}

#[tokio::test]
async fn test_delete_new_entity_is_noop() {
    let (index, _) = create_index();
    index.delete(&Customer::default()).await.unwrap();
}

#[tokio::test]
async fn test_stale_delete() {
    let (index, store) = create_index();

    let mut customer = Customer::new("Ada", "active", "uk");
    index.create(&mut customer).await.unwrap();
    let stale = customer.clone();
    index.update(&mut customer).await.unwrap();

    let err = index.try_delete(&stale).await.unwrap_err();
    assert!(err.is_optimistic_lock());

    let err = index.delete(&stale).await.unwrap_err();
    assert!(err.is_handled());
    assert_eq!(store.document_count("crm-customer"), 1);

    index.force_delete(&stale).await.unwrap();
    assert_eq!(store.document_count("crm-customer"), 0);
}

#[tokio::test]
async fn test_delete_check_failure_passes_through() {
    let (index, store) = create_index();

    let mut account = Account::new("acme");
    account.locked = true;
    index.create(&mut account).await.unwrap();

    let err = index.delete(&account).await.unwrap_err();
    assert!(matches!(
        err,
        IndexError::Entity(EntityError::CheckFailed { .. })
    ));
    assert_eq!(store.document_count("crm-account"), 1);
}

// ============================================================================
// Routing
// ============================================================================

#[tokio::test]
async fn test_routed_entity() {
    let (index, _) = create_index();

    let mut ticket = Ticket::new("t1", "Printer on fire");
    index.create(&mut ticket).await.unwrap();

    let found: Option<Ticket> = index.find_in(None, Some("t1"), ticket.id()).await.unwrap();
    assert_eq!(found.unwrap().title, "Printer on fire");

    let other: Option<Ticket> = index.find_in(None, Some("t2"), ticket.id()).await.unwrap();
    assert!(other.is_none());

    index.delete(&ticket).await.unwrap();
    let gone: Option<Ticket> = index.find_in(None, Some("t1"), ticket.id()).await.unwrap();
    assert!(gone.is_none());
}

// ============================================================================
// Retry
// ============================================================================

#[tokio::test]
async fn test_retry_gives_up_after_three_attempts() {
    let (index, _) = create_index();
    let attempts = AtomicUsize::new(0);

    let result: Result<(), _> = index
        .retry(|| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(lock_error()) }
        })
        .await;

    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    let err = result.unwrap_err();
    assert!(err.is_handled());
}

#[tokio::test]
async fn test_retry_succeeds_on_second_attempt() {
    let (index, _) = create_index();
    let attempts = AtomicUsize::new(0);

    let value = index
        .retry(|| {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if attempt < 2 {
                    Err(lock_error())
                } else {
                    Ok(attempt)
                }
            }
        })
        .await
        .unwrap();

    assert_eq!(value, 2);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_retry_does_not_retry_other_errors() {
    let (index, _) = create_index();
    let attempts = AtomicUsize::new(0);

    let result: Result<(), _> = index
        .retry(|| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async {
                Err(EntityError::CheckFailed {
                    entity_type: "Customer".to_string(),
                    message: "nope".to_string(),
                }
                .into())
            }
        })
        .await;

    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert!(matches!(
        result,
        Err(IndexError::Entity(EntityError::CheckFailed { .. }))
    ));
}

#[tokio::test]
async fn test_retry_read_modify_write() {
    let (index, _) = create_index();

    let mut customer = Customer::new("Ada", "active", "uk").with_score(0);
    index.create(&mut customer).await.unwrap();
    let id = customer.id().to_string();
    let interfered = AtomicUsize::new(0);

    let (index_ref, id_ref, interfered_ref) = (&index, id.as_str(), &interfered);
    index
        .retry(move || async move {
            let (index, id, interfered) = (index_ref, id_ref, interfered_ref);
            let mut current: Customer = index.find(id).await?.unwrap_or_default();
            if interfered.fetch_add(1, Ordering::SeqCst) == 0 {
                // A concurrent writer bumps the version between read and write
                let mut other = current.clone();
                index.update(&mut other).await?;
            }
            current.score = Some(current.score.unwrap_or_default() + 1);
            index.try_update(&mut current).await
        })
        .await
        .unwrap();

    let stored: Customer = index.find(&id).await.unwrap().unwrap();
    assert_eq!(stored.score, Some(1));
    assert_eq!(stored.version(), 3);
    assert_eq!(interfered.load(Ordering::SeqCst), 2);
}

// ============================================================================
// Cache
// ============================================================================

#[tokio::test]
async fn test_fetch_uses_cache() {
    let (index, _) = create_index();

    let mut customer = Customer::new("Ada", "active", "uk");
    index.create(&mut customer).await.unwrap();

    let (first, cached) = index.fetch::<Customer>(customer.id()).await.unwrap();
    assert!(first.is_some());
    assert!(!cached);

    let (second, cached) = index.fetch::<Customer>(customer.id()).await.unwrap();
    assert_eq!(second, first);
    assert!(cached);

    // Saving evicts the entry
    index.update(&mut customer).await.unwrap();
    let (third, cached) = index.fetch::<Customer>(customer.id()).await.unwrap();
    assert!(!cached);
    assert_eq!(third.unwrap().version(), 2);
}

#[tokio::test]
async fn test_fetch_does_not_cache_misses() {
    let (index, _) = create_index();

    let (missing, cached) = index.fetch::<Customer>("missing").await.unwrap();
    assert!(missing.is_none());
    assert!(!cached);
    assert!(index.cache().is_empty());
}

// ============================================================================
// Delay-Line
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_call_after_update_waits_for_delay() {
    let (index, _) = create_index();
    let ran = Arc::new(AtomicUsize::new(0));

    let flag = ran.clone();
    index
        .call_after_update(async move {
            flag.fetch_add(1, Ordering::SeqCst);
        })
        .await;
    assert_eq!(index.pending_delayed(), 1);

    tokio::time::sleep(Duration::from_millis(900)).await;
    assert_eq!(ran.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_millis(1600)).await;
    assert_eq!(ran.load(Ordering::SeqCst), 1);
    assert_eq!(index.pending_delayed(), 0);
    assert_eq!(index.metrics().snapshot().delays, 1);
}

#[tokio::test(start_paused = true)]
async fn test_flush_runs_actions_in_order() {
    let (index, _) = create_index();
    let order = Arc::new(Mutex::new(Vec::new()));

    for i in 0..3 {
        let order = order.clone();
        index
            .call_after_update(async move {
                order.lock().push(i);
            })
            .await;
    }

    assert_eq!(index.flush_delay_line().await, 3);
    assert_eq!(*order.lock(), vec![0, 1, 2]);
}

#[tokio::test(start_paused = true)]
async fn test_full_delay_line_blocks_caller() {
    let config = IndexConfig {
        delay_line: DelayLineConfig {
            max_pending: 2,
            ..Default::default()
        },
        ..Default::default()
    };
    let (index, _) = create_index_with(config);
    let ran = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
        index.call_after_update(async {}).await;
    }
    assert_eq!(index.pending_delayed(), 2);

    let started = tokio::time::Instant::now();
    let flag = ran.clone();
    index
        .call_after_update(async move {
            flag.fetch_add(1, Ordering::SeqCst);
        })
        .await;

    assert!(started.elapsed() >= Duration::from_millis(1000));
    assert_eq!(ran.load(Ordering::SeqCst), 1);
    assert_eq!(index.metrics().snapshot().blocks, 1);
}

// ============================================================================
// Reindex
// ============================================================================

async fn wait_for_reindex(index: &Index, job_id: &str) -> sirius_search::ReindexProgress {
    for _ in 0..100 {
        if let Some(progress) = index.reindex_progress(job_id)
            && progress.status.is_finished()
        {
            return progress;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("reindex {} did not finish", job_id);
}

#[tokio::test]
async fn test_reindex_copies_all_indices() {
    let (index, store) = create_index();
    let customers = seed_customers(
        &index,
        &[
            ("Ada", "active", "uk", 1),
            ("Grace", "active", "us", 2),
            ("Edsger", "blocked", "nl", 3),
        ],
    )
    .await;
    let mut account = Account::new("acme");
    index.create(&mut account).await.unwrap();

    let job_id = index.reindex("v2-");
    let progress = wait_for_reindex(&index, &job_id).await;

    assert_eq!(progress.status, ReindexStatus::Completed);
    assert_eq!(progress.total_indices, 2);
    assert_eq!(progress.documents_copied, 4);
    assert!(!progress.has_errors());
    assert_eq!(store.document_count("v2-crm-customer"), 3);
    assert_eq!(store.document_count("v2-crm-account"), 1);

    let reindexed = Index::new(store.clone(), IndexConfig::with_prefix("v2-"));
    let found: Customer = reindexed.find(customers[0].id()).await.unwrap().unwrap();
    assert_eq!(found.name, "Ada");
    assert_eq!(found.version(), customers[0].version());
    assert_eq!(index.reindex_jobs().list().len(), 1);
}
