//! Integration tests for the Postgres job store.
//!
//! Requires a running Postgres instance; the schema is applied by the tests.
//! Run with: `cargo test --test postgres_queue --features postgres -- --ignored`

#![cfg(feature = "postgres")]

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use chrono::{Duration, Utc};
use quay::persistence::PostgresJobStore;
use quay::{JobStatus, JobStore, PersistenceConfig, Queue, QueueConfig, QueueError};
use quay_testkit::{test_registry, TestMessage};
use sqlx::Row;
use tokio::sync::Mutex;

// All tests share the quay_job table.
static TABLE_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

async fn connect() -> PostgresJobStore {
    let config = PersistenceConfig::new(
        std::env::var("DATABASE_URL").expect("DATABASE_URL required"),
    )
    .with_max_connections(16);
    let store = PostgresJobStore::new(config.connect().await.expect("connect"));
    store.migrate().await.expect("migrate");
    store.clear().await.expect("clear");
    store
}

fn queue(store: PostgresJobStore, max_attempts: u32) -> Queue<TestMessage, PostgresJobStore> {
    Queue::new(
        test_registry(),
        store,
        QueueConfig::default().with_max_attempts(max_attempts),
    )
    .expect("valid config")
}

async fn row_count(store: &PostgresJobStore) -> i64 {
    sqlx::query("SELECT COUNT(*) AS n FROM quay_job")
        .fetch_one(store.pool())
        .await
        .expect("count")
        .try_get("n")
        .expect("n column")
}

#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn push_pull_complete_round_trip() {
    let _guard = TABLE_LOCK.lock().await;
    let store = connect().await;
    let queue = queue(store.clone(), 3);

    let id = queue.push(&TestMessage::echo("hi")).await.unwrap();
    let batch = queue.pull(1).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].id, id);
    assert_eq!(batch[0].message, TestMessage::echo("hi"));
    assert_eq!(queue.status(id).await.unwrap(), Some(JobStatus::Running));

    queue.complete(id).await.unwrap();
    queue.complete(id).await.unwrap();
    assert!(queue.pull(1).await.unwrap().is_empty());
    assert_eq!(row_count(&store).await, 0);
}

#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn fail_moves_to_failed_after_max_attempts() {
    let _guard = TABLE_LOCK.lock().await;
    let store = connect().await;
    let queue = queue(store.clone(), 3);

    let id = queue.push(&TestMessage::sometimes_fail()).await.unwrap();
    for attempt in 1..=3 {
        assert_eq!(queue.pull(1).await.unwrap().len(), 1);
        let expected = if attempt < 3 {
            JobStatus::Queued
        } else {
            JobStatus::Failed
        };
        assert_eq!(queue.fail(id).await.unwrap(), Some(expected));
    }

    assert!(queue.pull(1).await.unwrap().is_empty());
    let row = queue.get(id).await.unwrap().unwrap();
    assert_eq!(row.status, JobStatus::Failed);
    assert_eq!(row.failed_attempts, 3);
    assert_eq!(row.message_type, "SometimesFail");
}

#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn fail_on_missing_job_is_a_no_op() {
    let _guard = TABLE_LOCK.lock().await;
    let store = connect().await;
    let queue = queue(store, 3);

    assert_eq!(queue.fail(quay::JobId::new()).await.unwrap(), None);
}

#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn unknown_type_leaves_table_untouched() {
    let _guard = TABLE_LOCK.lock().await;
    let store = connect().await;
    let registry = quay::MessageRegistry::<TestMessage>::new().register::<quay_testkit::Echo>();
    let queue = Queue::new(registry, store.clone(), QueueConfig::default()).unwrap();

    let err = queue.push(&TestMessage::add(1, 2)).await.unwrap_err();
    assert!(matches!(err, QueueError::UnknownMessageType { .. }));
    assert_eq!(row_count(&store).await, 0);
}

#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn schedule_gate_and_ordering() {
    let _guard = TABLE_LOCK.lock().await;
    let store = connect().await;
    let queue = queue(store, 3);
    let now = Utc::now();

    let later = queue
        .push_at(&TestMessage::echo("later"), now + Duration::hours(1))
        .await
        .unwrap();
    let second = queue
        .push_at(&TestMessage::echo("second"), now - Duration::seconds(1))
        .await
        .unwrap();
    let first = queue
        .push_at(&TestMessage::echo("first"), now - Duration::seconds(2))
        .await
        .unwrap();

    let ids: Vec<_> = queue.pull(10).await.unwrap().iter().map(|j| j.id).collect();
    assert_eq!(ids, vec![first, second]);
    assert_eq!(queue.status(later).await.unwrap(), Some(JobStatus::Queued));
}

#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn malformed_row_is_failed_during_pull() {
    let _guard = TABLE_LOCK.lock().await;
    let store = connect().await;
    let queue = queue(store.clone(), 3);

    let now = Utc::now() - Duration::seconds(1);
    let poisoned = quay::JobRow::queued(
        "Echo",
        serde_json::json!({"message": "x", "extra": 1}),
        now,
        now,
    );
    store.insert(&poisoned).await.unwrap();
    let good = queue.push(&TestMessage::echo("ok")).await.unwrap();

    let batch = queue.pull(10).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].id, good);
    assert_eq!(
        queue.status(poisoned.id).await.unwrap(),
        Some(JobStatus::Failed)
    );
}

#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn unmappable_row_does_not_cost_the_batch() {
    let _guard = TABLE_LOCK.lock().await;
    let store = connect().await;
    let queue = queue(store.clone(), 3);

    // A negative attempt count cannot be mapped back into a JobRow.
    sqlx::query("ALTER TABLE quay_job DROP CONSTRAINT quay_job_failed_attempts_check")
        .execute(store.pool())
        .await
        .unwrap();
    let broken = quay::JobId::new();
    sqlx::query(
        "INSERT INTO quay_job (id, scheduled_for, failed_attempts, status, message_type, message) \
         VALUES ($1, NOW() - INTERVAL '1 second', -1, 1, 'Echo', '{\"message\": \"x\"}')",
    )
    .bind(broken.0)
    .execute(store.pool())
    .await
    .unwrap();
    let good = queue.push(&TestMessage::echo("ok")).await.unwrap();

    let batch = queue.pull(10).await.unwrap();
    let status: i16 = sqlx::query("SELECT status FROM quay_job WHERE id = $1")
        .bind(broken.0)
        .fetch_one(store.pool())
        .await
        .unwrap()
        .try_get("status")
        .unwrap();

    store.clear().await.unwrap();
    sqlx::query(
        "ALTER TABLE quay_job ADD CONSTRAINT quay_job_failed_attempts_check \
         CHECK (failed_attempts >= 0)",
    )
    .execute(store.pool())
    .await
    .unwrap();

    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].id, good);
    assert_eq!(status, JobStatus::Failed.as_i16());
}

#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn requeue_stale_counts_as_failed_attempt() {
    let _guard = TABLE_LOCK.lock().await;
    let store = connect().await;
    let queue = queue(store.clone(), 3);

    let id = queue.push(&TestMessage::echo("stuck")).await.unwrap();
    queue.pull(1).await.unwrap();
    sqlx::query("UPDATE quay_job SET updated_at = NOW() - INTERVAL '1 hour' WHERE id = $1")
        .bind(id.0)
        .execute(store.pool())
        .await
        .unwrap();

    let outcome = queue.requeue_stale(Duration::minutes(10)).await.unwrap();
    assert_eq!(outcome.requeued, 1);
    assert_eq!(outcome.failed, 0);

    let row = queue.get(id).await.unwrap().unwrap();
    assert_eq!(row.status, JobStatus::Queued);
    assert_eq!(row.failed_attempts, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore] // requires DATABASE_URL
async fn concurrent_pulls_never_overlap() {
    let _guard = TABLE_LOCK.lock().await;
    let store = connect().await;
    let queue = Arc::new(queue(store, 3));

    for i in 0..100 {
        queue.push(&TestMessage::echo(format!("job-{i}"))).await.unwrap();
    }

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let q = Arc::clone(&queue);
            tokio::spawn(async move {
                let mut mine = Vec::new();
                loop {
                    let batch = q.pull(5).await.unwrap();
                    if batch.is_empty() {
                        break;
                    }
                    mine.extend(batch.into_iter().map(|j| j.id));
                }
                mine
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for id in handle.await.unwrap() {
            assert!(seen.insert(id), "job {id} claimed twice");
        }
    }
    assert_eq!(seen.len(), 100);

    let snapshot = queue.snapshot().await.unwrap();
    assert_eq!(snapshot.running, 100);
    assert_eq!(queue.clear().await.unwrap(), 100);
}
