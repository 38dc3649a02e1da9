//! PostgreSQL worker example demonstrating durable job processing.
//!
//! Applies the schema, pushes a few jobs, then runs a small worker pool and
//! a stale-job reaper until Ctrl-C.
//!
//! # Prerequisites
//!
//! 1. PostgreSQL server running locally or accessible via network
//! 2. Database created: `createdb quay_example`
//!
//! # Running the Example
//!
//! ```bash
//! export DATABASE_URL="postgres://localhost/quay_example"
//! cargo run --example postgres_worker --features postgres
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use quay::persistence::PostgresJobStore;
use quay::runtime::{JobHandler, RetryBackoff, WorkerConfig, WorkerPool};
use quay::*;
use quay_testkit::{test_registry, TestMessage};
use tracing_subscriber::EnvFilter;

type PgQueue = Queue<TestMessage, PostgresJobStore>;

struct DemoHandler {
    queue: Arc<PgQueue>,
}

#[async_trait]
impl JobHandler<TestMessage> for DemoHandler {
    async fn handle(&self, job: &Job<TestMessage>) -> anyhow::Result<()> {
        match &job.message {
            TestMessage::Echo(echo) => {
                tracing::info!(job_id = %job.id, "echo: {}", echo.message);
            }
            TestMessage::Add(add) => {
                let sum = add
                    .a
                    .checked_add(add.b)
                    .ok_or_else(|| anyhow::anyhow!("{} + {} overflows", add.a, add.b))?;
                self.queue
                    .push(&TestMessage::echo(format!(
                        "Add result: {} + {} = {}",
                        add.a, add.b, sum
                    )))
                    .await?;
            }
            TestMessage::SometimesFail(_) => {
                if job.attempt() % 2 == 1 {
                    anyhow::bail!("the job that sometimes fails has failed");
                }
            }
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let persistence = PersistenceConfig::from_env()?;
    let store = PostgresJobStore::new(persistence.connect().await?);
    store.migrate().await?;

    let queue = Arc::new(Queue::new(test_registry(), store, QueueConfig::from_env()?)?);

    queue.push(&TestMessage::echo("Hello, world!")).await?;
    queue.push(&TestMessage::add(1, 2)).await?;
    queue.push(&TestMessage::sometimes_fail()).await?;

    let pool = WorkerPool::new(Arc::clone(&queue));
    let handler = Arc::new(DemoHandler {
        queue: Arc::clone(&queue),
    });
    pool.spawn_workers(
        handler,
        WorkerConfig::new("pg-demo")
            .with_batch_size(10)
            .with_poll_interval(1_000)
            .with_retry_backoff(RetryBackoff::new(500, 10_000)),
        2,
    )
    .await;
    pool.spawn_reaper(chrono::Duration::minutes(5), Duration::from_secs(30))
        .await;

    tokio::signal::ctrl_c().await?;

    let report = pool.shutdown().await;
    let snapshot = queue.snapshot().await?;
    tracing::info!(
        completed = report.completed,
        retried = report.retried,
        exhausted = report.exhausted,
        unacknowledged = report.unacknowledged,
        queued = snapshot.queued,
        failed = snapshot.failed,
        "worker pool stopped"
    );
    Ok(())
}
