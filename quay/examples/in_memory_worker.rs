//! In-memory worker example.
//!
//! Pushes a few jobs, then drains the queue with a worker whose handler
//! prints `Echo` messages, turns `Add` into a follow-up `Echo`, and fails
//! every other attempt of `SometimesFail`.
//!
//! ```bash
//! RUST_LOG=quay=debug,in_memory_worker=info cargo run --example in_memory_worker
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use quay::runtime::{JobHandler, Worker, WorkerConfig};
use quay::*;
use quay_testkit::{test_registry, InMemoryJobStore, TestMessage};
use tracing_subscriber::EnvFilter;

struct DemoHandler {
    queue: Arc<Queue<TestMessage, InMemoryJobStore>>,
}

#[async_trait]
impl JobHandler<TestMessage> for DemoHandler {
    async fn handle(&self, job: &Job<TestMessage>) -> anyhow::Result<()> {
        match &job.message {
            TestMessage::Echo(echo) => {
                println!("{}", echo.message);
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

    let queue = Arc::new(Queue::new(
        test_registry(),
        InMemoryJobStore::new(),
        QueueConfig::from_env()?,
    )?);

    queue.push(&TestMessage::echo("Hello, world!")).await?;
    queue.push(&TestMessage::add(1, 2)).await?;
    queue.push(&TestMessage::sometimes_fail()).await?;

    let handler = DemoHandler {
        queue: Arc::clone(&queue),
    };
    let worker = Worker::new(
        Arc::clone(&queue),
        handler,
        WorkerConfig::new("demo").with_batch_size(10),
    );

    let report = worker.drain().await?;
    let snapshot = queue.snapshot().await?;
    tracing::info!(
        completed = report.completed,
        retried = report.retried,
        exhausted = report.exhausted,
        remaining = snapshot.total(),
        "queue drained"
    );

    Ok(())
}
