use async_trait::async_trait;
use parking_lot::Mutex;
use quay::runtime::JobHandler;
use quay::*;
use std::sync::Arc;
use std::time::Duration;

use crate::TestMessage;

/// When a [`RecordingHandler`] fails `SometimesFail` jobs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailurePlan {
    Never,
    Always,
    /// Fail while the job's attempt number is at most this value.
    FirstAttempts(u32),
    /// Panic inside the handler on every attempt.
    Panic,
}

#[derive(Clone, Debug)]
pub struct HandledRecord {
    pub job_id: JobId,
    pub message_type: &'static str,
    pub attempt: u32,
    pub succeeded: bool,
    /// Result of an `Add`, the text of an `Echo`.
    pub output: Option<String>,
}

/// A [`JobHandler`] for [`TestMessage`] that records every call.
///
/// `Echo` always succeeds and `Add` succeeds unless the sum overflows.
/// `SometimesFail` follows the configured [`FailurePlan`], `Always` by
/// default. A panicking call is not recorded.
#[derive(Clone)]
pub struct RecordingHandler {
    records: Arc<Mutex<Vec<HandledRecord>>>,
    plan: Arc<Mutex<FailurePlan>>,
    delay: Option<Duration>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::with_plan(FailurePlan::Always)
    }

    pub fn with_plan(plan: FailurePlan) -> Self {
        Self {
            records: Arc::new(Mutex::new(Vec::new())),
            plan: Arc::new(Mutex::new(plan)),
            delay: None,
        }
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_plan(&self, plan: FailurePlan) {
        *self.plan.lock() = plan;
    }

    pub fn records(&self) -> Vec<HandledRecord> {
        self.records.lock().clone()
    }

    pub fn handled_count(&self) -> usize {
        self.records.lock().len()
    }

    pub fn count_for(&self, message_type: &str) -> usize {
        self.records
            .lock()
            .iter()
            .filter(|r| r.message_type == message_type)
            .count()
    }

    pub fn assert_handled_count_eq(&self, expected: usize) {
        let actual = self.handled_count();
        assert_eq!(
            actual, expected,
            "Expected {} handled jobs, got {}",
            expected, actual
        );
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl Default for RecordingHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobHandler<TestMessage> for RecordingHandler {
    async fn handle(&self, job: &Job<TestMessage>) -> anyhow::Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let (result, output) = match &job.message {
            TestMessage::Echo(echo) => (Ok(()), Some(echo.message.clone())),
            TestMessage::Add(add) => match add.a.checked_add(add.b) {
                Some(sum) => (Ok(()), Some(sum.to_string())),
                None => (
                    Err(anyhow::anyhow!("{} + {} overflows i64", add.a, add.b)),
                    None,
                ),
            },
            TestMessage::SometimesFail(_) => {
                let plan = *self.plan.lock();
                let fail = match plan {
                    FailurePlan::Never => false,
                    FailurePlan::Always => true,
                    FailurePlan::FirstAttempts(n) => job.attempt() <= n,
                    FailurePlan::Panic => {
                        panic!("the job that sometimes fails has panicked")
                    }
                };
                if fail {
                    (
                        Err(anyhow::anyhow!("the job that sometimes fails has failed")),
                        None,
                    )
                } else {
                    (Ok(()), None)
                }
            }
        };

        self.records.lock().push(HandledRecord {
            job_id: job.id,
            message_type: job.message.message_type(),
            attempt: job.attempt(),
            succeeded: result.is_ok(),
            output,
        });
        result
    }
}
