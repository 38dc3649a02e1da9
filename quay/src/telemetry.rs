//! Tracing and telemetry instrumentation for quay.
//!
//! Span constructors for each queue operation and `record_*` helpers that
//! emit a structured `tracing` event and, with the `metrics` feature, update
//! the matching Prometheus series.

use std::future::Future;
use tracing::{info_span, Instrument, Span};

/// Span for a push.
#[must_use]
pub fn push_span(message_type: impl AsRef<str>) -> Span {
    info_span!(
        "quay.push",
        message_type = %message_type.as_ref(),
        job_id = tracing::field::Empty,
    )
}

/// Span for a pull. `claimed` is filled in once the claim returns.
#[must_use]
pub fn pull_span(batch_size: usize) -> Span {
    info_span!(
        "quay.pull",
        batch_size = batch_size,
        claimed = tracing::field::Empty,
    )
}

#[must_use]
pub fn complete_span(job_id: impl AsRef<str>) -> Span {
    info_span!("quay.complete", job_id = %job_id.as_ref())
}

/// Span for a failure report. `status` is filled in with the resulting state.
#[must_use]
pub fn fail_span(job_id: impl AsRef<str>) -> Span {
    info_span!(
        "quay.fail",
        job_id = %job_id.as_ref(),
        status = tracing::field::Empty,
    )
}

/// Span wrapping a handler executing one job.
#[must_use]
pub fn handle_span(
    worker_id: impl AsRef<str>,
    job_id: impl AsRef<str>,
    message_type: impl AsRef<str>,
    attempt: u32,
) -> Span {
    info_span!(
        "quay.handle",
        worker_id = %worker_id.as_ref(),
        job_id = %job_id.as_ref(),
        message_type = %message_type.as_ref(),
        attempt = attempt,
    )
}

#[must_use]
pub fn reap_span(stale_after_secs: i64) -> Span {
    info_span!("quay.reap", stale_after_secs = stale_after_secs)
}

/// Instrument a handler future with a [`handle_span`].
pub fn instrument_handle<F>(
    worker_id: impl AsRef<str>,
    job_id: impl AsRef<str>,
    message_type: impl AsRef<str>,
    attempt: u32,
    future: F,
) -> impl Future<Output = F::Output>
where
    F: Future,
{
    future.instrument(handle_span(worker_id, job_id, message_type, attempt))
}

pub fn record_job_pushed(message_type: impl AsRef<str>) {
    tracing::debug!(message_type = %message_type.as_ref(), "job pushed");

    #[cfg(feature = "metrics")]
    crate::metrics::record_job_pushed(message_type.as_ref());
}

pub fn record_jobs_claimed(count: usize) {
    if count > 0 {
        tracing::debug!(count = count, "jobs claimed");
    }

    #[cfg(feature = "metrics")]
    crate::metrics::record_jobs_claimed(count as u64);
}

/// Record a job outcome. `outcome` is one of `completed`, `retry`, `exhausted`.
pub fn record_job_finished(message_type: impl AsRef<str>, outcome: impl AsRef<str>) {
    tracing::info!(
        message_type = %message_type.as_ref(),
        outcome = %outcome.as_ref(),
        "job finished"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_job_finished(message_type.as_ref(), outcome.as_ref());
}

/// Record a claimed row that could not be decoded and was failed on the spot.
pub fn record_poisoned_job(job_id: impl AsRef<str>, message_type: impl AsRef<str>, reason: &str) {
    tracing::error!(
        job_id = %job_id.as_ref(),
        message_type = %message_type.as_ref(),
        reason = %reason,
        "claimed job could not be decoded; marked failed"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_job_finished(message_type.as_ref(), "poisoned");
}

/// Record a store write that failed for one job while the rest of its batch
/// carried on. The job stays `Running` until a stale sweep picks it up.
pub fn record_stranded_job(
    job_id: impl AsRef<str>,
    operation: &str,
    error: &dyn std::fmt::Display,
) {
    tracing::error!(
        job_id = %job_id.as_ref(),
        operation = operation,
        error = %error,
        "job left running after store error"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_job_stranded(operation);
}

/// Record a handler that panicked instead of returning.
pub fn record_handler_panic(job_id: impl AsRef<str>, message_type: impl AsRef<str>, panic_msg: &str) {
    tracing::error!(
        job_id = %job_id.as_ref(),
        message_type = %message_type.as_ref(),
        panic_msg = %panic_msg,
        "job handler panicked"
    );
}

pub fn record_jobs_reaped(requeued: u64, failed: u64) {
    if requeued + failed > 0 {
        tracing::warn!(requeued = requeued, failed = failed, "stale running jobs reaped");
    }

    #[cfg(feature = "metrics")]
    crate::metrics::record_jobs_reaped(requeued, failed);
}

/// Start timing a handler execution.
pub fn record_job_start(job_id: impl AsRef<str>) -> JobTimingHandle {
    JobTimingHandle {
        job_id: job_id.as_ref().to_string(),
        start: std::time::Instant::now(),
    }
}

/// Finish timing a handler execution and observe its duration.
pub fn record_job_end(
    handle: JobTimingHandle,
    message_type: impl AsRef<str>,
    outcome: impl AsRef<str>,
) {
    let duration_secs = handle.start.elapsed().as_secs_f64();

    tracing::debug!(
        job_id = %handle.job_id,
        message_type = %message_type.as_ref(),
        outcome = %outcome.as_ref(),
        duration_secs = duration_secs,
        "job duration observed"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::observe_job_duration(message_type.as_ref(), outcome.as_ref(), duration_secs);
}

/// Opaque timer returned by [`record_job_start`].
#[derive(Debug)]
pub struct JobTimingHandle {
    job_id: String,
    start: std::time::Instant,
}

impl JobTimingHandle {
    #[must_use]
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    #[must_use]
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}
