//! Prometheus metrics for quay.
//!
//! # Metrics
//!
//! ## Counters
//! - `quay_jobs_pushed_total{message_type}`
//! - `quay_jobs_claimed_total`
//! - `quay_jobs_finished_total{message_type, outcome}` where outcome is
//!   `completed`, `retry`, `exhausted` or `poisoned`
//! - `quay_jobs_reaped_total{outcome}` where outcome is `requeued` or `failed`
//! - `quay_jobs_stranded_total{operation}`: jobs left `Running` because a
//!   store write for them failed
//!
//! ## Histograms
//! - `quay_job_duration_seconds{message_type, outcome}`
#![cfg(feature = "metrics")]

use prometheus::{exponential_buckets, CounterVec, HistogramVec, IntCounter, Opts, Registry};
use std::sync::LazyLock;

/// Global Prometheus registry for quay metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static JOBS_PUSHED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new("quay_jobs_pushed_total", "Total number of jobs pushed");
    CounterVec::new(opts, &["message_type"]).expect("quay_jobs_pushed_total metric creation failed")
});

pub static JOBS_CLAIMED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("quay_jobs_claimed_total", "Total number of jobs claimed by pull")
        .expect("quay_jobs_claimed_total metric creation failed")
});

pub static JOBS_FINISHED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "quay_jobs_finished_total",
        "Total number of job executions by outcome",
    );
    CounterVec::new(opts, &["message_type", "outcome"])
        .expect("quay_jobs_finished_total metric creation failed")
});

pub static JOBS_REAPED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "quay_jobs_reaped_total",
        "Total number of stale running jobs reclaimed",
    );
    CounterVec::new(opts, &["outcome"]).expect("quay_jobs_reaped_total metric creation failed")
});

pub static JOBS_STRANDED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "quay_jobs_stranded_total",
        "Total number of jobs left running after a failed store write",
    );
    CounterVec::new(opts, &["operation"]).expect("quay_jobs_stranded_total metric creation failed")
});

pub static JOB_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let buckets = exponential_buckets(0.001, 2.0, 15).expect("bucket creation failed");
    let opts = prometheus::HistogramOpts::new(
        "quay_job_duration_seconds",
        "Handler execution duration in seconds",
    )
    .buckets(buckets);
    HistogramVec::new(opts, &["message_type", "outcome"])
        .expect("quay_job_duration_seconds metric creation failed")
});

/// Register every quay metric with [`REGISTRY`]. Safe to call repeatedly.
pub fn init_metrics() -> anyhow::Result<()> {
    let registry = &*REGISTRY;

    for metric in [
        Box::new(JOBS_PUSHED_TOTAL.clone()) as Box<dyn prometheus::core::Collector>,
        Box::new(JOBS_CLAIMED_TOTAL.clone()),
        Box::new(JOBS_FINISHED_TOTAL.clone()),
        Box::new(JOBS_REAPED_TOTAL.clone()),
        Box::new(JOBS_STRANDED_TOTAL.clone()),
        Box::new(JOB_DURATION_SECONDS.clone()),
    ] {
        if let Err(e) = registry.register(metric) {
            if !matches!(e, prometheus::Error::AlreadyReg) {
                return Err(e.into());
            }
        }
    }

    Ok(())
}

pub fn record_job_pushed(message_type: &str) {
    JOBS_PUSHED_TOTAL.with_label_values(&[message_type]).inc();
}

pub fn record_jobs_claimed(count: u64) {
    JOBS_CLAIMED_TOTAL.inc_by(count);
}

pub fn record_job_finished(message_type: &str, outcome: &str) {
    JOBS_FINISHED_TOTAL
        .with_label_values(&[message_type, outcome])
        .inc();
}

pub fn record_jobs_reaped(requeued: u64, failed: u64) {
    JOBS_REAPED_TOTAL
        .with_label_values(&["requeued"])
        .inc_by(requeued as f64);
    JOBS_REAPED_TOTAL
        .with_label_values(&["failed"])
        .inc_by(failed as f64);
}

pub fn record_job_stranded(operation: &str) {
    JOBS_STRANDED_TOTAL.with_label_values(&[operation]).inc();
}

pub fn observe_job_duration(message_type: &str, outcome: &str, duration_secs: f64) {
    JOB_DURATION_SECONDS
        .with_label_values(&[message_type, outcome])
        .observe(duration_secs);
}

/// Gather all registered metrics in Prometheus text format.
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .map_err(Into::into)
}
