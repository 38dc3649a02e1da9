/// Stale-job reaper.
pub mod reaper;
/// Shutdown signalling and worker pools.
pub mod supervisor;
/// Worker loop, handler trait and worker configuration.
pub mod worker;

pub use reaper::Reaper;
pub use supervisor::{ShutdownToken, WorkerPool};
pub use worker::{JobHandler, RetryBackoff, Worker, WorkerConfig, WorkerReport};
