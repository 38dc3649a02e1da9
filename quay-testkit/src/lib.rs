//! Test support for quay: an in-memory job store, a fault-injecting wrapper
//! around it, fixture messages and a recording handler.

pub mod faulty;
pub mod handler;
pub mod message;
pub mod store;

pub use faulty::{FaultyJobStore, StoreOp};
pub use handler::{FailurePlan, HandledRecord, RecordingHandler};
pub use message::{test_registry, Add, Echo, SometimesFail, TestMessage};
pub use store::InMemoryJobStore;
