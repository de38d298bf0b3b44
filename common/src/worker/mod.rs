// Bounded-concurrency processing of queued work items

pub mod pool;

pub use pool::{Outcome, WorkItem, WorkerPool};
