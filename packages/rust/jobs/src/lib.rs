//! Concurrent task execution for docforge builds.
//!
//! - [`WorkerPool`]: a bounded pool that drains a task channel, strict or
//!   adaptive, fail-fast or fault-tolerant
//! - [`JobQueue`]: a named pool that stays open while tasks keep arriving
//! - [`WaitGroup`]: outstanding-work accounting shared by several queues

pub mod error;
pub mod pool;
pub mod queue;
pub mod wait_group;

pub use error::{JobError, WorkerError};
pub use pool::{TaskReceiver, TaskSender, Worker, WorkerFn, WorkerPool, channel};
pub use queue::{JobQueue, Submitter, Tracked};
pub use wait_group::{WaitGroup, WaitGuard};
