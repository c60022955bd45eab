//! Read and admin access to a Redis-backed job queue.
//!
//! The queue engine that runs jobs is a separate process; this module only
//! understands the state it leaves in Redis:
//!
//! - **Keys**: the namespaced key layout
//! - **Job records**: jobs, their retry/schedule/death scores, worker pool
//!   heartbeats and worker observations
//! - **Client**: the operations the web UI exposes
//!
//! # Example
//!
//! ```rust,ignore
//! use work_webui::work::Client;
//!
//! let client = Client::new("work", pool);
//! for queue in client.queues().await? {
//!     println!("{}: {} pending, {}s latency", queue.job_name, queue.count, queue.latency);
//! }
//! client.retry_dead_job(died_at, "4f1c").await?;
//! ```

pub mod client;
pub mod job;
pub mod keys;

#[cfg(test)]
pub(crate) mod testing;

pub use client::Client;
pub use job::{
    DeadJob, Job, JobPage, Queue, RetryJob, ScheduledJob, WorkerObservation, WorkerPoolHeartbeat,
};
pub use keys::Keys;
