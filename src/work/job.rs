//! Records read from and written to the queue namespace.
//!
//! - `Job`: a job as persisted by the queue engine
//! - `RetryJob`, `ScheduledJob`, `DeadJob`: a job plus its sorted-set score
//! - `Queue`: pending count and latency of one job name
//! - `WorkerPoolHeartbeat`, `WorkerObservation`: liveness and activity of workers

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Number of jobs returned per page by the paged listings.
pub const JOBS_PER_PAGE: isize = 20;

fn is_zero(n: &i64) -> bool {
    *n == 0
}

/// A job as stored in Redis by the queue engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    /// Job name; selects the queue the job is pushed to.
    #[serde(default)]
    pub name: String,
    /// Unique job id.
    pub id: String,
    /// Unix time (seconds) the job was enqueued.
    #[serde(rename = "t")]
    pub enqueued_at: i64,
    /// Arguments handed to the job handler.
    #[serde(default)]
    pub args: Option<Map<String, Value>>,
    /// Whether at most one instance with these arguments may be queued.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unique: bool,
    /// Number of failed attempts so far.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub fails: i64,
    /// Error from the last failed attempt.
    #[serde(rename = "err", default, skip_serializing_if = "String::is_empty")]
    pub last_err: String,
    /// Unix time (seconds) of the last failure.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub failed_at: i64,
}

impl Job {
    /// Parses a job from its stored JSON form.
    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }

    /// Clears the failure bookkeeping so the job runs as if freshly enqueued.
    pub fn reset_failures(&mut self) {
        self.fails = 0;
        self.last_err.clear();
        self.failed_at = 0;
    }

    /// Seconds between enqueueing and `now`, never negative.
    pub fn latency_at(&self, now: i64) -> i64 {
        (now - self.enqueued_at).max(0)
    }
}

/// A job waiting to be retried.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RetryJob {
    pub retry_at: i64,
    #[serde(flatten)]
    pub job: Job,
}

/// A job waiting for its scheduled run time.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ScheduledJob {
    pub run_at: i64,
    #[serde(flatten)]
    pub job: Job,
}

/// A job that exhausted its retries.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DeadJob {
    pub died_at: i64,
    #[serde(flatten)]
    pub job: Job,
}

/// One page of a paged listing plus the total size of the set.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JobPage<T> {
    pub count: i64,
    pub jobs: Vec<T>,
}

/// Pending jobs for one job name.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Queue {
    pub job_name: String,
    pub count: i64,
    /// Seconds the oldest pending job has been waiting.
    pub latency: i64,
}

/// Heartbeat written periodically by a running worker pool.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WorkerPoolHeartbeat {
    pub worker_pool_id: String,
    pub started_at: i64,
    pub heartbeat_at: i64,
    pub job_names: Vec<String>,
    pub concurrency: u32,
    pub host: String,
    pub pid: i64,
    pub worker_ids: Vec<String>,
}

impl WorkerPoolHeartbeat {
    /// Builds a heartbeat from the fields of its Redis hash.
    pub fn from_fields(worker_pool_id: &str, fields: &HashMap<String, String>) -> Self {
        Self {
            worker_pool_id: worker_pool_id.to_string(),
            started_at: int_field(fields, "started_at"),
            heartbeat_at: int_field(fields, "heartbeat_at"),
            job_names: list_field(fields, "job_names"),
            concurrency: int_field(fields, "concurrency").clamp(0, u32::MAX as i64) as u32,
            host: string_field(fields, "host"),
            pid: int_field(fields, "pid"),
            worker_ids: list_field(fields, "worker_ids"),
        }
    }
}

/// What a single worker is doing right now.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WorkerObservation {
    pub worker_id: String,
    pub is_busy: bool,
    pub job_name: String,
    pub job_id: String,
    pub started_at: i64,
    pub args_json: String,
    pub checkin: String,
    pub checkin_at: i64,
}

impl WorkerObservation {
    /// Builds an observation from the fields of its Redis hash. A worker with
    /// no current job name is idle.
    pub fn from_fields(worker_id: &str, fields: &HashMap<String, String>) -> Self {
        let job_name = string_field(fields, "job_name");
        Self {
            worker_id: worker_id.to_string(),
            is_busy: !job_name.is_empty(),
            job_name,
            job_id: string_field(fields, "job_id"),
            started_at: int_field(fields, "started_at"),
            args_json: string_field(fields, "args"),
            checkin: string_field(fields, "checkin"),
            checkin_at: int_field(fields, "checkin_at"),
        }
    }
}

fn string_field(fields: &HashMap<String, String>, key: &str) -> String {
    fields.get(key).cloned().unwrap_or_default()
}

fn int_field(fields: &HashMap<String, String>, key: &str) -> i64 {
    fields
        .get(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

fn list_field(fields: &HashMap<String, String>, key: &str) -> Vec<String> {
    fields
        .get(key)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Zero-based `ZRANGE` bounds for a one-based page number. Page `0` is
/// treated as page `1`.
pub fn page_bounds(page: u32) -> (isize, isize) {
    let page = page.max(1) as isize;
    let start = (page - 1) * JOBS_PER_PAGE;
    (start, start + JOBS_PER_PAGE - 1)
}

/// Current unix time in seconds.
pub fn now_epoch() -> i64 {
    Utc::now().timestamp()
}
