//! Redis key layout for one queue namespace.
//!
//! Every key lives under the namespace prefix, so several deployments can share
//! one Redis database without colliding:
//!
//! - `{ns}:known_jobs`: set of job names ever enqueued
//! - `{ns}:jobs:{name}`: pending jobs for one name (list, newest at the head)
//! - `{ns}:retry`, `{ns}:scheduled`, `{ns}:dead`: sorted sets scored by time
//! - `{ns}:worker_pools`: set of worker pool ids
//! - `{ns}:worker_pools:{id}`: heartbeat hash of one worker pool
//! - `{ns}:worker:{id}`: observation hash of one worker

/// Builds namespaced Redis keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keys {
    prefix: String,
}

impl Keys {
    /// Creates the key builder for `namespace`.
    ///
    /// A `:` separator is appended unless the namespace is empty or already
    /// ends with one.
    pub fn new(namespace: &str) -> Self {
        let prefix = if namespace.is_empty() || namespace.ends_with(':') {
            namespace.to_string()
        } else {
            format!("{}:", namespace)
        };
        Self { prefix }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn known_jobs(&self) -> String {
        format!("{}known_jobs", self.prefix)
    }

    pub fn jobs(&self, job_name: &str) -> String {
        format!("{}jobs:{}", self.prefix, job_name)
    }

    pub fn retry(&self) -> String {
        format!("{}retry", self.prefix)
    }

    pub fn scheduled(&self) -> String {
        format!("{}scheduled", self.prefix)
    }

    pub fn dead(&self) -> String {
        format!("{}dead", self.prefix)
    }

    pub fn worker_pools(&self) -> String {
        format!("{}worker_pools", self.prefix)
    }

    pub fn heartbeat(&self, worker_pool_id: &str) -> String {
        format!("{}worker_pools:{}", self.prefix, worker_pool_id)
    }

    pub fn worker_observation(&self, worker_id: &str) -> String {
        format!("{}worker:{}", self.prefix, worker_id)
    }
}
