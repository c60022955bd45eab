//! Error types for workwebui operations.
//!
//! Defines error types for each subsystem:
//! - Launcher configuration
//! - Master discovery through Redis Sentinel
//! - Connection pool checkout
//! - Admin operations over the job queue namespace
//! - Server shutdown

use std::time::Duration;

use thiserror::Error;

/// Errors raised while turning command-line flags into a launcher configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("'{0}' is not a valid database value")]
    InvalidDatabase(String),

    #[error("Invalid address '{value}' for -{flag}: {reason}")]
    InvalidAddress {
        flag: &'static str,
        value: String,
        reason: String,
    },

    #[error("No Sentinel addresses given in -redis-sentinel")]
    NoSentinels,

    #[error("Master name must not be empty")]
    EmptyMasterName,

    #[error("-redis URL selects database {url} but -database is {flag}")]
    DatabaseConflict { url: i64, flag: i64 },
}

/// Errors that can occur while resolving the current master.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Sentinel at {sentinel} knows no master named '{master}'")]
    NoMaster { sentinel: String, master: String },

    #[error("No Sentinel available for master '{master}': {last_error}")]
    NoSentinelAvailable { master: String, last_error: String },

    #[error("Sentinel query to {sentinel} failed: {reason}")]
    Query { sentinel: String, reason: String },

    #[error("Invalid Sentinel reply from {sentinel}: {reason}")]
    InvalidReply { sentinel: String, reason: String },
}

/// Errors returned by a connection pool checkout.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Failed to dial {addr}: {reason}")]
    Dial { addr: String, reason: String },

    #[error("Dial to {addr} timed out after {timeout:?}")]
    Timeout { addr: String, timeout: Duration },

    #[error("Role check failed: expected '{expected}', peer reports '{actual}'")]
    RoleMismatch { expected: String, actual: String },

    #[error("Master discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Connection pool exhausted ({max_active} active)")]
    Exhausted { max_active: usize },

    #[error("Connection pool is closed")]
    PoolClosed,

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Errors that can occur while stopping the admin server.
#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error("Server did not stop within {0:?}")]
    Timeout(Duration),

    #[error("Server task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Server loop failed: {0}")]
    Serve(#[from] std::io::Error),

    #[error("Server is not running")]
    NotRunning,
}

/// Errors that can occur during admin operations on the queue namespace.
#[derive(Debug, Error)]
pub enum WorkError {
    #[error("Connection unavailable: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Redis operation failed: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Job {job_id} (died at {died_at}) not found")]
    JobNotFound { died_at: i64, job_id: String },
}
