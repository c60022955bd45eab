//! work-webui: admin web UI and JSON API for a Redis-backed job queue.
//!
//! This library provides a bounded Redis connection pool that can locate the
//! master through Redis Sentinel, the admin operations over a queue
//! namespace, and the HTTP server and launcher that expose them.

pub mod cli;
pub mod config;
pub mod error;
pub mod launcher;
pub mod metrics;
pub mod pool;
pub mod sentinel;
pub mod webui;
pub mod work;

// Re-export commonly used error types
pub use error::{ConfigError, ConnectionError, DiscoveryError, ShutdownError, WorkError};
