//! Recording helpers for workwebui metrics.
//!
//! `MetricsCollector` wraps the raw Prometheus metrics so call sites do not
//! have to deal with uninitialized registries or label plumbing. Every method
//! is a no-op until [`init_metrics`](super::init_metrics) has run.

use super::prometheus::{
    HTTP_REQUESTS_TOTAL, POOL_ACTIVE, POOL_DIALS, POOL_IDLE, POOL_VALIDATION_FAILURES,
};
use crate::pool::PoolStats;

/// Records workwebui operational metrics.
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Copies a pool statistics snapshot into the pool gauges.
    pub fn observe_pool(&self, stats: &PoolStats) {
        if let Some(g) = POOL_ACTIVE.get() {
            g.set(saturating_i64(stats.active as u64));
        }
        if let Some(g) = POOL_IDLE.get() {
            g.set(saturating_i64(stats.idle as u64));
        }
        if let Some(g) = POOL_DIALS.get() {
            g.set(saturating_i64(stats.dials));
        }
        if let Some(g) = POOL_VALIDATION_FAILURES.get() {
            g.set(saturating_i64(stats.validation_failures));
        }
    }

    /// Counts one served HTTP request.
    pub fn record_request(&self, route: &str, status: u16) {
        if let Some(counter) = HTTP_REQUESTS_TOTAL.get() {
            let status = status.to_string();
            counter.with_label_values(&[route, status.as_str()]).inc();
        }
    }
}

fn saturating_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}
