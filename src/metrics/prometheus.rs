//! Prometheus metrics registration and export.
//!
//! This module defines the Prometheus metrics exported by workwebui and
//! provides functions for initializing, registering, and exporting them.

use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

/// Global Prometheus registry for all workwebui metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Connections currently checked out of the pool.
pub static POOL_ACTIVE: OnceLock<IntGauge> = OnceLock::new();

/// Connections currently idle in the pool.
pub static POOL_IDLE: OnceLock<IntGauge> = OnceLock::new();

/// Physical connections opened by the pool since startup.
pub static POOL_DIALS: OnceLock<IntGauge> = OnceLock::new();

/// Connections rejected by role validation since startup.
pub static POOL_VALIDATION_FAILURES: OnceLock<IntGauge> = OnceLock::new();

/// Total HTTP requests, labeled by route and status code.
pub static HTTP_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Safe to call more than once; later calls leave the first registry in place.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric creation or registration fails.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    // Pool metrics
    let pool_active = IntGauge::new(
        "workwebui_pool_active_connections",
        "Connections currently checked out of the pool",
    )?;
    let pool_idle = IntGauge::new(
        "workwebui_pool_idle_connections",
        "Connections currently idle in the pool",
    )?;
    let pool_dials = IntGauge::new(
        "workwebui_pool_dials",
        "Physical connections opened since startup",
    )?;
    let pool_validation_failures = IntGauge::new(
        "workwebui_pool_validation_failures",
        "Connections rejected by role validation since startup",
    )?;

    // HTTP metrics
    let http_requests_total = IntCounterVec::new(
        Opts::new("workwebui_http_requests_total", "Total HTTP requests"),
        &["route", "status"],
    )?;

    registry.register(Box::new(pool_active.clone()))?;
    registry.register(Box::new(pool_idle.clone()))?;
    registry.register(Box::new(pool_dials.clone()))?;
    registry.register(Box::new(pool_validation_failures.clone()))?;
    registry.register(Box::new(http_requests_total.clone()))?;

    // If any of these fail, metrics were initialized concurrently (idempotent)
    let _ = REGISTRY.set(registry);
    let _ = POOL_ACTIVE.set(pool_active);
    let _ = POOL_IDLE.set(pool_idle);
    let _ = POOL_DIALS.set(pool_dials);
    let _ = POOL_VALIDATION_FAILURES.set(pool_validation_failures);
    let _ = HTTP_REQUESTS_TOTAL.set(http_requests_total);

    tracing::debug!("Prometheus metrics initialized");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// If the registry has not been initialized or encoding fails, returns a
/// comment line describing the problem.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

/// Axum handler body for the `/metrics` endpoint.
pub async fn metrics_handler() -> String {
    export_metrics()
}
