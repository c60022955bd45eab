//! Composition and lifecycle of the web UI process.
//!
//! The launcher builds the Redis pool for the configured mode, starts the
//! admin server, waits for a shutdown trigger and then stops everything in
//! order: server first (bounded by the shutdown timeout), pool second.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing::{error, info, warn};

use crate::config::{LauncherConfig, Mode, ResolveMode};
use crate::error::ConnectionError;
use crate::metrics::init_metrics;
use crate::pool::{connector::MASTER_ROLE, RedisConnector, RedisPool};
use crate::sentinel::{MasterResolver, SentinelResolver, StaticResolver};
use crate::webui::Server;
use crate::work::Client;

/// Builds the connection pool for `config`.
///
/// In Sentinel mode every connection is checked to be a master. With
/// `ResolveMode::Once` the master is resolved here and a failure is fatal;
/// otherwise resolution happens before each new physical connection.
pub async fn build_pool(config: &LauncherConfig) -> Result<RedisPool, ConnectionError> {
    let connector = match config.mode {
        Mode::Direct => {
            info!(addr = %config.redis, "Connecting to Redis directly");
            RedisConnector::new(
                Arc::new(StaticResolver::new(config.redis.clone())),
                config.database,
            )
        }
        Mode::Sentinel => {
            let sentinel =
                SentinelResolver::new(config.sentinels.clone(), config.master_name.clone());

            let resolver: Arc<dyn MasterResolver> = match config.resolve {
                ResolveMode::PerCheckout => Arc::new(sentinel),
                ResolveMode::Once => {
                    let addr = sentinel.master_addr().await?;
                    info!(master = %config.master_name, addr = %addr, "Resolved master once at startup");
                    Arc::new(StaticResolver::new(addr))
                }
            };

            RedisConnector::new(resolver, config.database).with_expected_role(MASTER_ROLE)
        }
    };

    Ok(RedisPool::new(connector, config.pool.clone()))
}

/// A running web UI: pool plus admin server.
pub struct Launcher {
    config: LauncherConfig,
    pool: RedisPool,
    server: Server,
}

impl Launcher {
    /// Builds the pool and starts the admin server. Returns once the server
    /// is accepting connections.
    pub async fn start(config: LauncherConfig) -> anyhow::Result<Self> {
        init_metrics().context("Failed to initialize metrics")?;

        let pool = build_pool(&config)
            .await
            .context("Failed to build Redis connection pool")?;

        let client = Client::new(config.namespace.clone(), pool.clone());
        let server = Server::start(config.listen, client)
            .await
            .with_context(|| format!("Failed to listen on {}", config.listen))?;

        info!(
            addr = %server.local_addr(),
            namespace = %config.namespace,
            mode = config.mode.as_str(),
            "workwebui started"
        );

        Ok(Self {
            config,
            pool,
            server,
        })
    }

    /// The address the admin server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    pub fn pool(&self) -> &RedisPool {
        &self.pool
    }

    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }

    /// Stops the server within the configured timeout, then closes the pool.
    /// A server that fails to stop in time is logged and abandoned.
    pub async fn shutdown(mut self) {
        let timeout = self.config.shutdown_timeout;
        match self.server.stop(timeout).await {
            Ok(()) => info!("Admin server stopped cleanly"),
            Err(e) => warn!(error = %e, "Admin server shutdown incomplete"),
        }

        self.pool.close();
        info!(stats = ?self.pool.stats(), "Connection pool closed");
    }
}

/// Runs the web UI until `shutdown` completes.
pub async fn run<F>(config: LauncherConfig, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()>,
{
    let launcher = Launcher::start(config).await?;

    shutdown.await;
    warn!("Starting graceful shutdown...");

    launcher.shutdown().await;
    Ok(())
}

/// Completes on SIGINT (Ctrl+C) or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
