//! Admin/monitor HTTP server for one job queue namespace.
//!
//! Serves a JSON API over the queue state (queues, worker pools, busy
//! workers, retry/scheduled/dead jobs), the administrative dead job actions,
//! Prometheus metrics and a small browser dashboard.
//!
//! # Lifecycle
//!
//! [`Server::start`] binds the listener, spawns the serve loop and returns
//! with the bound address. [`Server::stop`] signals the loop over a broadcast
//! channel and waits a bounded time for in-flight requests to finish.
//!
//! ```rust,ignore
//! let mut server = Server::start("127.0.0.1:5040".parse()?, client).await?;
//! println!("listening on {}", server.local_addr());
//! server.stop(Duration::from_secs(10)).await?;
//! ```

pub mod error;
pub mod routes;

pub use error::WebUiError;
pub use routes::{router, AppState};

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::ShutdownError;
use crate::work::Client;

/// A running admin server.
pub struct Server {
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    handle: Option<JoinHandle<std::io::Result<()>>>,
}

impl Server {
    /// Binds `listen` and starts serving the admin API for `client`.
    ///
    /// Returns once the listener is bound; requests are served on a spawned
    /// task.
    pub async fn start(listen: SocketAddr, client: Client) -> std::io::Result<Self> {
        let listener = TcpListener::bind(listen).await?;
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let app = router(client);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                })
                .await
        });

        info!(addr = %local_addr, "Admin server listening");

        Ok(Self {
            local_addr,
            shutdown_tx,
            handle: Some(handle),
        })
    }

    /// The address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stops accepting connections and waits up to `timeout` for in-flight
    /// requests to drain. If the bound is exceeded the serve loop is aborted.
    pub async fn stop(&mut self, timeout: Duration) -> Result<(), ShutdownError> {
        let Some(mut handle) = self.handle.take() else {
            return Err(ShutdownError::NotRunning);
        };

        // No receiver means the loop already exited.
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(joined) => {
                joined??;
                info!(addr = %self.local_addr, "Admin server stopped");
                Ok(())
            }
            Err(_) => {
                warn!(addr = %self.local_addr, timeout = ?timeout, "Admin server did not drain in time, aborting");
                handle.abort();
                Err(ShutdownError::Timeout(timeout))
            }
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
