//! Master discovery through Redis Sentinel.
//!
//! A [`MasterResolver`] answers one question: which address currently holds
//! the primary role. Two implementations are provided:
//!
//! - [`SentinelResolver`]: asks a list of Sentinels for the named master,
//!   moving whichever Sentinel answers to the front of the list
//! - [`StaticResolver`]: always returns the same address (direct mode, or a
//!   master resolved once at startup)
//!
//! The network call is isolated behind [`SentinelQuery`] so resolution policy
//! does not depend on a live Sentinel.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::DiscoveryError;

/// Default connect and read timeout for a single Sentinel query.
pub const DEFAULT_SENTINEL_TIMEOUT: Duration = Duration::from_millis(500);

/// Default master name monitored by Sentinel.
pub const DEFAULT_MASTER_NAME: &str = "mymaster";

/// Resolves the address of the current master.
#[async_trait]
pub trait MasterResolver: Send + Sync {
    /// Returns the current master address as `host:port`.
    async fn master_addr(&self) -> Result<String, DiscoveryError>;
}

/// A resolver that always returns the same address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticResolver {
    addr: String,
}

impl StaticResolver {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl MasterResolver for StaticResolver {
    async fn master_addr(&self) -> Result<String, DiscoveryError> {
        Ok(self.addr.clone())
    }
}

/// A single `SENTINEL get-master-addr-by-name` exchange.
#[async_trait]
pub trait SentinelQuery: Send + Sync {
    /// Asks `sentinel` for the address of `master`.
    ///
    /// Returns `Ok(None)` when the Sentinel answers but does not monitor a
    /// master with that name.
    async fn get_master_addr_by_name(
        &self,
        sentinel: &str,
        master: &str,
    ) -> Result<Option<(String, u16)>, DiscoveryError>;
}

/// [`SentinelQuery`] over a real Redis connection.
#[derive(Debug, Clone)]
pub struct RedisSentinelQuery {
    timeout: Duration,
}

impl Default for RedisSentinelQuery {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_SENTINEL_TIMEOUT,
        }
    }
}

impl RedisSentinelQuery {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl SentinelQuery for RedisSentinelQuery {
    async fn get_master_addr_by_name(
        &self,
        sentinel: &str,
        master: &str,
    ) -> Result<Option<(String, u16)>, DiscoveryError> {
        let query_error = |reason: String| DiscoveryError::Query {
            sentinel: sentinel.to_string(),
            reason,
        };

        let client = redis::Client::open(format!("redis://{}/", sentinel))
            .map_err(|e| query_error(e.to_string()))?;

        let mut conn = tokio::time::timeout(self.timeout, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| query_error(format!("connect timed out after {:?}", self.timeout)))?
            .map_err(|e| query_error(e.to_string()))?;

        let reply: Option<(String, String)> = tokio::time::timeout(
            self.timeout,
            redis::cmd("SENTINEL")
                .arg("get-master-addr-by-name")
                .arg(master)
                .query_async(&mut conn),
        )
        .await
        .map_err(|_| query_error(format!("reply timed out after {:?}", self.timeout)))?
        .map_err(|e| query_error(e.to_string()))?;

        match reply {
            None => Ok(None),
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| DiscoveryError::InvalidReply {
                    sentinel: sentinel.to_string(),
                    reason: format!("port '{}' is not a number", port),
                })?;
                Ok(Some((host, port)))
            }
        }
    }
}

/// Resolves the master by asking Sentinels in order.
///
/// The first Sentinel that answers wins and is moved to the front so later
/// resolutions ask it first. Unreachable Sentinels are skipped. A Sentinel
/// that answers but knows no such master is skipped like an unreachable one;
/// if no Sentinel yields an address and at least one answered, resolution
/// fails with `DiscoveryError::NoMaster`.
pub struct SentinelResolver<Q = RedisSentinelQuery> {
    master_name: String,
    sentinels: Mutex<Vec<String>>,
    query: Q,
}

impl SentinelResolver<RedisSentinelQuery> {
    /// Creates a resolver that queries Sentinels over the network.
    pub fn new(sentinels: Vec<String>, master_name: impl Into<String>) -> Self {
        Self::with_query(sentinels, master_name, RedisSentinelQuery::default())
    }
}

impl<Q: SentinelQuery> SentinelResolver<Q> {
    /// Creates a resolver with a custom query implementation.
    pub fn with_query(sentinels: Vec<String>, master_name: impl Into<String>, query: Q) -> Self {
        Self {
            master_name: master_name.into(),
            sentinels: Mutex::new(sentinels),
            query,
        }
    }

    pub fn master_name(&self) -> &str {
        &self.master_name
    }

    /// Returns the Sentinel addresses in the order they will be tried.
    pub fn sentinels(&self) -> Vec<String> {
        self.sentinel_list().clone()
    }

    fn sentinel_list(&self) -> MutexGuard<'_, Vec<String>> {
        self.sentinels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn promote(&self, sentinel: &str) {
        let mut list = self.sentinel_list();
        if let Some(pos) = list.iter().position(|s| s == sentinel) {
            if pos > 0 {
                let addr = list.remove(pos);
                list.insert(0, addr);
            }
        }
    }
}

#[async_trait]
impl<Q: SentinelQuery> MasterResolver for SentinelResolver<Q> {
    async fn master_addr(&self) -> Result<String, DiscoveryError> {
        let candidates = self.sentinels();
        let mut last_error = None;
        let mut no_master = None;

        for sentinel in &candidates {
            match self
                .query
                .get_master_addr_by_name(sentinel, &self.master_name)
                .await
            {
                Ok(Some((host, port))) => {
                    self.promote(sentinel);
                    let addr = format_host_port(&host, port);
                    debug!(sentinel = %sentinel, master = %addr, "Resolved master");
                    return Ok(addr);
                }
                Ok(None) => {
                    warn!(sentinel = %sentinel, master = %self.master_name, "Sentinel knows no such master");
                    if no_master.is_none() {
                        no_master = Some(sentinel.clone());
                    }
                }
                Err(e) => {
                    warn!(sentinel = %sentinel, error = %e, "Sentinel unavailable");
                    last_error = Some(e.to_string());
                }
            }
        }

        if let Some(sentinel) = no_master {
            return Err(DiscoveryError::NoMaster {
                sentinel,
                master: self.master_name.clone(),
            });
        }

        Err(DiscoveryError::NoSentinelAvailable {
            master: self.master_name.clone(),
            last_error: last_error.unwrap_or_else(|| "no Sentinel addresses configured".to_string()),
        })
    }
}

/// Joins a host and port, bracketing IPv6 literals.
pub fn format_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
