//! Redis implementation of [`Connector`].
//!
//! Each new physical connection asks the configured [`MasterResolver`] for the
//! current address first, so a pool built on a [`SentinelResolver`] follows
//! failovers without restarting. When an expected role is set, every checkout
//! issues `ROLE` and rejects peers that report anything else.
//!
//! [`SentinelResolver`]: crate::sentinel::SentinelResolver

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{ConnectionInfo, IntoConnectionInfo};
use tracing::debug;

use super::{Connector, Pool};
use crate::error::ConnectionError;
use crate::sentinel::MasterResolver;

/// Default timeout for dialing the master.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Role a Sentinel-managed connection must report.
pub const MASTER_ROLE: &str = "master";

/// Pool of Redis connections.
pub type RedisPool = Pool<RedisConnector>;

/// Dials Redis at whatever address the resolver reports.
pub struct RedisConnector {
    resolver: Arc<dyn MasterResolver>,
    database: i64,
    dial_timeout: Duration,
    expected_role: Option<String>,
}

impl RedisConnector {
    /// Creates a connector without role validation.
    pub fn new(resolver: Arc<dyn MasterResolver>, database: i64) -> Self {
        Self {
            resolver,
            database,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            expected_role: None,
        }
    }

    /// Requires every connection to report `role` from the `ROLE` command.
    pub fn with_expected_role(mut self, role: impl Into<String>) -> Self {
        self.expected_role = Some(role.into());
        self
    }

    /// Sets the dial timeout.
    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    pub fn expected_role(&self) -> Option<&str> {
        self.expected_role.as_deref()
    }

    pub fn database(&self) -> i64 {
        self.database
    }
}

#[async_trait]
impl Connector for RedisConnector {
    type Connection = MultiplexedConnection;

    async fn connect(&self) -> Result<MultiplexedConnection, ConnectionError> {
        let addr = self.resolver.master_addr().await?;
        let info = connection_info(&addr, self.database)?;

        let client = redis::Client::open(info).map_err(|e| ConnectionError::Dial {
            addr: addr.clone(),
            reason: e.to_string(),
        })?;

        match tokio::time::timeout(self.dial_timeout, client.get_multiplexed_async_connection())
            .await
        {
            Ok(Ok(conn)) => {
                debug!(addr = %addr, database = self.database, "Dialed Redis");
                Ok(conn)
            }
            Ok(Err(e)) => Err(ConnectionError::Dial {
                addr,
                reason: e.to_string(),
            }),
            Err(_) => Err(ConnectionError::Timeout {
                addr,
                timeout: self.dial_timeout,
            }),
        }
    }

    async fn validate(&self, conn: &mut MultiplexedConnection) -> Result<(), ConnectionError> {
        let Some(expected) = self.expected_role.as_deref() else {
            return Ok(());
        };

        let reply: Vec<redis::Value> = redis::cmd("ROLE").query_async(conn).await?;
        let actual = role_from_reply(&reply);
        check_role(expected, actual.as_deref())
    }
}

/// Returns whether `addr` is a full `redis://` or `rediss://` URL.
pub fn is_redis_url(addr: &str) -> bool {
    addr.starts_with("redis://") || addr.starts_with("rediss://")
}

/// Builds the connection parameters for `addr`, which is either `host:port`
/// or a full `redis://`/`rediss://` URL.
///
/// A nonzero `database` always selects that database. A database of `0`
/// leaves a URL's own database path in effect.
pub fn connection_info(addr: &str, database: i64) -> Result<ConnectionInfo, ConnectionError> {
    let url = if is_redis_url(addr) {
        addr.to_string()
    } else {
        format!("redis://{}/", addr)
    };

    let mut info = url
        .as_str()
        .into_connection_info()
        .map_err(|e| ConnectionError::Dial {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?;
    if database != 0 {
        info.redis.db = database;
    }
    Ok(info)
}

/// Extracts the role name, the first element of a `ROLE` reply.
pub fn role_from_reply(reply: &[redis::Value]) -> Option<String> {
    reply
        .first()
        .and_then(|v| redis::from_redis_value::<String>(v).ok())
}

/// Compares the reported role against the expected one.
pub fn check_role(expected: &str, actual: Option<&str>) -> Result<(), ConnectionError> {
    match actual {
        Some(role) if role.eq_ignore_ascii_case(expected) => Ok(()),
        other => Err(ConnectionError::RoleMismatch {
            expected: expected.to_string(),
            actual: other.unwrap_or("unknown").to_string(),
        }),
    }
}
