//! Launcher configuration.
//!
//! Command-line flags are parsed once into an immutable [`LauncherConfig`]
//! which is then passed explicitly to the pool and server builders. All
//! validation happens here, before any network activity.

use std::fmt::Write as _;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use clap::ValueEnum;
use redis::IntoConnectionInfo;

use crate::error::ConfigError;
use crate::pool::connector::is_redis_url;
use crate::pool::PoolConfig;

/// Host used when a dial address omits one (`:6379`).
const DEFAULT_DIAL_HOST: &str = "127.0.0.1";

/// Host used when the listen address omits one (`:5040`).
const DEFAULT_LISTEN_HOST: &str = "0.0.0.0";

/// How the Redis master is located.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Ask Redis Sentinel for the current master and check its role.
    #[default]
    Sentinel,
    /// Connect to `-redis` directly.
    Direct,
}

/// When the master is resolved in Sentinel mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ResolveMode {
    /// Before every new physical connection.
    #[default]
    PerCheckout,
    /// Once at startup; the pool then dials that address.
    Once,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Sentinel => "sentinel",
            Mode::Direct => "direct",
        }
    }
}

impl ResolveMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolveMode::PerCheckout => "per-checkout",
            ResolveMode::Once => "once",
        }
    }
}

/// Raw flag values, before validation.
#[derive(Debug, Clone)]
pub struct RawConfig {
    pub redis: String,
    pub redis_sentinel: String,
    pub master_name: String,
    pub database: String,
    pub namespace: String,
    pub listen: String,
    pub mode: Mode,
    pub resolve: ResolveMode,
    pub max_active: usize,
    pub max_idle: usize,
    pub idle_timeout_secs: u64,
    pub wait: bool,
    pub shutdown_timeout_secs: u64,
}

/// Validated launcher configuration.
#[derive(Debug, Clone)]
pub struct LauncherConfig {
    /// Dial address (`host:port`) or `redis://` URL used in direct mode.
    pub redis: String,
    /// Sentinel addresses, in the order they are asked.
    pub sentinels: Vec<String>,
    pub master_name: String,
    pub database: i64,
    /// Key namespace, passed through unmodified.
    pub namespace: String,
    pub listen: SocketAddr,
    pub mode: Mode,
    pub resolve: ResolveMode,
    pub pool: PoolConfig,
    pub shutdown_timeout: Duration,
}

impl LauncherConfig {
    /// Validates raw flag values.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` naming the first offending value.
    pub fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let mut database = parse_database(&raw.database)?;
        let redis = normalize_dial_addr("redis", &raw.redis)?;
        if raw.mode == Mode::Direct {
            database = effective_database(&redis, database)?;
        }

        let sentinels = parse_sentinels(&raw.redis_sentinel)?;
        let master_name = raw.master_name.trim().to_string();
        if raw.mode == Mode::Sentinel {
            if sentinels.is_empty() {
                return Err(ConfigError::NoSentinels);
            }
            if master_name.is_empty() {
                return Err(ConfigError::EmptyMasterName);
            }
        }

        let listen = parse_listen_addr(&raw.listen)?;

        let pool = PoolConfig::default()
            .with_max_active(raw.max_active)
            .with_max_idle(raw.max_idle)
            .with_idle_timeout(Duration::from_secs(raw.idle_timeout_secs))
            .with_wait(raw.wait);

        Ok(Self {
            redis,
            sentinels,
            master_name,
            database,
            namespace: raw.namespace,
            listen,
            mode: raw.mode,
            resolve: raw.resolve,
            pool,
            shutdown_timeout: Duration::from_secs(raw.shutdown_timeout_secs),
        })
    }

    /// The human-readable configuration printed at startup.
    pub fn startup_banner(&self) -> String {
        let mut out = String::from("Starting workwebui:\n");
        let _ = writeln!(out, "mode = {}", self.mode.as_str());
        match self.mode {
            Mode::Direct => {
                let _ = writeln!(out, "redis = {}", self.redis);
            }
            Mode::Sentinel => {
                let _ = writeln!(out, "redis-sentinel = {}", self.sentinels.join(","));
                let _ = writeln!(out, "master-name = {}", self.master_name);
                let _ = writeln!(out, "resolve = {}", self.resolve.as_str());
            }
        }
        let _ = writeln!(out, "database = {}", self.database);
        let _ = writeln!(out, "namespace = {}", self.namespace);
        let _ = writeln!(out, "listen = {}", self.listen);
        let _ = write!(
            out,
            "pool = max-active {}, max-idle {}, idle-timeout {}s, wait {}",
            self.pool.max_active,
            self.pool.max_idle,
            self.pool.idle_timeout.as_secs(),
            self.pool.wait
        );
        out
    }
}

/// Parses the logical database index.
pub fn parse_database(value: &str) -> Result<i64, ConfigError> {
    match value.trim().parse::<i64>() {
        Ok(db) if db >= 0 => Ok(db),
        _ => Err(ConfigError::InvalidDatabase(value.to_string())),
    }
}

/// Normalizes a dial address. Host-less addresses dial the loopback host;
/// `redis://` and `rediss://` URLs are kept verbatim.
pub fn normalize_dial_addr(flag: &'static str, value: &str) -> Result<String, ConfigError> {
    let value = value.trim();
    if is_redis_url(value) {
        return Ok(value.to_string());
    }

    let invalid = |reason: &str| ConfigError::InvalidAddress {
        flag,
        value: value.to_string(),
        reason: reason.to_string(),
    };

    let Some((host, port)) = value.rsplit_once(':') else {
        return Err(invalid("expected host:port"));
    };
    if port.parse::<u16>().is_err() {
        return Err(invalid("port is not a number"));
    }

    if host.is_empty() {
        Ok(format!("{}:{}", DEFAULT_DIAL_HOST, port))
    } else {
        Ok(value.to_string())
    }
}

/// Returns the database a direct connection to `redis` will select.
///
/// A nonzero `-database` wins over a `redis://` URL without a database path;
/// a URL path is used when the flag is `0`. A URL path that disagrees with a
/// nonzero flag is rejected.
pub fn effective_database(redis: &str, database: i64) -> Result<i64, ConfigError> {
    if !is_redis_url(redis) {
        return Ok(database);
    }

    let info = redis
        .into_connection_info()
        .map_err(|e| ConfigError::InvalidAddress {
            flag: "redis",
            value: redis.to_string(),
            reason: e.to_string(),
        })?;

    let url = info.redis.db;
    match (url, database) {
        (url, 0) => Ok(url),
        (0, flag) => Ok(flag),
        (url, flag) if url == flag => Ok(flag),
        (url, flag) => Err(ConfigError::DatabaseConflict { url, flag }),
    }
}

/// Splits a comma separated Sentinel list and normalizes each address.
pub fn parse_sentinels(value: &str) -> Result<Vec<String>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|addr| normalize_dial_addr("redis-sentinel", addr))
        .collect()
}

/// Parses the HTTP listen address. Host-less addresses listen on all
/// interfaces.
pub fn parse_listen_addr(value: &str) -> Result<SocketAddr, ConfigError> {
    let value = value.trim();
    let full = if value.starts_with(':') {
        format!("{}{}", DEFAULT_LISTEN_HOST, value)
    } else {
        value.to_string()
    };

    if let Ok(addr) = full.parse::<SocketAddr>() {
        return Ok(addr);
    }

    let invalid = |reason: String| ConfigError::InvalidAddress {
        flag: "listen",
        value: value.to_string(),
        reason,
    };

    // Hostnames such as localhost:5040
    full.to_socket_addrs()
        .map_err(|e| invalid(e.to_string()))?
        .next()
        .ok_or_else(|| invalid("address resolved to nothing".to_string()))
}
