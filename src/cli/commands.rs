//! Launcher flag definitions and entry points.

use std::collections::HashSet;
use std::ffi::OsString;

use clap::{ArgAction, CommandFactory, Parser};
use tracing::info;

use crate::config::{LauncherConfig, Mode, RawConfig, ResolveMode};
use crate::error::ConfigError;
use crate::launcher;
use crate::sentinel::DEFAULT_MASTER_NAME;

/// Exit code for a malformed flag value.
const EXIT_CONFIG_ERROR: i32 = 2;

/// Exit code for any other fatal error.
const EXIT_FAILURE: i32 = 1;

/// Web UI and JSON API for a Redis-backed job queue.
#[derive(Parser, Debug, Clone)]
#[command(name = "workwebui")]
#[command(about = "Web UI and JSON API for a Redis-backed job queue")]
#[command(version)]
#[command(
    long_about = "workwebui serves an admin API and dashboard for the jobs stored under one Redis namespace.\n\nThe Redis master is located through Sentinel by default; use -mode direct to connect to -redis instead.\n\nExample usage:\n  workwebui -redis-sentinel 10.0.0.1:26379,10.0.0.2:26379 -master-name mymaster -ns work -listen :5040"
)]
pub struct Cli {
    /// Redis host:port or redis:// URL (direct mode).
    #[arg(long, default_value = ":6379", env = "WORK_WEBUI_REDIS")]
    pub redis: String,

    /// Redis Sentinel host:port, comma separated for several Sentinels.
    #[arg(long, default_value = ":26379", env = "WORK_WEBUI_REDIS_SENTINEL")]
    pub redis_sentinel: String,

    /// Master name monitored by Sentinel.
    #[arg(long, default_value = DEFAULT_MASTER_NAME, env = "WORK_WEBUI_MASTER_NAME")]
    pub master_name: String,

    /// Redis logical database index.
    #[arg(long, default_value = "0", allow_hyphen_values = true, env = "WORK_WEBUI_DATABASE")]
    pub database: String,

    /// Redis key namespace.
    #[arg(long = "ns", default_value = "work", env = "WORK_WEBUI_NS")]
    pub namespace: String,

    /// host:port to listen on for the HTTP JSON API.
    #[arg(long, default_value = ":5040", env = "WORK_WEBUI_LISTEN")]
    pub listen: String,

    /// How the Redis master is located.
    #[arg(long, value_enum, default_value_t = Mode::Sentinel, env = "WORK_WEBUI_MODE")]
    pub mode: Mode,

    /// When the master is resolved in Sentinel mode.
    #[arg(long, value_enum, default_value_t = ResolveMode::PerCheckout, env = "WORK_WEBUI_RESOLVE")]
    pub resolve: ResolveMode,

    /// Maximum connections checked out at once (0 = unbounded).
    #[arg(long, default_value_t = 64, env = "WORK_WEBUI_MAX_ACTIVE")]
    pub max_active: usize,

    /// Maximum idle connections kept for reuse.
    #[arg(long, default_value_t = 3, env = "WORK_WEBUI_MAX_IDLE")]
    pub max_idle: usize,

    /// Seconds before an idle connection is closed.
    #[arg(long, default_value_t = 240, env = "WORK_WEBUI_IDLE_TIMEOUT")]
    pub idle_timeout: u64,

    /// Wait for a free connection when the pool is exhausted instead of failing.
    #[arg(long, default_value_t = true, action = ArgAction::Set, env = "WORK_WEBUI_WAIT")]
    pub wait: bool,

    /// Seconds to wait for in-flight requests on shutdown.
    #[arg(long, default_value_t = 10, env = "WORK_WEBUI_SHUTDOWN_TIMEOUT")]
    pub shutdown_timeout: u64,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", env = "WORK_WEBUI_LOG_LEVEL")]
    pub log_level: String,
}

impl Cli {
    /// Copies the flag values into a [`RawConfig`] for validation.
    pub fn raw_config(&self) -> RawConfig {
        RawConfig {
            redis: self.redis.clone(),
            redis_sentinel: self.redis_sentinel.clone(),
            master_name: self.master_name.clone(),
            database: self.database.clone(),
            namespace: self.namespace.clone(),
            listen: self.listen.clone(),
            mode: self.mode,
            resolve: self.resolve,
            max_active: self.max_active,
            max_idle: self.max_idle,
            idle_timeout_secs: self.idle_timeout,
            wait: self.wait,
            shutdown_timeout_secs: self.shutdown_timeout,
        }
    }

    /// Validates the flags into a launcher configuration.
    pub fn to_config(&self) -> Result<LauncherConfig, ConfigError> {
        LauncherConfig::from_raw(self.raw_config())
    }
}

/// Rewrites Go-style single-dash long flags (`-redis`, `-ns=work`) into
/// their double-dash form. Short flags, values and everything after `--`
/// are left alone.
pub fn normalize_args<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let command = Cli::command();
    let long_flags: HashSet<String> = command
        .get_arguments()
        .filter_map(|arg| arg.get_long().map(str::to_string))
        .chain(["help", "version"].map(str::to_string))
        .collect();

    let mut passthrough = false;
    args.into_iter()
        .map(Into::into)
        .enumerate()
        .map(|(i, arg)| {
            // argv[0] is the program name.
            if i == 0 || passthrough {
                return arg;
            }
            let Some(s) = arg.to_str() else {
                return arg;
            };
            if s == "--" {
                passthrough = true;
                return arg;
            }
            if s.starts_with("--") || !s.starts_with('-') {
                return arg;
            }
            let name = s[1..].split('=').next().unwrap_or_default();
            if long_flags.contains(name) {
                OsString::from(format!("-{}", s))
            } else {
                arg
            }
        })
        .collect()
}

/// Parse CLI arguments from the process environment.
pub fn parse_cli() -> Cli {
    Cli::parse_from(normalize_args(std::env::args_os()))
}

/// Run the launcher with arguments parsed from the process environment.
///
/// For more control over logging initialization, use `parse_cli()` and
/// `run_with_cli()`.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the launcher with the parsed arguments until SIGINT or SIGTERM.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let config = cli.to_config()?;

    println!("{}", config.startup_banner());

    launcher::run(config, launcher::shutdown_signal()).await?;

    info!("Launcher exited");
    println!("\nQuitting...");
    Ok(())
}

/// Maps a fatal error to the process exit code.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<ConfigError>().is_some() {
        EXIT_CONFIG_ERROR
    } else {
        EXIT_FAILURE
    }
}
