//! Command-line interface for workwebui.
//!
//! Parses launcher flags, accepting Go-style single-dash long flags
//! (`-redis :6379`) alongside the usual `--redis :6379`.

mod commands;

pub use commands::{exit_code, normalize_args, parse_cli, run, run_with_cli, Cli};
