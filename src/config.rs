//! Command-line and environment configuration.

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;

use crate::upgrade::compiler::CompilerSettings;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const COMMIT: &str = env!("BUILD_COMMIT");
pub const BUILD_DATE: &str = env!("BUILD_DATE");

// ============================================================================
// Environment variable names
// ============================================================================
pub mod env {
    pub const INVENTORY: &str = "RUO_INVENTORY";
    pub const LOG_FORMAT: &str = "LOG_FORMAT";
    pub const LOG_LEVEL: &str = "LOG_LEVEL";
    pub const HEALTH_PORT: &str = "HEALTH_PORT";
    pub const METRICS_PORT: &str = "METRICS_PORT";
    pub const API_PORT: &str = "API_PORT";
    pub const AGENT_TASK_TIMEOUT_SECS: &str = "AGENT_TASK_TIMEOUT_SECS";
    pub const SERVER_ACTION_TIMEOUT_SECS: &str = "SERVER_ACTION_TIMEOUT_SECS";
}

/// Rolling upgrade orchestrator for managed service clusters.
#[derive(Parser, Debug, Clone)]
#[command(name = "ruo")]
#[command(about = "Rolling upgrade orchestrator for managed service clusters")]
#[command(version = const_format::formatcp!(
    "{} (commit: {}, build date: {})",
    VERSION, COMMIT, BUILD_DATE
))]
pub struct Args {
    /// Inventory file describing stacks, clusters and prerequisite rules
    #[arg(long, env = env::INVENTORY, default_value = "/etc/ruo/inventory.yaml")]
    pub inventory: PathBuf,

    /// Log format: json or compact
    #[arg(long, env = env::LOG_FORMAT, default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = env::LOG_LEVEL, default_value = "info")]
    pub log_level: String,

    /// Health check server port
    #[arg(long, env = env::HEALTH_PORT, default_value = "8080")]
    pub health_port: u16,

    /// Prometheus metrics server port
    #[arg(long, env = env::METRICS_PORT, default_value = "8081")]
    pub metrics_port: u16,

    /// Plan API server port
    #[arg(long, env = env::API_PORT, default_value = "8082")]
    pub api_port: u16,

    /// Default timeout of agent commands, in seconds
    #[arg(long, env = env::AGENT_TASK_TIMEOUT_SECS, default_value = "900")]
    pub agent_task_timeout_secs: u32,

    /// Timeout of in-process server actions, in seconds
    #[arg(long, env = env::SERVER_ACTION_TIMEOUT_SECS, default_value = "1200")]
    pub server_action_timeout_secs: u32,
}

/// Validated runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub inventory: PathBuf,
    pub log_format: String,
    pub log_level: String,
    pub health_port: u16,
    pub metrics_port: u16,
    pub api_port: u16,
    pub compiler: CompilerSettings,
}

impl Config {
    /// Create config from CLI arguments.
    pub fn from_args(args: Args) -> Result<Self> {
        let log_format = args.log_format.to_lowercase();
        if !matches!(log_format.as_str(), "json" | "compact") {
            bail!("Unsupported log format '{}', expected json or compact", args.log_format);
        }

        let ports = [args.health_port, args.metrics_port, args.api_port];
        if ports[0] == ports[1] || ports[0] == ports[2] || ports[1] == ports[2] {
            bail!(
                "Health ({}), metrics ({}) and API ({}) ports must differ",
                args.health_port,
                args.metrics_port,
                args.api_port
            );
        }

        if args.agent_task_timeout_secs == 0 || args.server_action_timeout_secs == 0 {
            bail!("Timeouts must be greater than zero");
        }

        Ok(Self {
            inventory: args.inventory,
            log_format,
            log_level: args.log_level,
            health_port: args.health_port,
            metrics_port: args.metrics_port,
            api_port: args.api_port,
            compiler: CompilerSettings {
                agent_task_timeout_secs: args.agent_task_timeout_secs,
                server_action_timeout_secs: args.server_action_timeout_secs,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["ruo", "--inventory", "/tmp/inventory.yaml"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_args(parse(&[])).unwrap();
        assert_eq!(config.log_format, "json");
        assert_eq!(config.health_port, 8080);
        assert_eq!(config.metrics_port, 8081);
        assert_eq!(config.api_port, 8082);
        assert_eq!(config.compiler, CompilerSettings::default());
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_args(parse(&[
            "--log-format",
            "COMPACT",
            "--agent-task-timeout-secs",
            "1800",
        ]))
        .unwrap();
        assert_eq!(config.log_format, "compact");
        assert_eq!(config.compiler.agent_task_timeout_secs, 1800);
        assert_eq!(config.compiler.server_action_timeout_secs, 1200);
    }

    #[test]
    fn test_invalid_log_format() {
        let err = Config::from_args(parse(&["--log-format", "pretty"])).unwrap_err();
        assert!(err.to_string().contains("Unsupported log format"));
    }

    #[test]
    fn test_port_collision() {
        assert!(Config::from_args(parse(&["--api-port", "8080"])).is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        assert!(Config::from_args(parse(&["--server-action-timeout-secs", "0"])).is_err());
    }

    #[test]
    fn test_version_string() {
        let err = Args::try_parse_from(["ruo", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
        assert!(err.to_string().contains(VERSION));
    }
}
