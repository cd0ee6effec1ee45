//! Configuration for the calcmux binary.
//!
//! The CLI carries the role selection and its positional arguments;
//! tunables (wait batch size, listener backlog, log level) can also come
//! from a TOML file. CLI arguments take precedence over file values.

use std::fmt;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Deserialize;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "calcmux")]
#[command(version = "0.1.0")]
#[command(about = "Readiness-driven TCP expression calculator", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Accept connections and evaluate incoming expressions
    Serve {
        /// Port to listen on
        port: u16,

        /// Address to bind
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
    },
    /// Open many connections and stream generated expressions
    Send {
        /// Operands per generated expression
        expr_length: usize,

        /// Number of concurrent connections
        connections: usize,

        /// Server address
        server_addr: String,

        /// Server port
        server_port: u16,

        /// Upper bound on expressions batched per connection
        max_exprs: Option<usize>,

        /// Seed for the expression and fragment randomness
        #[arg(long)]
        seed: Option<u64>,
    },
}

/// TOML configuration file structure.
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub net: NetConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Event-loop tunables.
#[derive(Debug, Deserialize)]
pub struct NetConfig {
    /// Maximum readiness events returned by one wait call
    #[serde(default = "default_max_events")]
    pub max_events: usize,
    /// Listen backlog for the server role
    #[serde(default = "default_backlog")]
    pub backlog: u32,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            max_events: default_max_events(),
            backlog: default_backlog(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_max_events() -> usize {
    1000
}

fn default_backlog() -> u32 {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub command: Command,
    pub max_events: usize,
    pub backlog: u32,
    pub log_level: String,
}

impl Config {
    /// Resolve parsed CLI arguments against the optional TOML file.
    pub fn resolve(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        match &cli.command {
            Command::Send {
                expr_length,
                connections,
                server_port,
                max_exprs,
                ..
            } => {
                if *expr_length == 0 {
                    return Err(ConfigError::InvalidArgument("expr_length must be >= 1"));
                }
                if *connections == 0 {
                    return Err(ConfigError::InvalidArgument("connections must be >= 1"));
                }
                if *server_port == 0 {
                    return Err(ConfigError::InvalidArgument("server_port must be >= 1"));
                }
                if max_exprs == &Some(0) {
                    return Err(ConfigError::InvalidArgument("max_exprs must be >= 1"));
                }
            }
            Command::Serve { port, .. } => {
                if *port == 0 {
                    return Err(ConfigError::InvalidArgument("port must be >= 1"));
                }
            }
        }

        Ok(Config {
            command: cli.command,
            max_events: toml_config.net.max_events,
            backlog: toml_config.net.backlog,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }
}

/// Configuration loading errors.
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    InvalidArgument(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidArgument(msg) => write!(f, "Invalid arguments: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.net.max_events, 1000);
        assert_eq!(config.net.backlog, 1024);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [net]
            max_events = 256
            backlog = 128

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.net.max_events, 256);
        assert_eq!(config.net.backlog, 128);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_send_arguments_validated() {
        let cli = CliArgs::parse_from(["calcmux", "send", "0", "4", "127.0.0.1", "9000"]);
        assert!(matches!(
            Config::resolve(cli),
            Err(ConfigError::InvalidArgument(_))
        ));

        let cli = CliArgs::parse_from(["calcmux", "send", "5", "0", "127.0.0.1", "9000"]);
        assert!(matches!(
            Config::resolve(cli),
            Err(ConfigError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_send_arguments_resolve() {
        let cli = CliArgs::parse_from(["calcmux", "send", "5", "4", "127.0.0.1", "9000", "3"]);
        let config = Config::resolve(cli).unwrap();
        match config.command {
            Command::Send {
                expr_length,
                connections,
                server_addr,
                server_port,
                max_exprs,
                seed,
            } => {
                assert_eq!(expr_length, 5);
                assert_eq!(connections, 4);
                assert_eq!(server_addr, "127.0.0.1");
                assert_eq!(server_port, 9000);
                assert_eq!(max_exprs, Some(3));
                assert_eq!(seed, None);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_serve_arguments_resolve() {
        let cli = CliArgs::parse_from(["calcmux", "serve", "9000"]);
        let config = Config::resolve(cli).unwrap();
        match config.command {
            Command::Serve { port, host } => {
                assert_eq!(port, 9000);
                assert_eq!(host, "0.0.0.0");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
