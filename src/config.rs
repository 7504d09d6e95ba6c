//! Configuration module for the MQTT stub server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Command-line arguments for the stub server
#[derive(Parser, Debug)]
#[command(name = "mqtt-stub")]
#[command(author = "mqtt-stub authors")]
#[command(version = "0.1.0")]
#[command(about = "A minimal MQTT responder for device testing", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host or interface to bind to (e.g., 0.0.0.0)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Maximum number of simultaneously open connections (unbounded if unset)
    #[arg(short = 'm', long)]
    pub max_connections: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    /// Upper bound on a single accept wait before the running flag is re-checked
    #[serde(default = "default_accept_timeout_ms")]
    pub accept_timeout_ms: u64,
    /// Bytes requested per read; one read is treated as one packet
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    pub max_connections: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            backlog: default_backlog(),
            accept_timeout_ms: default_accept_timeout_ms(),
            read_buffer_size: default_read_buffer_size(),
            max_connections: None,
        }
    }
}

/// Logging configuration
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

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_backlog() -> i32 {
    5
}

fn default_accept_timeout_ms() -> u64 {
    1000
}

fn default_read_buffer_size() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub backlog: i32,
    pub accept_timeout_ms: u64,
    pub read_buffer_size: usize,
    pub max_connections: Option<usize>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config::merge(CliArgs::empty(), TomlConfig::default())
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Ok(Config::merge(cli, toml_config))
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        Config {
            host: cli.host.unwrap_or(toml_config.server.host),
            port: cli.port.unwrap_or(toml_config.server.port),
            backlog: toml_config.server.backlog,
            accept_timeout_ms: toml_config.server.accept_timeout_ms,
            read_buffer_size: toml_config.server.read_buffer_size.max(1),
            max_connections: cli.max_connections.or(toml_config.server.max_connections),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        }
    }

    /// `host:port` as given, before address resolution.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn accept_timeout(&self) -> Duration {
        Duration::from_millis(self.accept_timeout_ms)
    }
}

impl CliArgs {
    fn empty() -> Self {
        CliArgs {
            config: None,
            host: None,
            port: None,
            max_connections: None,
            log_level: default_log_level(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 1883);
        assert_eq!(config.backlog, 5);
        assert_eq!(config.accept_timeout(), Duration::from_secs(1));
        assert_eq!(config.read_buffer_size, 1024);
        assert_eq!(config.max_connections, None);
        assert_eq!(config.listen_addr(), "0.0.0.0:1883");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            host = "192.168.158.148"
            port = 11883
            backlog = 16
            accept_timeout_ms = 250
            max_connections = 8

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.host, "192.168.158.148");
        assert_eq!(config.server.port, 11883);
        assert_eq!(config.server.backlog, 16);
        assert_eq!(config.server.accept_timeout_ms, 250);
        assert_eq!(config.server.read_buffer_size, 1024);
        assert_eq!(config.server.max_connections, Some(8));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_file() {
        let file: TomlConfig = toml::from_str(
            r#"
            [server]
            port = 2000
            max_connections = 4

            [logging]
            level = "warn"
        "#,
        )
        .unwrap();

        let cli = CliArgs::parse_from(["mqtt-stub", "--port", "3000", "--log-level", "trace"]);
        let config = Config::merge(cli, file);

        assert_eq!(config.port, 3000);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.max_connections, Some(4));
        assert_eq!(config.log_level, "trace");
    }

    #[test]
    fn test_file_log_level_used_when_cli_default() {
        let file: TomlConfig = toml::from_str("[logging]\nlevel = \"warn\"\n").unwrap();
        let cli = CliArgs::parse_from(["mqtt-stub"]);
        assert_eq!(Config::merge(cli, file).log_level, "warn");
    }
}
