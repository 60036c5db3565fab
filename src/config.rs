//! Configuration module for the chatroom server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

/// Command-line arguments for the chatroom server
#[derive(Parser, Debug)]
#[command(name = "chatroom-server")]
#[command(author = "chatroom-server authors")]
#[command(version = "0.1.0")]
#[command(about = "A TCP chatroom server with a bounded client pool", long_about = None)]
pub struct CliArgs {
    /// Port to listen on
    pub port: u16,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1)
    #[arg(long)]
    pub host: Option<String>,

    /// Maximum number of concurrently connected clients
    #[arg(short = 'n', long)]
    pub capacity: Option<usize>,

    /// Size in bytes of the buffer holding a client's display name
    #[arg(long)]
    pub name_size: Option<usize>,

    /// Size in bytes of the per-message receive buffer
    #[arg(long)]
    pub message_size: Option<usize>,

    /// Identifier handed to the first accepted client
    #[arg(long)]
    pub first_id: Option<u64>,

    /// Number of worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

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
    pub pool: PoolConfig,
    #[serde(default)]
    pub buffers: BufferConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Number of worker threads
    pub workers: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            workers: None,
        }
    }
}

/// Client pool configuration
#[derive(Debug, Deserialize)]
pub struct PoolConfig {
    /// Number of client slots
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// First identifier issued
    #[serde(default = "default_first_id")]
    pub first_id: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            first_id: default_first_id(),
        }
    }
}

/// Receive buffer sizes
#[derive(Debug, Deserialize)]
pub struct BufferConfig {
    #[serde(default = "default_name_size")]
    pub name_size: usize,
    #[serde(default = "default_message_size")]
    pub message_size: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            name_size: default_name_size(),
            message_size: default_message_size(),
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
    "127.0.0.1".to_string()
}

fn default_capacity() -> usize {
    4
}

fn default_first_id() -> u64 {
    10
}

fn default_name_size() -> usize {
    32
}

fn default_message_size() -> usize {
    2048
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Largest accepted `first_id`; keeps half the id space ahead of the counter.
const MAX_FIRST_ID: u64 = u64::MAX / 2;

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub capacity: usize,
    pub name_size: usize,
    pub message_size: usize,
    pub first_id: u64,
    pub workers: Option<usize>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    ///
    /// A missing or surplus positional argument makes clap print the usage
    /// to stderr and exit with a non-zero status.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_cli(CliArgs::parse())
    }

    fn from_cli(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config).validate()
    }

    /// Merge CLI args with TOML config (CLI takes precedence)
    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        Config {
            host: cli.host.unwrap_or(toml_config.server.host),
            port: cli.port,
            capacity: cli.capacity.unwrap_or(toml_config.pool.capacity),
            name_size: cli.name_size.unwrap_or(toml_config.buffers.name_size),
            message_size: cli
                .message_size
                .unwrap_or(toml_config.buffers.message_size),
            first_id: cli.first_id.unwrap_or(toml_config.pool.first_id),
            workers: cli.workers.or(toml_config.server.workers),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        }
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::Invalid("capacity must be at least 1"));
        }
        if self.name_size == 0 || self.message_size == 0 {
            return Err(ConfigError::Invalid("buffer sizes must be non-zero"));
        }
        if self.first_id > MAX_FIRST_ID {
            return Err(ConfigError::Invalid("first_id leaves no room for further ids"));
        }
        if self.workers == Some(0) {
            return Err(ConfigError::Invalid("workers must be at least 1"));
        }
        Ok(self)
    }

    /// Socket address string the listener binds to.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    Invalid(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::Invalid(reason) => write!(f, "Invalid configuration: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {}
