//! Configuration module for lenframe.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::framing::{FrameCodec, MAX_PAYLOAD};

/// Command-line interface
#[derive(Parser, Debug)]
#[command(name = "lenframe")]
#[command(author = "lenframe authors")]
#[command(version = "0.1.0")]
#[command(about = "A length-prefixed request/response server", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the server
    Serve(ServeArgs),
    /// Send messages to a running server and print the replies
    Client(ClientArgs),
}

/// Server arguments
#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0:1234)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Maximum payload size per frame in bytes
    #[arg(long)]
    pub max_payload: Option<usize>,

    /// How connections are scheduled
    #[arg(long, value_enum)]
    pub mode: Option<ServeMode>,

    /// Request handler
    #[arg(long, value_enum)]
    pub handler: Option<HandlerKind>,

    /// Reply sent by the greet handler
    #[arg(long)]
    pub reply: Option<String>,

    /// Close connections whose peer sends nothing for this long
    #[arg(long)]
    pub read_timeout_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Client arguments
#[derive(Args, Debug)]
pub struct ClientArgs {
    /// Server address
    #[arg(short = 'a', long = "connect", default_value = "127.0.0.1:1234")]
    pub addr: String,

    /// Maximum payload size per frame in bytes
    #[arg(long, default_value_t = MAX_PAYLOAD)]
    pub max_payload: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    pub log_level: String,

    /// Messages to send, one frame each
    #[arg(default_values_t = [String::from("hello")])]
    pub messages: Vec<String>,
}

/// Connection scheduling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ServeMode {
    /// One connection at a time, each served to completion
    #[default]
    Sequential,
    /// One thread per connection
    Threaded,
    /// One tokio task per connection
    Tokio,
}

/// Request handler selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum HandlerKind {
    /// Log the request and answer with a fixed reply
    #[default]
    Greet,
    /// Send the request back unchanged
    Echo,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub handler: HandlerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Connection scheduling
    #[serde(default)]
    pub mode: ServeMode,
    /// Per-connection read timeout in milliseconds
    pub read_timeout_ms: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            mode: ServeMode::default(),
            read_timeout_ms: None,
        }
    }
}

/// Wire protocol configuration
#[derive(Debug, Deserialize)]
pub struct ProtocolConfig {
    /// Maximum payload size per frame
    #[serde(default = "default_max_payload")]
    pub max_payload: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_payload: default_max_payload(),
        }
    }
}

/// Handler configuration
#[derive(Debug, Deserialize)]
pub struct HandlerConfig {
    #[serde(default)]
    pub kind: HandlerKind,
    /// Reply sent by the greet handler
    #[serde(default = "default_reply")]
    pub reply: String,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            kind: HandlerKind::default(),
            reply: default_reply(),
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

fn default_listen() -> String {
    "0.0.0.0:1234".to_string()
}

fn default_max_payload() -> usize {
    MAX_PAYLOAD
}

fn default_reply() -> String {
    "world".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub mode: ServeMode,
    pub max_payload: usize,
    pub handler: HandlerKind,
    pub reply: String,
    pub read_timeout: Option<Duration>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::resolve(ServeArgs::default(), TomlConfig::default())
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load(args: ServeArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = args.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let config = Self::resolve(args, toml_config);
        config.validate()?;
        Ok(config)
    }

    /// Merge CLI args over file values.
    fn resolve(args: ServeArgs, toml_config: TomlConfig) -> Self {
        Config {
            listen: args.listen.unwrap_or(toml_config.server.listen),
            mode: args.mode.unwrap_or(toml_config.server.mode),
            max_payload: args
                .max_payload
                .unwrap_or(toml_config.protocol.max_payload),
            handler: args.handler.unwrap_or(toml_config.handler.kind),
            reply: args.reply.unwrap_or(toml_config.handler.reply),
            read_timeout: args
                .read_timeout_ms
                .or(toml_config.server.read_timeout_ms)
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
            log_level: args.log_level.unwrap_or(toml_config.logging.level),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if u32::try_from(self.max_payload).is_err() {
            return Err(ConfigError::MaxPayload(self.max_payload));
        }
        if self.handler == HandlerKind::Greet && self.reply.len() > self.max_payload {
            return Err(ConfigError::ReplyTooLarge {
                len: self.reply.len(),
                max: self.max_payload,
            });
        }
        Ok(())
    }

    /// Codec enforcing the configured payload limit.
    pub fn codec(&self) -> FrameCodec {
        FrameCodec::new(self.max_payload)
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, std::io::Error),

    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, toml::de::Error),

    #[error("max_payload {0} does not fit the 32-bit length prefix")]
    MaxPayload(usize),

    #[error("reply is {len} bytes but max_payload is {max}")]
    ReplyTooLarge { len: usize, max: usize },
}
