//! Configuration module for sockprobe.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "sockprobe")]
#[command(author = "sockprobe authors")]
#[command(version = "0.1.0")]
#[command(about = "Raw socket echo and HTTP diagnostics", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Diagnostic to run.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Non-blocking TCP echo server
    TcpEcho {
        /// Address to bind to (e.g., 127.0.0.1:7)
        #[arg(short = 'l', long)]
        listen: Option<String>,
    },
    /// UDP echo server
    UdpEcho {
        /// Address to bind to (e.g., 127.0.0.1:7)
        #[arg(short = 'l', long)]
        listen: Option<String>,
    },
    /// Non-blocking single-exchange HTTP responder
    Http {
        /// Address to bind to (e.g., 127.0.0.1:80)
        #[arg(short = 'l', long)]
        listen: Option<String>,
        /// File served as the response body
        #[arg(long)]
        content: Option<PathBuf>,
    },
    /// Blocking one-connection-at-a-time HTTP responder
    HttpBlocking {
        /// Address to bind to (e.g., 127.0.0.1:80)
        #[arg(short = 'l', long)]
        listen: Option<String>,
        /// File served as the response body
        #[arg(long)]
        content: Option<PathBuf>,
    },
    /// Interactive TCP echo client
    TcpClient {
        /// Server address
        #[arg(short, long)]
        target: Option<String>,
    },
    /// Interactive UDP echo client
    UdpClient {
        /// Server address
        #[arg(short, long)]
        target: Option<String>,
    },
    /// One-shot HTTP GET
    HttpClient {
        /// Server address
        #[arg(short, long)]
        target: Option<String>,
        /// Request path
        #[arg(long, default_value = "/")]
        path: String,
    },
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub echo: EchoConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Event loop configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Maximum number of tracked connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Bytes read per readable connection per pass
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Upper bound on one readiness wait (unset = wait indefinitely)
    pub poll_timeout_ms: Option<u64>,
    /// Log the wall clock at most this often (unset = disabled)
    pub heartbeat_secs: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            buffer_size: default_buffer_size(),
            poll_timeout_ms: None,
            heartbeat_secs: None,
        }
    }
}

/// Echo server configuration
#[derive(Debug, Deserialize)]
pub struct EchoConfig {
    #[serde(default = "default_echo_listen")]
    pub tcp_listen: String,
    #[serde(default = "default_echo_listen")]
    pub udp_listen: String,
    /// How long the UDP server waits for a datagram before logging idle
    #[serde(default = "default_udp_timeout")]
    pub udp_timeout_secs: u64,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            tcp_listen: default_echo_listen(),
            udp_listen: default_echo_listen(),
            udp_timeout_secs: default_udp_timeout(),
        }
    }
}

/// HTTP responder configuration
#[derive(Debug, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_listen")]
    pub listen: String,
    /// File served as the response body; the built-in page when unset
    pub content: Option<PathBuf>,
    /// Accept wait of the blocking responder between shutdown checks
    #[serde(default = "default_accept_timeout")]
    pub accept_timeout_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: default_http_listen(),
            content: None,
            accept_timeout_ms: default_accept_timeout(),
        }
    }
}

/// Client configuration
#[derive(Debug, Deserialize)]
pub struct ClientConfig {
    /// How long a client waits for a reply
    #[serde(default = "default_client_timeout")]
    pub timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_client_timeout(),
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

fn default_max_connections() -> usize {
    1024
}

fn default_buffer_size() -> usize {
    1024
}

fn default_echo_listen() -> String {
    "127.0.0.1:7".to_string()
}

fn default_http_listen() -> String {
    "127.0.0.1:80".to_string()
}

fn default_udp_timeout() -> u64 {
    5
}

fn default_accept_timeout() -> u64 {
    500
}

fn default_client_timeout() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Which diagnostic the process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    TcpEcho,
    UdpEcho,
    Http,
    HttpBlocking,
    TcpClient,
    UdpClient,
    HttpClient,
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    /// Listen address for servers, target address for clients.
    pub address: String,
    pub http_path: String,
    pub content: Option<PathBuf>,
    pub max_connections: usize,
    pub buffer_size: usize,
    pub poll_timeout: Option<Duration>,
    pub heartbeat: Option<Duration>,
    pub udp_timeout: Duration,
    pub accept_timeout: Duration,
    pub client_timeout: Duration,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Ok(Self::resolve(cli, toml_config))
    }

    /// Merge parsed CLI args over a parsed TOML file.
    pub fn resolve(cli: CliArgs, file: TomlConfig) -> Self {
        let mut http_path = "/".to_string();
        let mut content = file.http.content.clone();

        let (mode, address) = match cli.command {
            Command::TcpEcho { listen } => (Mode::TcpEcho, listen.unwrap_or(file.echo.tcp_listen)),
            Command::UdpEcho { listen } => (Mode::UdpEcho, listen.unwrap_or(file.echo.udp_listen)),
            Command::Http {
                listen,
                content: path,
            } => {
                content = path.or(content);
                (Mode::Http, listen.unwrap_or(file.http.listen))
            }
            Command::HttpBlocking {
                listen,
                content: path,
            } => {
                content = path.or(content);
                (Mode::HttpBlocking, listen.unwrap_or(file.http.listen))
            }
            Command::TcpClient { target } => {
                (Mode::TcpClient, target.unwrap_or(file.echo.tcp_listen))
            }
            Command::UdpClient { target } => {
                (Mode::UdpClient, target.unwrap_or(file.echo.udp_listen))
            }
            Command::HttpClient { target, path } => {
                http_path = path;
                (Mode::HttpClient, target.unwrap_or(file.http.listen))
            }
        };

        Config {
            mode,
            address,
            http_path,
            content,
            max_connections: file.server.max_connections,
            buffer_size: file.server.buffer_size,
            poll_timeout: file.server.poll_timeout_ms.map(Duration::from_millis),
            heartbeat: file.server.heartbeat_secs.map(Duration::from_secs),
            udp_timeout: Duration::from_secs(file.echo.udp_timeout_secs),
            accept_timeout: Duration::from_millis(file.http.accept_timeout_ms),
            client_timeout: Duration::from_secs(file.client.timeout_secs),
            log_level: cli.log_level.unwrap_or(file.logging.level),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),
}
