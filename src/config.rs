//! Server configuration.
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. Configuration file (JSON)
//! 4. Default values

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cli::ServerArgs;
use crate::protocol::DEFAULT_PORT;
use crate::server::{ServerConfig, ShellCommand, DEFAULT_BACKLOG, DEFAULT_MAX_TRANSFER};

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listener configuration.
    pub server: ServerSection,
    /// Shell started for basic connections.
    pub shell: ShellSection,
    /// Logging configuration.
    pub logging: LoggingSection,
}

/// Listener configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Listen backlog.
    pub backlog: u32,
    /// Handshake window in milliseconds.
    pub sniff_timeout_ms: u64,
    /// Largest file accepted or served, in bytes.
    pub max_transfer_size: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            backlog: DEFAULT_BACKLOG,
            sniff_timeout_ms: 2000,
            max_transfer_size: DEFAULT_MAX_TRANSFER,
        }
    }
}

/// Shell configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellSection {
    /// Program to run.
    pub program: String,
    /// Arguments to pass.
    pub args: Vec<String>,
    /// Working directory; the server's own when unset.
    pub working_dir: Option<PathBuf>,
}

impl Default for ShellSection {
    fn default() -> Self {
        let shell = ShellCommand::default();
        Self {
            program: shell.program,
            args: shell.args,
            working_dir: shell.working_dir,
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level (error, warn, info, debug, trace).
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        serde_json::from_str(&content).map_err(ConfigError::Json)
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an environment lookup (for testing).
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("NETSHELL_HOST").filter(|h| !h.is_empty()) {
            self.server.host = host;
        }

        if let Some(port) = lookup("NETSHELL_PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| ConfigError::InvalidPort(port.clone()))?;
        }

        if let Some(shell) = lookup("NETSHELL_SHELL").filter(|s| !s.is_empty()) {
            self.shell.program = shell;
        }

        if let Some(level) = lookup("NETSHELL_LOG_LEVEL") {
            self.logging.level = level;
        } else if let Some(level) = lookup("RUST_LOG") {
            self.logging.level = level;
        }
        Ok(())
    }

    /// Apply CLI argument overrides.
    pub fn apply_args(&mut self, args: &ServerArgs) {
        if let Some(ref host) = args.host {
            self.server.host = host.clone();
        }
        if let Some(port) = args.port {
            self.server.port = port;
        }
        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Load configuration with full priority chain.
    ///
    /// Priority: CLI args > env vars > config file > defaults
    pub fn load(args: &ServerArgs) -> Result<Self, ConfigError> {
        let mut config = match args.config {
            Some(ref path) => Config::from_file(path)?,
            None => Config::default(),
        };
        config.apply_env()?;
        config.apply_args(args);
        Ok(config)
    }

    /// Convert to the runtime server configuration.
    pub fn to_server_config(&self) -> Result<ServerConfig, ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidPort("0".to_string()));
        }
        if self.shell.program.is_empty() {
            return Err(ConfigError::EmptyShell);
        }

        let mut shell = ShellCommand::new(self.shell.program.clone()).args(self.shell.args.clone());
        if let Some(ref dir) = self.shell.working_dir {
            shell = shell.working_dir(dir.clone());
        }

        let mut config = ServerConfig::new(self.server.host.clone(), self.server.port)
            .with_shell(shell)
            .with_sniff_timeout(Duration::from_millis(self.server.sniff_timeout_ms))
            .with_max_transfer_size(self.server.max_transfer_size);
        config.backlog = self.server.backlog;
        Ok(config)
    }

    /// Get the log level filter string.
    pub fn log_filter(&self) -> &str {
        &self.logging.level
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    Io(std::io::Error),
    /// JSON parsing error.
    Json(serde_json::Error),
    /// Port is not a number in 1..=65535.
    InvalidPort(String),
    /// Shell program is empty.
    EmptyShell,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read config file: {}", e),
            Self::Json(e) => write!(f, "failed to parse config file: {}", e),
            Self::InvalidPort(port) => write!(f, "invalid port: {}", port),
            Self::EmptyShell => write!(f, "shell program must not be empty"),
        }
    }
}

impl std::error::Error for ConfigError {}
