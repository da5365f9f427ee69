//! Server side: accept loop, protocol sniffing and per-connection handlers.
//!
//! Each accepted connection runs in its own tokio task. A basic connection is
//! handed to a freshly spawned shell process whose standard streams are the
//! socket itself; an extended connection is served by [`ExtendedSession`].
//!
//! ## Example
//!
//! ```no_run
//! use netshell::server::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> netshell::Result<()> {
//!     let (_tx, rx) = tokio::sync::watch::channel(false);
//!     let server = Server::bind(ServerConfig::new("0.0.0.0", 2324)).await?;
//!     server.serve(rx).await
//! }
//! ```

mod acceptor;
mod bridge;
mod extended;

pub use acceptor::{shutdown_on_signal, Server};
pub use bridge::attach_shell;
pub use extended::ExtendedSession;

use std::path::PathBuf;
use std::time::Duration;

use crate::protocol::{DEFAULT_PORT, SNIFF_TIMEOUT};

/// Default listen backlog.
pub const DEFAULT_BACKLOG: u32 = 10;

/// Default upper bound for a single file transfer (1 GiB).
pub const DEFAULT_MAX_TRANSFER: u64 = 1024 * 1024 * 1024;

/// The command interpreter started for each basic connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    /// Program to execute.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<String>,
    /// Working directory for the shell; inherits the server's when unset.
    pub working_dir: Option<PathBuf>,
}

impl ShellCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

impl Default for ShellCommand {
    /// `/bin/sh -i`: interactive so the remote user gets a prompt even though
    /// standard input is a socket.
    fn default() -> Self {
        Self::new("/bin/sh").args(["-i"])
    }
}

/// Runtime server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Listen backlog.
    pub backlog: u32,
    /// How long to wait for the extended-protocol handshake.
    pub sniff_timeout: Duration,
    /// Largest file accepted or served by the extended protocol.
    pub max_transfer_size: u64,
    /// Shell started for basic connections.
    pub shell: ShellCommand,
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn with_shell(mut self, shell: ShellCommand) -> Self {
        self.shell = shell;
        self
    }

    pub fn with_sniff_timeout(mut self, timeout: Duration) -> Self {
        self.sniff_timeout = timeout;
        self
    }

    pub fn with_max_transfer_size(mut self, bytes: u64) -> Self {
        self.max_transfer_size = bytes;
        self
    }

    pub fn bind_address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            backlog: DEFAULT_BACKLOG,
            sniff_timeout: SNIFF_TIMEOUT,
            max_transfer_size: DEFAULT_MAX_TRANSFER,
            shell: ShellCommand::default(),
        }
    }
}
