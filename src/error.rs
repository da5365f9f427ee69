//! Error types for netshell.

use thiserror::Error;

/// Main error type for netshell operations.
#[derive(Error, Debug)]
pub enum NetshellError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The command interpreter could not be started.
    #[error("failed to spawn shell '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Host name could not be resolved to an address.
    #[error("no such host: {0}")]
    UnknownHost(String),

    /// The peer closed the connection in the middle of an exchange.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// The peer answered with something outside the protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Operation needs the extended protocol but the connection is basic.
    #[error("server does not support the extended protocol")]
    ExtendedRequired,

    /// The server refused or failed a file transfer.
    #[error("{command} failed: server replied {reply}")]
    TransferRejected { command: &'static str, reply: String },

    /// The requested remote file does not exist.
    #[error("remote file not found: {0}")]
    RemoteNotFound(String),

    /// Saved session with the given name was not found.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Session name cannot be used as a file name.
    #[error("invalid session name: '{0}'")]
    InvalidSessionName(String),

    /// Session file exists but could not be understood.
    #[error("invalid session file '{name}': {reason}")]
    InvalidProfile { name: String, reason: String },

    /// No configuration directory could be determined.
    #[error("cannot locate config directory: {0}")]
    ConfigDir(String),

    /// Neither a host, a session, nor a default session was given.
    #[error("no hostname or session specified")]
    NoTarget,

    /// Operation timed out.
    #[error("operation timed out")]
    Timeout,
}

/// Convenience Result type for netshell operations.
pub type Result<T> = std::result::Result<T, NetshellError>;
