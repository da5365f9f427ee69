//! Wire protocol shared by the server and the client.
//!
//! A connection starts in one of two modes:
//!
//! - **Basic**: no framing at all. Bytes go straight to and from the remote
//!   shell's standard streams.
//! - **Extended**: the client opened with [`MAGIC`] and the server answered
//!   with [`ACK`]. From then on the client sends newline-terminated text
//!   commands (see [`ExtendedCommand`]) and the server answers with
//!   [`Reply`] lines, optionally followed by raw payload bytes.

mod command;
pub mod negotiate;

pub use command::{CommandError, ExtendedCommand};
pub use negotiate::{negotiate_client, sniff_server, Negotiated, PeekStream};

use std::fmt;
use std::time::Duration;

/// Default TCP port for the server.
pub const DEFAULT_PORT: u16 = 2324;

/// Bytes a client sends to request the extended protocol.
pub const MAGIC: &[u8] = b"NETSHELL_EXTENDED_V1\n";

/// Server acknowledgment of [`MAGIC`].
pub const ACK: &[u8] = b"EXTENDED_ACK\n";

/// How long the server waits for [`MAGIC`] before falling back to basic mode.
pub const SNIFF_TIMEOUT: Duration = Duration::from_secs(2);

/// Protocol mode negotiated for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Raw shell passthrough.
    #[default]
    Basic,
    /// Text command protocol with file transfer.
    Extended,
}

impl Mode {
    /// Whether extended commands may be used on this connection.
    pub fn is_extended(&self) -> bool {
        matches!(self, Mode::Extended)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Basic => f.write_str("basic"),
            Mode::Extended => f.write_str("extended"),
        }
    }
}

/// A single reply line sent by the server in extended mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Server is ready to receive an upload payload.
    Ready,
    /// Upload stored.
    Ok,
    /// Operation failed after it was accepted.
    Error,
    /// Operation refused before anything was touched.
    Deny,
    /// Requested file does not exist.
    NotFound,
    /// Download payload of the given length follows.
    Size(u64),
    /// Verb not recognized.
    UnknownCommand,
}

impl Reply {
    /// Encode the reply as a newline-terminated wire line.
    pub fn to_line(&self) -> Vec<u8> {
        format!("{}\n", self).into_bytes()
    }

    /// Parse one reply line, with or without its trailing newline.
    pub fn parse(line: &[u8]) -> Option<Self> {
        let line = trim_line_end(line);
        match line {
            b"READY" => Some(Reply::Ready),
            b"OK" => Some(Reply::Ok),
            b"ERROR" => Some(Reply::Error),
            b"DENY" => Some(Reply::Deny),
            b"NOT_FOUND" => Some(Reply::NotFound),
            b"UNKNOWN_COMMAND" => Some(Reply::UnknownCommand),
            _ => {
                let size = line.strip_prefix(b"SIZE ")?;
                std::str::from_utf8(size).ok()?.parse().ok().map(Reply::Size)
            }
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Ready => f.write_str("READY"),
            Reply::Ok => f.write_str("OK"),
            Reply::Error => f.write_str("ERROR"),
            Reply::Deny => f.write_str("DENY"),
            Reply::NotFound => f.write_str("NOT_FOUND"),
            Reply::Size(n) => write!(f, "SIZE {}", n),
            Reply::UnknownCommand => f.write_str("UNKNOWN_COMMAND"),
        }
    }
}

/// Strip a trailing `\n` or `\r\n`.
pub(crate) fn trim_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
