//! Extended-mode command lines.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use super::{trim_line_end, Reply};

/// A request sent by the client in extended mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtendedCommand {
    /// Upload `size` bytes to `path` on the server.
    SendFile { path: PathBuf, size: u64 },
    /// Download the file at `path` from the server.
    GetFile { path: PathBuf },
}

/// Why a command line could not be turned into an [`ExtendedCommand`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The verb is not one the server knows.
    Unknown,
    /// A known verb with the wrong number of arguments.
    BadArguments(&'static str),
    /// `SEND_FILE` with a size that is not a positive integer.
    InvalidSize,
}

impl CommandError {
    /// The reply the server sends for this error.
    pub fn reply(&self) -> Reply {
        match self {
            CommandError::Unknown => Reply::UnknownCommand,
            CommandError::BadArguments("SEND_FILE") => Reply::Deny,
            CommandError::BadArguments(_) => Reply::Error,
            CommandError::InvalidSize => Reply::Deny,
        }
    }
}

impl ExtendedCommand {
    pub const SEND_FILE: &'static str = "SEND_FILE";
    pub const GET_FILE: &'static str = "GET_FILE";

    /// Parse a single command line. Tokens are separated by spaces; paths are
    /// taken as raw bytes so non-UTF-8 names survive.
    pub fn parse(line: &[u8]) -> Result<Self, CommandError> {
        let tokens: Vec<&[u8]> = trim_line_end(line)
            .split(|b| *b == b' ')
            .filter(|t| !t.is_empty())
            .collect();

        match tokens.first().copied() {
            Some(b"SEND_FILE") => {
                if tokens.len() != 3 {
                    return Err(CommandError::BadArguments(Self::SEND_FILE));
                }
                let size = std::str::from_utf8(tokens[2])
                    .ok()
                    .and_then(|s| s.parse::<i64>().ok())
                    .filter(|n| *n > 0)
                    .ok_or(CommandError::InvalidSize)?;
                Ok(ExtendedCommand::SendFile {
                    path: path_from_bytes(tokens[1]),
                    size: size as u64,
                })
            }
            Some(b"GET_FILE") => {
                if tokens.len() != 2 {
                    return Err(CommandError::BadArguments(Self::GET_FILE));
                }
                Ok(ExtendedCommand::GetFile {
                    path: path_from_bytes(tokens[1]),
                })
            }
            _ => Err(CommandError::Unknown),
        }
    }

    /// Encode the command as a newline-terminated wire line.
    pub fn to_line(&self) -> Vec<u8> {
        let mut line = Vec::new();
        match self {
            ExtendedCommand::SendFile { path, size } => {
                line.extend_from_slice(b"SEND_FILE ");
                line.extend_from_slice(path.as_os_str().as_bytes());
                line.extend_from_slice(format!(" {}", size).as_bytes());
            }
            ExtendedCommand::GetFile { path } => {
                line.extend_from_slice(b"GET_FILE ");
                line.extend_from_slice(path.as_os_str().as_bytes());
            }
        }
        line.push(b'\n');
        line
    }

    /// The verb, for log messages.
    pub fn verb(&self) -> &'static str {
        match self {
            ExtendedCommand::SendFile { .. } => Self::SEND_FILE,
            ExtendedCommand::GetFile { .. } => Self::GET_FILE,
        }
    }

    /// The path the command operates on.
    pub fn path(&self) -> &Path {
        match self {
            ExtendedCommand::SendFile { path, .. } | ExtendedCommand::GetFile { path } => path,
        }
    }
}

fn path_from_bytes(bytes: &[u8]) -> PathBuf {
    PathBuf::from(OsStr::from_bytes(bytes))
}
