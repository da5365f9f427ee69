//! # netshell
//!
//! Remote shell over raw TCP.
//!
//! A `netshelld` server accepts TCP connections and, for each one, either
//! hands the socket to a freshly spawned shell process (basic mode) or serves
//! a small line-oriented file-transfer protocol (extended mode). The mode is
//! picked by sniffing the first bytes the client sends.
//!
//! The `netshell` client connects with or without the extended handshake and
//! offers an interactive session, one-shot command evaluation, file transfer
//! and named connection profiles.
//!
//! ## Quick Start
//!
//! ```no_run
//! use netshell::client::Connection;
//!
//! #[tokio::main]
//! async fn main() -> netshell::Result<()> {
//!     netshell::logging::try_init().ok();
//!
//!     let mut conn = Connection::connect("192.168.1.136", netshell::protocol::DEFAULT_PORT).await?;
//!     conn.negotiate(None).await?;
//!     conn.send_file("notes.txt".as_ref(), "/tmp/notes.txt".as_ref()).await?;
//!     Ok(())
//! }
//! ```

#[cfg(not(unix))]
compile_error!("netshell requires a Unix platform");

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod server;
pub mod session;

// Re-export commonly used types
pub use client::{Connection, Controller};
pub use error::{NetshellError, Result};
pub use protocol::{Mode, Reply};
pub use server::{Server, ServerConfig, ShellCommand};
pub use session::{SessionProfile, SessionStore};
