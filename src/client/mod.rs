//! netshell client.
//!
//! [`Connection`] is the transport and transfer runtime, [`Multiplexer`] the
//! interactive loop, and [`Controller`] ties both to the session store.

mod connection;
mod controller;
mod interactive;
mod terminal;

pub use connection::Connection;
pub use controller::{
    ClientOptions, Controller, ProfileOverrides, Target, TargetRequest, Transfer,
    DEFAULT_IDLE_TIMEOUT,
};
pub use interactive::{ExitReason, Multiplexer, TerminalMode, DEFAULT_TICK};
pub use terminal::{is_terminal, RawModeGuard, DETACH_KEY};
