//! Saved connection profiles.
//!
//! This module provides the session profile record and the file-backed store
//! that keeps one profile per name plus a pointer to the default session.

mod profile;
mod store;

pub use profile::SessionProfile;
pub use store::{SessionEntry, SessionStore, CONFIG_DIR_ENV};
