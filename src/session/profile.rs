//! Session profile record and its `key=value` file format.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::NetshellError;
use crate::protocol::DEFAULT_PORT;
use crate::Result;

/// A saved connection profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionProfile {
    /// Host name or address of the server.
    pub hostname: String,
    /// Server port.
    pub port: u16,
    /// Free-form user name recorded with the profile.
    pub username: String,
    /// Free-form description.
    pub description: String,
    /// Last time the profile was used, in seconds since the Unix epoch.
    pub last_used: u64,
    /// Whether this profile is the default one.
    pub is_default: bool,
}

impl SessionProfile {
    /// Create a profile for `hostname:port` stamped with the current time.
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            username: String::new(),
            description: String::new(),
            last_used: now(),
            is_default: false,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Update the last-used timestamp.
    pub fn touch(&mut self) {
        self.last_used = now();
    }

    /// Render the profile as `key=value` lines.
    pub fn to_file_contents(&self) -> String {
        format!(
            "hostname={}\nport={}\nusername={}\ndescription={}\nlast_used={}\nis_default={}\n",
            single_line(&self.hostname),
            self.port,
            single_line(&self.username),
            single_line(&self.description),
            self.last_used,
            self.is_default
        )
    }

    /// Parse `key=value` lines. Unknown keys are ignored; a missing hostname
    /// or an unparsable number is an error.
    pub fn from_file_contents(name: &str, contents: &str) -> Result<Self> {
        let invalid = |reason: String| NetshellError::InvalidProfile {
            name: name.to_string(),
            reason,
        };

        let mut hostname = None;
        let mut profile = SessionProfile {
            hostname: String::new(),
            port: DEFAULT_PORT,
            username: String::new(),
            description: String::new(),
            last_used: 0,
            is_default: false,
        };

        for line in contents.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            match key.trim() {
                "hostname" => hostname = Some(value.to_string()),
                "port" => {
                    profile.port = value
                        .trim()
                        .parse()
                        .map_err(|_| invalid(format!("bad port '{}'", value)))?;
                }
                "username" => profile.username = value.to_string(),
                "description" => profile.description = value.to_string(),
                "last_used" => {
                    profile.last_used = value
                        .trim()
                        .parse()
                        .map_err(|_| invalid(format!("bad last_used '{}'", value)))?;
                }
                "is_default" => profile.is_default = matches!(value.trim(), "true" | "1"),
                _ => {}
            }
        }

        profile.hostname = hostname
            .filter(|h| !h.is_empty())
            .ok_or_else(|| invalid("missing hostname".to_string()))?;
        Ok(profile)
    }
}

/// Values are stored one per line, so embedded line breaks are flattened.
fn single_line(value: &str) -> String {
    value.replace(['\n', '\r'], " ")
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
