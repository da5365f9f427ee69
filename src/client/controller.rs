//! Client orchestration: pick a target, connect, run one kind of session.

use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tracing::{debug, info};

use super::interactive::{ExitReason, Multiplexer, TerminalMode};
use super::terminal::is_terminal;
use super::Connection;
use crate::error::NetshellError;
use crate::protocol::DEFAULT_PORT;
use crate::session::{SessionProfile, SessionStore};
use crate::Result;

/// Default quiet period after which eval stops waiting for output.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(1);

/// Where to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
    /// Session the target was taken from, if any.
    pub session: Option<String>,
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)?;
        if let Some(session) = &self.session {
            write!(f, " (session '{}')", session)?;
        }
        Ok(())
    }
}

/// What the user asked to connect to, before resolution.
#[derive(Debug, Clone, Default)]
pub struct TargetRequest {
    /// First positional argument: a host name, or the name of a saved session.
    pub positional: Option<String>,
    pub port: Option<u16>,
    /// Explicitly named session (`-s`).
    pub session: Option<String>,
}

/// A file transfer to run in place of an interactive session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transfer {
    Upload { local: PathBuf, remote: PathBuf },
    Download { remote: PathBuf, local: PathBuf },
}

/// Field overrides applied when saving a session.
#[derive(Debug, Clone, Default)]
pub struct ProfileOverrides {
    pub address: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub description: Option<String>,
}

/// Client options shared by all session kinds.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Request the extended protocol for interactive sessions.
    pub negotiate: bool,
    /// Eval stops after this long without output.
    pub idle_timeout: Duration,
    /// Upper bound on waiting for the handshake reply.
    pub handshake_timeout: Option<Duration>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            negotiate: true,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            handshake_timeout: None,
        }
    }
}

/// Drives the client: resolves targets against the session store and runs
/// interactive, eval or transfer sessions.
///
/// Session store access is synchronous file IO. From async code, go through
/// [`Controller::blocking`] or [`Controller::resolve_async`].
#[derive(Debug, Clone)]
pub struct Controller {
    store: SessionStore,
    options: ClientOptions,
}

impl Controller {
    pub fn new(store: SessionStore, options: ClientOptions) -> Self {
        Self { store, options }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Resolve a target.
    ///
    /// Priority: explicit host, then the `-s` session, then a lone positional
    /// argument that names a saved session, then the default session.
    pub fn resolve(&self, request: &TargetRequest) -> Result<Target> {
        if let Some(positional) = &request.positional {
            let names_session = request.port.is_none()
                && request.session.is_none()
                && self.store.contains(positional);
            if names_session {
                return self.from_session(positional);
            }
            return Ok(Target {
                host: positional.clone(),
                port: request.port.unwrap_or(DEFAULT_PORT),
                session: None,
            });
        }

        if let Some(name) = &request.session {
            return self.from_session(name);
        }

        match self.store.default_name()? {
            Some(name) => {
                debug!("using default session '{}'", name);
                self.from_session(&name)
            }
            None => Err(NetshellError::NoTarget),
        }
    }

    /// [`Controller::resolve`] on the blocking thread pool.
    pub async fn resolve_async(&self, request: &TargetRequest) -> Result<Target> {
        let request = request.clone();
        self.blocking(move |controller| controller.resolve(&request))
            .await
    }

    /// Run a session store operation on the blocking thread pool.
    pub async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&Controller) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let controller = self.clone();
        tokio::task::spawn_blocking(move || op(&controller))
            .await
            .map_err(|e| NetshellError::Io(std::io::Error::other(e)))?
    }

    fn from_session(&self, name: &str) -> Result<Target> {
        let profile = self.store.touch(name)?;
        Ok(Target {
            host: profile.hostname,
            port: profile.port,
            session: Some(name.to_string()),
        })
    }

    /// Create or update the session `name`.
    ///
    /// An existing session keeps the fields not overridden. A new one needs a
    /// host, either from `overrides.address` or from `host`.
    pub fn save_session(
        &self,
        name: &str,
        host: Option<&str>,
        overrides: &ProfileOverrides,
    ) -> Result<SessionProfile> {
        let existing = match self.store.load(name) {
            Ok(profile) => Some(profile),
            Err(NetshellError::SessionNotFound(_)) => None,
            Err(e) => return Err(e),
        };

        let hostname = overrides
            .address
            .as_deref()
            .or(host)
            .map(str::to_string)
            .or_else(|| existing.as_ref().map(|p| p.hostname.clone()))
            .ok_or(NetshellError::NoTarget)?;

        let mut profile = match existing {
            Some(mut profile) => {
                profile.hostname = hostname;
                profile.touch();
                profile
            }
            None => SessionProfile::new(hostname, DEFAULT_PORT).with_username(
                std::env::var("USER").unwrap_or_else(|_| "unknown".to_string()),
            ),
        };
        if let Some(port) = overrides.port {
            profile.port = port;
        }
        if let Some(username) = &overrides.username {
            profile.username = username.clone();
        }
        if let Some(description) = &overrides.description {
            profile.description = description.clone();
        }

        self.store.save(name, &profile)?;
        info!("saved session '{}' ({}:{})", name, profile.hostname, profile.port);
        self.store.load(name)
    }

    /// Human-readable listing of saved sessions.
    pub fn list_sessions(&self) -> Result<String> {
        let entries = self.store.list()?;
        if entries.is_empty() {
            return Ok("No saved sessions.\n".to_string());
        }

        let mut out = String::from("Saved sessions:\n");
        for entry in entries {
            let profile = self.store.load(&entry.name)?;
            out.push_str(&format!(
                "  {}{} - {}@{}:{}",
                entry.name,
                if entry.is_default { " [default]" } else { "" },
                profile.username,
                profile.hostname,
                profile.port
            ));
            if !profile.description.is_empty() {
                out.push_str(&format!(" ({})", profile.description));
            }
            out.push('\n');
        }
        Ok(out)
    }

    /// Interactive session on the process's standard streams.
    pub async fn interactive(&self, target: &Target, stop: Arc<AtomicBool>) -> Result<ExitReason> {
        let mut conn = Connection::connect(&target.host, target.port).await?;
        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(format!("Connected to {}\n", target).as_bytes())
            .await?;

        if self.options.negotiate {
            let leftover = conn.negotiate(self.options.handshake_timeout).await?;
            if !leftover.is_empty() {
                stdout.write_all(&leftover).await?;
            }
            if conn.mode().is_extended() {
                stdout
                    .write_all(b"Extended protocol enabled (file transfer available)\n")
                    .await?;
            }
        }
        stdout.flush().await?;

        let terminal = if is_terminal(std::io::stdin().as_raw_fd()) {
            TerminalMode::Stdin
        } else {
            TerminalMode::Unchanged
        };

        let reason = Multiplexer::new(&mut conn, BufReader::new(tokio::io::stdin()), stdout)
            .with_terminal(terminal)
            .with_stop_flag(stop)
            .run()
            .await?;
        info!("session ended: {:?}", reason);
        Ok(reason)
    }

    /// Send `script` over a basic connection and print its output.
    pub async fn eval(&self, target: &Target, script: &[u8]) -> Result<u64> {
        let mut conn = Connection::connect(&target.host, target.port).await?;
        let mut stdout = tokio::io::stdout();
        let total = conn
            .eval(script, self.options.idle_timeout, &mut stdout)
            .await?;
        if let Err(e) = conn.shutdown().await {
            debug!("shutdown after eval failed: {}", e);
        }
        Ok(total)
    }

    /// Run one file transfer. The server must accept the extended protocol.
    ///
    /// A handshake that gets no reply within `handshake_timeout` fails with
    /// [`NetshellError::Timeout`].
    pub async fn transfer(&self, target: &Target, transfer: &Transfer) -> Result<u64> {
        let mut conn = Connection::connect(&target.host, target.port).await?;
        match self.options.handshake_timeout {
            Some(limit) => {
                tokio::time::timeout(limit, conn.negotiate(None))
                    .await
                    .map_err(|_| NetshellError::Timeout)??;
            }
            None => {
                conn.negotiate(None).await?;
            }
        }
        if !conn.mode().is_extended() {
            return Err(NetshellError::ExtendedRequired);
        }

        let bytes = match transfer {
            Transfer::Upload { local, remote } => conn.send_file(local, remote).await?,
            Transfer::Download { remote, local } => conn.get_file(remote, local).await?,
        };
        if let Err(e) = conn.shutdown().await {
            debug!("shutdown after transfer failed: {}", e);
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn controller() -> (TempDir, Controller) {
        let dir = TempDir::new().unwrap();
        let controller = Controller::new(SessionStore::new(dir.path()), ClientOptions::default());
        (dir, controller)
    }

    fn request(positional: Option<&str>, port: Option<u16>, session: Option<&str>) -> TargetRequest {
        TargetRequest {
            positional: positional.map(String::from),
            port,
            session: session.map(String::from),
        }
    }

    fn save(controller: &Controller, name: &str, host: &str, port: u16) {
        controller
            .save_session(
                name,
                Some(host),
                &ProfileOverrides {
                    port: Some(port),
                    ..Default::default()
                },
            )
            .unwrap();
    }

    #[test]
    fn test_no_target() {
        let (_dir, controller) = controller();
        let result = controller.resolve(&TargetRequest::default());
        assert!(matches!(result, Err(NetshellError::NoTarget)));
        assert_eq!(
            NetshellError::NoTarget.to_string(),
            "no hostname or session specified"
        );
    }

    #[test]
    fn test_explicit_host_with_default_port() {
        let (_dir, controller) = controller();
        let target = controller.resolve(&request(Some("10.1.1.1"), None, None)).unwrap();
        assert_eq!(target.host, "10.1.1.1");
        assert_eq!(target.port, DEFAULT_PORT);
        assert_eq!(target.session, None);
    }

    #[test]
    fn test_host_beats_session_and_default() {
        let (_dir, controller) = controller();
        save(&controller, "work", "work.example", 7000);
        controller.store().set_default("work").unwrap();

        let target = controller
            .resolve(&request(Some("other.example"), Some(9999), Some("work")))
            .unwrap();
        assert_eq!(target.host, "other.example");
        assert_eq!(target.port, 9999);
    }

    #[test]
    fn test_named_session_beats_default() {
        let (_dir, controller) = controller();
        save(&controller, "a", "a.example", 1);
        save(&controller, "b", "b.example", 2);
        controller.store().set_default("a").unwrap();

        let target = controller.resolve(&request(None, None, Some("b"))).unwrap();
        assert_eq!(target.host, "b.example");
        assert_eq!(target.session.as_deref(), Some("b"));
    }

    #[test]
    fn test_positional_session_name() {
        let (_dir, controller) = controller();
        save(&controller, "lab", "lab.example", 4444);

        let target = controller.resolve(&request(Some("lab"), None, None)).unwrap();
        assert_eq!(target.host, "lab.example");
        assert_eq!(target.port, 4444);

        // With a port it is a host name again
        let target = controller.resolve(&request(Some("lab"), Some(1), None)).unwrap();
        assert_eq!(target.host, "lab");
    }

    #[test]
    fn test_default_session_is_used_and_touched() {
        let (_dir, controller) = controller();
        save(&controller, "home", "home.example", 2324);
        let mut profile = controller.store().load("home").unwrap();
        profile.last_used = 5;
        controller.store().save("home", &profile).unwrap();
        controller.store().set_default("home").unwrap();

        let target = controller.resolve(&TargetRequest::default()).unwrap();
        assert_eq!(target.host, "home.example");
        assert!(controller.store().load("home").unwrap().last_used > 5);
    }

    #[test]
    fn test_missing_named_session() {
        let (_dir, controller) = controller();
        let result = controller.resolve(&request(None, None, Some("ghost")));
        assert!(matches!(result, Err(NetshellError::SessionNotFound(_))));
    }

    #[test]
    fn test_save_session_overrides() {
        let (_dir, controller) = controller();
        let saved = controller
            .save_session(
                "x",
                Some("first.example"),
                &ProfileOverrides {
                    username: Some("amiga".into()),
                    description: Some("A1200".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(saved.hostname, "first.example");
        assert_eq!(saved.port, DEFAULT_PORT);
        assert_eq!(saved.username, "amiga");

        // Updating keeps what is not overridden
        let updated = controller
            .save_session(
                "x",
                None,
                &ProfileOverrides {
                    address: Some("second.example".into()),
                    port: Some(2000),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.hostname, "second.example");
        assert_eq!(updated.port, 2000);
        assert_eq!(updated.username, "amiga");
        assert_eq!(updated.description, "A1200");
    }

    #[test]
    fn test_save_new_session_needs_host() {
        let (_dir, controller) = controller();
        let result = controller.save_session("x", None, &ProfileOverrides::default());
        assert!(matches!(result, Err(NetshellError::NoTarget)));
    }

    #[test]
    fn test_list_sessions() {
        let (_dir, controller) = controller();
        assert_eq!(controller.list_sessions().unwrap(), "No saved sessions.\n");

        save(&controller, "b", "b.example", 2);
        save(&controller, "a", "a.example", 1);
        controller.store().set_default("b").unwrap();

        let listing = controller.list_sessions().unwrap();
        let lines: Vec<_> = listing.lines().collect();
        assert_eq!(lines[0], "Saved sessions:");
        assert!(lines[1].starts_with("  a - "));
        assert!(lines[2].starts_with("  b [default] - "));
        assert!(lines[2].ends_with("@b.example:2"));
    }

    #[tokio::test]
    async fn test_resolve_async_uses_store() {
        let (_dir, controller) = controller();
        save(&controller, "lab", "lab.example", 4444);
        controller.store().set_default("lab").unwrap();

        let target = controller
            .resolve_async(&TargetRequest::default())
            .await
            .unwrap();
        assert_eq!(target.host, "lab.example");
        assert_eq!(target.session.as_deref(), Some("lab"));

        let listing = controller
            .blocking(|controller| controller.list_sessions())
            .await
            .unwrap();
        assert!(listing.contains("lab [default]"));

        let result = controller
            .resolve_async(&request(None, None, Some("ghost")))
            .await;
        assert!(matches!(result, Err(NetshellError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_transfer_times_out_on_silent_server() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        // Accept and hold the connection without ever answering
        let held = tokio::spawn(async move { listener.accept().await.map(|(stream, _)| stream) });

        let dir = TempDir::new().unwrap();
        let controller = Controller::new(
            SessionStore::new(dir.path()),
            ClientOptions {
                handshake_timeout: Some(Duration::from_millis(200)),
                ..ClientOptions::default()
            },
        );
        let target = Target {
            host: "127.0.0.1".into(),
            port,
            session: None,
        };
        let transfer = Transfer::Download {
            remote: PathBuf::from("/etc/hostname"),
            local: dir.path().join("never"),
        };

        let result = controller.transfer(&target, &transfer).await;
        assert!(matches!(result, Err(NetshellError::Timeout)));
        assert!(!dir.path().join("never").exists());
        drop(held);
    }

    #[test]
    fn test_target_display() {
        let target = Target {
            host: "h".into(),
            port: 1,
            session: Some("s".into()),
        };
        assert_eq!(target.to_string(), "h:1 (session 's')");
    }
}
