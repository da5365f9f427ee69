//! On-disk storage for named session profiles.
//!
//! Layout under the store root (normally `~/.config/netshell`):
//!
//! ```text
//! sessions/<name>   one profile per file, key=value lines
//! default           name of the default session
//! ```
//!
//! The `default` pointer is authoritative. Each profile's `is_default` line
//! mirrors it and is rewritten whenever the default changes.
//!
//! All operations are blocking `std::fs` calls. Async callers run them on
//! the blocking pool, see `Controller::blocking`.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::SessionProfile;
use crate::error::NetshellError;
use crate::Result;

/// Environment variable overriding the store location.
pub const CONFIG_DIR_ENV: &str = "NETSHELL_CONFIG_DIR";

const SESSIONS_DIR: &str = "sessions";
const DEFAULT_POINTER: &str = "default";

/// A session name as reported by [`SessionStore::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEntry {
    /// Session name.
    pub name: String,
    /// Whether it is the current default.
    pub is_default: bool,
}

/// File-backed session profile store.
#[derive(Debug, Clone)]
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    /// Create a store rooted at `root`. Nothing is created until the first
    /// write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Open the per-user store: `$NETSHELL_CONFIG_DIR` if set, otherwise
    /// `$HOME/.config/netshell`.
    pub fn open_default() -> Result<Self> {
        if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV).filter(|d| !d.is_empty()) {
            return Ok(Self::new(dir));
        }
        let home = std::env::var_os("HOME")
            .filter(|h| !h.is_empty())
            .ok_or_else(|| NetshellError::ConfigDir("HOME environment variable not set".into()))?;
        Ok(Self::new(
            PathBuf::from(home).join(".config").join("netshell"),
        ))
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn sessions_dir(&self) -> PathBuf {
        self.root.join(SESSIONS_DIR)
    }

    fn profile_path(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.sessions_dir().join(name))
    }

    /// Save `profile` under `name`, replacing any existing file.
    ///
    /// The stored `is_default` flag follows the default pointer, not the value
    /// passed in; use [`set_default`](Self::set_default) to change it.
    pub fn save(&self, name: &str, profile: &SessionProfile) -> Result<()> {
        let path = self.profile_path(name)?;
        let mut profile = profile.clone();
        profile.is_default = self.default_name()?.as_deref() == Some(name);
        write_whole(&path, &profile.to_file_contents())?;
        debug!("saved session '{}' to {}", name, path.display());
        Ok(())
    }

    /// Load the profile saved under `name`.
    pub fn load(&self, name: &str) -> Result<SessionProfile> {
        let path = self.profile_path(name)?;
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(NetshellError::SessionNotFound(name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let mut profile = SessionProfile::from_file_contents(name, &contents)?;
        profile.is_default = self.default_name()?.as_deref() == Some(name);
        Ok(profile)
    }

    /// Check if a session exists.
    pub fn contains(&self, name: &str) -> bool {
        self.profile_path(name).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Delete a session. Returns `false` if it did not exist. Deleting the
    /// default session also clears the default.
    pub fn remove(&self, name: &str) -> Result<bool> {
        let path = self.profile_path(name)?;
        let pointer = self.pointer()?;
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        }
        if pointer.as_deref() == Some(name) {
            self.clear_pointer()?;
        }
        Ok(true)
    }

    /// List all session names in sorted order.
    pub fn list(&self) -> Result<Vec<SessionEntry>> {
        let default = self.default_name()?;
        let entries = match fs::read_dir(self.sessions_dir()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if validate_name(name).is_ok() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();

        Ok(names
            .into_iter()
            .map(|name| SessionEntry {
                is_default: default.as_deref() == Some(name.as_str()),
                name,
            })
            .collect())
    }

    /// Name of the default session, if one is set and still exists.
    pub fn default_name(&self) -> Result<Option<String>> {
        Ok(self
            .pointer()?
            .filter(|name| self.sessions_dir().join(name).is_file()))
    }

    /// The name in the `default` file, whether or not that session exists.
    fn pointer(&self) -> Result<Option<String>> {
        let name = match fs::read_to_string(self.root.join(DEFAULT_POINTER)) {
            Ok(contents) => contents.trim().to_string(),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if name.is_empty() || validate_name(&name).is_err() {
            return Ok(None);
        }
        Ok(Some(name))
    }

    /// Make `name` the default session, clearing the flag on the previous one.
    pub fn set_default(&self, name: &str) -> Result<()> {
        let mut profile = self.load(name)?;
        let previous = self.default_name()?;

        write_whole(&self.root.join(DEFAULT_POINTER), &format!("{}\n", name))?;

        if let Some(previous) = previous.filter(|p| p != name) {
            self.rewrite_flag(&previous, false)?;
        }
        profile.is_default = true;
        write_whole(&self.profile_path(name)?, &profile.to_file_contents())?;
        debug!("default session is now '{}'", name);
        Ok(())
    }

    /// Clear the default session. Not an error if none is set.
    pub fn unset_default(&self) -> Result<()> {
        if let Some(previous) = self.default_name()? {
            self.clear_pointer()?;
            self.rewrite_flag(&previous, false)?;
        } else {
            self.clear_pointer()?;
        }
        Ok(())
    }

    /// Stamp the session's last-used time and return the updated profile.
    pub fn touch(&self, name: &str) -> Result<SessionProfile> {
        let mut profile = self.load(name)?;
        profile.touch();
        write_whole(&self.profile_path(name)?, &profile.to_file_contents())?;
        Ok(profile)
    }

    fn rewrite_flag(&self, name: &str, is_default: bool) -> Result<()> {
        let path = self.profile_path(name)?;
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let mut profile = SessionProfile::from_file_contents(name, &contents)?;
        profile.is_default = is_default;
        write_whole(&path, &profile.to_file_contents())
    }

    fn clear_pointer(&self) -> Result<()> {
        match fs::remove_file(self.root.join(DEFAULT_POINTER)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Reject names that would escape the sessions directory or hide as dotfiles.
fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 255
        && !name.starts_with('.')
        && !name.contains(['/', '\0', '\n']);
    if valid {
        Ok(())
    } else {
        Err(NetshellError::InvalidSessionName(name.to_string()))
    }
}

/// Replace `path` with `contents` via a temporary sibling and a rename, so an
/// interrupted write never leaves a truncated file behind.
fn write_whole(path: &Path, contents: &str) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| NetshellError::ConfigDir(path.display().to_string()))?;
    fs::create_dir_all(dir)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = dir.join(format!(".{}.tmp", file_name));

    fs::write(&temp, contents)?;
    if let Err(e) = fs::rename(&temp, path) {
        let _ = fs::remove_file(&temp);
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, SessionStore) {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());
        (dir, store)
    }

    fn profile(host: &str) -> SessionProfile {
        SessionProfile::new(host, 2324)
            .with_username("user")
            .with_description("test box")
    }

    #[test]
    fn test_save_then_load() {
        let (_dir, store) = store();
        let saved = profile("10.0.0.5");
        store.save("x", &saved).unwrap();

        let loaded = store.load("x").unwrap();
        assert_eq!(loaded, saved);
        assert!(store.contains("x"));
    }

    #[test]
    fn test_load_missing() {
        let (_dir, store) = store();
        let result = store.load("nope");
        assert!(matches!(result, Err(NetshellError::SessionNotFound(_))));
    }

    #[test]
    fn test_set_and_unset_default() {
        let (_dir, store) = store();
        store.save("x", &profile("a")).unwrap();
        store.save("y", &profile("b")).unwrap();

        store.set_default("x").unwrap();
        assert_eq!(store.default_name().unwrap().as_deref(), Some("x"));
        assert!(store.load("x").unwrap().is_default);

        store.set_default("y").unwrap();
        assert_eq!(store.default_name().unwrap().as_deref(), Some("y"));
        assert!(!store.load("x").unwrap().is_default);
        let raw = std::fs::read_to_string(store.root().join("sessions/x")).unwrap();
        assert!(raw.contains("is_default=false"));

        store.unset_default().unwrap();
        assert_eq!(store.default_name().unwrap(), None);
        assert!(store.list().unwrap().iter().all(|e| !e.is_default));
        let raw = std::fs::read_to_string(store.root().join("sessions/y")).unwrap();
        assert!(raw.contains("is_default=false"));
    }

    #[test]
    fn test_set_default_requires_existing_session() {
        let (_dir, store) = store();
        let result = store.set_default("ghost");
        assert!(matches!(result, Err(NetshellError::SessionNotFound(_))));
        assert_eq!(store.default_name().unwrap(), None);
    }

    #[test]
    fn test_save_ignores_incoming_default_flag() {
        let (_dir, store) = store();
        let mut p = profile("a");
        p.is_default = true;
        store.save("x", &p).unwrap();
        assert!(!store.load("x").unwrap().is_default);

        store.set_default("x").unwrap();
        // Re-saving the default keeps it the default
        store.save("x", &profile("a2")).unwrap();
        assert!(store.load("x").unwrap().is_default);
    }

    #[test]
    fn test_list_sorted_with_default_marked() {
        let (_dir, store) = store();
        for name in ["work", "alpha", "home"] {
            store.save(name, &profile(name)).unwrap();
        }
        store.set_default("home").unwrap();

        let list = store.list().unwrap();
        let names: Vec<_> = list.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "home", "work"]);
        assert_eq!(
            list.iter().filter(|e| e.is_default).map(|e| e.name.as_str()).collect::<Vec<_>>(),
            vec!["home"]
        );
    }

    #[test]
    fn test_list_empty_store() {
        let (_dir, store) = store();
        assert!(store.list().unwrap().is_empty());
        assert_eq!(store.default_name().unwrap(), None);
    }

    #[test]
    fn test_remove_default_clears_pointer() {
        let (_dir, store) = store();
        store.save("x", &profile("a")).unwrap();
        store.set_default("x").unwrap();

        assert!(store.remove("x").unwrap());
        assert!(!store.remove("x").unwrap());
        assert_eq!(store.default_name().unwrap(), None);
        assert!(!store.root().join("default").exists());

        // A new session under the same name must not inherit the default
        store.save("x", &profile("b")).unwrap();
        assert!(!store.load("x").unwrap().is_default);
        assert_eq!(store.default_name().unwrap(), None);
        assert!(!store.list().unwrap()[0].is_default);
    }

    #[test]
    fn test_remove_other_session_keeps_default() {
        let (_dir, store) = store();
        store.save("x", &profile("a")).unwrap();
        store.save("y", &profile("b")).unwrap();
        store.set_default("x").unwrap();

        assert!(store.remove("y").unwrap());
        assert_eq!(store.default_name().unwrap().as_deref(), Some("x"));
        assert!(store.load("x").unwrap().is_default);
    }

    #[test]
    fn test_invalid_names() {
        let (_dir, store) = store();
        for name in ["", "../evil", "a/b", ".hidden"] {
            let result = store.save(name, &profile("h"));
            assert!(matches!(result, Err(NetshellError::InvalidSessionName(_))));
        }
    }

    #[test]
    fn test_touch_updates_last_used() {
        let (_dir, store) = store();
        let mut p = profile("a");
        p.last_used = 1;
        store.save("x", &p).unwrap();

        let touched = store.touch("x").unwrap();
        assert!(touched.last_used > 1);
        assert_eq!(store.load("x").unwrap().last_used, touched.last_used);
    }

    #[test]
    fn test_no_temp_files_left() {
        let (_dir, store) = store();
        store.save("x", &profile("a")).unwrap();
        store.save("x", &profile("b")).unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(store.root().join("sessions"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("x")]);
    }
}
