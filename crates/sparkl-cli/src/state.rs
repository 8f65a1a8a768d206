//! Local session state.
//!
//! Each local session (by default the invoking shell) gets a working
//! directory under the working root, holding `state.json`:
//!
//! ```json
//! {"connections": {"default": {"url": "http://localhost:8000", "cwd": "/Scratch"}}}
//! ```
//!
//! There is no lock across processes, so a pipeline of `sparkl` commands can
//! read while another writes. Reads of a half-written file are retried.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, trace};

use crate::error::CliError;

/// Name of the state file inside a session's working directory.
pub const STATE_FILE: &str = "state.json";

/// Name of the working root below the system temp directory.
pub const WORKING_ROOT: &str = "sse_cli";

/// Name of the node's session cookie.
pub const SESSION_COOKIE: &str = "ipaas_session";

const MAX_TRIES: u32 = 5;
const RETRY_BACK_OFF: Duration = Duration::from_millis(100);

/// Everything stored for one local session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    /// Connections by alias.
    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionRecord>,
}

/// A stored node connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    /// HTTP(S) URL of the node.
    pub url: String,
    /// Current folder, `/` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// Session cookie value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie: Option<String>,
}

impl ConnectionRecord {
    /// A connection to `url` at the root folder.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            cwd: None,
            cookie: None,
        }
    }

    /// Current folder.
    #[must_use]
    pub fn folder(&self) -> &str {
        self.cwd.as_deref().unwrap_or("/")
    }

    /// `Cookie` header value for the session cookie, if any.
    #[must_use]
    pub fn cookie_header(&self) -> Option<String> {
        self.cookie
            .as_ref()
            .map(|value| format!("{SESSION_COOKIE}={value}"))
    }
}

/// State file of one local session.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    /// Store for `session` below `root`.
    pub fn new(root: impl AsRef<Path>, session: &str) -> Self {
        Self {
            dir: root.as_ref().join(session),
        }
    }

    /// Default working root, `<tmp>/sse_cli`.
    #[must_use]
    pub fn default_root() -> PathBuf {
        std::env::temp_dir().join(WORKING_ROOT)
    }

    /// Working directory of the session.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the state file.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    /// Read the state, or an empty state if there is none yet.
    ///
    /// Sleeps between retries, so callers stay outside the async runtime.
    ///
    /// # Errors
    ///
    /// Returns [`CliError::State`] if the file cannot be read and parsed
    /// within the retry budget.
    pub fn load(&self) -> Result<State, CliError> {
        let path = self.path();
        if !path.is_file() {
            return Ok(State::default());
        }

        let mut last_error = String::new();
        for attempt in 1..=MAX_TRIES {
            match read_state(&path) {
                Ok(state) => return Ok(state),
                Err(e) => {
                    debug!(path = %path.display(), attempt, error = %e, "state read failed");
                    last_error = e;
                    if attempt < MAX_TRIES {
                        thread::sleep(RETRY_BACK_OFF);
                    }
                }
            }
        }

        Err(CliError::State(format!(
            "read state failed after {MAX_TRIES} tries: {last_error}"
        )))
    }

    /// Replace the stored state.
    ///
    /// # Errors
    ///
    /// Returns an error if the working directory or file cannot be written.
    pub fn save(&self, state: &State) -> Result<(), CliError> {
        fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_string(state)?;
        fs::write(self.path(), json)?;
        trace!(path = %self.path().display(), "state saved");
        Ok(())
    }

    /// The connection stored under `alias`.
    ///
    /// # Errors
    ///
    /// Returns [`CliError::NoConnection`] if there is none.
    pub fn connection(&self, alias: &str) -> Result<ConnectionRecord, CliError> {
        self.load()?
            .connections
            .remove(alias)
            .ok_or_else(|| CliError::NoConnection(alias.to_owned()))
    }

    /// Store `record` under `alias`, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be read or written.
    pub fn put_connection(&self, alias: &str, record: ConnectionRecord) -> Result<(), CliError> {
        let mut state = self.load()?;
        state.connections.insert(alias.to_owned(), record);
        self.save(&state)
    }

    /// Remove the connection under `alias`; `false` if there was none.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be read or written.
    pub fn remove_connection(&self, alias: &str) -> Result<bool, CliError> {
        let mut state = self.load()?;
        if state.connections.remove(alias).is_none() {
            return Ok(false);
        }
        self.save(&state)?;
        Ok(true)
    }
}

fn read_state(path: &Path) -> Result<State, String> {
    let contents = fs::read_to_string(path).map_err(|e| e.to_string())?;
    serde_json::from_str(&contents).map_err(|e| e.to_string())
}

/// Remove working directories of sessions whose process is gone.
///
/// Only directories named by a pid are considered. Returns how many were
/// removed.
///
/// # Errors
///
/// Returns an error if the working root exists but cannot be listed.
pub fn garbage_collect(root: &Path) -> Result<usize, CliError> {
    if !root.is_dir() {
        return Ok(0);
    }

    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);

    let mut removed = 0;
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let Some(pid) = entry.file_name().to_str().and_then(|name| name.parse::<u32>().ok()) else {
            continue;
        };
        if system.process(Pid::from_u32(pid)).is_some() {
            continue;
        }

        match fs::remove_dir_all(entry.path()) {
            Ok(()) => {
                debug!(pid, "removed stale session directory");
                removed += 1;
            }
            Err(e) => debug!(pid, error = %e, "could not remove stale session directory"),
        }
    }

    Ok(removed)
}

/// Default local session id: the pid of the nearest ancestor shell, else
/// of this process.
#[must_use]
pub fn default_session() -> String {
    let own = std::process::id();

    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);

    let mut current = system.process(Pid::from_u32(own)).and_then(sysinfo::Process::parent);
    // Bounded in case of a cyclic parent table.
    for _ in 0..64 {
        let Some(pid) = current else { break };
        let Some(process) = system.process(pid) else { break };
        if is_shell(&process.name().to_string_lossy()) {
            return pid.as_u32().to_string();
        }
        current = process.parent();
    }

    own.to_string()
}

fn is_shell(name: &str) -> bool {
    if cfg!(windows) {
        matches!(name, "cmd.exe" | "powershell.exe")
    } else {
        name.ends_with("sh")
    }
}
