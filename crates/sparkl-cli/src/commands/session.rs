//! Session command implementation.

use std::io::Write;

use crate::error::CliError;
use crate::output::{OutputFormat, SessionInfo};
use crate::state::StateStore;

/// Shows the local session id, which another process can pass with
/// `sparkl --session` to share connections.
pub struct SessionCommand<'a> {
    store: &'a StateStore,
    id: String,
}

impl<'a> SessionCommand<'a> {
    /// Create a new session command.
    #[must_use]
    pub fn new(store: &'a StateStore, id: impl Into<String>) -> Self {
        Self { store, id: id.into() }
    }

    /// Execute the session command.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub fn execute<W: Write>(&self, writer: &mut W, format: &OutputFormat) -> Result<(), CliError> {
        let info = SessionInfo {
            id: self.id.clone(),
            dir: self.store.dir().display().to_string(),
        };
        format.write(writer, &info)
    }
}
