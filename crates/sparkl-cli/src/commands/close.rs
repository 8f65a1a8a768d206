//! Close command implementation.

use std::io::Write;

use tracing::info;

use crate::error::CliError;
use crate::output::{ClosedInfo, OutputFormat};
use crate::state::StateStore;

/// Close command executor.
pub struct CloseCommand<'a> {
    store: &'a StateStore,
    alias: String,
}

impl<'a> CloseCommand<'a> {
    /// Create a new close command.
    #[must_use]
    pub fn new(store: &'a StateStore, alias: impl Into<String>) -> Self {
        Self {
            store,
            alias: alias.into(),
        }
    }

    /// Execute the close command.
    ///
    /// # Errors
    ///
    /// Returns an error if state cannot be read or written.
    pub fn execute<W: Write>(&self, writer: &mut W, format: &OutputFormat, all: bool) -> Result<(), CliError> {
        let closed = self.close(all)?;
        format.write(writer, &closed)
    }

    /// Remove the alias connection, or every connection when `all` is set.
    /// Closing an alias that is not open is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if state cannot be read or written.
    pub fn close(&self, all: bool) -> Result<ClosedInfo, CliError> {
        let count = if all {
            let mut state = self.store.load()?;
            let count = state.connections.len();
            state.connections.clear();
            self.store.save(&state)?;
            count
        } else {
            usize::from(self.store.remove_connection(&self.alias)?)
        };

        info!(alias = %self.alias, all, count, "connections closed");
        Ok(ClosedInfo { count })
    }
}
