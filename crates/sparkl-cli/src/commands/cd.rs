//! Change folder command implementation.

use std::io::Write;

use sparkl_duplex::path::resolve;
use tracing::debug;

use crate::error::CliError;
use crate::output::{FolderInfo, OutputFormat};
use crate::state::StateStore;

/// Cd command executor.
pub struct CdCommand<'a> {
    store: &'a StateStore,
    alias: String,
}

impl<'a> CdCommand<'a> {
    /// Create a new cd command.
    #[must_use]
    pub fn new(store: &'a StateStore, alias: impl Into<String>) -> Self {
        Self {
            store,
            alias: alias.into(),
        }
    }

    /// Execute the cd command.
    ///
    /// # Errors
    ///
    /// Returns [`CliError::NoConnection`] without a connection for the alias.
    pub fn execute<W: Write>(
        &self,
        writer: &mut W,
        format: &OutputFormat,
        folder: Option<&str>,
    ) -> Result<(), CliError> {
        let info = self.change(folder)?;
        format.write(writer, &info)
    }

    /// Resolve `folder` against the current folder and make it current.
    /// Without a folder, reports the current one.
    ///
    /// # Errors
    ///
    /// Returns [`CliError::NoConnection`] without a connection for the alias.
    pub fn change(&self, folder: Option<&str>) -> Result<FolderInfo, CliError> {
        let mut record = self.store.connection(&self.alias)?;
        let current = record.folder().to_owned();

        let path = match folder {
            Some(folder) => resolve(&current, folder),
            None => current.clone(),
        };

        if path != current {
            debug!(alias = %self.alias, from = %current, to = %path, "changing folder");
            record.cwd = Some(path.clone());
            self.store.put_connection(&self.alias, record)?;
        }

        Ok(FolderInfo {
            alias: self.alias.clone(),
            path,
        })
    }
}
