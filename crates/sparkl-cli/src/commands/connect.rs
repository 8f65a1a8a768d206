//! Connect command implementation.
//!
//! With a URL, stores the connection for the alias. Without, lists every
//! connection of the session.

use std::io::Write;

use sparkl_duplex::path::websocket_url;
use tracing::info;

use crate::cli::ConnectArgs;
use crate::error::CliError;
use crate::output::{ConnectionInfo, ConnectionList, OutputFormat};
use crate::state::{ConnectionRecord, StateStore};

/// Connect command executor.
pub struct ConnectCommand<'a> {
    store: &'a StateStore,
    alias: String,
}

impl<'a> ConnectCommand<'a> {
    /// Create a new connect command.
    #[must_use]
    pub fn new(store: &'a StateStore, alias: impl Into<String>) -> Self {
        Self {
            store,
            alias: alias.into(),
        }
    }

    /// Execute the connect command.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or state cannot be saved.
    pub fn execute<W: Write>(
        &self,
        writer: &mut W,
        format: &OutputFormat,
        args: &ConnectArgs,
    ) -> Result<(), CliError> {
        match &args.url {
            Some(url) => {
                let info = self.connect(url, args.cookie.as_deref())?;
                format.write(writer, &info)
            }
            None => format.write(writer, &self.list()?),
        }
    }

    /// Store a connection to `url` under the alias.
    ///
    /// # Errors
    ///
    /// Returns [`CliError::InvalidArgument`] for a URL that is not an
    /// `http` or `https` node URL.
    pub fn connect(&self, url: &str, cookie: Option<&str>) -> Result<ConnectionInfo, CliError> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(CliError::InvalidArgument(format!(
                "invalid node URL: {url}, must start with http:// or https://"
            )));
        }
        websocket_url(url, "", "/").map_err(|e| CliError::InvalidArgument(e.to_string()))?;

        let mut record = ConnectionRecord::new(url.trim_end_matches('/'));
        record.cookie = cookie.map(str::to_owned);
        self.store.put_connection(&self.alias, record.clone())?;

        info!(alias = %self.alias, url = %record.url, "connection stored");
        Ok(ConnectionInfo::new(&self.alias, &record))
    }

    /// List stored connections.
    ///
    /// # Errors
    ///
    /// Returns an error if state cannot be read.
    pub fn list(&self) -> Result<ConnectionList, CliError> {
        let state = self.store.load()?;
        Ok(ConnectionList::new(
            state
                .connections
                .iter()
                .map(|(alias, record)| ConnectionInfo::new(alias, record))
                .collect(),
        ))
    }
}
