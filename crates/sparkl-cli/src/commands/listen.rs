//! Listen command implementation.
//!
//! Streams the events a node publishes for a configuration object (a
//! folder, service or mix) to stdout, one JSON value per line, until the
//! node closes the websocket or the user interrupts.

use std::io::Write;
use std::time::Duration;

use serde_json::Value;
use sparkl_duplex::{Connector, Endpoint, TransportError};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::cli::ListenArgs;
use crate::error::CliError;
use crate::output::write_json_line;
use crate::state::ConnectionRecord;

/// Path prefix of event websockets on the node.
pub const LISTEN_PATH_PREFIX: &str = "sse_listen/websocket/";

/// Listen command executor.
pub struct ListenCommand {
    record: ConnectionRecord,
    alias: String,
}

impl ListenCommand {
    /// Create a new listen command for the connection stored as `alias`.
    #[must_use]
    pub fn new(record: ConnectionRecord, alias: impl Into<String>) -> Self {
        Self {
            record,
            alias: alias.into(),
        }
    }

    /// Forward events until the node closes the stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the websocket cannot be opened, a frame cannot be
    /// read, or writing fails.
    pub async fn execute<W: Write>(
        &self,
        connector: &dyn Connector,
        writer: &mut W,
        args: &ListenArgs,
    ) -> Result<(), CliError> {
        let mut endpoint =
            Endpoint::new(&self.record.url, &args.subject).with_folder(self.record.folder());
        if let Some(cookie) = self.record.cookie_header() {
            endpoint = endpoint.with_cookie(cookie);
        }
        let url = endpoint.url(&args.prefix).map_err(CliError::from_open)?;

        let wait = Duration::from_secs(args.connect_timeout);
        let mut transport = timeout(wait, connector.connect(&url, endpoint.cookie.as_deref()))
            .await
            .map_err(|_| CliError::Connection(TransportError::Timeout(wait).to_string()))?
            .map_err(|e| CliError::Connection(e.to_string()))?;
        info!(alias = %self.alias, url = %url, "listening");

        let interrupt = tokio::signal::ctrl_c();
        tokio::pin!(interrupt);

        let result = loop {
            tokio::select! {
                frame = transport.recv() => match frame {
                    Some(Ok(text)) => {
                        if let Err(e) = forward(writer, &text) {
                            break Err(e);
                        }
                    }
                    Some(Err(e)) => break Err(CliError::Session(e.into())),
                    None => {
                        debug!(url = %url, "node closed event stream");
                        break Ok(());
                    }
                },

                _ = &mut interrupt => {
                    info!("interrupted");
                    break Ok(());
                }
            }
        };

        if let Err(e) = transport.close().await {
            debug!(error = %e, "event stream close failed");
        }
        result
    }
}

/// Write one event frame; blank and non-JSON frames are dropped.
fn forward<W: Write>(writer: &mut W, text: &str) -> Result<(), CliError> {
    if text.trim().is_empty() {
        return Ok(());
    }

    match serde_json::from_str::<Value>(text) {
        Ok(event) => write_json_line(writer, &event),
        Err(e) => {
            warn!(error = %e, "event frame is not JSON, dropped");
            Ok(())
        }
    }
}
