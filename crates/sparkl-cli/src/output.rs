//! Output formatting for CLI commands.
//!
//! Supports table (human-readable) and JSON output formats. The streaming
//! commands (`service`, `listen`) write JSON lines with [`write_json_line`]
//! whatever the format.

use std::io::Write;

use serde::Serialize;

use crate::cli::Format;
use crate::error::CliError;
use crate::state::ConnectionRecord;

/// Write `value` as one compact JSON line and flush.
///
/// # Errors
///
/// Returns an error if serialization or writing fails.
pub fn write_json_line<W: Write>(writer: &mut W, value: &serde_json::Value) -> Result<(), CliError> {
    serde_json::to_writer(&mut *writer, value)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

/// Output formatter that handles both table and JSON output.
#[derive(Debug, Clone)]
pub struct OutputFormat {
    format: Format,
}

impl OutputFormat {
    /// Create a new output formatter.
    #[must_use]
    pub const fn new(format: Format) -> Self {
        Self { format }
    }

    /// Write a serializable value to the output.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write<W, T>(&self, writer: &mut W, value: &T) -> Result<(), CliError>
    where
        W: Write,
        T: Serialize + TableDisplay,
    {
        match self.format {
            Format::Json => {
                serde_json::to_writer_pretty(&mut *writer, value)
                    .map_err(|e| CliError::Format(format!("JSON serialization failed: {e}")))?;
                writeln!(writer)?;
            }
            Format::Table => {
                value.write_table(writer)?;
            }
        }
        Ok(())
    }

    /// Write a serializable value to a string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_string<T>(&self, value: &T) -> Result<String, CliError>
    where
        T: Serialize + TableDisplay,
    {
        let mut buf = Vec::new();
        self.write(&mut buf, value)?;
        String::from_utf8(buf).map_err(|e| CliError::Format(format!("UTF-8 error: {e}")))
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::new(Format::Table)
    }
}

/// Trait for types that can be displayed as a table.
pub trait TableDisplay {
    /// Write the value as a human-readable table.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError>;
}

/// A stored connection.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    /// Connection alias.
    pub alias: String,
    /// Node URL.
    pub url: String,
    /// Current folder.
    pub cwd: String,
    /// Whether a session cookie is stored.
    pub cookie: bool,
}

impl ConnectionInfo {
    /// Describe `record` stored under `alias`.
    #[must_use]
    pub fn new(alias: &str, record: &ConnectionRecord) -> Self {
        Self {
            alias: alias.to_owned(),
            url: record.url.clone(),
            cwd: record.folder().to_owned(),
            cookie: record.cookie.is_some(),
        }
    }
}

impl TableDisplay for ConnectionInfo {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "Connection {}", self.alias)?;
        writeln!(writer, "══════════════════════════════════")?;
        writeln!(writer, "URL:     {}", self.url)?;
        writeln!(writer, "Folder:  {}", self.cwd)?;
        writeln!(writer, "Cookie:  {}", if self.cookie { "yes" } else { "no" })?;
        Ok(())
    }
}

/// All connections of the session.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionList {
    /// Number of connections.
    pub count: usize,
    /// The connections, by alias.
    pub connections: Vec<ConnectionInfo>,
}

impl ConnectionList {
    /// Build a list from connection infos.
    #[must_use]
    pub fn new(connections: Vec<ConnectionInfo>) -> Self {
        Self {
            count: connections.len(),
            connections,
        }
    }
}

impl TableDisplay for ConnectionList {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        if self.connections.is_empty() {
            writeln!(writer, "No connections.")?;
            return Ok(());
        }

        let alias_width = self
            .connections
            .iter()
            .map(|c| c.alias.len())
            .max()
            .unwrap_or(0)
            .max(5);
        let url_width = self
            .connections
            .iter()
            .map(|c| c.url.len())
            .max()
            .unwrap_or(0)
            .max(3);

        writeln!(writer, "{:<alias_width$}  {:<url_width$}  FOLDER", "ALIAS", "URL")?;
        writeln!(writer, "{}", "─".repeat(alias_width + url_width + 10))?;

        for connection in &self.connections {
            writeln!(
                writer,
                "{:<alias_width$}  {:<url_width$}  {}",
                connection.alias, connection.url, connection.cwd
            )?;
        }

        Ok(())
    }
}

/// Current folder of a connection.
#[derive(Debug, Clone, Serialize)]
pub struct FolderInfo {
    /// Connection alias.
    pub alias: String,
    /// Folder path.
    pub path: String,
}

impl TableDisplay for FolderInfo {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "{}", self.path)?;
        Ok(())
    }
}

/// Result of closing connections.
#[derive(Debug, Clone, Serialize)]
pub struct ClosedInfo {
    /// Number of connections closed.
    pub count: usize,
}

impl TableDisplay for ClosedInfo {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        match self.count {
            1 => writeln!(writer, "Closed 1 connection.")?,
            n => writeln!(writer, "Closed {n} connections.")?,
        }
        Ok(())
    }
}

/// Local session details.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    /// Session id.
    pub id: String,
    /// Working directory.
    pub dir: String,
}

impl TableDisplay for SessionInfo {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "Session:  {}", self.id)?;
        writeln!(writer, "Dir:      {}", self.dir)?;
        Ok(())
    }
}
