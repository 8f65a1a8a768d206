//! # sparkl-cli
//!
//! SPARKL command-line interface.
//!
//! Provides commands for:
//! - Node connections, kept per local session and alias
//! - Folder navigation
//! - Running REST services over a duplex websocket
//! - Listening to the event stream of a configuration object
//!
//! # Architecture
//!
//! Connection state lives in a JSON file in a per-session working
//! directory ([`state::StateStore`]). The `service` command opens a
//! [`sparkl_duplex::DuplexSession`] and bridges it to stdin/stdout; `listen`
//! reads a bare [`sparkl_duplex::Transport`]. Both get their connection
//! from the store before the async runtime starts.
//!
//! ```text
//! ┌────────────┐  JSON lines  ┌────────────┐   WebSocket   ┌─────────────┐
//! │ user / app │◄────────────►│ sparkl-cli │◄─────────────►│ SPARKL node │
//! └────────────┘ stdin/stdout └────────────┘               └─────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod commands;
pub mod error;
pub mod output;
pub mod state;

pub use cli::{Cli, Commands, ConnectArgs, Format, ListenArgs, ServiceArgs};
pub use error::CliError;
pub use output::OutputFormat;
pub use state::StateStore;
