//! CLI command implementations.
//!
//! Each submodule implements a specific CLI command:
//! - [`connect`] - Store or list node connections
//! - [`close`] - Remove node connections
//! - [`cd`] - Current folder navigation
//! - [`session`] - Local session details
//! - [`service`] - Duplex REST service bridged to stdio
//! - [`listen`] - Event stream of a configuration object

pub mod cd;
pub mod close;
pub mod connect;
pub mod listen;
pub mod service;
pub mod session;

pub use cd::CdCommand;
pub use close::CloseCommand;
pub use connect::ConnectCommand;
pub use listen::ListenCommand;
pub use service::ServiceCommand;
pub use session::SessionCommand;
