//! # sparkl-duplex
//!
//! Duplex messaging with SPARKL REST services over a websocket.
//!
//! A [`DuplexSession`] multiplexes three inbound message kinds on one
//! connection:
//! - `consume` and `request` events, dispatched to handlers registered in
//!   the session's [`Registry`], whose replies are sent back with the
//!   original id and a fully qualified reply path;
//! - `response` frames, matched by correlation id to outstanding solicits.
//!
//! Outbound, the session offers `notify` (fire-and-forget) and `solicit`
//! in callback and blocking styles, usable from many tasks and threads at
//! once.
//!
//! ```rust,no_run
//! use serde_json::json;
//! use sparkl_duplex::{DuplexSession, Endpoint, Hooks, SessionConfig, WebSocketConnector};
//!
//! # async fn example() -> Result<(), sparkl_duplex::SessionError> {
//! let endpoint = Endpoint::new("http://localhost:8000", "Scratch/TestRest/REST");
//! let hooks = Hooks::new().on_open(|session| {
//!     session.registry().on_request("Mix/FirstDivisor", |_request, reply| {
//!         let _ = reply.send(json!({"reply": "Ok", "data": {"div": 2}}));
//!     });
//! });
//!
//! let session =
//!     DuplexSession::open(&WebSocketConnector, &endpoint, SessionConfig::default(), hooks).await?;
//! let response = session
//!     .solicit(json!({"solicit": "Mix/CheckPrime", "data": {"n": 13}}))
//!     .await?;
//! assert_eq!(response["response"], "Yes");
//! session.close();
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod correlation;
pub mod envelope;
pub mod error;
pub mod path;
pub mod registry;
pub mod session;
pub mod transport;

pub use correlation::{CorrelationTable, IdGenerator, Pending, RandomIds, SequentialIds};
pub use envelope::{Inbound, Kind};
pub use error::{ProtocolError, SessionError, TransportError};
pub use registry::{Handler, Registry, Reply};
pub use session::{
    DEFAULT_PATH_PREFIX, DuplexSession, Endpoint, Hooks, ProtocolErrorPolicy, SessionConfig,
};
pub use transport::{
    Connector, MemoryConnector, MemoryTransport, Transport, WebSocketConnector, WebSocketTransport,
};
