//! Error types for duplex sessions.

use std::time::Duration;

use thiserror::Error;

/// Faults raised by a [`Transport`](crate::Transport) or its connector.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The connection could not be established.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The connection attempt did not complete in time.
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    /// Writing a frame failed.
    #[error("send failed: {0}")]
    Send(String),

    /// Reading a frame failed.
    #[error("receive failed: {0}")]
    Receive(String),

    /// The connection is already closed.
    #[error("connection closed")]
    Closed,
}

/// Inbound frames that violate the envelope protocol.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The frame is not a JSON object, or a field has the wrong type.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// None of `consume`, `request` or `response` is present.
    #[error("frame has no consume, request or response discriminator")]
    UnknownKind,

    /// A frame kind that requires an id arrived without one.
    #[error("{0} frame has no id")]
    MissingId(&'static str),

    /// No implementation is registered for the operation path.
    #[error("no implementation registered for '{0}'")]
    NoHandler(String),

    /// The registered implementation has the wrong call shape.
    #[error("implementation for '{path}' cannot handle a {expected} message")]
    HandlerShape {
        /// Operation path.
        path: String,
        /// Shape the message needed.
        expected: &'static str,
    },

    /// A response arrived for an id with no outstanding solicit.
    #[error("no pending solicit with id '{0}'")]
    UnknownCorrelation(String),
}

/// Errors surfaced to callers of a [`DuplexSession`](crate::DuplexSession).
#[derive(Debug, Error)]
pub enum SessionError {
    /// The transport could not be established.
    #[error("connection failed: {0}")]
    Connection(TransportError),

    /// The transport failed after the session opened.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// An inbound frame violated the protocol.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// An outbound payload could not be sent as given.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The endpoint URL could not be built.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// The session closed before the operation completed.
    #[error("session closed")]
    Closed,
}
