//! Duplex text-frame transports.
//!
//! A session owns exactly one [`Transport`]. Transports are created by a
//! [`Connector`], which lets tests and embedders swap the websocket for an
//! in-process channel pair.

mod memory;
mod websocket;

use async_trait::async_trait;

use crate::error::TransportError;

pub use memory::{MemoryConnector, MemoryTransport};
pub use websocket::{WebSocketConnector, WebSocketTransport};

/// A message-oriented duplex connection carrying text frames.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Write one frame.
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Read the next frame. `None` means the peer closed the connection.
    ///
    /// Must be cancel safe: the session polls it inside `select!` and may
    /// drop the future before it completes.
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;

    /// Close the connection. Closing an already closed connection is not
    /// an error.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Factory for transports.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to `url`, presenting `cookie` as the `Cookie` header if given.
    async fn connect(
        &self,
        url: &str,
        cookie: Option<&str>,
    ) -> Result<Box<dyn Transport>, TransportError>;
}
