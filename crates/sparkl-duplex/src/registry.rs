//! Implementation registry.
//!
//! Maps operation paths to locally implemented handlers. The receive loop
//! consults it for every inbound `consume` and `request`; the owner fills it,
//! usually from the session's open hook.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::envelope::{ID, REPLY, qualify_reply_path};
use crate::error::SessionError;
use crate::session::Outbox;

/// Handler for messages that expect no reply.
pub type ConsumeFn = dyn Fn(Value) + Send + Sync;

/// Handler for messages that expect a reply.
pub type RequestFn = dyn Fn(Value, Reply) + Send + Sync;

/// A registered implementation.
#[derive(Clone)]
pub enum Handler {
    /// Called with the message; no reply is sent.
    Consume(Arc<ConsumeFn>),
    /// Called with the message and a [`Reply`] that must be used once.
    Request(Arc<RequestFn>),
}

impl Handler {
    /// Wrap a handler for messages without an id.
    pub fn consume<F>(f: F) -> Self
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        Self::Consume(Arc::new(f))
    }

    /// Wrap a handler for messages that carry an id.
    pub fn request<F>(f: F) -> Self
    where
        F: Fn(Value, Reply) + Send + Sync + 'static,
    {
        Self::Request(Arc::new(f))
    }

    /// Whether this handler answers with a reply.
    #[must_use]
    pub const fn expects_reply(&self) -> bool {
        matches!(self, Self::Request(_))
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Consume(_) => f.write_str("Handler::Consume"),
            Self::Request(_) => f.write_str("Handler::Request"),
        }
    }
}

/// One-shot capability to answer an inbound request or consume.
///
/// `send` consumes the value, so a reply goes out at most once. It can be
/// moved to another thread or task and used later.
pub struct Reply {
    path: String,
    id: String,
    outbox: Outbox,
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reply")
            .field("path", &self.path)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl Reply {
    pub(crate) fn new(path: String, id: String, outbox: Outbox) -> Self {
        Self { path, id, outbox }
    }

    /// Operation path of the message being answered.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Event id of the message being answered.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Send the reply.
    ///
    /// The reply's `id` is set to the incoming event id and its `reply` path
    /// is qualified with the operation path unless it already starts with it.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidPayload`] if `reply` is not an object
    /// with a string `reply` field, or [`SessionError::Closed`] if the
    /// session has shut down.
    pub fn send(self, reply: Value) -> Result<(), SessionError> {
        let Value::Object(mut reply) = reply else {
            return Err(SessionError::InvalidPayload("reply must be a JSON object".into()));
        };

        let qualified = reply
            .get(REPLY)
            .and_then(Value::as_str)
            .map(|leaf| qualify_reply_path(&self.path, leaf))
            .ok_or_else(|| SessionError::InvalidPayload("reply has no 'reply' path".into()))?;

        reply.insert(REPLY.to_owned(), Value::String(qualified));
        reply.insert(ID.to_owned(), Value::String(self.id));
        self.outbox.send(&Value::Object(reply))
    }
}

/// Shared, mutable path-to-handler map.
///
/// Cloning yields another handle to the same map.
#[derive(Clone, Default)]
pub struct Registry {
    handlers: Arc<RwLock<HashMap<String, Handler>>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("paths", &self.paths())
            .finish()
    }
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handler` for `path`, returning any handler it replaces.
    pub fn insert(&self, path: impl Into<String>, handler: Handler) -> Option<Handler> {
        self.handlers.write().insert(path.into(), handler)
    }

    /// Install a handler that takes no reply.
    pub fn on_consume<F>(&self, path: impl Into<String>, f: F) -> Option<Handler>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.insert(path, Handler::consume(f))
    }

    /// Install a handler that answers through a [`Reply`].
    pub fn on_request<F>(&self, path: impl Into<String>, f: F) -> Option<Handler>
    where
        F: Fn(Value, Reply) + Send + Sync + 'static,
    {
        self.insert(path, Handler::request(f))
    }

    /// Remove the handler for `path`.
    pub fn remove(&self, path: &str) -> Option<Handler> {
        self.handlers.write().remove(path)
    }

    /// Handler for `path`, if any.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<Handler> {
        self.handlers.read().get(path).cloned()
    }

    /// Whether a handler is installed for `path`.
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.handlers.read().contains_key(path)
    }

    /// Registered paths, sorted.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.handlers.read().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    /// Whether no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}
