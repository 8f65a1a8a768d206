//! Message envelopes exchanged over a duplex session.
//!
//! Every frame is a JSON object carrying exactly one discriminator key.
//! Inbound frames are `consume`, `request` or `response`; outbound frames
//! are `notify`, `solicit` or `reply`.
//!
//! ```text
//! {"request": "Mix/FirstDivisor", "id": "ABC123", "data": {...}}
//! {"reply": "Mix/FirstDivisor/Ok", "id": "ABC123", "data": {"div": 2}}
//! ```

use std::fmt;

use serde_json::{Map, Value};

use crate::error::ProtocolError;

/// Discriminator of an inbound consume event.
pub const CONSUME: &str = "consume";
/// Discriminator of an inbound request.
pub const REQUEST: &str = "request";
/// Discriminator of an inbound response to a solicit.
pub const RESPONSE: &str = "response";
/// Discriminator of an outbound fire-and-forget event.
pub const NOTIFY: &str = "notify";
/// Discriminator of an outbound call expecting a response.
pub const SOLICIT: &str = "solicit";
/// Discriminator of an outbound answer to a request or consume.
pub const REPLY: &str = "reply";
/// Correlation id field.
pub const ID: &str = "id";

/// Kind of an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// Event notification, optionally expecting a reply.
    Consume,
    /// Event always expecting a reply.
    Request,
    /// Answer to one of our solicits.
    Response,
}

impl Kind {
    /// The discriminator key for this kind.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Consume => CONSUME,
            Self::Request => REQUEST,
            Self::Response => RESPONSE,
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Consume event; a reply is expected only when `id` is present.
    Consume {
        /// Operation path.
        path: String,
        /// Event id, present when a reply is expected.
        id: Option<String>,
        /// The whole decoded frame.
        message: Value,
    },
    /// Request event.
    Request {
        /// Operation path.
        path: String,
        /// Event id echoed in the reply.
        id: String,
        /// The whole decoded frame.
        message: Value,
    },
    /// Response to an outstanding solicit. The `response` field of
    /// `message` holds the leaf status only.
    Response {
        /// Id of the solicit being answered.
        id: String,
        /// The whole decoded frame.
        message: Value,
    },
}

impl Inbound {
    /// Kind of this frame.
    #[must_use]
    pub const fn kind(&self) -> Kind {
        match self {
            Self::Consume { .. } => Kind::Consume,
            Self::Request { .. } => Kind::Request,
            Self::Response { .. } => Kind::Response,
        }
    }

    /// Event or correlation id, if any.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Consume { id, .. } => id.as_deref(),
            Self::Request { id, .. } | Self::Response { id, .. } => Some(id),
        }
    }
}

/// Decode and classify one inbound text frame.
///
/// Blank frames yield `Ok(None)` and are skipped by the session.
///
/// # Errors
///
/// Returns a [`ProtocolError`] if the frame is not a JSON object, carries no
/// known discriminator, or lacks a required id.
pub fn classify(frame: &str) -> Result<Option<Inbound>, ProtocolError> {
    if frame.trim().is_empty() {
        return Ok(None);
    }

    let message: Value =
        serde_json::from_str(frame).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    classify_value(message).map(Some)
}

/// Classify an already decoded frame.
///
/// Discriminators are checked in the order `consume`, `request`, `response`.
///
/// # Errors
///
/// See [`classify`].
pub fn classify_value(mut message: Value) -> Result<Inbound, ProtocolError> {
    let object = message
        .as_object_mut()
        .ok_or_else(|| ProtocolError::Malformed("frame is not a JSON object".into()))?;

    if object.contains_key(CONSUME) {
        let path = string_field(object, CONSUME)?;
        let id = optional_id(object)?;
        return Ok(Inbound::Consume { path, id, message });
    }

    if object.contains_key(REQUEST) {
        let path = string_field(object, REQUEST)?;
        let id = optional_id(object)?.ok_or(ProtocolError::MissingId(REQUEST))?;
        return Ok(Inbound::Request { path, id, message });
    }

    if object.contains_key(RESPONSE) {
        let path = string_field(object, RESPONSE)?;
        let id = optional_id(object)?.ok_or(ProtocolError::MissingId(RESPONSE))?;
        object.insert(RESPONSE.to_owned(), Value::String(leaf(&path).to_owned()));
        return Ok(Inbound::Response { id, message });
    }

    Err(ProtocolError::UnknownKind)
}

/// Rebuild a fully qualified reply path.
///
/// Handlers may reply with a leaf such as `"Ok"`; the peer needs the full
/// path, so anything not already starting with the operation path is
/// appended to it.
#[must_use]
pub fn qualify_reply_path(operation_path: &str, reply_path: &str) -> String {
    if reply_path.starts_with(operation_path) {
        reply_path.to_owned()
    } else {
        format!("{operation_path}/{reply_path}")
    }
}

/// Last `/`-separated segment of a path.
#[must_use]
pub fn leaf(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn string_field(object: &Map<String, Value>, key: &'static str) -> Result<String, ProtocolError> {
    object
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| ProtocolError::Malformed(format!("'{key}' must be a string")))
}

fn optional_id(object: &Map<String, Value>) -> Result<Option<String>, ProtocolError> {
    match object.get(ID) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(id)) => Ok(Some(id.clone())),
        Some(_) => Err(ProtocolError::Malformed("'id' must be a string".into())),
    }
}
