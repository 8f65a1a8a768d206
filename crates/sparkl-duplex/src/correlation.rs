//! Correlation of solicits with their responses.
//!
//! Each outbound solicit is registered under a fresh id. The entry is
//! either a callback (async style) or a waiter (blocking style); the receive
//! loop removes it when the matching response arrives and hands the response
//! to exactly that consumer.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rand::Rng;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::error::{ProtocolError, SessionError};

/// Characters used by [`RandomIds`].
const ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Length of ids produced by [`RandomIds`].
const ID_LENGTH: usize = 10;

/// Source of correlation ids.
pub trait IdGenerator: Send + Sync {
    /// Produce the next candidate id.
    fn next_id(&self) -> String;
}

/// Random ten character ids over `A-Z0-9`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIds;

impl IdGenerator for RandomIds {
    fn next_id(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..ID_LENGTH)
            .map(|_| char::from(ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())]))
            .collect()
    }
}

/// Deterministic ids `prefix0`, `prefix1`, ...
#[derive(Debug, Default)]
pub struct SequentialIds {
    prefix: String,
    next: AtomicU64,
}

impl SequentialIds {
    /// Create a generator with the given prefix.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(0),
        }
    }
}

impl IdGenerator for SequentialIds {
    fn next_id(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}{n}", self.prefix)
    }
}

/// Callback invoked with the response to an async solicit.
pub type Callback = Box<dyn FnOnce(Value) + Send>;

/// Consumer registered for an outstanding solicit.
pub enum Pending {
    /// Invoke the callback on the receive loop.
    Callback(Callback),
    /// Wake a caller waiting on the channel.
    Waiter(oneshot::Sender<Result<Value, SessionError>>),
}

impl fmt::Debug for Pending {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Callback(_) => f.write_str("Pending::Callback"),
            Self::Waiter(_) => f.write_str("Pending::Waiter"),
        }
    }
}

/// Table of outstanding solicits keyed by correlation id.
pub struct CorrelationTable {
    ids: Box<dyn IdGenerator>,
    entries: Mutex<HashMap<String, Pending>>,
}

impl fmt::Debug for CorrelationTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CorrelationTable")
            .field("pending", &self.len())
            .finish_non_exhaustive()
    }
}

impl Default for CorrelationTable {
    fn default() -> Self {
        Self::new(Box::new(RandomIds))
    }
}

impl CorrelationTable {
    /// Create an empty table drawing ids from `ids`.
    #[must_use]
    pub fn new(ids: Box<dyn IdGenerator>) -> Self {
        Self {
            ids,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Register a consumer under a fresh id and return the id.
    ///
    /// Candidate ids that are already pending are discarded, so a new entry
    /// never replaces an outstanding one.
    pub fn register(&self, pending: Pending) -> String {
        let mut entries = self.entries.lock();
        let id = loop {
            let candidate = self.ids.next_id();
            if !entries.contains_key(&candidate) {
                break candidate;
            }
            trace!(id = %candidate, "discarding colliding correlation id");
        };
        entries.insert(id.clone(), pending);
        id
    }

    /// Remove the entry for `id` and deliver `response` to it.
    ///
    /// Callbacks run on the calling thread after the table lock is released.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnknownCorrelation`] if nothing is pending
    /// under `id`.
    pub fn resolve(&self, id: &str, response: Value) -> Result<(), ProtocolError> {
        let pending = self
            .entries
            .lock()
            .remove(id)
            .ok_or_else(|| ProtocolError::UnknownCorrelation(id.to_owned()))?;

        match pending {
            Pending::Callback(callback) => callback(response),
            Pending::Waiter(waiter) => {
                if waiter.send(Ok(response)).is_err() {
                    debug!(id, "solicit waiter went away before its response");
                }
            }
        }
        Ok(())
    }

    /// Drop the entry for `id` without delivering anything.
    pub fn cancel(&self, id: &str) -> bool {
        self.entries.lock().remove(id).is_some()
    }

    /// Remove every entry. Waiters receive [`SessionError::Closed`];
    /// callbacks are dropped uncalled. Returns the number of entries removed.
    pub fn drain(&self) -> usize {
        let drained: Vec<(String, Pending)> = self.entries.lock().drain().collect();
        let count = drained.len();

        for (id, pending) in drained {
            match pending {
                Pending::Waiter(waiter) => {
                    let _ = waiter.send(Err(SessionError::Closed));
                }
                Pending::Callback(_) => {
                    debug!(id = %id, "dropping solicit callback on close");
                }
            }
        }
        count
    }

    /// Number of outstanding solicits.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing is outstanding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
