//! Duplex session over one transport.
//!
//! A session owns its transport and runs a receive loop as a tokio task for
//! its whole lifetime. The loop is the only place the transport is touched:
//! outbound frames from any thread are queued to it, inbound frames are
//! routed by kind.
//!
//! ```text
//!   notify / solicit / Reply::send          transport.recv()
//!               │                                  │
//!               ▼                                  ▼
//!          ┌────────┐   Command   ┌───────────────────────────┐
//!          │ Outbox │────────────►│        receive loop       │
//!          └────────┘             │ consume/request → Registry│
//!                                 │ response → Correlation    │
//!                                 └───────────────────────────┘
//! ```
//!
//! The loop ends on explicit [`DuplexSession::close`], peer close, transport
//! failure or (by default) a protocol error. On the way out it closes the
//! transport, fails outstanding blocking solicits with
//! [`SessionError::Closed`] and runs the close hook exactly once.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::correlation::{CorrelationTable, IdGenerator, Pending, RandomIds};
use crate::envelope::{ID, Inbound, NOTIFY, SOLICIT, classify};
use crate::error::{ProtocolError, SessionError, TransportError};
use crate::path::{resolve, websocket_url};
use crate::registry::{Handler, Registry, Reply};
use crate::transport::{Connector, Transport};

/// Path prefix of REST service websockets on the node.
pub const DEFAULT_PATH_PREFIX: &str = "svc_rest/websocket/";

/// Default time allowed for the transport to connect.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// What the receive loop does with a frame that violates the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolErrorPolicy {
    /// End the session.
    #[default]
    Terminate,
    /// Log the frame and keep reading.
    Skip,
}

/// Session tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Prefix placed before the resolved service path in the URL.
    pub prefix: String,
    /// Time allowed for the transport to connect.
    pub connect_timeout: Duration,
    /// Handling of protocol errors in the receive loop.
    pub protocol_errors: ProtocolErrorPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PATH_PREFIX.to_owned(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            protocol_errors: ProtocolErrorPolicy::default(),
        }
    }
}

/// Where to open a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// HTTP(S) URL of the node.
    pub base_url: String,
    /// Current folder that relative service paths resolve against.
    pub folder: String,
    /// Service path or id.
    pub service: String,
    /// `Cookie` header value presented on connect.
    pub cookie: Option<String>,
}

impl Endpoint {
    /// Endpoint for `service` on the node at `base_url`, resolved from `/`.
    pub fn new(base_url: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            folder: "/".to_owned(),
            service: service.into(),
            cookie: None,
        }
    }

    /// Resolve relative service paths against `folder`.
    #[must_use]
    pub fn with_folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = folder.into();
        self
    }

    /// Present `cookie` as the `Cookie` header.
    #[must_use]
    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = Some(cookie.into());
        self
    }

    /// Websocket URL for this endpoint under `prefix`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidUrl`] if the base URL is unusable.
    pub fn url(&self, prefix: &str) -> Result<String, SessionError> {
        websocket_url(&self.base_url, prefix, &resolve(&self.folder, &self.service))
    }
}

type Hook = Box<dyn FnOnce(&DuplexSession) + Send>;

/// Open and close callbacks.
#[derive(Default)]
pub struct Hooks {
    on_open: Option<Hook>,
    on_close: Option<Hook>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("on_open", &self.on_open.is_some())
            .field("on_close", &self.on_close.is_some())
            .finish()
    }
}

impl Hooks {
    /// No hooks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` once the transport is live, before any inbound frame is
    /// processed. This is where implementations are usually registered.
    #[must_use]
    pub fn on_open<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&DuplexSession) + Send + 'static,
    {
        self.on_open = Some(Box::new(f));
        self
    }

    /// Run `f` once when the session ends, on the receive loop task. It must
    /// not block.
    #[must_use]
    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&DuplexSession) + Send + 'static,
    {
        self.on_close = Some(Box::new(f));
        self
    }
}

type Ack = oneshot::Receiver<Result<(), TransportError>>;

/// Work queued for the receive loop.
#[derive(Debug)]
pub(crate) enum Command {
    /// Write a frame, reporting the outcome on `ack` if present.
    Frame {
        text: String,
        ack: Option<oneshot::Sender<Result<(), TransportError>>>,
    },
    /// Close the transport and end the loop.
    Close,
}

/// Sending half of the loop's command queue.
#[derive(Debug, Clone)]
pub(crate) struct Outbox {
    tx: mpsc::UnboundedSender<Command>,
}

impl Outbox {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<Command>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a frame without waiting for the write.
    pub(crate) fn send(&self, value: &Value) -> Result<(), SessionError> {
        self.push(encode(value)?, None)
    }

    /// Queue a frame and return a receiver for the write outcome.
    fn send_acked(&self, value: &Value) -> Result<Ack, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.push(encode(value)?, Some(tx))?;
        Ok(rx)
    }

    fn push(
        &self,
        text: String,
        ack: Option<oneshot::Sender<Result<(), TransportError>>>,
    ) -> Result<(), SessionError> {
        self.tx
            .send(Command::Frame { text, ack })
            .map_err(|_| SessionError::Closed)
    }

    fn close(&self) {
        let _ = self.tx.send(Command::Close);
    }
}

fn encode(value: &Value) -> Result<String, SessionError> {
    serde_json::to_string(value).map_err(|e| SessionError::InvalidPayload(e.to_string()))
}

fn settle(ack: Result<Result<(), TransportError>, oneshot::error::RecvError>) -> Result<(), SessionError> {
    match ack {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(SessionError::Transport(e)),
        Err(_) => Err(SessionError::Closed),
    }
}

/// Take `payload` as an object carrying a string `key` discriminator.
fn envelope_of(payload: Value, key: &str) -> Result<Map<String, Value>, SessionError> {
    let Value::Object(object) = payload else {
        return Err(SessionError::InvalidPayload(format!("{key} must be a JSON object")));
    };
    if !object.get(key).is_some_and(Value::is_string) {
        return Err(SessionError::InvalidPayload(format!("{key} has no '{key}' path")));
    }
    Ok(object)
}

struct Inner {
    url: String,
    config: SessionConfig,
    registry: Registry,
    pending: CorrelationTable,
    outbox: Outbox,
    open: AtomicBool,
    on_close: Mutex<Option<Hook>>,
    done: watch::Sender<bool>,
}

/// Handle to a live duplex session.
///
/// Cloning is cheap; every clone refers to the same session.
#[derive(Clone)]
pub struct DuplexSession {
    inner: Arc<Inner>,
}

impl fmt::Debug for DuplexSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DuplexSession")
            .field("url", &self.inner.url)
            .field("open", &self.is_open())
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

impl DuplexSession {
    /// Open a session to `endpoint`.
    ///
    /// Resolves the service path against the endpoint folder, connects, runs
    /// the open hook and starts the receive loop.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidUrl`] if the URL cannot be built and
    /// [`SessionError::Connection`] if the transport cannot be established.
    pub async fn open(
        connector: &dyn Connector,
        endpoint: &Endpoint,
        config: SessionConfig,
        hooks: Hooks,
    ) -> Result<Self, SessionError> {
        Self::open_with_ids(connector, endpoint, config, hooks, Box::new(RandomIds)).await
    }

    /// [`open`](Self::open) with a caller supplied correlation id source.
    ///
    /// # Errors
    ///
    /// See [`open`](Self::open).
    pub async fn open_with_ids(
        connector: &dyn Connector,
        endpoint: &Endpoint,
        config: SessionConfig,
        hooks: Hooks,
        ids: Box<dyn IdGenerator>,
    ) -> Result<Self, SessionError> {
        let url = endpoint.url(&config.prefix)?;
        debug!(url = %url, service = %endpoint.service, "opening duplex session");

        let transport = timeout(
            config.connect_timeout,
            connector.connect(&url, endpoint.cookie.as_deref()),
        )
        .await
        .map_err(|_| SessionError::Connection(TransportError::Timeout(config.connect_timeout)))?
        .map_err(SessionError::Connection)?;

        Ok(Self::start(url, transport, config, hooks, ids))
    }

    /// Run a session over an already established transport.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        url: impl Into<String>,
        transport: Box<dyn Transport>,
        config: SessionConfig,
        hooks: Hooks,
        ids: Box<dyn IdGenerator>,
    ) -> Self {
        let (outbox, commands) = Outbox::channel();
        let (done, _) = watch::channel(false);

        let session = Self {
            inner: Arc::new(Inner {
                url: url.into(),
                config,
                registry: Registry::new(),
                pending: CorrelationTable::new(ids),
                outbox,
                open: AtomicBool::new(true),
                on_close: Mutex::new(hooks.on_close),
                done,
            }),
        };

        if let Some(on_open) = hooks.on_open {
            on_open(&session);
        }

        let looped = session.clone();
        tokio::spawn(async move { looped.run(transport, commands).await });

        session
    }

    /// URL the session is connected to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// The implementation registry consulted for inbound consume and
    /// request messages.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Whether the session is still open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    /// Number of solicits awaiting a response.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.pending.len()
    }

    /// Send a fire-and-forget `notify`.
    ///
    /// Returns once the frame is written; no reply is expected.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidPayload`] for a payload without a
    /// `notify` path, [`SessionError::Transport`] if the write fails and
    /// [`SessionError::Closed`] after close.
    pub async fn notify(&self, payload: Value) -> Result<(), SessionError> {
        let ack = self.queue_notify(payload)?;
        settle(ack.await)
    }

    /// Blocking form of [`notify`](Self::notify) for threads outside the
    /// runtime.
    ///
    /// # Errors
    ///
    /// See [`notify`](Self::notify).
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    pub fn notify_blocking(&self, payload: Value) -> Result<(), SessionError> {
        let ack = self.queue_notify(payload)?;
        settle(ack.blocking_recv())
    }

    /// Send a `solicit` and return its id without waiting for the response.
    ///
    /// `callback` runs on the receive loop with the response once it
    /// arrives. Its `response` field holds the leaf status, e.g. `"Ok"`.
    ///
    /// # Errors
    ///
    /// As for [`notify`](Self::notify); on error the callback is dropped
    /// without being called.
    pub async fn solicit_with<F>(&self, payload: Value, callback: F) -> Result<String, SessionError>
    where
        F: FnOnce(Value) + Send + 'static,
    {
        let (id, ack) = self.queue_solicit(payload, Pending::Callback(Box::new(callback)))?;
        self.confirm(&id, ack.await)?;
        Ok(id)
    }

    /// Send a `solicit` and wait for the matching response.
    ///
    /// # Errors
    ///
    /// As for [`notify`](Self::notify), plus [`SessionError::Closed`] if the
    /// session ends before the response arrives.
    pub async fn solicit(&self, payload: Value) -> Result<Value, SessionError> {
        let (tx, rx) = oneshot::channel();
        let (id, ack) = self.queue_solicit(payload, Pending::Waiter(tx))?;
        let mut guard = CancelOnDrop::new(&self.inner.pending, &id);

        self.confirm(&id, ack.await)?;
        let response = rx.await;
        guard.disarm();
        response.unwrap_or(Err(SessionError::Closed))
    }

    /// Blocking form of [`solicit`](Self::solicit) for threads outside the
    /// runtime.
    ///
    /// # Errors
    ///
    /// See [`solicit`](Self::solicit).
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    pub fn solicit_blocking(&self, payload: Value) -> Result<Value, SessionError> {
        let (tx, rx) = oneshot::channel();
        let (id, ack) = self.queue_solicit(payload, Pending::Waiter(tx))?;

        self.confirm(&id, ack.blocking_recv())?;
        rx.blocking_recv().unwrap_or(Err(SessionError::Closed))
    }

    /// Close the session.
    ///
    /// Safe to call any number of times and from any thread; the close hook
    /// still runs once. Use [`closed`](Self::closed) to wait for the
    /// receive loop to finish.
    pub fn close(&self) {
        if self.inner.open.swap(false, Ordering::SeqCst) {
            debug!(url = %self.inner.url, "closing duplex session");
        }
        self.inner.outbox.close();
    }

    /// Wait until the receive loop has finished.
    pub async fn closed(&self) {
        let mut done = self.inner.done.subscribe();
        let _ = done.wait_for(|finished| *finished).await;
    }

    fn queue_notify(&self, payload: Value) -> Result<Ack, SessionError> {
        let payload = envelope_of(payload, NOTIFY)?;
        if !self.is_open() {
            return Err(SessionError::Closed);
        }
        trace!(path = ?payload.get(NOTIFY), "notify");
        self.inner.outbox.send_acked(&Value::Object(payload))
    }

    fn queue_solicit(&self, payload: Value, pending: Pending) -> Result<(String, Ack), SessionError> {
        let mut payload = envelope_of(payload, SOLICIT)?;
        if !self.is_open() {
            return Err(SessionError::Closed);
        }

        let id = self.inner.pending.register(pending);
        payload.insert(ID.to_owned(), Value::String(id.clone()));
        trace!(id = %id, path = ?payload.get(SOLICIT), "solicit");

        match self.inner.outbox.send_acked(&Value::Object(payload)) {
            Ok(ack) => Ok((id, ack)),
            Err(e) => {
                self.inner.pending.cancel(&id);
                Err(e)
            }
        }
    }

    fn confirm(
        &self,
        id: &str,
        ack: Result<Result<(), TransportError>, oneshot::error::RecvError>,
    ) -> Result<(), SessionError> {
        settle(ack).inspect_err(|_| {
            self.inner.pending.cancel(id);
        })
    }

    async fn run(
        self,
        mut transport: Box<dyn Transport>,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) {
        let _finish = FinishOnDrop(self.clone());

        let reason = loop {
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(Command::Frame { text, ack }) => {
                        let result = transport.send(text).await;
                        if let Some(ack) = ack {
                            let _ = ack.send(result.clone());
                        }
                        if let Err(e) = result {
                            break format!("send failed: {e}");
                        }
                    }
                    Some(Command::Close) | None => break "closed locally".to_owned(),
                },

                frame = transport.recv() => match frame {
                    Some(Ok(text)) => {
                        if let Err(e) = self.dispatch(&text) {
                            match self.inner.config.protocol_errors {
                                ProtocolErrorPolicy::Terminate => break format!("protocol error: {e}"),
                                ProtocolErrorPolicy::Skip => warn!(error = %e, "skipping bad frame"),
                            }
                        }
                    }
                    Some(Err(e)) => break format!("receive failed: {e}"),
                    None => break "closed by peer".to_owned(),
                },
            }
        };

        debug!(url = %self.inner.url, reason = %reason, "receive loop finished");
        self.inner.open.store(false, Ordering::SeqCst);
        commands.close();

        if let Err(e) = transport.close().await {
            debug!(error = %e, "ignoring transport close error");
        }
    }

    /// Route one inbound frame.
    fn dispatch(&self, text: &str) -> Result<(), ProtocolError> {
        let Some(inbound) = classify(text)? else {
            return Ok(());
        };
        trace!(kind = %inbound.kind(), id = ?inbound.id(), "inbound frame");

        match inbound {
            Inbound::Consume {
                path,
                id: None,
                message,
            } => match self.handler(&path)? {
                Handler::Consume(f) => {
                    f(message);
                    Ok(())
                }
                Handler::Request(_) => Err(ProtocolError::HandlerShape {
                    path,
                    expected: "consume",
                }),
            },
            Inbound::Consume {
                path,
                id: Some(id),
                message,
            }
            | Inbound::Request { path, id, message } => self.dispatch_with_reply(path, id, message),
            Inbound::Response { id, message } => self.inner.pending.resolve(&id, message),
        }
    }

    fn dispatch_with_reply(&self, path: String, id: String, message: Value) -> Result<(), ProtocolError> {
        match self.handler(&path)? {
            Handler::Request(f) => {
                let reply = Reply::new(path, id, self.inner.outbox.clone());
                f(message, reply);
                Ok(())
            }
            Handler::Consume(_) => Err(ProtocolError::HandlerShape {
                path,
                expected: "request",
            }),
        }
    }

    fn handler(&self, path: &str) -> Result<Handler, ProtocolError> {
        self.inner
            .registry
            .get(path)
            .ok_or_else(|| ProtocolError::NoHandler(path.to_owned()))
    }

    /// Release waiters, run the close hook and signal `closed`.
    fn finish(&self) {
        self.inner.open.store(false, Ordering::SeqCst);

        let cancelled = self.inner.pending.drain();
        if cancelled > 0 {
            debug!(cancelled, "cancelled outstanding solicits");
        }

        let hook = self.inner.on_close.lock().take();
        if let Some(on_close) = hook {
            on_close(self);
        }

        self.inner.done.send_replace(true);
    }
}

/// Runs [`DuplexSession::finish`] when the receive loop ends, including by
/// panic in a handler or callback.
struct FinishOnDrop(DuplexSession);

impl Drop for FinishOnDrop {
    fn drop(&mut self) {
        self.0.finish();
    }
}

/// Removes a waiter whose caller stopped waiting.
struct CancelOnDrop<'a> {
    table: &'a CorrelationTable,
    id: Option<&'a str>,
}

impl<'a> CancelOnDrop<'a> {
    fn new(table: &'a CorrelationTable, id: &'a str) -> Self {
        Self { table, id: Some(id) }
    }

    fn disarm(&mut self) {
        self.id = None;
    }
}

impl Drop for CancelOnDrop<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id {
            self.table.cancel(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::correlation::SequentialIds;
    use crate::transport::MemoryTransport;
    use serde_json::json;

    fn start_pair(hooks: Hooks) -> (DuplexSession, MemoryTransport) {
        let (local, peer) = MemoryTransport::pair();
        let session = DuplexSession::start(
            "memory://test",
            Box::new(local),
            SessionConfig::default(),
            hooks,
            Box::new(SequentialIds::new("ID")),
        );
        (session, peer)
    }

    async fn next_json(peer: &mut MemoryTransport) -> Value {
        let text = peer
            .recv()
            .await
            .expect("peer stream open")
            .expect("frame received");
        serde_json::from_str(&text).expect("frame is JSON")
    }

    #[test]
    fn endpoint_url_resolves_against_folder() {
        let endpoint = Endpoint::new("http://localhost:8000", "TestRest/REST").with_folder("/Scratch");
        let url = endpoint.url(DEFAULT_PATH_PREFIX).expect("valid");
        assert_eq!(url, "ws://localhost:8000/svc_rest/websocket//Scratch/TestRest/REST");
    }

    #[test]
    fn envelope_requires_discriminator() {
        assert!(envelope_of(json!({"notify": "A"}), NOTIFY).is_ok());
        assert!(matches!(
            envelope_of(json!({"solicit": "A"}), NOTIFY),
            Err(SessionError::InvalidPayload(_))
        ));
        assert!(matches!(
            envelope_of(json!("A"), NOTIFY),
            Err(SessionError::InvalidPayload(_))
        ));
    }

    #[tokio::test]
    async fn notify_sends_frame_without_pending_entry() {
        let (session, mut peer) = start_pair(Hooks::new());

        session
            .notify(json!({"notify": "Mix/Notify", "data": {"x": 1}}))
            .await
            .expect("notify");

        assert_eq!(session.pending(), 0);
        assert_eq!(next_json(&mut peer).await, json!({"notify": "Mix/Notify", "data": {"x": 1}}));
    }

    #[tokio::test]
    async fn solicit_attaches_generated_id() {
        let (session, mut peer) = start_pair(Hooks::new());
        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.solicit(json!({"solicit": "Mix/CheckPrime"})).await })
        };

        let sent = next_json(&mut peer).await;
        assert_eq!(sent["id"], json!("ID0"));
        assert_eq!(session.pending(), 1);

        peer.send(json!({"response": "REST/Yes", "id": "ID0"}).to_string())
            .await
            .expect("peer send");

        let response = waiter.await.expect("task").expect("response");
        assert_eq!(response["response"], json!("Yes"));
        assert_eq!(session.pending(), 0);
    }

    #[tokio::test]
    async fn close_twice_runs_hook_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&closes);
        let (session, _peer) = start_pair(Hooks::new().on_close(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        session.close();
        session.close();
        session.closed().await;

        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn operations_after_close_fail() {
        let (session, _peer) = start_pair(Hooks::new());
        session.close();
        session.closed().await;

        assert!(matches!(
            session.notify(json!({"notify": "A"})).await,
            Err(SessionError::Closed)
        ));
        assert!(matches!(
            session.solicit(json!({"solicit": "A"})).await,
            Err(SessionError::Closed)
        ));
        assert_eq!(session.pending(), 0);
    }

    #[tokio::test]
    async fn dropped_solicit_future_removes_its_entry() {
        let (session, mut peer) = start_pair(Hooks::new());

        let call = session.solicit(json!({"solicit": "Mix/Slow"}));
        let timed_out = tokio::time::timeout(Duration::from_millis(50), call).await;
        assert!(timed_out.is_err());

        let _ = next_json(&mut peer).await;
        assert_eq!(session.pending(), 0);
    }
}
