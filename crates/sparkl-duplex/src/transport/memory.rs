//! In-process transport over tokio channels.

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{Connector, Transport};
use crate::error::TransportError;

/// One end of an in-process duplex pair.
#[derive(Debug)]
pub struct MemoryTransport {
    tx: Option<mpsc::UnboundedSender<String>>,
    rx: mpsc::UnboundedReceiver<String>,
}

impl MemoryTransport {
    /// Create two connected ends. Frames sent on one are received on the
    /// other, in order.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Some(a_tx),
                rx: a_rx,
            },
            Self {
                tx: Some(b_tx),
                rx: b_rx,
            },
        )
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.tx
            .as_ref()
            .ok_or(TransportError::Closed)?
            .send(text)
            .map_err(|_| TransportError::Closed)
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.tx = None;
        self.rx.close();
        Ok(())
    }
}

/// Connector handing out a prepared [`MemoryTransport`] once.
///
/// Records the URL and cookie it was asked to connect with.
#[derive(Debug)]
pub struct MemoryConnector {
    transport: Mutex<Option<MemoryTransport>>,
    requested: Mutex<Option<(String, Option<String>)>>,
}

impl MemoryConnector {
    /// Wrap the session side of a pair.
    #[must_use]
    pub fn new(transport: MemoryTransport) -> Self {
        Self {
            transport: Mutex::new(Some(transport)),
            requested: Mutex::new(None),
        }
    }

    /// A connector that always refuses.
    #[must_use]
    pub fn refusing() -> Self {
        Self {
            transport: Mutex::new(None),
            requested: Mutex::new(None),
        }
    }

    /// URL and cookie of the last connect call.
    #[must_use]
    pub fn requested(&self) -> Option<(String, Option<String>)> {
        self.requested.lock().clone()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        url: &str,
        cookie: Option<&str>,
    ) -> Result<Box<dyn Transport>, TransportError> {
        *self.requested.lock() = Some((url.to_owned(), cookie.map(str::to_owned)));

        self.transport
            .lock()
            .take()
            .map(|transport| Box::new(transport) as Box<dyn Transport>)
            .ok_or_else(|| TransportError::Connect(format!("no memory transport for {url}")))
    }
}
