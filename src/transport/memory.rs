//! In-memory connector.
//!
//! [`MemoryConnector`] plays the router: each accepted attempt yields a
//! [`RemoteEnd`] the caller drives by hand. Attempts follow a script of
//! [`Attempt`]s and fall back to [`Attempt::Accept`] once it runs out.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::{Error, Result};
use crate::protocol::Envelope;

use super::{Connector, Endpoint, Link};

// ============================================================================
// Attempt
// ============================================================================

/// Scripted outcome of one connect attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt {
    /// Accept immediately.
    Accept,
    /// Accept after a delay.
    AcceptAfter(Duration),
    /// Fail with a connection error.
    Refuse(String),
    /// Never complete.
    Hang,
}

// ============================================================================
// RemoteEnd
// ============================================================================

/// Router side of an accepted link.
#[derive(Debug)]
pub struct RemoteEnd {
    /// Endpoint the host connected to.
    pub endpoint: Endpoint,
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

impl RemoteEnd {
    /// Pushes a raw frame to the host. Returns `false` once the host is gone.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.tx.send(text.into()).is_ok()
    }

    /// Pushes an envelope to the host.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if serialization fails
    /// - [`Error::ConnectionClosed`] if the host side is gone
    pub fn send(&self, envelope: &Envelope) -> Result<()> {
        let text = envelope.to_text()?;
        if self.send_text(text) {
            Ok(())
        } else {
            Err(Error::ConnectionClosed)
        }
    }

    /// Receives the next raw frame sent by the host.
    ///
    /// Returns `None` once the host closed the link.
    pub async fn recv_text(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Receives and parses the next frame sent by the host.
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            let text = self.rx.recv().await?;
            match Envelope::parse(&text) {
                Ok(envelope) => return Some(envelope),
                Err(e) => trace!(error = %e, "Skipping unparseable host frame"),
            }
        }
    }

    /// Closes the link from the router side.
    pub fn close(self) {
        drop(self);
    }
}

// ============================================================================
// MemoryConnector
// ============================================================================

/// Connector backed by in-process channels.
#[derive(Debug)]
pub struct MemoryConnector {
    script: Mutex<VecDeque<Attempt>>,
    accepted_tx: mpsc::UnboundedSender<RemoteEnd>,
    accepted_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<RemoteEnd>>,
    attempts: AtomicUsize,
    opened: AtomicUsize,
}

impl MemoryConnector {
    /// Creates a connector that accepts every attempt.
    #[must_use]
    pub fn new() -> Arc<Self> {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            accepted_tx,
            accepted_rx: tokio::sync::Mutex::new(accepted_rx),
            attempts: AtomicUsize::new(0),
            opened: AtomicUsize::new(0),
        })
    }

    /// Queues the outcome of a future attempt.
    pub fn script(&self, attempt: Attempt) {
        self.script.lock().push_back(attempt);
    }

    /// Waits for the next accepted link.
    pub async fn accept(&self) -> Option<RemoteEnd> {
        self.accepted_rx.lock().await.recv().await
    }

    /// Returns the next accepted link if one is already waiting.
    pub fn try_accept(&self) -> Option<RemoteEnd> {
        self.accepted_rx.try_lock().ok()?.try_recv().ok()
    }

    /// Number of connect attempts seen, whatever their outcome.
    #[inline]
    #[must_use]
    pub fn attempt_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Number of links handed out.
    #[inline]
    #[must_use]
    pub fn opened_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    fn link(&self, endpoint: &Endpoint) -> Link {
        let (to_remote_tx, to_remote_rx) = mpsc::unbounded_channel();
        let (to_host_tx, to_host_rx) = mpsc::unbounded_channel();

        self.opened.fetch_add(1, Ordering::SeqCst);
        let _ = self.accepted_tx.send(RemoteEnd {
            endpoint: endpoint.clone(),
            tx: to_host_tx,
            rx: to_remote_rx,
        });

        Link {
            tx: to_remote_tx,
            rx: to_host_rx,
        }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self, endpoint: &Endpoint) -> Result<Link> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let attempt = self.script.lock().pop_front().unwrap_or(Attempt::Accept);
        trace!(?attempt, room = %endpoint.room, "Memory connect attempt");

        match attempt {
            Attempt::Accept => Ok(self.link(endpoint)),
            Attempt::AcceptAfter(delay) => {
                tokio::time::sleep(delay).await;
                Ok(self.link(endpoint))
            }
            Attempt::Refuse(message) => Err(Error::connection(message)),
            Attempt::Hang => std::future::pending::<Result<Link>>().await,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[tokio::test]
    async fn test_scripted_attempts_then_accept() {
        let connector = MemoryConnector::new();
        connector.script(Attempt::Refuse("nope".into()));
        let endpoint = Endpoint::new("ws://h:1", "r1");

        assert!(connector.open(&endpoint).await.is_err());
        assert!(connector.open(&endpoint).await.is_ok());
        assert_eq!(connector.attempt_count(), 2);
        assert_eq!(connector.opened_count(), 1);
    }

    #[tokio::test]
    async fn test_remote_end_exchanges_frames() {
        let connector = MemoryConnector::new();
        let mut link = connector
            .open(&Endpoint::new("ws://h:1", "r1"))
            .await
            .expect("open");
        let mut remote = connector.accept().await.expect("remote");

        remote
            .send(&Envelope::new("RoomClients", json!([])))
            .expect("send");
        let text = link.rx.recv().await.expect("frame");
        assert_eq!(Envelope::parse(&text).expect("parse").event, "RoomClients");

        link.tx.send("not json".into()).expect("send");
        link.tx
            .send(Envelope::new("CDP", json!({})).to_text().expect("text"))
            .expect("send");
        let received = remote.recv().await.expect("envelope");
        assert_eq!(received.event, "CDP");

        remote.close();
        assert!(link.rx.recv().await.is_none());
    }
}
