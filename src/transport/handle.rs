//! Per-generation connection handle and its event loop.
//!
//! A [`ConnectionHandle`] wraps one physical [`Link`]. The handle spawns a
//! tokio task that handles:
//!
//! - Incoming frames from the router, fanned out to listeners in arrival order
//! - Outgoing frames from the Rust API
//! - Local shutdown and remote close, reported once to the owner

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{Generation, SubscriptionId};
use crate::protocol::Envelope;

use super::{Endpoint, Link};

// ============================================================================
// Types
// ============================================================================

/// Why a generation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The router closed the link or the link failed.
    Remote,
    /// [`ConnectionHandle::close`] or a disconnect.
    Local,
    /// A connect to a different endpoint replaced this generation.
    Superseded,
}

/// Event emitted by a connection handle.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A text frame arrived.
    Message {
        /// Generation that received the frame.
        generation: Generation,
        /// Raw frame text.
        text: String,
    },
    /// The generation ended.
    Closed {
        /// Generation that ended.
        generation: Generation,
        /// Why it ended.
        reason: CloseReason,
    },
}

/// Discriminator used when registering listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEventKind {
    /// [`TransportEvent::Message`].
    Message,
    /// [`TransportEvent::Closed`].
    Closed,
}

impl TransportEvent {
    /// Returns the event's kind.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> TransportEventKind {
        match self {
            Self::Message { .. } => TransportEventKind::Message,
            Self::Closed { .. } => TransportEventKind::Closed,
        }
    }
}

/// Listener callback.
pub type TransportHandler = Arc<dyn Fn(&TransportEvent) + Send + Sync>;

/// Callback invoked once when the event loop exits.
pub(crate) type ClosedCallback = Box<dyn FnOnce(Generation, CloseReason) + Send>;

/// Registered listener.
struct Listener {
    id: SubscriptionId,
    kind: TransportEventKind,
    handler: TransportHandler,
}

/// Internal commands for the event loop.
enum HandleCommand {
    /// Send a text frame.
    Send(String),
    /// Close the link.
    Shutdown(CloseReason),
}

// ============================================================================
// ConnectionHandle
// ============================================================================

/// Handle to one connection generation.
///
/// Cheap to clone; all clones address the same event loop.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    generation: Generation,
    endpoint: Endpoint,
    command_tx: mpsc::UnboundedSender<HandleCommand>,
    listeners: Mutex<Vec<Listener>>,
    open: AtomicBool,
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("generation", &self.inner.generation)
            .field("endpoint", &self.inner.endpoint)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

/// Event loop that has not been started yet.
///
/// Dropping it without calling [`Pump::spawn`] closes the link.
pub(crate) struct Pump {
    handle: ConnectionHandle,
    link: Link,
    command_rx: mpsc::UnboundedReceiver<HandleCommand>,
}

impl ConnectionHandle {
    /// Wraps a freshly opened link.
    ///
    /// The event loop only starts once the returned [`Pump`] is spawned, so
    /// listeners attached in between see every frame.
    pub(crate) fn open(generation: Generation, endpoint: Endpoint, link: Link) -> (Self, Pump) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let handle = Self {
            inner: Arc::new(HandleInner {
                generation,
                endpoint,
                command_tx,
                listeners: Mutex::new(Vec::new()),
                open: AtomicBool::new(true),
            }),
        };

        let pump = Pump {
            handle: handle.clone(),
            link,
            command_rx,
        };

        (handle, pump)
    }

    /// Returns the generation of this handle.
    #[inline]
    #[must_use]
    pub fn generation(&self) -> Generation {
        self.inner.generation
    }

    /// Returns the endpoint this handle is connected to.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    /// Returns `true` until the event loop exits or a close is requested.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    /// Sends a raw text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the generation has ended.
    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        if !self.is_open() {
            return Err(Error::ConnectionClosed);
        }

        self.inner
            .command_tx
            .send(HandleCommand::Send(text.into()))
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Serializes and sends an envelope.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if serialization fails
    /// - [`Error::ConnectionClosed`] if the generation has ended
    pub fn send(&self, envelope: &Envelope) -> Result<()> {
        self.send_text(envelope.to_text()?)
    }

    /// Registers a listener for one event kind.
    pub fn on(&self, kind: TransportEventKind, handler: TransportHandler) -> SubscriptionId {
        let id = SubscriptionId::next();
        self.inner.listeners.lock().push(Listener { id, kind, handler });
        id
    }

    /// Removes a listener. Returns `false` if it was not registered.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.inner.listeners.lock();
        let before = listeners.len();
        listeners.retain(|listener| listener.id != id);
        listeners.len() != before
    }

    /// Closes this generation.
    pub fn close(&self) {
        self.close_with(CloseReason::Local);
    }

    /// Closes this generation with an explicit reason.
    pub(crate) fn close_with(&self, reason: CloseReason) {
        if self.inner.open.swap(false, Ordering::SeqCst) {
            let _ = self.inner.command_tx.send(HandleCommand::Shutdown(reason));
        }
    }

    /// Invokes every listener registered for the event's kind.
    fn emit(&self, event: &TransportEvent) {
        let kind = event.kind();
        let handlers: Vec<TransportHandler> = self
            .inner
            .listeners
            .lock()
            .iter()
            .filter(|listener| listener.kind == kind)
            .map(|listener| Arc::clone(&listener.handler))
            .collect();

        for handler in handlers {
            handler(event);
        }
    }
}

// ============================================================================
// Pump
// ============================================================================

impl Pump {
    /// Starts the event loop.
    ///
    /// `on_closed` runs once after the loop exits and the `Closed` event was
    /// delivered to listeners.
    pub(crate) fn spawn(self, on_closed: ClosedCallback) {
        tokio::spawn(self.run(on_closed));
    }

    /// Event loop that handles link I/O.
    async fn run(self, on_closed: ClosedCallback) {
        let Self {
            handle,
            link,
            mut command_rx,
        } = self;
        let Link { tx, mut rx } = link;
        let generation = handle.generation();

        let reason = loop {
            tokio::select! {
                // Incoming frames from the router
                frame = rx.recv() => {
                    match frame {
                        Some(text) => {
                            trace!(%generation, len = text.len(), "Frame received");
                            handle.emit(&TransportEvent::Message { generation, text });
                        }
                        None => {
                            debug!(%generation, "Link closed by remote");
                            break CloseReason::Remote;
                        }
                    }
                }

                // Commands from the Rust API
                command = command_rx.recv() => {
                    match command {
                        Some(HandleCommand::Send(text)) => {
                            if tx.send(text).is_err() {
                                warn!(%generation, "Failed to send frame, link gone");
                                break CloseReason::Remote;
                            }
                        }

                        Some(HandleCommand::Shutdown(reason)) => {
                            debug!(%generation, ?reason, "Shutdown command received");
                            break reason;
                        }

                        None => {
                            debug!(%generation, "Command channel closed");
                            break CloseReason::Local;
                        }
                    }
                }
            }
        };

        drop(tx);
        handle.inner.open.store(false, Ordering::SeqCst);
        handle.emit(&TransportEvent::Closed { generation, reason });
        on_closed(generation, reason);

        debug!(%generation, "Event loop terminated");
    }
}

// ============================================================================
// Tests
// ============================================================================
