//! Request/reply correlation over the router transport.
//!
//! Every correlated request gets a process-unique [`RequestId`] and a
//! caller-supplied [`MatchPredicate`]. Incoming frames are tested against the
//! pending set first; frames nobody was waiting for go to the subscribers of
//! their kind.
//!
//! # Guarantees
//!
//! - A pending request settles exactly once: with the first matching frame,
//!   or with [`Error::RequestTimeout`]
//! - The entry leaves the pending set in both outcomes, and when the caller
//!   drops the future
//! - Reconnects leave pending requests alone; they wait for their timeout

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{Generation, RequestId, SubscriptionId};
use crate::protocol::{Envelope, MatchPredicate};
use crate::transport::{ConnectionHandle, TransportConnection, TransportEvent, TransportEventKind};

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for correlated requests.
pub(crate) const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Types
// ============================================================================

/// Subscriber callback for unsolicited frames.
pub type FrameHandler = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// One request waiting for its reply.
struct Pending {
    predicate: MatchPredicate,
    reply_tx: oneshot::Sender<Envelope>,
}

/// Map of request IDs to waiting requests.
type CorrelationMap = FxHashMap<RequestId, Pending>;

/// Durable subscription to one frame kind, or to every kind when `None`.
struct Subscription {
    id: SubscriptionId,
    kind: Option<String>,
    handler: FrameHandler,
}

/// Shared state behind [`DebugSession`].
struct SessionInner {
    pending: Mutex<CorrelationMap>,
    subscriptions: Mutex<Vec<Subscription>>,
    attached: Mutex<Option<Generation>>,
}

/// Removes a pending entry when the waiting future goes away.
struct PendingGuard<'a> {
    inner: &'a SessionInner,
    request_id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.inner.pending.lock().remove(&self.request_id).is_some() {
            trace!(request_id = %self.request_id, "Dropped pending correlation");
        }
    }
}

// ============================================================================
// DebugSession
// ============================================================================

/// Correlation engine bound to one [`TransportConnection`].
///
/// Cheap to clone; clones share the pending set and subscriptions.
#[derive(Clone)]
pub struct DebugSession {
    transport: TransportConnection,
    inner: Arc<SessionInner>,
    default_timeout: Duration,
}

impl fmt::Debug for DebugSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugSession")
            .field("pending", &self.pending_count())
            .field("subscriptions", &self.inner.subscriptions.lock().len())
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// DebugSession - Construction
// ============================================================================

impl DebugSession {
    /// Creates a session with the default request timeout (30s).
    #[must_use]
    pub fn new(transport: TransportConnection) -> Self {
        Self::with_timeout(transport, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Creates a session with a custom default request timeout.
    ///
    /// The session attaches its dispatcher to every generation the
    /// transport opens from now on, and to the current one if connected.
    #[must_use]
    pub fn with_timeout(transport: TransportConnection, default_timeout: Duration) -> Self {
        let inner = Arc::new(SessionInner {
            pending: Mutex::new(FxHashMap::default()),
            subscriptions: Mutex::new(Vec::new()),
            attached: Mutex::new(None),
        });

        let weak = Arc::downgrade(&inner);
        transport.on_open(Arc::new(move |handle| {
            if let Some(inner) = weak.upgrade() {
                SessionInner::attach(&inner, handle);
            }
        }));

        if let Some(handle) = transport.current() {
            SessionInner::attach(&inner, &handle);
        }

        Self {
            transport,
            inner,
            default_timeout,
        }
    }

    /// Returns the underlying transport.
    #[inline]
    #[must_use]
    pub fn transport(&self) -> &TransportConnection {
        &self.transport
    }

    /// Returns the default request timeout.
    #[inline]
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }
}

// ============================================================================
// DebugSession - Correlation
// ============================================================================

impl DebugSession {
    /// Sends a request and waits for the first frame matching its predicate.
    ///
    /// `build` receives the allocated id and returns the envelope to send
    /// together with the predicate recognizing its reply.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if nothing is connected
    /// - [`Error::RequestTimeout`] if no matching frame arrives in time
    pub async fn send_correlated<F>(&self, build: F, request_timeout: Duration) -> Result<Envelope>
    where
        F: FnOnce(RequestId) -> (Envelope, MatchPredicate),
    {
        let request_id = RequestId::next();
        let (envelope, predicate) = build(request_id);
        let (reply_tx, reply_rx) = oneshot::channel();

        self.inner
            .pending
            .lock()
            .insert(request_id, Pending { predicate, reply_tx });
        let _guard = PendingGuard {
            inner: &self.inner,
            request_id,
        };

        self.transport.send(&envelope)?;
        trace!(%request_id, kind = envelope.kind(), "Correlated request sent");

        match timeout(request_timeout, reply_rx).await {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                let timeout_ms = request_timeout.as_millis() as u64;
                warn!(%request_id, kind = envelope.kind(), timeout_ms, "Request timed out");
                Err(Error::request_timeout(request_id, timeout_ms))
            }
        }
    }

    /// Sends a frame without waiting for anything.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if nothing is connected.
    pub fn send_unsolicited(&self, envelope: &Envelope) -> Result<()> {
        self.transport.send(envelope)
    }

    /// Returns the number of requests waiting for a reply.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }
}

// ============================================================================
// DebugSession - Subscriptions
// ============================================================================

impl DebugSession {
    /// Subscribes to unsolicited frames of one kind.
    ///
    /// The subscription survives reconnects.
    pub fn subscribe(&self, kind: impl Into<String>, handler: FrameHandler) -> SubscriptionId {
        let id = SubscriptionId::next();
        let kind = kind.into();
        debug!(%id, %kind, "Subscribed");
        self.inner
            .subscriptions
            .lock()
            .push(Subscription {
                id,
                kind: Some(kind),
                handler,
            });
        id
    }

    /// Subscribes to every unsolicited frame, after kind-specific handlers.
    pub fn subscribe_all(&self, handler: FrameHandler) -> SubscriptionId {
        let id = SubscriptionId::next();
        debug!(%id, "Subscribed to all kinds");
        self.inner.subscriptions.lock().push(Subscription {
            id,
            kind: None,
            handler,
        });
        id
    }

    /// Removes a subscription. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.inner.subscriptions.lock();
        let before = subscriptions.len();
        subscriptions.retain(|subscription| subscription.id != id);
        subscriptions.len() != before
    }
}

// ============================================================================
// SessionInner - Dispatch
// ============================================================================

impl SessionInner {
    /// Hooks the dispatcher onto a generation once.
    fn attach(inner: &Arc<Self>, handle: &ConnectionHandle) {
        {
            let mut attached = inner.attached.lock();
            if attached.is_some_and(|generation| generation >= handle.generation()) {
                return;
            }
            *attached = Some(handle.generation());
        }

        let weak: Weak<Self> = Arc::downgrade(inner);
        handle.on(
            TransportEventKind::Message,
            Arc::new(move |event| {
                if let TransportEvent::Message { generation, text } = event
                    && let Some(inner) = weak.upgrade()
                {
                    match Envelope::parse(text) {
                        Ok(frame) => inner.dispatch(&frame),
                        Err(e) => warn!(%generation, error = %e, "Failed to parse incoming frame"),
                    }
                }
            }),
        );

        debug!(generation = %handle.generation(), "Session attached to connection");
    }

    /// Settles matching requests, or hands the frame to subscribers.
    fn dispatch(&self, frame: &Envelope) {
        let settled: Vec<(RequestId, oneshot::Sender<Envelope>)> = {
            let mut pending = self.pending.lock();
            let matched: Vec<RequestId> = pending
                .iter()
                .filter(|(_, entry)| (entry.predicate)(frame))
                .map(|(id, _)| *id)
                .collect();

            matched
                .into_iter()
                .filter_map(|id| pending.remove(&id).map(|entry| (id, entry.reply_tx)))
                .collect()
        };

        if !settled.is_empty() {
            for (request_id, reply_tx) in settled {
                trace!(%request_id, kind = frame.kind(), "Reply matched");
                let _ = reply_tx.send(frame.clone());
            }
            return;
        }

        let handlers: Vec<FrameHandler> = {
            let subscriptions = self.subscriptions.lock();
            let specific = subscriptions
                .iter()
                .filter(|subscription| subscription.kind.as_deref() == Some(frame.kind()));
            let catch_all = subscriptions
                .iter()
                .filter(|subscription| subscription.kind.is_none());
            specific
                .chain(catch_all)
                .map(|subscription| Arc::clone(&subscription.handler))
                .collect()
        };

        if handlers.is_empty() {
            trace!(kind = frame.kind(), "Unsolicited frame without subscribers");
            return;
        }

        for handler in handlers {
            handler(frame);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
