//! Logical router connection with generation tracking.
//!
//! [`TransportConnection`] owns at most one published [`ConnectionHandle`].
//! Every `connect` call gets a new [`Generation`]; an attempt that settles
//! after a newer one started is torn down instead of being published, so a
//! slow stale link can never replace a newer one.
//!
//! # State Machine
//!
//! ```text
//! Unconnected ──connect──► Connecting ──link──► Connected
//!      ▲                        │                   │
//!      └──── failure ───────────┘◄───── close ──────┘
//!      (retry after backoff while the endpoint is still desired)
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::identifiers::{Generation, SubscriptionId};
use crate::protocol::Envelope;

use super::handle::{CloseReason, ConnectionHandle};
use super::{Connector, Endpoint};

// ============================================================================
// Constants
// ============================================================================

/// Default bound on establishing a link.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default delay before reconnecting a closed link.
const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(3);

// ============================================================================
// TransportOptions
// ============================================================================

/// Timing configuration of a [`TransportConnection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportOptions {
    /// Maximum time a single connect attempt may take.
    pub connect_timeout: Duration,
    /// Delay between a close and the reconnect attempt.
    pub reconnect_backoff: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect_backoff: DEFAULT_RECONNECT_BACKOFF,
        }
    }
}

impl TransportOptions {
    /// Sets the connect timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Sets the reconnect backoff.
    #[inline]
    #[must_use]
    pub fn with_reconnect_backoff(mut self, reconnect_backoff: Duration) -> Self {
        self.reconnect_backoff = reconnect_backoff;
        self
    }
}

// ============================================================================
// ConnectionState
// ============================================================================

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No link and no attempt in flight.
    #[default]
    Unconnected,
    /// An attempt for this generation is in flight.
    Connecting {
        /// Generation being established.
        generation: Generation,
    },
    /// This generation's handle is published.
    Connected {
        /// Published generation.
        generation: Generation,
    },
}

impl ConnectionState {
    /// Returns `true` when a handle is published.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }
}

// ============================================================================
// Types
// ============================================================================

/// Hook invoked for every newly published generation, before its first frame
/// is delivered.
pub type OpenHook = Arc<dyn Fn(&ConnectionHandle) + Send + Sync>;

/// Desired endpoint and the published handle.
#[derive(Default)]
struct Slot {
    desired: Option<Endpoint>,
    current: Option<ConnectionHandle>,
}

/// Shared state behind [`TransportConnection`].
struct TransportInner {
    connector: Arc<dyn Connector>,
    options: TransportOptions,
    generation: AtomicU64,
    slot: Mutex<Slot>,
    open_hooks: Mutex<Vec<(SubscriptionId, OpenHook)>>,
    state_tx: watch::Sender<ConnectionState>,
}

// ============================================================================
// TransportConnection
// ============================================================================

/// Single logical connection to a remote router.
///
/// # Thread Safety
///
/// `TransportConnection` is `Send + Sync` and cheap to clone.
#[derive(Clone)]
pub struct TransportConnection {
    inner: Arc<TransportInner>,
}

impl fmt::Debug for TransportConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportConnection")
            .field("state", &self.state())
            .field("latest_generation", &self.inner.latest_generation())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// TransportConnection - Public API
// ============================================================================

impl TransportConnection {
    /// Creates an unconnected transport.
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>, options: TransportOptions) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Unconnected);

        Self {
            inner: Arc::new(TransportInner {
                connector,
                options,
                generation: AtomicU64::new(0),
                slot: Mutex::new(Slot::default()),
                open_hooks: Mutex::new(Vec::new()),
                state_tx,
            }),
        }
    }

    /// Connects to the endpoint.
    ///
    /// Idempotent while already connected to the same endpoint. Connecting
    /// to a different endpoint tears the previous handle down first.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionTimeout`] if the link is not up within the connect timeout
    /// - [`Error::Connection`] if the connector fails
    /// - [`Error::Superseded`] if a newer `connect` started meanwhile
    pub async fn connect(&self, endpoint: Endpoint) -> Result<ConnectionHandle> {
        let previous = {
            let mut slot = self.inner.slot.lock();

            if slot.desired.as_ref() == Some(&endpoint)
                && let Some(current) = slot.current.as_ref()
                && current.is_open()
            {
                debug!(generation = %current.generation(), "Already connected to endpoint");
                return Ok(current.clone());
            }

            let previous = if slot.desired.as_ref() == Some(&endpoint) {
                None
            } else {
                slot.current.take()
            };
            slot.desired = Some(endpoint.clone());
            previous
        };

        if let Some(previous) = previous {
            info!(
                generation = %previous.generation(),
                address = %previous.endpoint().address,
                room = %previous.endpoint().room,
                "Endpoint changed, tearing down previous connection"
            );
            previous.close_with(CloseReason::Superseded);
        }

        Arc::clone(&self.inner).open_generation(endpoint).await
    }

    /// Closes the current connection and stops reconnecting.
    pub fn disconnect(&self) {
        let current = {
            let mut slot = self.inner.slot.lock();
            slot.desired = None;
            slot.current.take()
        };

        if let Some(current) = current {
            info!(generation = %current.generation(), "Disconnecting");
            current.close();
        }

        self.inner.state_tx.send_replace(ConnectionState::Unconnected);
    }

    /// Returns the published handle, if connected.
    #[must_use]
    pub fn current(&self) -> Option<ConnectionHandle> {
        self.inner
            .slot
            .lock()
            .current
            .as_ref()
            .filter(|handle| handle.is_open())
            .cloned()
    }

    /// Returns the endpoint the transport is trying to stay connected to.
    #[must_use]
    pub fn desired_endpoint(&self) -> Option<Endpoint> {
        self.inner.slot.lock().desired.clone()
    }

    /// Sends an envelope on the published handle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if nothing is connected.
    pub fn send(&self, envelope: &Envelope) -> Result<()> {
        self.current().ok_or(Error::ConnectionClosed)?.send(envelope)
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Returns a receiver that observes state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Returns the most recently assigned generation.
    #[inline]
    #[must_use]
    pub fn latest_generation(&self) -> Generation {
        self.inner.latest_generation()
    }

    /// Registers a hook run for every published generation.
    ///
    /// The hook runs before the generation's event loop starts, so listeners
    /// it attaches observe every frame.
    pub fn on_open(&self, hook: OpenHook) -> SubscriptionId {
        let id = SubscriptionId::next();
        self.inner.open_hooks.lock().push((id, hook));
        id
    }

    /// Removes an open hook. Returns `false` if it was not registered.
    pub fn remove_open_hook(&self, id: SubscriptionId) -> bool {
        let mut hooks = self.inner.open_hooks.lock();
        let before = hooks.len();
        hooks.retain(|(hook_id, _)| *hook_id != id);
        hooks.len() != before
    }
}

// ============================================================================
// TransportInner - Generations
// ============================================================================

impl TransportInner {
    fn latest_generation(&self) -> Generation {
        Generation::from_raw(self.generation.load(Ordering::SeqCst))
    }

    /// Runs one connect attempt under a fresh generation.
    async fn open_generation(self: Arc<Self>, endpoint: Endpoint) -> Result<ConnectionHandle> {
        let generation = Generation::from_raw(self.generation.fetch_add(1, Ordering::SeqCst) + 1);
        self.state_tx
            .send_replace(ConnectionState::Connecting { generation });

        debug!(
            %generation,
            address = %endpoint.address,
            room = %endpoint.room,
            "Connecting"
        );

        let link = match timeout(self.options.connect_timeout, self.connector.open(&endpoint)).await
        {
            Ok(Ok(link)) => link,
            Ok(Err(e)) => {
                warn!(%generation, error = %e, "Connect attempt failed");
                self.attempt_failed(generation, endpoint);
                return Err(e);
            }
            Err(_) => {
                let timeout_ms = self.options.connect_timeout.as_millis() as u64;
                warn!(%generation, timeout_ms, "Connect attempt timed out");
                self.attempt_failed(generation, endpoint);
                return Err(Error::connection_timeout(timeout_ms));
            }
        };

        let (handle, pump) = ConnectionHandle::open(generation, endpoint.clone(), link);

        {
            let mut slot = self.slot.lock();
            let latest = self.latest_generation();

            if latest != generation || slot.desired.as_ref() != Some(&endpoint) {
                drop(slot);
                debug!(%generation, %latest, "Discarding superseded connection");
                // Dropping the unstarted pump closes the link.
                drop(pump);
                return Err(Error::superseded(generation, latest));
            }

            slot.current = Some(handle.clone());
        }

        self.state_tx
            .send_replace(ConnectionState::Connected { generation });

        let hooks: Vec<OpenHook> = self
            .open_hooks
            .lock()
            .iter()
            .map(|(_, hook)| Arc::clone(hook))
            .collect();
        for hook in hooks {
            hook(&handle);
        }

        let weak = Arc::downgrade(&self);
        pump.spawn(Box::new(move |generation, reason| {
            if let Some(inner) = weak.upgrade() {
                inner.generation_closed(generation, reason);
            }
        }));

        info!(
            %generation,
            address = %endpoint.address,
            room = %endpoint.room,
            "Connection opened"
        );

        Ok(handle)
    }

    /// Handles a failed attempt: state flag, then retry if still wanted.
    fn attempt_failed(self: &Arc<Self>, generation: Generation, endpoint: Endpoint) {
        if self.latest_generation() == generation {
            self.state_tx.send_replace(ConnectionState::Unconnected);
            self.schedule_reconnect(generation, endpoint);
        }
    }

    /// Handles the end of a published generation.
    fn generation_closed(self: Arc<Self>, generation: Generation, reason: CloseReason) {
        let desired = {
            let mut slot = self.slot.lock();
            match slot.current.as_ref() {
                Some(current) if current.generation() == generation => {
                    slot.current = None;
                }
                _ => {
                    debug!(%generation, ?reason, "Closed generation was no longer published");
                    return;
                }
            }
            slot.desired.clone()
        };

        info!(%generation, ?reason, "Connection closed");

        if self.latest_generation() == generation {
            self.state_tx.send_replace(ConnectionState::Unconnected);
        }

        if let Some(endpoint) = desired {
            self.schedule_reconnect(generation, endpoint);
        }
    }

    /// Reconnects after the backoff unless something newer happened.
    fn schedule_reconnect(self: &Arc<Self>, generation: Generation, endpoint: Endpoint) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let backoff = self.options.reconnect_backoff;

        debug!(%generation, backoff_ms = backoff.as_millis() as u64, "Reconnect scheduled");

        tokio::spawn(async move {
            sleep(backoff).await;

            let Some(inner) = weak.upgrade() else {
                return;
            };

            {
                let slot = inner.slot.lock();
                if slot.desired.as_ref() != Some(&endpoint)
                    || slot.current.is_some()
                    || inner.latest_generation() != generation
                {
                    debug!(%generation, "Reconnect superseded");
                    return;
                }
            }

            if let Err(e) = inner.open_generation(endpoint).await {
                debug!(error = %e, "Reconnect attempt failed");
            }
        });
    }
}

// ============================================================================
// Tests
// ============================================================================
