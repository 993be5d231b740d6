//! Custom events between plugins and the presentation layer.
//!
//! Events published before the presentation side is ready are queued and
//! flushed exactly once, in arrival order, by [`EventBus::mark_ready`].
//! Asynchronous events ([`EventBus::invoke`]) wait for a matching
//! [`EventBus::resolve_event`] or time out.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{EventId, PluginId};

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for asynchronous events.
const DEFAULT_INVOKE_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Types
// ============================================================================

/// Receives events once the presentation side is ready.
///
/// Called without the bus lock held, so it may publish or resolve events
/// inline. Events it publishes are delivered after the ones already queued.
pub type EventSink = Arc<dyn Fn(CustomEvent) + Send + Sync>;

/// Waiting invoke.
type PendingInvoke = oneshot::Sender<Result<Value>>;

// ============================================================================
// CustomEvent
// ============================================================================

/// Event addressed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomEvent {
    /// Correlation id, set for asynchronous events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EventId>,
    /// Event name.
    pub event_name: String,
    /// Originating plugin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_id: Option<PluginId>,
    /// `true` when the sender waits for a response.
    #[serde(default)]
    pub is_async: bool,
    /// Response timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Event payload.
    #[serde(default)]
    pub params: Value,
}

impl CustomEvent {
    /// Creates a fire-and-forget event.
    #[must_use]
    pub fn new(event_name: impl Into<String>, params: Value) -> Self {
        Self {
            id: None,
            event_name: event_name.into(),
            plugin_id: None,
            is_async: false,
            timeout_ms: None,
            params,
        }
    }

    /// Sets the originating plugin.
    #[inline]
    #[must_use]
    pub fn with_plugin(mut self, plugin_id: impl Into<PluginId>) -> Self {
        self.plugin_id = Some(plugin_id.into());
        self
    }

    /// Sets the response timeout.
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }
}

/// Response to an asynchronous event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventResponse {
    /// Id of the event being answered.
    pub id: EventId,
    /// Result value.
    #[serde(default)]
    pub result: Value,
    /// Error message, if the handler failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EventResponse {
    /// Creates a successful response.
    #[must_use]
    pub fn ok(id: EventId, result: Value) -> Self {
        Self {
            id,
            result,
            error: None,
        }
    }
}

// ============================================================================
// EventBus
// ============================================================================

/// Queue, readiness flag and pending invokes.
#[derive(Default)]
struct EventState {
    ready: bool,
    /// Set while one caller drains the queue into the sink.
    flushing: bool,
    queue: VecDeque<CustomEvent>,
    sink: Option<EventSink>,
    pending: FxHashMap<EventId, PendingInvoke>,
}

/// Ordered delivery of custom events.
#[derive(Default)]
pub struct EventBus {
    state: Mutex<EventState>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("EventBus")
            .field("ready", &state.ready)
            .field("queued", &state.queue.len())
            .field("pending", &state.pending.len())
            .finish_non_exhaustive()
    }
}

/// Removes a pending invoke when the waiting future goes away.
struct InvokeGuard<'a> {
    bus: &'a EventBus,
    id: EventId,
}

impl Drop for InvokeGuard<'_> {
    fn drop(&mut self) {
        self.bus.state.lock().pending.remove(&self.id);
    }
}

impl EventBus {
    /// Creates a bus that queues until [`Self::mark_ready`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the presentation sink, flushing the queue if already ready.
    pub fn set_event_sink(&self, sink: EventSink) {
        self.state.lock().sink = Some(sink);
        self.drain();
    }

    /// Marks the presentation side ready and flushes queued events in order.
    pub fn mark_ready(&self) {
        {
            let mut state = self.state.lock();
            if state.ready {
                return;
            }
            state.ready = true;
            debug!(queued = state.queue.len(), "Event bus ready");
        }
        self.drain();
    }

    /// Returns `true` once [`Self::mark_ready`] was called.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state.lock().ready
    }

    /// Publishes an event: delivered now when ready, queued otherwise.
    pub fn publish(&self, event: CustomEvent) {
        trace!(event_name = %event.event_name, "Publishing custom event");
        self.state.lock().queue.push_back(event);
        self.drain();
    }

    /// Publishes an asynchronous event and waits for its response.
    ///
    /// Uses the event's own timeout when set, otherwise 30s.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if nobody responds in time
    /// - [`Error::ContextReset`] if the bus is reset while waiting
    /// - [`Error::Protocol`] if the response carries an error
    pub async fn invoke(&self, mut event: CustomEvent) -> Result<Value> {
        let id = EventId::generate();
        let wait = event
            .timeout_ms
            .map_or(DEFAULT_INVOKE_TIMEOUT, Duration::from_millis);
        let event_name = event.event_name.clone();

        event.id = Some(id);
        event.is_async = true;
        event.timeout_ms = Some(wait.as_millis() as u64);

        let (tx, rx) = oneshot::channel();
        self.state.lock().pending.insert(id, tx);
        let _guard = InvokeGuard { bus: self, id };

        self.publish(event);

        match timeout(wait, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                let timeout_ms = wait.as_millis() as u64;
                warn!(%id, %event_name, timeout_ms, "Custom event timed out");
                Err(Error::timeout(format!("custom event {event_name}"), timeout_ms))
            }
        }
    }

    /// Settles the invoke with the response's id.
    ///
    /// Returns `false` if nothing is waiting for it.
    pub fn resolve_event(&self, response: EventResponse) -> bool {
        let Some(tx) = self.state.lock().pending.remove(&response.id) else {
            debug!(id = %response.id, "Response for unknown custom event");
            return false;
        };

        let result = match response.error {
            Some(message) => Err(Error::protocol(message)),
            None => Ok(response.result),
        };
        let _ = tx.send(result);
        true
    }

    /// Drops queued events, clears readiness and rejects pending invokes.
    pub fn reset(&self) {
        let pending: Vec<PendingInvoke> = {
            let mut state = self.state.lock();
            state.ready = false;
            state.flushing = false;
            state.queue.clear();
            state.pending.drain().map(|(_, tx)| tx).collect()
        };

        debug!(rejected = pending.len(), "Event bus reset");
        for tx in pending {
            let _ = tx.send(Err(Error::ContextReset));
        }
    }

    /// Returns the number of queued events.
    #[must_use]
    pub fn queued_count(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Returns the number of invokes waiting for a response.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Delivers queued events one at a time, releasing the lock around each
    /// sink call. Only one caller drains at a time; others leave their
    /// events to it, which keeps delivery FIFO.
    fn drain(&self) {
        {
            let mut state = self.state.lock();
            if state.flushing || !state.ready || state.sink.is_none() {
                return;
            }
            state.flushing = true;
        }

        loop {
            let (sink, event) = {
                let mut state = self.state.lock();
                let next = match (state.ready, state.sink.clone()) {
                    (true, Some(sink)) => state.queue.pop_front().map(|event| (sink, event)),
                    _ => None,
                };
                let Some(next) = next else {
                    state.flushing = false;
                    return;
                };
                next
            };

            trace!(event_name = %event.event_name, "Delivering custom event");
            sink(event);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;
    use serde_json::json;

    fn recording_bus() -> (EventBus, Arc<Mutex<Vec<CustomEvent>>>) {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.set_event_sink(Arc::new(move |event: CustomEvent| sink.lock().push(event)));
        (bus, seen)
    }

    #[test]
    fn test_queue_flushes_once_in_order() {
        let (bus, seen) = recording_bus();
        bus.publish(CustomEvent::new("a", Value::Null));
        bus.publish(CustomEvent::new("b", Value::Null));
        assert!(seen.lock().is_empty());
        assert_eq!(bus.queued_count(), 2);

        bus.mark_ready();
        bus.mark_ready();
        bus.publish(CustomEvent::new("c", Value::Null));

        let names: Vec<String> = seen.lock().iter().map(|e| e.event_name.clone()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(bus.queued_count(), 0);
    }

    #[test]
    fn test_sink_installed_after_ready_flushes() {
        let bus = EventBus::new();
        bus.publish(CustomEvent::new("early", Value::Null));
        bus.mark_ready();
        assert_eq!(bus.queued_count(), 1);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.set_event_sink(Arc::new(move |event: CustomEvent| sink.lock().push(event.event_name)));
        assert_eq!(*seen.lock(), vec!["early".to_owned()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invoke_resolves() {
        let bus = Arc::new(EventBus::new());
        let responder = Arc::clone(&bus);
        bus.set_event_sink(Arc::new(move |event: CustomEvent| {
            assert!(event.is_async);
            let id = event.id.expect("async events carry an id");
            let responder = Arc::clone(&responder);
            tokio::spawn(async move {
                responder.resolve_event(EventResponse::ok(id, json!("done")));
            });
        }));
        bus.mark_ready();

        let result = bus.invoke(CustomEvent::new("ask", json!({}))).await;
        assert_eq!(result.expect("response"), json!("done"));
        assert_eq!(bus.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invoke_times_out() {
        let (bus, _seen) = recording_bus();
        bus.mark_ready();

        let result = bus
            .invoke(CustomEvent::new("ask", Value::Null).with_timeout(Duration::from_millis(50)))
            .await;

        assert!(matches!(result, Err(Error::Timeout { timeout_ms: 50, .. })));
        assert_eq!(bus.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_rejects_pending() {
        let bus = Arc::new(EventBus::new());
        bus.publish(CustomEvent::new("queued", Value::Null));

        let waiter = Arc::clone(&bus);
        let invoke = tokio::spawn(async move { waiter.invoke(CustomEvent::new("ask", Value::Null)).await });
        tokio::time::sleep(Duration::from_millis(1)).await;

        bus.reset();
        let result = invoke.await.expect("join");
        assert!(matches!(result, Err(Error::ContextReset)));
        assert_eq!(bus.queued_count(), 0);
        assert!(!bus.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invoke_settles_exactly_once() {
        let (bus, seen) = recording_bus();
        bus.mark_ready();

        let mut invoke = tokio_test::task::spawn(bus.invoke(CustomEvent::new("ask", Value::Null)));
        tokio_test::assert_pending!(invoke.poll());

        let id = seen.lock()[0].id.expect("id");
        assert!(bus.resolve_event(EventResponse::ok(id, json!(1))));
        assert!(!bus.resolve_event(EventResponse::ok(id, json!(2))));

        assert!(invoke.is_woken());
        let value = tokio_test::assert_ready_ok!(invoke.poll());
        assert_eq!(value, json!(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_may_respond_inline() {
        let bus = Arc::new(EventBus::new());
        let responder = Arc::downgrade(&bus);
        bus.set_event_sink(Arc::new(move |event: CustomEvent| {
            if let (Some(bus), Some(id)) = (responder.upgrade(), event.id) {
                bus.resolve_event(EventResponse::ok(id, json!("inline")));
            }
        }));
        bus.mark_ready();

        let result = bus
            .invoke(CustomEvent::new("ask", Value::Null).with_timeout(Duration::from_secs(3)))
            .await;
        assert_eq!(result.expect("inline response"), json!("inline"));
        assert_eq!(bus.pending_count(), 0);
    }

    #[test]
    fn test_sink_may_publish_inline() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let publisher = Arc::downgrade(&bus);
        let sink = Arc::clone(&seen);
        bus.set_event_sink(Arc::new(move |event: CustomEvent| {
            if event.event_name == "a"
                && let Some(bus) = publisher.upgrade()
            {
                bus.publish(CustomEvent::new("a-reply", Value::Null));
            }
            sink.lock().push(event.event_name);
        }));

        bus.publish(CustomEvent::new("a", Value::Null));
        bus.publish(CustomEvent::new("b", Value::Null));
        bus.mark_ready();
        bus.publish(CustomEvent::new("c", Value::Null));

        assert_eq!(*seen.lock(), vec!["a", "b", "a-reply", "c"]);
        assert_eq!(bus.queued_count(), 0);
    }

    #[test]
    fn test_unknown_response_is_ignored() {
        let bus = EventBus::new();
        assert!(!bus.resolve_event(EventResponse::ok(EventId::generate(), Value::Null)));
    }

    proptest! {
        #[test]
        fn prop_flush_preserves_order(before in 0usize..20, after in 0usize..20) {
            let (bus, seen) = recording_bus();
            for i in 0..before {
                bus.publish(CustomEvent::new(format!("e{i}"), Value::Null));
            }
            bus.mark_ready();
            for i in before..before + after {
                bus.publish(CustomEvent::new(format!("e{i}"), Value::Null));
            }

            let names: Vec<String> = seen.lock().iter().map(|e| e.event_name.clone()).collect();
            let expected: Vec<String> = (0..before + after).map(|i| format!("e{i}")).collect();
            prop_assert_eq!(names, expected);
        }
    }
}
