//! Debug host coordinator.
//!
//! The [`DebugHost`] owns one of each component and wires them together:
//!
//! ```text
//! TransportConnection ──frames──▶ DebugSession ──RoomClients──▶ TopologyStore
//!                                      │        ──ListSession──▶ TopologyStore
//!                                      └──other Customized──▶ PluginHost (custom events)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use devtools_bridge::{DebugHost, Endpoint};
//!
//! let host = DebugHost::builder().plugin("./plugins/network.zip").build()?;
//! host.start(Endpoint::new("ws://127.0.0.1:19783", "room-1")).await?;
//!
//! let device = host.topology().active_device_id();
//! // ...
//! host.stop().await;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::identifiers::{DeviceId, RequestId, SessionId, SubscriptionId};
use crate::plugin::{BuiltinFactory, CustomEvent, HookReport, PluginHost, PluginLoader, PluginSource};
use crate::protocol::{Envelope, kind, parse_device_roster, parse_session_roster};
use crate::session::DebugSession;
use crate::topology::{SelectionCache, SessionChange, TopologyStore};
use crate::transport::{Connector, Endpoint, TransportConnection};

use super::builder::DebugHostBuilder;
use super::options::HostOptions;

// ============================================================================
// Constants
// ============================================================================

/// CDP command stopping a session's screencast.
const STOP_SCREENCAST_METHOD: &str = "Page.stopScreencast";

// ============================================================================
// Types
// ============================================================================

/// Validated collaborators handed over by [`DebugHostBuilder`].
pub(crate) struct HostParts {
    pub connector: Arc<dyn Connector>,
    pub options: HostOptions,
    pub builtins: Vec<BuiltinFactory>,
    pub plugin_sources: Vec<PluginSource>,
    pub loader: Arc<dyn PluginLoader>,
    pub selection_cache: Arc<dyn SelectionCache>,
}

/// Internal shared state for the host.
pub(crate) struct HostInner {
    /// Timing configuration.
    pub options: HostOptions,

    /// Router connection.
    pub transport: TransportConnection,

    /// Correlation engine over `transport`.
    pub session: DebugSession,

    /// Device and session topology.
    pub topology: Arc<TopologyStore>,

    /// Plugins and custom events.
    pub plugins: Arc<PluginHost>,

    /// Frame subscriptions installed by the host.
    pub routes: Mutex<Vec<SubscriptionId>>,
}

// ============================================================================
// DebugHost
// ============================================================================

/// Debug host coordinator.
///
/// The host is responsible for:
/// - Routing roster frames into the [`TopologyStore`]
/// - Forwarding remaining `Customized` frames to plugins as custom events
/// - Stopping the outgoing session's screencast before a session switch
/// - Plugin lifecycle around `start` and `stop`
///
/// Cheap to clone; clones share every component.
#[derive(Clone)]
pub struct DebugHost {
    /// Shared inner state.
    pub(crate) inner: Arc<HostInner>,
}

// ============================================================================
// DebugHost - Display
// ============================================================================

impl fmt::Debug for DebugHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugHost")
            .field("state", &self.inner.transport.state())
            .field("device_count", &self.inner.topology.devices().len())
            .field("plugin_count", &self.inner.plugins.descriptors().len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// DebugHost - Public API
// ============================================================================

impl DebugHost {
    /// Creates a configuration builder for the host.
    #[inline]
    #[must_use]
    pub fn builder() -> DebugHostBuilder {
        DebugHostBuilder::new()
    }

    /// Discovers and creates plugins, then connects to the router.
    ///
    /// Plugin hook failures are logged and do not fail the start.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionTimeout`] if the router doesn't answer in time
    /// - [`Error::Connection`] if the router refuses the connection
    /// - [`Error::Superseded`] if another `start` replaced this one
    pub async fn start(&self, endpoint: Endpoint) -> Result<()> {
        let plugins = &self.inner.plugins;
        if plugins.descriptors().is_empty() {
            plugins.discover().await;
            log_report(&plugins.create(Value::Null).await);
        }

        info!(address = %endpoint.address, room = %endpoint.room, "Starting debug host");
        self.inner.transport.connect(endpoint).await?;
        Ok(())
    }

    /// Disconnects from the router and destroys plugins.
    pub async fn stop(&self) -> HookReport {
        info!("Stopping debug host");
        self.inner.transport.disconnect();
        let report = self.inner.plugins.destroy().await;
        log_report(&report);
        report
    }

    /// Re-discovers plugins and runs their restart hooks with `params`.
    pub async fn restart_plugins(&self, params: Value) -> HookReport {
        let report = self.inner.plugins.restart(params).await;
        log_report(&report);
        report
    }

    /// Captures a screenshot of a session and caches it in the topology.
    ///
    /// # Errors
    ///
    /// - [`Error::RequestTimeout`] if the agent does not answer in time
    /// - [`Error::MalformedPayload`] if the reply carries no image data
    pub async fn capture_screenshot(&self, device_id: &DeviceId, session_id: SessionId) -> Result<String> {
        let data = self
            .inner
            .session
            .request_screenshot(device_id, session_id, self.inner.options.request_timeout)
            .await?;

        if !self.inner.topology.update_screenshot(device_id, session_id, data.clone()) {
            debug!(%device_id, %session_id, "Screenshot for a session no longer listed");
        }
        Ok(data)
    }

    /// Returns the timing configuration.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &HostOptions {
        &self.inner.options
    }

    /// Returns the router connection.
    #[inline]
    #[must_use]
    pub fn transport(&self) -> &TransportConnection {
        &self.inner.transport
    }

    /// Returns the correlation engine.
    #[inline]
    #[must_use]
    pub fn session(&self) -> &DebugSession {
        &self.inner.session
    }

    /// Returns the topology store.
    #[inline]
    #[must_use]
    pub fn topology(&self) -> &Arc<TopologyStore> {
        &self.inner.topology
    }

    /// Returns the plugin host.
    #[inline]
    #[must_use]
    pub fn plugins(&self) -> &Arc<PluginHost> {
        &self.inner.plugins
    }
}

// ============================================================================
// DebugHost - Internal API
// ============================================================================

impl DebugHost {
    /// Creates the components and installs the routes between them.
    pub(crate) fn new(parts: HostParts) -> Self {
        let transport = TransportConnection::new(parts.connector, parts.options.transport);
        let session = DebugSession::with_timeout(transport.clone(), parts.options.request_timeout);
        let topology = Arc::new(TopologyStore::new(parts.selection_cache));
        let plugins = Arc::new(PluginHost::new(parts.builtins, parts.plugin_sources, parts.loader));

        let routes = vec![
            route_device_roster(&session, &topology),
            route_session_roster(&session, &topology),
            route_custom_events(&session, &plugins),
        ];

        if parts.options.stop_screencast_on_switch {
            install_screencast_cleanup(&session, &topology);
        }

        debug!(
            connect_timeout_ms = parts.options.transport.connect_timeout.as_millis() as u64,
            request_timeout_ms = parts.options.request_timeout.as_millis() as u64,
            "Debug host initialized"
        );

        Self {
            inner: Arc::new(HostInner {
                options: parts.options,
                transport,
                session,
                topology,
                plugins,
                routes: Mutex::new(routes),
            }),
        }
    }
}

impl Drop for HostInner {
    fn drop(&mut self) {
        for id in self.routes.get_mut().drain(..) {
            self.session.unsubscribe(id);
        }
    }
}

// ============================================================================
// Routes
// ============================================================================

/// `RoomClients` → device roster reconciliation.
fn route_device_roster(session: &DebugSession, topology: &Arc<TopologyStore>) -> SubscriptionId {
    let topology = Arc::clone(topology);
    session.subscribe(
        kind::ROOM_CLIENTS,
        Arc::new(move |frame| match parse_device_roster(frame) {
            Ok(roster) => topology.apply_device_roster(roster),
            Err(e) => warn!(error = %e, "Ignoring malformed device roster"),
        }),
    )
}

/// `ListSession` → session roster reconciliation.
fn route_session_roster(session: &DebugSession, topology: &Arc<TopologyStore>) -> SubscriptionId {
    let topology = Arc::clone(topology);
    session.subscribe(
        kind::LIST_SESSION,
        Arc::new(move |frame| match parse_session_roster(frame) {
            Ok((device_id, roster)) => topology.apply_session_roster(&device_id, roster),
            Err(e) => warn!(error = %e, "Ignoring malformed session roster"),
        }),
    )
}

/// Other `Customized` kinds → plugin custom events.
fn route_custom_events(session: &DebugSession, plugins: &Arc<PluginHost>) -> SubscriptionId {
    let plugins = Arc::clone(plugins);
    session.subscribe_all(Arc::new(move |frame| {
        if !frame.is_customized() || frame.kind() == kind::LIST_SESSION {
            return;
        }
        plugins.publish(CustomEvent::new(frame.kind(), custom_event_params(frame)));
    }))
}

/// Flattens a `Customized` channel into custom event params.
fn custom_event_params(frame: &Envelope) -> Value {
    json!({
        "client_id": frame.client_id(),
        "session_id": frame.session_id(),
        "message": frame.message().unwrap_or(Value::Null),
    })
}

/// Sends `Page.stopScreencast` to the outgoing session before a switch.
fn install_screencast_cleanup(session: &DebugSession, topology: &Arc<TopologyStore>) {
    let session = session.clone();
    let weak = Arc::downgrade(topology);
    topology.on_session_will_change(Arc::new(move |change: &SessionChange| {
        let Some(old) = change.old.as_ref() else {
            return;
        };
        let Some(topology) = weak.upgrade() else {
            return;
        };
        // Listeners run before the commit, so this is still the old owner.
        let Some(device_id) = topology.active_device_id().or_else(|| change.device_id.clone()) else {
            return;
        };

        let message = json!({ "id": RequestId::next(), "method": STOP_SCREENCAST_METHOD });
        let envelope = Envelope::customized(
            kind::CDP,
            &device_id,
            Some(old.id),
            Value::String(message.to_string()),
        );

        match session.send_unsolicited(&envelope) {
            Ok(()) => debug!(%device_id, session_id = %old.id, "Stopped screencast of outgoing session"),
            Err(Error::ConnectionClosed) => {}
            Err(e) => warn!(%device_id, session_id = %old.id, error = %e, "Failed to stop screencast"),
        }
    }));
}

/// Logs hook failures.
fn log_report(report: &HookReport) {
    for (plugin_id, cause) in &report.failed {
        warn!(%plugin_id, hook = %report.hook, error = %cause, "Plugin hook failed");
    }
    debug!(
        hook = %report.hook,
        invoked = report.invoked.len(),
        failed = report.failed.len(),
        "Plugin hook finished"
    );
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use crate::plugin::{Hook, PluginDescriptor};
    use crate::topology::MemorySelectionCache;
    use crate::transport::{MemoryConnector, RemoteEnd};

    fn endpoint() -> Endpoint {
        Endpoint::new("ws://router:19783", "room-1")
    }

    fn host_with(connector: &Arc<MemoryConnector>) -> DebugHost {
        DebugHost::builder()
            .connector(Arc::clone(connector) as Arc<dyn Connector>)
            .selection_cache(Arc::new(MemorySelectionCache::new()))
            .builtin_plugin(|| {
                PluginDescriptor::new("console", "Console").with_hook(Hook::Create, |_| async { Ok(()) })
            })
            .build()
            .expect("build")
    }

    async fn started() -> (DebugHost, RemoteEnd) {
        let connector = MemoryConnector::new();
        let host = host_with(&connector);
        host.start(endpoint()).await.expect("start");
        let remote = connector.accept().await.expect("remote");
        (host, remote)
    }

    fn device_roster() -> Envelope {
        Envelope::new(
            kind::ROOM_CLIENTS,
            json!([{
                "id": 7,
                "info": { "appId": "demo", "model": "Pixel", "osType": "Android", "isMainProcess": true }
            }]),
        )
    }

    fn session_roster(ids: &[u64]) -> Envelope {
        let sessions: Vec<Value> = ids
            .iter()
            .map(|id| json!({ "session_id": id, "url": format!("https://app/{id}"), "type": "web" }))
            .collect();
        Envelope::customized(kind::LIST_SESSION, &DeviceId::from(7), None, json!(sessions))
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[test]
    fn test_host_is_clone_and_debug() {
        fn assert_clone_debug<T: Clone + fmt::Debug>() {}
        assert_clone_debug::<DebugHost>();
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_discovers_plugins_and_connects() {
        let (host, _remote) = started().await;

        assert!(host.transport().state().is_connected());
        assert_eq!(host.plugins().descriptors().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rosters_reach_topology() {
        let (host, remote) = started().await;

        remote.send(&device_roster()).expect("devices");
        settle().await;
        assert_eq!(host.topology().active_device_id(), Some(DeviceId::from(7)));

        remote.send(&session_roster(&[1, 3])).expect("sessions");
        settle().await;
        assert_eq!(host.topology().sessions(&DeviceId::from(7)).len(), 2);
        assert_eq!(host.topology().active_session().map(|s| s.id), Some(SessionId::new(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_roster_entries_are_skipped() {
        let (host, remote) = started().await;

        remote.send(&device_roster()).expect("devices");
        remote
            .send(&Envelope::customized(
                kind::LIST_SESSION,
                &DeviceId::from(7),
                None,
                json!([
                    { "session_id": 1, "url": "https://app/1" },
                    { "session_id": 2, "url": null },
                    { "session_id": "5", "url": "https://app/5" },
                    { "url": "https://app/no-id" },
                ]),
            ))
            .expect("sessions");
        settle().await;

        let ids: Vec<SessionId> = host.topology().sessions(&DeviceId::from(7)).iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![SessionId::new(1), SessionId::new(2), SessionId::new(5)]);
        assert_eq!(host.topology().active_session().map(|s| s.id), Some(SessionId::new(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_switch_stops_old_screencast() {
        let (host, mut remote) = started().await;

        remote.send(&device_roster()).expect("devices");
        remote.send(&session_roster(&[1])).expect("sessions");
        settle().await;

        remote.send(&session_roster(&[1, 2])).expect("sessions");
        let sent = remote.recv().await.expect("cleanup frame");

        assert_eq!(sent.kind(), kind::CDP);
        assert_eq!(sent.session_id(), Some(SessionId::new(1)));
        assert_eq!(
            sent.message().and_then(|m| m["method"].as_str().map(str::to_owned)).as_deref(),
            Some(STOP_SCREENCAST_METHOD)
        );
        assert_eq!(host.topology().active_session().map(|s| s.id), Some(SessionId::new(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_frames_reach_plugins() {
        let (host, remote) = started().await;
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&delivered);
        host.plugins()
            .set_event_sink(Arc::new(move |event: CustomEvent| sink.lock().push(event)));
        host.plugins().mark_ready();

        remote
            .send(&Envelope::customized("Log", &DeviceId::from(7), Some(SessionId::new(2)), json!("hi")))
            .expect("send");
        remote.send(&device_roster()).expect("devices");
        settle().await;

        let delivered = delivered.lock();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].event_name, "Log");
        assert_eq!(delivered[0].params["message"], json!("hi"));
        assert_eq!(delivered[0].params["client_id"], json!("7"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_screenshot_updates_cache() {
        let (host, mut remote) = started().await;
        remote.send(&device_roster()).expect("devices");
        remote.send(&session_roster(&[4])).expect("sessions");
        settle().await;

        let device = DeviceId::from(7);
        let capture = host.capture_screenshot(&device, SessionId::new(4));
        let agent = async {
            let request = remote.recv().await.expect("request");
            assert_eq!(request.kind(), kind::SCREENSHOT);
            remote
                .send(&Envelope::customized(
                    kind::SCREENSHOT,
                    &DeviceId::from(7),
                    Some(SessionId::new(4)),
                    json!({ "method": crate::session::SCREENSHOT_METHOD, "data": "aW1n" }),
                ))
                .expect("reply");
        };

        let (data, ()) = tokio::join!(capture, agent);
        assert_eq!(data.expect("screenshot"), "aW1n");
        let cached = host.topology().sessions(&DeviceId::from(7));
        assert_eq!(cached[0].screenshot_cache.as_deref(), Some("aW1n"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_disconnects_and_destroys() {
        let (host, _remote) = started().await;

        let report = host.stop().await;
        assert_eq!(report.hook, Hook::Destroy);
        assert!(report.is_success());
        assert!(!host.transport().state().is_connected());
        assert!(host.transport().desired_endpoint().is_none());
    }
}
