//! Plugin discovery, lifecycle fan-out and bridge dispatch.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::join_all;
use parking_lot::RwLock;
use rustc_hash::FxHashSet;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::identifiers::PluginId;

use super::bridge::BridgeTarget;
use super::descriptor::{Hook, HookParams, PluginDescriptor, PluginSource};
use super::events::{CustomEvent, EventBus, EventResponse, EventSink};
use super::loader::PluginLoader;

// ============================================================================
// Types
// ============================================================================

/// Builds a built-in plugin.
pub type BuiltinFactory = Arc<dyn Fn() -> PluginDescriptor + Send + Sync>;

// ============================================================================
// HookReport
// ============================================================================

/// Outcome of one lifecycle fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookReport {
    /// Hook that ran.
    pub hook: Hook,
    /// Plugins whose hook was invoked, in descriptor order.
    pub invoked: Vec<PluginId>,
    /// Plugins whose hook failed, with the cause.
    pub failed: Vec<(PluginId, String)>,
}

impl HookReport {
    /// Returns `true` when every invoked hook succeeded.
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

// ============================================================================
// PluginHost
// ============================================================================

/// Owner of the plugin descriptors and the custom event bus.
///
/// # Example
///
/// ```ignore
/// let host = PluginHost::new(builtins, sources, Arc::new(ManifestLoader::new()));
/// host.discover().await;
/// let report = host.create(Value::Null).await;
/// let value = host.call_bridge(&BridgeTarget::plugin("net"), "ping", vec![]).await?;
/// ```
pub struct PluginHost {
    builtins: Vec<BuiltinFactory>,
    sources: Vec<PluginSource>,
    loader: Arc<dyn PluginLoader>,
    descriptors: RwLock<Arc<[PluginDescriptor]>>,
    events: EventBus,
}

impl fmt::Debug for PluginHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginHost")
            .field("builtins", &self.builtins.len())
            .field("sources", &self.sources)
            .field("descriptors", &self.descriptors.read().len())
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// PluginHost - Discovery
// ============================================================================

impl PluginHost {
    /// Creates a host with nothing discovered yet.
    #[must_use]
    pub fn new(
        builtins: Vec<BuiltinFactory>,
        sources: Vec<PluginSource>,
        loader: Arc<dyn PluginLoader>,
    ) -> Self {
        Self {
            builtins,
            sources,
            loader,
            descriptors: RwLock::new(Arc::from(Vec::new())),
            events: EventBus::new(),
        }
    }

    /// Builds the descriptor list: built-ins first, then external sources
    /// in configuration order.
    ///
    /// A source that fails to load becomes an invalid placeholder; a
    /// duplicate id is marked invalid too. The new list replaces the old
    /// one wholesale.
    pub async fn discover(&self) -> Arc<[PluginDescriptor]> {
        let mut descriptors: Vec<PluginDescriptor> =
            self.builtins.iter().map(|factory| factory()).collect();

        let loaded = join_all(self.sources.iter().map(|source| self.loader.load(source))).await;

        for (source, result) in self.sources.iter().zip(loaded) {
            match result {
                Ok(descriptor) => descriptors.push(descriptor),
                Err(e) => {
                    warn!(source = %source, error = %e, "Failed to load plugin");
                    let id = source
                        .path()
                        .and_then(|path| path.file_stem())
                        .map(|stem| stem.to_string_lossy().into_owned())
                        .unwrap_or_else(|| source.to_string());
                    descriptors.push(PluginDescriptor::invalid(id, source.clone(), e.to_string()));
                }
            }
        }

        let mut seen = FxHashSet::default();
        for descriptor in &mut descriptors {
            if descriptor.valid && !seen.insert(descriptor.id.clone()) {
                warn!(plugin_id = %descriptor.id, source = %descriptor.source, "Duplicate plugin id");
                descriptor.valid = false;
                descriptor.load_error = Some(format!("Duplicate plugin id {}", descriptor.id));
            }
        }

        let valid = descriptors.iter().filter(|d| d.valid).count();
        info!(total = descriptors.len(), valid, "Plugins discovered");

        let snapshot: Arc<[PluginDescriptor]> = Arc::from(descriptors);
        *self.descriptors.write() = Arc::clone(&snapshot);
        snapshot
    }

    /// Returns the current descriptor snapshot.
    #[must_use]
    pub fn descriptors(&self) -> Arc<[PluginDescriptor]> {
        Arc::clone(&self.descriptors.read())
    }

    /// Returns one valid descriptor.
    #[must_use]
    pub fn descriptor(&self, plugin_id: &PluginId) -> Option<PluginDescriptor> {
        self.descriptors
            .read()
            .iter()
            .find(|d| d.valid && d.id == *plugin_id)
            .cloned()
    }
}

// ============================================================================
// PluginHost - Lifecycle
// ============================================================================

impl PluginHost {
    /// Runs `on_create` on every active plugin.
    pub async fn create(&self, params: Value) -> HookReport {
        self.run_hook(Hook::Create, HookParams::new(params)).await
    }

    /// Runs `on_show` on every active plugin, naming the plugin shown.
    pub async fn show(&self, plugin_id: impl Into<PluginId>) -> HookReport {
        self.run_hook(Hook::Show, HookParams::for_plugin(plugin_id, Value::Null))
            .await
    }

    /// Runs `on_select` on every active plugin with the selected plugin
    /// and value.
    pub async fn select(&self, plugin_id: impl Into<PluginId>, value: Value) -> HookReport {
        self.run_hook(Hook::Select, HookParams::for_plugin(plugin_id, value))
            .await
    }

    /// Runs `on_destroy` on every active plugin.
    pub async fn destroy(&self) -> HookReport {
        self.run_hook(Hook::Destroy, HookParams::default()).await
    }

    /// Re-discovers plugins, resets event bookkeeping, then runs
    /// `on_restart` on every active plugin.
    pub async fn restart(&self, params: Value) -> HookReport {
        info!("Restarting plugins");
        self.discover().await;
        self.events.reset();
        self.run_hook(Hook::Restart, HookParams::new(params)).await
    }

    /// Invokes one hook concurrently on every active plugin defining it.
    /// Each plugin receives its own copy of `params`.
    ///
    /// Errors and panics are caught per plugin.
    pub async fn run_hook(&self, hook: Hook, params: HookParams) -> HookReport {
        let snapshot = self.descriptors();
        let targets: Vec<(PluginId, _)> = snapshot
            .iter()
            .filter(|d| d.is_active())
            .filter_map(|d| d.hooks.get(hook).map(|body| (d.id.clone(), Arc::clone(body))))
            .collect();

        debug!(%hook, count = targets.len(), "Running plugin hook");

        let invoked: Vec<PluginId> = targets.iter().map(|(id, _)| id.clone()).collect();
        let outcomes = join_all(targets.into_iter().map(|(id, body)| {
            let params = params.clone();
            async move {
                let outcome = AssertUnwindSafe(async move { body(params).await })
                    .catch_unwind()
                    .await;
                (id, outcome)
            }
        }))
        .await;

        let mut failed = Vec::new();
        for (id, outcome) in outcomes {
            let cause = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(_) => "hook panicked".to_owned(),
            };
            warn!(plugin_id = %id, %hook, error = %cause, "Plugin hook failed");
            failed.push((id, cause));
        }

        HookReport {
            hook,
            invoked,
            failed,
        }
    }
}

// ============================================================================
// PluginHost - Bridge
// ============================================================================

impl PluginHost {
    /// Calls a bridge method on the target plugin, or on the first group
    /// member exposing it.
    ///
    /// # Errors
    ///
    /// - [`Error::MethodNotFound`] if no candidate exposes the method
    /// - Any error returned by the method itself
    pub async fn call_bridge(&self, target: &BridgeTarget, method: &str, args: Vec<Value>) -> Result<Value> {
        let resolved = {
            let descriptors = self.descriptors.read();
            target.candidates().find_map(|candidate| {
                descriptors
                    .iter()
                    .find(|d| d.is_active() && d.id == *candidate)
                    .and_then(|d| d.bridge.get(method))
                    .map(|m| (candidate.clone(), Arc::clone(m)))
            })
        };

        let Some((plugin_id, bridge_method)) = resolved else {
            debug!(plugin_id = %target.plugin_id, method, "Bridge method not found");
            return Err(Error::method_not_found(target.plugin_id.clone(), method));
        };

        debug!(%plugin_id, method, "Calling bridge method");
        bridge_method(args).await
    }
}

// ============================================================================
// PluginHost - Custom Events
// ============================================================================

impl PluginHost {
    /// Returns the custom event bus.
    #[inline]
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Publishes a custom event.
    pub fn publish(&self, event: CustomEvent) {
        self.events.publish(event);
    }

    /// Publishes an asynchronous custom event and waits for its response.
    ///
    /// # Errors
    ///
    /// See [`EventBus::invoke`].
    pub async fn invoke(&self, event: CustomEvent) -> Result<Value> {
        self.events.invoke(event).await
    }

    /// Settles a pending [`Self::invoke`].
    pub fn resolve_event(&self, response: EventResponse) -> bool {
        self.events.resolve_event(response)
    }

    /// Marks the presentation side ready and flushes queued events.
    pub fn mark_ready(&self) {
        self.events.mark_ready();
    }

    /// Installs the presentation sink.
    pub fn set_event_sink(&self, sink: EventSink) {
        self.events.set_event_sink(sink);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use crate::plugin::descriptor::PluginMode;

    /// Loader that fails for paths containing "bad".
    struct FakeLoader;

    #[async_trait]
    impl PluginLoader for FakeLoader {
        async fn load(&self, source: &PluginSource) -> Result<PluginDescriptor> {
            let path = source.path().cloned().unwrap_or_default();
            let name = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
            if name.contains("bad") {
                return Err(Error::plugin_load(path, "corrupt"));
            }
            Ok(PluginDescriptor::new(name.as_str(), name.as_str())
                .with_method("whoami", move |_| {
                    let name = name.clone();
                    async move { Ok(json!(name)) }
                }))
        }
    }

    async fn explode(_: HookParams) -> Result<()> {
        panic!("hook bug")
    }

    fn builtin(descriptor: fn() -> PluginDescriptor) -> BuiltinFactory {
        Arc::new(descriptor)
    }

    fn host(builtins: Vec<BuiltinFactory>, sources: &[&str]) -> PluginHost {
        PluginHost::new(
            builtins,
            sources.iter().map(|s| PluginSource::packed(*s)).collect(),
            Arc::new(FakeLoader),
        )
    }

    #[tokio::test]
    async fn test_failed_source_becomes_invalid_placeholder() {
        let host = host(vec![], &["one.zip", "bad.zip", "two.zip"]);
        let descriptors = host.discover().await;

        let summary: Vec<(&str, bool)> = descriptors.iter().map(|d| (d.id.as_str(), d.valid)).collect();
        assert_eq!(summary, vec![("one", true), ("bad", false), ("two", true)]);
        assert!(host.descriptor(&PluginId::from("bad")).is_none());
    }

    #[tokio::test]
    async fn test_duplicate_ids_are_invalid() {
        let host = host(
            vec![builtin(|| PluginDescriptor::new("one", "Builtin one"))],
            &["one.zip"],
        );
        let descriptors = host.discover().await;

        assert!(descriptors[0].valid);
        assert!(!descriptors[1].valid);
        assert_eq!(host.descriptor(&PluginId::from("one")).map(|d| d.name), Some("Builtin one".into()));
    }

    #[tokio::test]
    async fn test_bridge_falls_back_to_group() {
        let host = host(
            vec![builtin(|| PluginDescriptor::new("main", "Main").with_group("g").with_mode(PluginMode::Radio))],
            &["helper.zip", "other.zip"],
        );
        host.discover().await;

        let target = BridgeTarget::plugin("main").with_group(["helper", "other"]);
        let value = host.call_bridge(&target, "whoami", vec![]).await.expect("call");
        assert_eq!(value, json!("helper"));

        let missing = host.call_bridge(&target, "nope", vec![]).await;
        assert!(matches!(missing, Err(Error::MethodNotFound { .. })));
    }

    #[tokio::test]
    async fn test_method_error_propagates_untouched() {
        let host = host(
            vec![builtin(|| {
                PluginDescriptor::new("main", "Main")
                    .with_method("fail", |_| async { Err::<Value, _>(Error::protocol("boom")) })
            })],
            &[],
        );
        host.discover().await;

        let result = host.call_bridge(&BridgeTarget::plugin("main"), "fail", vec![]).await;
        match result {
            Err(Error::Protocol { message }) => assert_eq!(message, "boom"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_hook_failures_are_isolated() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);

        let host = host(
            vec![
                builtin(|| {
                    PluginDescriptor::new("ok", "Ok").with_hook(Hook::Create, |_| async {
                        CALLS.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                }),
                builtin(|| {
                    PluginDescriptor::new("err", "Err")
                        .with_hook(Hook::Create, |_| async { Err::<(), _>(Error::protocol("nope")) })
                }),
                builtin(|| {
                    PluginDescriptor::new("panics", "Panics").with_hook(Hook::Create, explode)
                }),
                builtin(|| {
                    PluginDescriptor::new("off", "Off")
                        .with_disabled(true)
                        .with_hook(Hook::Create, |_| async {
                            CALLS.fetch_add(100, Ordering::SeqCst);
                            Ok(())
                        })
                }),
                builtin(|| PluginDescriptor::new("silent", "Silent")),
            ],
            &[],
        );
        host.discover().await;

        let report = host.create(Value::Null).await;
        assert_eq!(
            report.invoked,
            vec![PluginId::from("ok"), PluginId::from("err"), PluginId::from("panics")]
        );
        let failed: Vec<&str> = report.failed.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(failed, vec!["err", "panics"]);
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
        assert!(!report.is_success());
    }

    #[tokio::test]
    async fn test_select_and_show_pass_target_to_hooks() {
        static SEEN: parking_lot::Mutex<Vec<(Hook, Value)>> = parking_lot::const_mutex(Vec::new());

        fn recorder(hook: Hook) -> impl Fn(HookParams) -> futures_util::future::Ready<Result<()>> {
            move |params| {
                SEEN.lock().push((hook, serde_json::to_value(&params).unwrap_or_default()));
                futures_util::future::ready(Ok(()))
            }
        }

        let host = host(
            vec![builtin(|| {
                PluginDescriptor::new("panel", "Panel")
                    .with_hook(Hook::Select, recorder(Hook::Select))
                    .with_hook(Hook::Show, recorder(Hook::Show))
                    .with_hook(Hook::Create, recorder(Hook::Create))
            })],
            &[],
        );
        host.discover().await;

        assert!(host.create(json!({"theme": "dark"})).await.is_success());
        assert!(host.show("panel").await.is_success());
        let report = host.select("network", json!("tab-2")).await;
        assert_eq!(report.invoked, vec![PluginId::from("panel")]);

        assert_eq!(
            *SEEN.lock(),
            vec![
                (Hook::Create, json!({"value": {"theme": "dark"}})),
                (Hook::Show, json!({"pluginId": "panel", "value": null})),
                (Hook::Select, json!({"pluginId": "network", "value": "tab-2"})),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_resets_events() {
        let host = Arc::new(host(vec![], &["one.zip"]));
        host.discover().await;
        host.publish(CustomEvent::new("queued", Value::Null));

        let waiter = Arc::clone(&host);
        let pending = tokio::spawn(async move {
            waiter
                .invoke(CustomEvent::new("ask", Value::Null).with_timeout(Duration::from_secs(60)))
                .await
        });
        tokio::time::sleep(Duration::from_millis(1)).await;

        let report = host.restart(Value::Null).await;
        assert_eq!(report.hook, Hook::Restart);
        assert!(matches!(pending.await.expect("join"), Err(Error::ContextReset)));
        assert_eq!(host.events().queued_count(), 0);
        assert!(!host.events().is_ready());
        assert_eq!(host.descriptors().len(), 1);
    }
}
