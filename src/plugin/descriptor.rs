//! Plugin descriptors and where they come from.
//!
//! A descriptor is built once per discovery pass and never mutated; a reload
//! replaces the whole list.
//!
//! # Sources
//!
//! | Source | Description |
//! |--------|-------------|
//! | Builtin | Registered in-process factory |
//! | Unpacked | Directory containing `plugin.json` |
//! | Packed | `.zip` archive containing `plugin.json` |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::identifiers::PluginId;

use super::bridge::BridgeTable;

// ============================================================================
// Types
// ============================================================================

/// Lifecycle hook body.
pub type HookFn = Arc<dyn Fn(HookParams) -> BoxFuture<'static, Result<()>> + Send + Sync>;

// ============================================================================
// HookParams
// ============================================================================

/// Arguments handed to a lifecycle hook.
///
/// `show` and `select` name the plugin they target; `select` also carries
/// the chosen value. `create` and `restart` pass caller-supplied params in
/// `value`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HookParams {
    /// Plugin the notification is about.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin_id: Option<PluginId>,
    /// Hook payload.
    pub value: Value,
}

impl HookParams {
    /// Creates params carrying only a payload.
    #[inline]
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self {
            plugin_id: None,
            value,
        }
    }

    /// Creates params targeting one plugin.
    #[inline]
    #[must_use]
    pub fn for_plugin(plugin_id: impl Into<PluginId>, value: Value) -> Self {
        Self {
            plugin_id: Some(plugin_id.into()),
            value,
        }
    }
}

// ============================================================================
// PluginMode
// ============================================================================

/// How a plugin presents itself in the host UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PluginMode {
    /// One of a mutually exclusive group.
    #[default]
    Radio,
    /// A plain action button.
    Button,
    /// A dropdown selector.
    Selector,
    /// A side sheet panel.
    SideSheet,
    /// Fully custom presentation.
    Custom,
}

// ============================================================================
// PluginSource
// ============================================================================

/// Where a plugin was loaded from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum PluginSource {
    /// Registered in-process.
    #[default]
    Builtin,
    /// Unpacked plugin directory.
    Unpacked(PathBuf),
    /// Packed `.zip` archive.
    Packed(PathBuf),
}

impl PluginSource {
    /// Creates an unpacked plugin source.
    #[inline]
    #[must_use]
    pub fn unpacked(path: impl Into<PathBuf>) -> Self {
        Self::Unpacked(path.into())
    }

    /// Creates a packed plugin source.
    #[inline]
    #[must_use]
    pub fn packed(path: impl Into<PathBuf>) -> Self {
        Self::Packed(path.into())
    }

    /// Returns the path for file-based sources.
    #[inline]
    #[must_use]
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::Unpacked(path) | Self::Packed(path) => Some(path),
            Self::Builtin => None,
        }
    }
}

impl From<PathBuf> for PluginSource {
    /// Directories become [`PluginSource::Unpacked`], anything else
    /// [`PluginSource::Packed`].
    fn from(path: PathBuf) -> Self {
        if path.is_dir() {
            Self::Unpacked(path)
        } else {
            Self::Packed(path)
        }
    }
}

impl From<&str> for PluginSource {
    fn from(path: &str) -> Self {
        Self::from(PathBuf::from(path))
    }
}

impl fmt::Display for PluginSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Builtin => f.write_str("builtin"),
            Self::Unpacked(path) | Self::Packed(path) => write!(f, "{}", path.display()),
        }
    }
}

// ============================================================================
// Hook
// ============================================================================

/// Lifecycle notification a plugin may handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    /// Host created.
    Create,
    /// Host shown.
    Show,
    /// Plugins reloaded.
    Restart,
    /// Host torn down.
    Destroy,
    /// Plugin selected in the UI.
    Select,
}

impl Hook {
    /// Returns the hook name.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "on_create",
            Self::Show => "on_show",
            Self::Restart => "on_restart",
            Self::Destroy => "on_destroy",
            Self::Select => "on_select",
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional lifecycle hooks of one plugin.
#[derive(Clone, Default)]
pub struct LifecycleHooks {
    /// Runs on [`Hook::Create`].
    pub on_create: Option<HookFn>,
    /// Runs on [`Hook::Show`].
    pub on_show: Option<HookFn>,
    /// Runs on [`Hook::Restart`].
    pub on_restart: Option<HookFn>,
    /// Runs on [`Hook::Destroy`].
    pub on_destroy: Option<HookFn>,
    /// Runs on [`Hook::Select`].
    pub on_select: Option<HookFn>,
}

impl LifecycleHooks {
    /// Returns the body registered for a hook.
    #[must_use]
    pub fn get(&self, hook: Hook) -> Option<&HookFn> {
        match hook {
            Hook::Create => self.on_create.as_ref(),
            Hook::Show => self.on_show.as_ref(),
            Hook::Restart => self.on_restart.as_ref(),
            Hook::Destroy => self.on_destroy.as_ref(),
            Hook::Select => self.on_select.as_ref(),
        }
    }

    fn slot(&mut self, hook: Hook) -> &mut Option<HookFn> {
        match hook {
            Hook::Create => &mut self.on_create,
            Hook::Show => &mut self.on_show,
            Hook::Restart => &mut self.on_restart,
            Hook::Destroy => &mut self.on_destroy,
            Hook::Select => &mut self.on_select,
        }
    }
}

impl fmt::Debug for LifecycleHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let defined: Vec<&str> = [Hook::Create, Hook::Show, Hook::Restart, Hook::Destroy, Hook::Select]
            .into_iter()
            .filter(|hook| self.get(*hook).is_some())
            .map(|hook| hook.as_str())
            .collect();
        f.debug_tuple("LifecycleHooks").field(&defined).finish()
    }
}

// ============================================================================
// PluginDescriptor
// ============================================================================

/// Immutable description of one plugin.
#[derive(Debug, Clone)]
pub struct PluginDescriptor {
    /// Plugin id.
    pub id: PluginId,
    /// Display name.
    pub name: String,
    /// Presentation mode.
    pub mode: PluginMode,
    /// `false` for placeholders of plugins that failed to load.
    pub valid: bool,
    /// Shown in the host UI.
    pub visible: bool,
    /// Excluded from hooks and dispatch.
    pub disabled: bool,
    /// Group this plugin belongs to.
    pub group_id: Option<String>,
    /// Methods callable from the host.
    pub bridge: BridgeTable,
    /// Lifecycle hooks.
    pub hooks: LifecycleHooks,
    /// Where the plugin came from.
    pub source: PluginSource,
    /// Why loading failed, for invalid placeholders.
    pub load_error: Option<String>,
}

impl PluginDescriptor {
    /// Creates a valid, visible, enabled descriptor.
    #[must_use]
    pub fn new(id: impl Into<PluginId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            mode: PluginMode::default(),
            valid: true,
            visible: true,
            disabled: false,
            group_id: None,
            bridge: BridgeTable::new(),
            hooks: LifecycleHooks::default(),
            source: PluginSource::Builtin,
            load_error: None,
        }
    }

    /// Creates the placeholder for a plugin that failed to load.
    #[must_use]
    pub fn invalid(id: impl Into<PluginId>, source: PluginSource, reason: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.as_str().to_owned(),
            valid: false,
            visible: false,
            source,
            load_error: Some(reason.into()),
            ..Self::new(id, String::new())
        }
    }

    /// Returns `true` if the plugin takes part in hooks and dispatch.
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.valid && !self.disabled
    }

    /// Sets the presentation mode.
    #[inline]
    #[must_use]
    pub fn with_mode(mut self, mode: PluginMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the group id.
    #[inline]
    #[must_use]
    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// Sets visibility.
    #[inline]
    #[must_use]
    pub fn with_visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    /// Sets the disabled flag.
    #[inline]
    #[must_use]
    pub fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    /// Adds a bridge method.
    #[must_use]
    pub fn with_method<F, Fut>(mut self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.bridge.insert(name, method);
        self
    }

    /// Sets a lifecycle hook.
    #[must_use]
    pub fn with_hook<F, Fut>(mut self, hook: Hook, body: F) -> Self
    where
        F: Fn(HookParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        *self.hooks.slot(hook) = Some(Arc::new(move |params| body(params).boxed()));
        self
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_placeholder() {
        let descriptor = PluginDescriptor::invalid("broken", PluginSource::packed("x.zip"), "bad manifest");
        assert!(!descriptor.valid);
        assert!(!descriptor.is_active());
        assert_eq!(descriptor.load_error.as_deref(), Some("bad manifest"));
        assert_eq!(descriptor.source.to_string(), "x.zip");
    }

    #[test]
    fn test_source_from_path() {
        assert!(matches!(PluginSource::from("."), PluginSource::Unpacked(_)));
        assert!(matches!(PluginSource::from("./missing.zip"), PluginSource::Packed(_)));
        assert!(PluginSource::Builtin.path().is_none());
    }

    #[test]
    fn test_mode_from_manifest_name() {
        let mode: PluginMode = serde_json::from_str("\"side-sheet\"").expect("mode");
        assert_eq!(mode, PluginMode::SideSheet);
    }

    #[tokio::test]
    async fn test_with_hook_registers_body() {
        let descriptor = PluginDescriptor::new("p", "P").with_hook(Hook::Show, |params: HookParams| async move {
            match params.plugin_id {
                Some(_) => Ok(()),
                None => Err(crate::error::Error::protocol("no plugin id")),
            }
        });
        assert!(descriptor.hooks.get(Hook::Show).is_some());
        assert!(descriptor.hooks.get(Hook::Create).is_none());

        let body = descriptor.hooks.get(Hook::Show).expect("hook");
        assert!(body(HookParams::for_plugin("p", Value::Null)).await.is_ok());
        assert!(body(HookParams::default()).await.is_err());
    }

    #[test]
    fn test_hook_params_wire_shape() {
        let params = HookParams::for_plugin("net", serde_json::json!("tab-2"));
        assert_eq!(
            serde_json::to_value(&params).expect("json"),
            serde_json::json!({"pluginId": "net", "value": "tab-2"})
        );
        assert_eq!(
            serde_json::to_value(HookParams::new(Value::Null)).expect("json"),
            serde_json::json!({"value": null})
        );
    }
}
