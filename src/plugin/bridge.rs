//! Host-callable plugin methods.
//!
//! Each plugin exposes an explicit [`BridgeTable`] of named async methods.
//! A call names a target plugin and, optionally, the other members of its
//! group; the first plugin exposing the method handles it.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::error::Result;
use crate::identifiers::PluginId;

// ============================================================================
// Types
// ============================================================================

/// A bridge method: positional JSON arguments in, JSON value out.
pub type BridgeMethod = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

// ============================================================================
// BridgeTable
// ============================================================================

/// Named methods exposed by one plugin.
#[derive(Clone, Default)]
pub struct BridgeTable {
    methods: FxHashMap<String, BridgeMethod>,
}

impl BridgeTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a method, replacing any previous one with that name.
    pub fn insert<F, Fut>(&mut self, name: impl Into<String>, method: F)
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.methods
            .insert(name.into(), Arc::new(move |args| method(args).boxed()));
    }

    /// Returns a method.
    #[inline]
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&BridgeMethod> {
        self.methods.get(name)
    }

    /// Returns `true` if the method exists.
    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Returns the method names, sorted.
    #[must_use]
    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for BridgeTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.method_names()).finish()
    }
}

// ============================================================================
// BridgeTarget
// ============================================================================

/// Addressee of a bridge call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeTarget {
    /// Plugin tried first.
    pub plugin_id: PluginId,
    /// Other members of its group, tried in order.
    pub group_plugin_ids: Vec<PluginId>,
}

impl BridgeTarget {
    /// Targets a single plugin.
    #[must_use]
    pub fn plugin(plugin_id: impl Into<PluginId>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            group_plugin_ids: Vec::new(),
        }
    }

    /// Adds group fallbacks.
    #[must_use]
    pub fn with_group<I, P>(mut self, group: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PluginId>,
    {
        self.group_plugin_ids = group.into_iter().map(Into::into).collect();
        self
    }

    /// Returns the plugins to try, in order.
    pub fn candidates(&self) -> impl Iterator<Item = &PluginId> {
        std::iter::once(&self.plugin_id).chain(self.group_plugin_ids.iter())
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
    async fn test_insert_and_call() {
        let mut table = BridgeTable::new();
        table.insert("echo", |args: Vec<Value>| async move { Ok(json!(args)) });

        assert!(table.contains("echo"));
        assert!(!table.contains("missing"));

        let method = table.get("echo").expect("method");
        let result = method(vec![json!(1), json!("a")]).await.expect("call");
        assert_eq!(result, json!([1, "a"]));
    }

    #[test]
    fn test_method_names_sorted() {
        let mut table = BridgeTable::new();
        table.insert("b", |_| async { Ok(Value::Null) });
        table.insert("a", |_| async { Ok(Value::Null) });
        assert_eq!(table.method_names(), vec!["a", "b"]);
    }

    #[test]
    fn test_target_candidates_order() {
        let target = BridgeTarget::plugin("main").with_group(["g1", "g2"]);
        let order: Vec<&str> = target.candidates().map(PluginId::as_str).collect();
        assert_eq!(order, vec!["main", "g1", "g2"]);
    }
}
