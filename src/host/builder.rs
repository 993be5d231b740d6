//! Builder pattern for host configuration.
//!
//! Provides a fluent API for configuring and creating [`DebugHost`]
//! instances.
//!
//! # Example
//!
//! ```ignore
//! use devtools_bridge::{DebugHost, HostOptions};
//!
//! let host = DebugHost::builder()
//!     .options(HostOptions::new())
//!     .plugin("./plugins/network.zip")
//!     .build()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::plugin::{BuiltinFactory, ManifestLoader, PluginDescriptor, PluginLoader, PluginSource};
use crate::topology::{MemorySelectionCache, SelectionCache};
use crate::transport::{Connector, WebSocketConnector};

use super::core::{DebugHost, HostParts};
use super::options::HostOptions;

// ============================================================================
// DebugHostBuilder
// ============================================================================

/// Builder for configuring a [`DebugHost`] instance.
///
/// Use [`DebugHost::builder()`] to create a new builder. Unset
/// collaborators fall back to the WebSocket connector, a manifest loader
/// without factories and an in-memory selection cache.
#[derive(Default, Clone)]
pub struct DebugHostBuilder {
    /// Physical link factory.
    connector: Option<Arc<dyn Connector>>,
    /// Timing configuration.
    options: HostOptions,
    /// In-process plugins, in registration order.
    builtins: Vec<BuiltinFactory>,
    /// External plugin sources, in registration order.
    plugin_sources: Vec<PluginSource>,
    /// External plugin loader.
    loader: Option<Arc<dyn PluginLoader>>,
    /// Persisted selection storage.
    selection_cache: Option<Arc<dyn SelectionCache>>,
}

impl fmt::Debug for DebugHostBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugHostBuilder")
            .field("custom_connector", &self.connector.is_some())
            .field("options", &self.options)
            .field("builtins", &self.builtins.len())
            .field("plugin_sources", &self.plugin_sources)
            .field("custom_loader", &self.loader.is_some())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// DebugHostBuilder Implementation
// ============================================================================

impl DebugHostBuilder {
    /// Creates a new host builder with default configuration.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the connector producing physical links.
    #[inline]
    #[must_use]
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Sets the timing configuration.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: HostOptions) -> Self {
        self.options = options;
        self
    }

    /// Registers a built-in plugin.
    #[must_use]
    pub fn builtin_plugin<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> PluginDescriptor + Send + Sync + 'static,
    {
        self.builtins.push(Arc::new(factory));
        self
    }

    /// Adds an external plugin.
    ///
    /// Automatically detects whether the path is a directory (unpacked)
    /// or file (packed .zip).
    #[inline]
    #[must_use]
    pub fn plugin(mut self, path: impl Into<PathBuf>) -> Self {
        self.plugin_sources.push(PluginSource::from(path.into()));
        self
    }

    /// Adds an external plugin source directly.
    #[inline]
    #[must_use]
    pub fn plugin_source(mut self, source: PluginSource) -> Self {
        self.plugin_sources.push(source);
        self
    }

    /// Sets the loader for external plugins.
    #[inline]
    #[must_use]
    pub fn loader(mut self, loader: Arc<dyn PluginLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Sets the persisted selection storage.
    #[inline]
    #[must_use]
    pub fn selection_cache(mut self, cache: Arc<dyn SelectionCache>) -> Self {
        self.selection_cache = Some(cache);
        self
    }

    /// Builds the host with validation.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if a timeout is zero
    /// - [`Error::Config`] if a plugin source is builtin or its path doesn't exist
    pub fn build(self) -> Result<DebugHost> {
        self.options.validate()?;
        self.validate_plugin_sources()?;

        Ok(DebugHost::new(HostParts {
            connector: self.connector.unwrap_or_else(|| Arc::new(WebSocketConnector::new())),
            options: self.options,
            builtins: self.builtins,
            plugin_sources: self.plugin_sources,
            loader: self.loader.unwrap_or_else(|| Arc::new(ManifestLoader::new())),
            selection_cache: self
                .selection_cache
                .unwrap_or_else(|| Arc::new(MemorySelectionCache::new())),
        }))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl DebugHostBuilder {
    /// Validates the external plugin sources.
    fn validate_plugin_sources(&self) -> Result<()> {
        for source in &self.plugin_sources {
            let Some(path) = source.path() else {
                return Err(Error::config(
                    "Builtin plugins are registered with .builtin_plugin(), not as sources.",
                ));
            };

            if !path.exists() {
                return Err(Error::config(format!(
                    "Plugin not found at: {}\n\
                     Ensure the plugin directory or .zip file exists.",
                    path.display()
                )));
            }
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tempfile::TempDir;

    #[test]
    fn test_new_creates_empty_builder() {
        let builder = DebugHostBuilder::new();
        assert!(builder.connector.is_none());
        assert!(builder.builtins.is_empty());
        assert!(builder.plugin_sources.is_empty());
        assert_eq!(builder.options, HostOptions::default());
    }

    #[test]
    fn test_plugin_detects_source_kind() {
        let dir = TempDir::new().expect("tempdir");
        let archive = dir.path().join("net.zip");

        let builder = DebugHostBuilder::new().plugin(dir.path()).plugin(&archive);
        assert_eq!(
            builder.plugin_sources,
            vec![PluginSource::unpacked(dir.path()), PluginSource::packed(archive)]
        );
    }

    #[test]
    fn test_build_rejects_missing_plugin() {
        let result = DebugHostBuilder::new()
            .plugin("/nonexistent/plugin.zip")
            .build();
        match result {
            Err(Error::Config { message }) => assert!(message.contains("/nonexistent/plugin.zip")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_build_rejects_builtin_source() {
        let result = DebugHostBuilder::new()
            .plugin_source(PluginSource::Builtin)
            .build();
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_build_rejects_zero_timeout() {
        let result = DebugHostBuilder::new()
            .options(HostOptions::new().with_request_timeout(Duration::ZERO))
            .build();
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[tokio::test]
    async fn test_build_with_defaults() {
        let host = DebugHostBuilder::new()
            .builtin_plugin(|| PluginDescriptor::new("console", "Console"))
            .build()
            .expect("build");
        assert_eq!(host.options().request_timeout, Duration::from_secs(30));
    }
}
