//! External plugin loading.
//!
//! A plugin package carries a `plugin.json` manifest naming a native entry
//! point. [`ManifestLoader`] reads the manifest from an unpacked directory
//! or a `.zip` archive and binds the entry to a registered factory.
//!
//! # Manifest
//!
//! ```json
//! { "id": "network", "name": "Network", "entry": "network-panel",
//!   "mode": "side-sheet", "groupId": "inspect", "visible": true }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fs;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde_json::from_str;
use tracing::debug;
use zip::ZipArchive;

use crate::error::{Error, Result};
use crate::identifiers::PluginId;

use super::descriptor::{PluginDescriptor, PluginMode, PluginSource};

// ============================================================================
// Constants
// ============================================================================

/// Manifest file name inside a plugin package.
pub const MANIFEST_FILE: &str = "plugin.json";

// ============================================================================
// PluginManifest
// ============================================================================

/// Contents of `plugin.json`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    /// Plugin id.
    pub id: PluginId,
    /// Display name.
    pub name: String,
    /// Registered factory that builds the plugin.
    pub entry: String,
    /// Presentation mode.
    #[serde(default)]
    pub mode: PluginMode,
    /// Group id.
    #[serde(default)]
    pub group_id: Option<String>,
    /// Shown in the host UI.
    #[serde(default = "default_visible")]
    pub visible: bool,
    /// Excluded from hooks and dispatch.
    #[serde(default)]
    pub disabled: bool,
}

fn default_visible() -> bool {
    true
}

// ============================================================================
// PluginLoader
// ============================================================================

/// Turns one plugin source into a descriptor.
#[async_trait]
pub trait PluginLoader: Send + Sync {
    /// Loads one plugin.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PluginLoad`] when the source cannot be used.
    async fn load(&self, source: &PluginSource) -> Result<PluginDescriptor>;
}

/// Builds a plugin's bridge and hooks from its manifest.
pub type PluginFactory = Arc<dyn Fn(&PluginManifest) -> Result<PluginDescriptor> + Send + Sync>;

// ============================================================================
// ManifestLoader
// ============================================================================

/// Loader reading `plugin.json` and dispatching on its `entry`.
#[derive(Clone, Default)]
pub struct ManifestLoader {
    factories: FxHashMap<String, PluginFactory>,
}

impl std::fmt::Debug for ManifestLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut entries: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        entries.sort_unstable();
        f.debug_struct("ManifestLoader")
            .field("entries", &entries)
            .finish()
    }
}

impl ManifestLoader {
    /// Creates a loader with no factories.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the factory for an entry name.
    #[must_use]
    pub fn with_factory<F>(mut self, entry: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&PluginManifest) -> Result<PluginDescriptor> + Send + Sync + 'static,
    {
        self.factories.insert(entry.into(), Arc::new(factory));
        self
    }

    /// Reads the manifest of a file-based source.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PluginLoad`] if the manifest is missing or invalid.
    pub fn read_manifest(source: &PluginSource) -> Result<PluginManifest> {
        let text = match source {
            PluginSource::Unpacked(dir) => read_unpacked(dir)?,
            PluginSource::Packed(archive) => read_packed(archive)?,
            PluginSource::Builtin => {
                return Err(Error::plugin_load("", "Builtin plugins have no manifest"));
            }
        };

        from_str(&text).map_err(|e| {
            Error::plugin_load(
                source.path().cloned().unwrap_or_default(),
                format!("Invalid {MANIFEST_FILE}: {e}"),
            )
        })
    }
}

#[async_trait]
impl PluginLoader for ManifestLoader {
    async fn load(&self, source: &PluginSource) -> Result<PluginDescriptor> {
        let path = source.path().cloned().unwrap_or_default();

        let owned = source.clone();
        let manifest = tokio::task::spawn_blocking(move || Self::read_manifest(&owned))
            .await
            .map_err(|e| Error::plugin_load(&path, format!("Manifest reader failed: {e}")))??;

        let factory = self.factories.get(&manifest.entry).ok_or_else(|| {
            Error::plugin_load(&path, format!("No factory registered for entry {}", manifest.entry))
        })?;

        let descriptor = factory(&manifest)?;
        let group_id = manifest.group_id.or_else(|| descriptor.group_id.clone());

        debug!(
            plugin_id = %manifest.id,
            entry = %manifest.entry,
            source = %source,
            "Plugin loaded"
        );

        Ok(PluginDescriptor {
            id: manifest.id,
            name: manifest.name,
            mode: manifest.mode,
            valid: true,
            visible: manifest.visible,
            disabled: manifest.disabled,
            group_id,
            source: source.clone(),
            load_error: None,
            ..descriptor
        })
    }
}

// ============================================================================
// Private Helpers
// ============================================================================

/// Reads the manifest from a plugin directory.
fn read_unpacked(dir: &Path) -> Result<String> {
    let manifest_path = dir.join(MANIFEST_FILE);
    fs::read_to_string(&manifest_path).map_err(|e| {
        Error::plugin_load(
            dir,
            format!("Manifest not found at {}: {e}", manifest_path.display()),
        )
    })
}

/// Reads the manifest from a plugin archive.
fn read_packed(archive_path: &Path) -> Result<String> {
    let file = fs::File::open(archive_path)
        .map_err(|e| Error::plugin_load(archive_path, format!("Cannot open archive: {e}")))?;
    let mut archive = ZipArchive::new(file)
        .map_err(|e| Error::plugin_load(archive_path, format!("Invalid plugin archive: {e}")))?;
    let mut entry = archive
        .by_name(MANIFEST_FILE)
        .map_err(|e| Error::plugin_load(archive_path, format!("Archive has no {MANIFEST_FILE}: {e}")))?;

    let mut text = String::new();
    entry.read_to_string(&mut text)?;
    Ok(text)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    use serde_json::{Value, json};
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    const MANIFEST: &str = r#"{ "id": "net", "name": "Network", "entry": "network", "mode": "side-sheet", "groupId": "inspect" }"#;

    fn loader() -> ManifestLoader {
        ManifestLoader::new().with_factory("network", |_manifest: &PluginManifest| {
            Ok(PluginDescriptor::new("ignored", "ignored")
                .with_method("ping", |_| async { Ok(json!("pong")) }))
        })
    }

    fn write_archive(dir: &TempDir, name: &str, files: &[(&str, &str)]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let file = fs::File::create(&path).expect("create archive");
        let mut writer = zip::ZipWriter::new(file);
        for (file_name, contents) in files {
            writer
                .start_file(*file_name, SimpleFileOptions::default())
                .expect("start file");
            writer.write_all(contents.as_bytes()).expect("write");
        }
        writer.finish().expect("finish");
        path
    }

    #[tokio::test]
    async fn test_load_unpacked() {
        let dir = TempDir::new().expect("tempdir");
        fs::write(dir.path().join(MANIFEST_FILE), MANIFEST).expect("write manifest");

        let descriptor = loader()
            .load(&PluginSource::unpacked(dir.path()))
            .await
            .expect("load");

        assert_eq!(descriptor.id, PluginId::from("net"));
        assert_eq!(descriptor.name, "Network");
        assert_eq!(descriptor.mode, PluginMode::SideSheet);
        assert_eq!(descriptor.group_id.as_deref(), Some("inspect"));
        assert!(descriptor.valid && descriptor.visible);
        assert!(descriptor.bridge.contains("ping"));
    }

    #[tokio::test]
    async fn test_load_packed() {
        let dir = TempDir::new().expect("tempdir");
        let archive = write_archive(&dir, "net.zip", &[(MANIFEST_FILE, MANIFEST), ("main.js", "")]);

        let descriptor = loader()
            .load(&PluginSource::packed(&archive))
            .await
            .expect("load");

        assert_eq!(descriptor.id, PluginId::from("net"));
        assert_eq!(descriptor.source, PluginSource::Packed(archive));
        let ping = descriptor.bridge.get("ping").expect("method");
        assert_eq!(ping(Vec::new()).await.expect("call"), Value::from("pong"));
    }

    #[tokio::test]
    async fn test_archive_without_manifest() {
        let dir = TempDir::new().expect("tempdir");
        let archive = write_archive(&dir, "empty.zip", &[("readme.txt", "hi")]);

        let result = loader().load(&PluginSource::packed(archive)).await;
        assert!(matches!(result, Err(Error::PluginLoad { .. })));
    }

    #[tokio::test]
    async fn test_invalid_manifest_json() {
        let dir = TempDir::new().expect("tempdir");
        fs::write(dir.path().join(MANIFEST_FILE), "{ not json").expect("write");

        let result = loader().load(&PluginSource::unpacked(dir.path())).await;
        assert!(result.is_err_and(|e| e.is_plugin_error()));
    }

    #[tokio::test]
    async fn test_unknown_entry() {
        let dir = TempDir::new().expect("tempdir");
        fs::write(
            dir.path().join(MANIFEST_FILE),
            r#"{ "id": "x", "name": "X", "entry": "missing" }"#,
        )
        .expect("write");

        let result = loader().load(&PluginSource::unpacked(dir.path())).await;
        match result {
            Err(Error::PluginLoad { message, .. }) => assert!(message.contains("missing")),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
