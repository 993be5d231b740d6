//! Persisted selection.
//!
//! The store remembers the selected device and the session filter text
//! through a small key-value collaborator so embedders can back it with
//! whatever storage they already have.

// ============================================================================
// Imports
// ============================================================================

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

// ============================================================================
// Keys
// ============================================================================

/// Keys written by the topology store.
pub mod keys {
    /// Id of the last selected device.
    pub const SELECTED_DEVICE: &str = "devtools.selected_device";
    /// Session filter text.
    pub const FILTER_TEXT: &str = "devtools.filter_text";
}

// ============================================================================
// SelectionCache
// ============================================================================

/// Key-value storage for selection state.
pub trait SelectionCache: Send + Sync {
    /// Returns the stored value.
    fn load(&self, key: &str) -> Option<String>;

    /// Stores a value.
    fn store(&self, key: &str, value: &str);
}

// ============================================================================
// MemorySelectionCache
// ============================================================================

/// In-process [`SelectionCache`].
#[derive(Debug, Default)]
pub struct MemorySelectionCache {
    values: Mutex<FxHashMap<String, String>>,
}

impl MemorySelectionCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SelectionCache for MemorySelectionCache {
    fn load(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    fn store(&self, key: &str, value: &str) {
        self.values.lock().insert(key.to_owned(), value.to_owned());
    }
}
