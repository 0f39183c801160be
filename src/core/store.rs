//! Persistent key-value stores for plugin variables and secrets.
//!
//! Each store is a JSON file of the shape `{ namespace: { key: value } }`.
//! It is read once when opened and written back once, when the last handle
//! is dropped, if anything changed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use parking_lot::Mutex;

use super::paths;

type Namespaces = BTreeMap<String, BTreeMap<String, String>>;

#[derive(Debug, Default)]
struct StoreState {
    data: Namespaces,
    dirty: bool,
}

/// A JSON-backed map of namespaced string values.
#[derive(Debug)]
pub struct KeyValueStore {
    path: Option<PathBuf>,
    private: bool,
    state: Mutex<StoreState>,
}

impl KeyValueStore {
    /// Open the store at `path`. A missing file yields an empty store.
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let data = match std::fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => Namespaces::new(),
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse store {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Namespaces::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read store {}", path.display()))
            }
        };

        Ok(Self {
            path: Some(path),
            private: false,
            state: Mutex::new(StoreState { data, dirty: false }),
        })
    }

    /// A store that is never written to disk.
    pub fn in_memory() -> Self {
        Self { path: None, private: false, state: Mutex::new(StoreState::default()) }
    }

    /// Restrict the file to the owner when it is written (secrets).
    #[must_use]
    pub fn private(mut self, private: bool) -> Self {
        self.private = private;
        self
    }

    /// Backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self, namespace: &str, key: &str) -> Option<String> {
        self.state.lock().data.get(namespace).and_then(|values| values.get(key)).cloned()
    }

    pub fn set(&self, namespace: &str, key: impl Into<String>, value: impl Into<String>) {
        let mut state = self.state.lock();
        state.data.entry(namespace.to_string()).or_default().insert(key.into(), value.into());
        state.dirty = true;
    }

    pub fn remove(&self, namespace: &str, key: &str) -> Option<String> {
        let mut state = self.state.lock();
        let values = state.data.get_mut(namespace)?;
        let removed = values.remove(key);
        if values.is_empty() {
            state.data.remove(namespace);
        }
        if removed.is_some() {
            state.dirty = true;
        }
        removed
    }

    /// Drop a whole namespace. Returns whether it existed.
    pub fn remove_namespace(&self, namespace: &str) -> bool {
        let mut state = self.state.lock();
        let removed = state.data.remove(namespace).is_some();
        if removed {
            state.dirty = true;
        }
        removed
    }

    /// All values in a namespace, sorted by key.
    pub fn entries(&self, namespace: &str) -> BTreeMap<String, String> {
        self.state.lock().data.get(namespace).cloned().unwrap_or_default()
    }

    /// Whether there are unsaved changes.
    pub fn is_dirty(&self) -> bool {
        self.state.lock().dirty
    }

    /// Write pending changes to disk.
    pub fn flush(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        if !state.dirty {
            return Ok(());
        }
        let Some(path) = &self.path else {
            state.dirty = false;
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(&state.data)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write store {}", path.display()))?;
        if self.private {
            restrict_permissions(path)?;
        }

        state.dirty = false;
        tracing::debug!(path = %path.display(), "Store flushed");
        Ok(())
    }
}

impl Drop for KeyValueStore {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            tracing::warn!("Failed to save store: {e:#}");
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .with_context(|| format!("Failed to restrict permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> anyhow::Result<()> {
    Ok(())
}

/// A view of one namespace of a store.
#[derive(Debug, Clone)]
pub struct NamespacedStore {
    store: Arc<KeyValueStore>,
    namespace: String,
}

impl NamespacedStore {
    pub fn new(store: Arc<KeyValueStore>, namespace: impl Into<String>) -> Self {
        Self { store, namespace: namespace.into() }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.store.get(&self.namespace, key)
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.store.set(&self.namespace, key, value);
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        self.store.remove(&self.namespace, key)
    }

    pub fn entries(&self) -> BTreeMap<String, String> {
        self.store.entries(&self.namespace)
    }

    /// Remove every value in this namespace.
    pub fn clear(&self) -> bool {
        self.store.remove_namespace(&self.namespace)
    }

    /// A view of another namespace of the same store.
    pub fn with_namespace(&self, namespace: impl Into<String>) -> Self {
        Self::new(Arc::clone(&self.store), namespace)
    }
}

/// The variable and secret stores of one state directory.
#[derive(Debug, Clone)]
pub struct StorePair {
    pub variables: Arc<KeyValueStore>,
    pub secrets: Arc<KeyValueStore>,
}

impl StorePair {
    /// Open both stores inside `state_dir`.
    pub fn open(state_dir: &Path) -> anyhow::Result<Self> {
        Ok(Self {
            variables: Arc::new(KeyValueStore::open(paths::variables_file(state_dir))?),
            secrets: Arc::new(KeyValueStore::open(paths::secrets_file(state_dir))?.private(true)),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            variables: Arc::new(KeyValueStore::in_memory()),
            secrets: Arc::new(KeyValueStore::in_memory()),
        }
    }

    /// Namespaced views for one plugin.
    pub fn scoped(&self, namespace: &str) -> (NamespacedStore, NamespacedStore) {
        (
            NamespacedStore::new(Arc::clone(&self.variables), namespace),
            NamespacedStore::new(Arc::clone(&self.secrets), namespace),
        )
    }
}

/// Global stores plus, inside a project, the project stores.
#[derive(Debug, Clone)]
pub struct Stores {
    global: StorePair,
    project: Option<StorePair>,
}

impl Stores {
    pub fn open(paths: &paths::CpmPaths) -> anyhow::Result<Self> {
        let global = StorePair::open(paths.global_dir())?;
        let project =
            if paths.is_project() { Some(StorePair::open(&paths.project_dir())?) } else { None };
        Ok(Self { global, project })
    }

    pub fn in_memory() -> Self {
        Self { global: StorePair::in_memory(), project: None }
    }

    /// Stores a plugin of the given scope reads and writes.
    pub fn for_scope(&self, global: bool) -> &StorePair {
        if global {
            &self.global
        } else {
            self.project.as_ref().unwrap_or(&self.global)
        }
    }

    /// Flush every store, logging failures.
    pub fn flush(&self) {
        let pairs = std::iter::once(&self.global).chain(self.project.as_ref());
        for pair in pairs {
            for store in [&pair.variables, &pair.secrets] {
                if let Err(e) = store.flush() {
                    tracing::warn!("Failed to save store: {e:#}");
                }
            }
        }
    }
}
