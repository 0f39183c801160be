//! The context handed to plugin factories and actions.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde::Serialize;

use super::{ActionInput, ActionOutput, ActionRegistry, PluginError};
use crate::core::{CpmConfig, CpmPaths, NamespacedStore};

/// Where a plugin came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginScope {
    /// Compiled in and always loaded
    Builtin,
    /// Listed in the global `cpm.yml`
    Global,
    /// Listed in the project `cpm.yml`
    Local,
}

impl PluginScope {
    /// Whether the plugin uses the user-wide state directory.
    pub fn is_global(self) -> bool {
        matches!(self, Self::Global)
    }
}

impl fmt::Display for PluginScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Builtin => write!(f, "builtin"),
            Self::Global => write!(f, "global"),
            Self::Local => write!(f, "local"),
        }
    }
}

/// Summary of a registered action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionInfo {
    pub path: String,
    pub plugin: String,
    pub scope: PluginScope,
}

/// Calls back into the registry. Holds a weak reference so contexts stored
/// in the registry do not keep it alive.
#[derive(Clone, Default)]
pub struct ActionInvoker {
    registry: Weak<RwLock<ActionRegistry>>,
}

impl ActionInvoker {
    pub fn new(registry: &Arc<RwLock<ActionRegistry>>) -> Self {
        Self { registry: Arc::downgrade(registry) }
    }

    /// Invoke the action registered at `path`.
    pub async fn invoke(&self, path: &str, input: ActionInput) -> anyhow::Result<ActionOutput> {
        let (action, context) = {
            let registry = self.registry.upgrade().ok_or_else(|| {
                PluginError::ActionNotFound(format!("{path} (registry no longer available)"))
            })?;
            let registry = registry.read();
            let entry = registry.resolve(path)?;
            (Arc::clone(&entry.action), Arc::clone(&entry.context))
        };
        tracing::debug!(action = path, plugin = context.name(), "Invoking action");
        action.call(&context, input).await
    }

    /// Every registered action, in registration order.
    pub fn actions(&self) -> Vec<ActionInfo> {
        self.registry.upgrade().map(|registry| registry.read().describe()).unwrap_or_default()
    }
}

/// Everything a plugin gets to work with.
#[derive(Clone)]
pub struct PluginContext {
    name: String,
    scope: PluginScope,
    config: Arc<CpmConfig>,
    paths: Arc<CpmPaths>,
    variables: NamespacedStore,
    secrets: NamespacedStore,
    invoker: ActionInvoker,
}

impl PluginContext {
    pub fn new(
        name: impl Into<String>,
        scope: PluginScope,
        config: Arc<CpmConfig>,
        paths: Arc<CpmPaths>,
        stores: (NamespacedStore, NamespacedStore),
        invoker: ActionInvoker,
    ) -> Self {
        let (variables, secrets) = stores;
        Self { name: name.into(), scope, config, paths, variables, secrets, invoker }
    }

    /// Plugin name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> PluginScope {
        self.scope
    }

    /// Merged configuration.
    pub fn config(&self) -> &CpmConfig {
        &self.config
    }

    pub fn paths(&self) -> &CpmPaths {
        &self.paths
    }

    /// Plaintext variables in the `plugin:<name>` namespace.
    pub fn variables(&self) -> &NamespacedStore {
        &self.variables
    }

    /// Secrets in the `plugin:<name>` namespace.
    pub fn secrets(&self) -> &NamespacedStore {
        &self.secrets
    }

    /// Invoke another registered action.
    pub async fn execute(&self, path: &str, input: ActionInput) -> anyhow::Result<ActionOutput> {
        self.invoker.invoke(path, input).await
    }

    /// Every registered action.
    pub fn actions(&self) -> Vec<ActionInfo> {
        self.invoker.actions()
    }
}

impl fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginContext")
            .field("name", &self.name)
            .field("scope", &self.scope)
            .field("namespace", &self.variables.namespace())
            .finish()
    }
}

/// Store namespace for a plugin.
pub fn store_namespace(plugin: &str) -> String {
    format!("plugin:{plugin}")
}
