//! Action registry.
//!
//! Maps action paths to the action and the context of the plugin that
//! registered it. Registering an existing path replaces the previous action,
//! so plugins loaded later override earlier ones.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use super::context::ActionInfo;
use super::{ActionRef, PluginContext, PluginError, PluginResult};
use crate::command::normalize_path;

/// An action together with its owning plugin's context.
#[derive(Clone)]
pub struct RegisteredAction {
    pub action: ActionRef,
    pub context: Arc<PluginContext>,
}

impl RegisteredAction {
    pub fn plugin(&self) -> &str {
        self.context.name()
    }
}

/// The process-wide action table.
#[derive(Default)]
pub struct ActionRegistry {
    actions: IndexMap<String, RegisteredAction>,
}

/// Registry shared between the loader, contexts and dispatch.
pub type SharedRegistry = Arc<RwLock<ActionRegistry>>;

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty shared registry.
    pub fn shared() -> SharedRegistry {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Register an action. Returns the action it replaced, if any.
    pub fn register(
        &mut self,
        path: &str,
        action: ActionRef,
        context: Arc<PluginContext>,
    ) -> Option<RegisteredAction> {
        let path = normalize_path(path);
        let entry = RegisteredAction { action, context };
        let previous = self.actions.insert(path.clone(), entry);
        if let Some(previous) = &previous {
            tracing::info!(
                action = %path,
                previous = previous.plugin(),
                plugin = self.actions[&path].plugin(),
                "Action overridden"
            );
        }
        previous
    }

    /// Look up the action at `path`.
    pub fn resolve(&self, path: &str) -> PluginResult<&RegisteredAction> {
        let path = normalize_path(path);
        self.actions.get(&path).ok_or(PluginError::ActionNotFound(path))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.actions.contains_key(&normalize_path(path))
    }

    /// Registered paths, in registration order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }

    /// Summaries of every registered action.
    pub fn describe(&self) -> Vec<ActionInfo> {
        self.actions
            .iter()
            .map(|(path, entry)| ActionInfo {
                path: path.clone(),
                plugin: entry.plugin().to_string(),
                scope: entry.context.scope(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .finish()
    }
}
