//! Core plugin types: actions, their input and output, and plugin specs.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::PluginContext;
use crate::command::CommandDef;

/// What an action returns. Only keys declared by the command are surfaced.
pub type ActionOutput = IndexMap<String, String>;

/// Parsed command line values handed to an action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionInput {
    /// Positional arguments by name
    pub args: IndexMap<String, String>,

    /// Options by name; flags are present as `"true"` only when set
    pub options: IndexMap<String, String>,
}

impl ActionInput {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_option(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(name.into(), value.into());
        self
    }

    pub fn arg(&self, name: &str) -> Option<&str> {
        self.args.get(name).map(String::as_str)
    }

    pub fn option(&self, name: &str) -> Option<&str> {
        self.options.get(name).map(String::as_str)
    }

    /// Whether a boolean flag was given.
    pub fn flag(&self, name: &str) -> bool {
        self.option(name) == Some("true")
    }
}

/// A unit of behaviour reachable through the command line.
#[async_trait]
pub trait Action: Send + Sync {
    async fn call(&self, ctx: &PluginContext, input: ActionInput) -> anyhow::Result<ActionOutput>;
}

/// Shared handle to an action.
pub type ActionRef = Arc<dyn Action>;

/// Adapts a synchronous closure into an [`Action`].
pub struct FnAction<F>(F);

impl<F> FnAction<F>
where
    F: Fn(&PluginContext, ActionInput) -> anyhow::Result<ActionOutput> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }

    /// Wrap a closure as a shared action.
    pub fn shared(f: F) -> ActionRef {
        Arc::new(Self(f))
    }
}

#[async_trait]
impl<F> Action for FnAction<F>
where
    F: Fn(&PluginContext, ActionInput) -> anyhow::Result<ActionOutput> + Send + Sync + 'static,
{
    async fn call(&self, ctx: &PluginContext, input: ActionInput) -> anyhow::Result<ActionOutput> {
        (self.0)(ctx, input)
    }
}

/// Action used when a plugin has nothing to configure.
pub struct NothingToConfigure;

impl NothingToConfigure {
    /// Line printed when the action runs.
    pub fn message(plugin: &str) -> String {
        format!("Plugin '{plugin}' has nothing to configure")
    }
}

#[async_trait]
impl Action for NothingToConfigure {
    async fn call(&self, ctx: &PluginContext, _input: ActionInput) -> anyhow::Result<ActionOutput> {
        tracing::info!(plugin = ctx.name(), "Nothing to configure");
        println!("{}", Self::message(ctx.name()));
        Ok(ActionOutput::new())
    }
}

/// What a plugin factory produces.
#[derive(Default)]
pub struct PluginSpec {
    /// Plugin name
    pub name: String,

    /// Actions by path (`"task get"`)
    pub actions: IndexMap<String, ActionRef>,

    /// Action behind `<name> configure`
    pub configure: Option<ActionRef>,

    /// Command declarations by path
    pub commands: IndexMap<String, CommandDef>,
}

impl PluginSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    #[must_use]
    pub fn with_action(mut self, path: impl Into<String>, action: ActionRef) -> Self {
        self.actions.insert(path.into(), action);
        self
    }

    #[must_use]
    pub fn with_configure(mut self, action: ActionRef) -> Self {
        self.configure = Some(action);
        self
    }

    #[must_use]
    pub fn with_command(mut self, path: impl Into<String>, definition: CommandDef) -> Self {
        self.commands.insert(path.into(), definition);
        self
    }
}

impl fmt::Debug for PluginSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginSpec")
            .field("name", &self.name)
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .field("configure", &self.configure.is_some())
            .field("commands", &self.commands)
            .finish()
    }
}
