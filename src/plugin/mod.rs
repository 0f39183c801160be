//! Plugin system for cpm.
//!
//! Plugins contribute actions (async functions keyed by a space-separated
//! path) and command declarations. They come from two places:
//!
//! - compiled-in factories registered in a [`PluginCatalog`]
//! - external executables (`cpm-plugin-<name>`) in a `plugins` directory
//!
//! Every loaded plugin gets a [`PluginContext`] with the merged
//! configuration, its own variable and secret namespace, and a way to call
//! other actions.

pub mod builtin;
mod context;
mod error;
pub mod external;
mod loader;
mod registry;
mod types;

pub use context::{store_namespace, ActionInfo, ActionInvoker, PluginContext, PluginScope};
pub use error::{PluginError, PluginResult};
pub use loader::{
    FailedPlugin, FnFactory, LoadReport, LoadedPlugin, PluginCatalog, PluginFactory, PluginLoader,
};
pub use registry::{ActionRegistry, RegisteredAction, SharedRegistry};
pub use types::{
    Action, ActionInput, ActionOutput, ActionRef, FnAction, NothingToConfigure, PluginSpec,
};
