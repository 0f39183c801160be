//! Plugin loading.
//!
//! Plugins are loaded in a fixed order: builtin, then global, then local.
//! Each plugin is loaded in isolation: a factory that fails or panics is
//! reported and skipped, and loading continues with the next plugin.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use indexmap::IndexMap;

use super::context::store_namespace;
use super::external::ExternalPlugin;
use super::{
    builtin, ActionInvoker, ActionRef, NothingToConfigure, PluginContext, PluginError,
    PluginResult, PluginScope, PluginSpec, SharedRegistry,
};
use crate::command::CommandDef;
use crate::core::{CpmConfig, CpmPaths, Stores};

/// Creates a plugin from its context.
#[async_trait]
pub trait PluginFactory: Send + Sync {
    async fn create(&self, ctx: &PluginContext) -> anyhow::Result<PluginSpec>;
}

/// Adapts a synchronous constructor into a [`PluginFactory`].
pub struct FnFactory<F>(pub F);

#[async_trait]
impl<F> PluginFactory for FnFactory<F>
where
    F: Fn(&PluginContext) -> anyhow::Result<PluginSpec> + Send + Sync,
{
    async fn create(&self, ctx: &PluginContext) -> anyhow::Result<PluginSpec> {
        (self.0)(ctx)
    }
}

/// Compiled-in plugins, by name.
#[derive(Clone, Default)]
pub struct PluginCatalog {
    factories: IndexMap<String, Arc<dyn PluginFactory>>,
    builtins: Vec<String>,
}

impl PluginCatalog {
    /// A catalog with nothing in it.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The default catalog: the `root` plugin, always loaded.
    pub fn builtin() -> Self {
        let mut catalog = Self::empty();
        catalog.register_builtin(builtin::ROOT_PLUGIN, FnFactory(builtin::root_plugin));
        catalog
    }

    /// Make a plugin available to `plugins:` lists.
    pub fn register(&mut self, name: impl Into<String>, factory: impl PluginFactory + 'static) {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Register a plugin that is loaded on every run.
    pub fn register_builtin(
        &mut self,
        name: impl Into<String>,
        factory: impl PluginFactory + 'static,
    ) {
        let name = name.into();
        if !self.builtins.contains(&name) {
            self.builtins.push(name.clone());
        }
        self.register(name, factory);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn PluginFactory>> {
        self.factories.get(name).cloned()
    }

    pub fn builtins(&self) -> &[String] {
        &self.builtins
    }
}

impl fmt::Debug for PluginCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginCatalog")
            .field("factories", &self.factories.keys().collect::<Vec<_>>())
            .field("builtins", &self.builtins)
            .finish()
    }
}

/// A plugin that loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedPlugin {
    pub name: String,
    pub scope: PluginScope,
    pub actions: Vec<String>,
}

/// A plugin that did not.
#[derive(Debug)]
pub struct FailedPlugin {
    pub name: String,
    pub scope: PluginScope,
    pub error: PluginError,
}

/// Outcome of loading every configured plugin.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<LoadedPlugin>,
    pub failed: Vec<FailedPlugin>,
    /// Command declarations from loaded plugins, later plugins winning
    pub commands: IndexMap<String, CommandDef>,
}

/// Loads plugins into a registry.
pub struct PluginLoader<'a> {
    catalog: &'a PluginCatalog,
    registry: SharedRegistry,
    config: Arc<CpmConfig>,
    paths: Arc<CpmPaths>,
    stores: &'a Stores,
}

impl<'a> PluginLoader<'a> {
    pub fn new(
        catalog: &'a PluginCatalog,
        registry: SharedRegistry,
        config: Arc<CpmConfig>,
        paths: Arc<CpmPaths>,
        stores: &'a Stores,
    ) -> Self {
        Self { catalog, registry, config, paths, stores }
    }

    /// Build the context a plugin of this name and scope runs with.
    pub fn context_for(&self, name: &str, scope: PluginScope) -> Arc<PluginContext> {
        let stores = self.stores.for_scope(scope.is_global()).scoped(&store_namespace(name));
        Arc::new(PluginContext::new(
            name,
            scope,
            Arc::clone(&self.config),
            Arc::clone(&self.paths),
            stores,
            ActionInvoker::new(&self.registry),
        ))
    }

    /// Load builtin, global, then local plugins.
    pub async fn load_all(&self, global: &[String], local: &[String]) -> LoadReport {
        let mut report = LoadReport::default();
        let phases = [
            (PluginScope::Builtin, self.catalog.builtins()),
            (PluginScope::Global, global),
            (PluginScope::Local, local),
        ];
        for (scope, names) in phases {
            for name in names {
                self.load_into(name, scope, &mut report).await;
            }
        }
        tracing::debug!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "Plugins loaded"
        );
        report
    }

    /// Load one plugin, recording the result in `report`.
    pub async fn load_into(&self, name: &str, scope: PluginScope, report: &mut LoadReport) {
        match self.load(name, scope).await {
            Ok((loaded, commands)) => {
                for (path, definition) in commands {
                    report.commands.insert(path, definition);
                }
                report.loaded.push(loaded);
            }
            Err(error) => {
                tracing::warn!(plugin = name, scope = %scope, error = %error, "Skipping plugin");
                report.failed.push(FailedPlugin { name: name.to_string(), scope, error });
            }
        }
    }

    async fn load(
        &self,
        name: &str,
        scope: PluginScope,
    ) -> PluginResult<(LoadedPlugin, IndexMap<String, CommandDef>)> {
        let factory = self.factory(name, scope)?;
        let context = self.context_for(name, scope);

        let spec = AssertUnwindSafe(factory.create(&context))
            .catch_unwind()
            .await
            .map_err(|panic| PluginError::load(name, panic_message(panic.as_ref())))?
            .map_err(|e| PluginError::load(name, format!("{e:#}")))?;

        let mut actions = Vec::with_capacity(spec.actions.len() + 1);
        {
            let mut registry = self.registry.write();
            for (path, action) in spec.actions {
                registry.register(&path, action, Arc::clone(&context));
                actions.push(path);
            }
            let configure_path = format!("{name} configure");
            let configure =
                spec.configure.unwrap_or_else(|| Arc::new(NothingToConfigure) as ActionRef);
            registry.register(&configure_path, configure, Arc::clone(&context));
            actions.push(configure_path);
        }

        tracing::debug!(plugin = name, scope = %scope, actions = actions.len(), "Plugin loaded");
        Ok((LoadedPlugin { name: name.to_string(), scope, actions }, spec.commands))
    }

    fn factory(&self, name: &str, scope: PluginScope) -> PluginResult<Arc<dyn PluginFactory>> {
        if let Some(factory) = self.catalog.get(name) {
            return Ok(factory);
        }
        if scope == PluginScope::Builtin {
            return Err(PluginError::load(name, "not a compiled-in plugin"));
        }
        let plugins_dir = self.paths.plugins_dir(scope.is_global());
        let external = ExternalPlugin::locate(name, &plugins_dir)?;
        Ok(Arc::new(external))
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("plugin panicked: {detail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{ActionInput, ActionOutput, ActionRegistry, FnAction};

    fn spec_returning(name: &str, value: &'static str) -> PluginSpec {
        PluginSpec::new(name)
            .with_action(
                "task get",
                FnAction::shared(move |_, _| {
                    let mut output = ActionOutput::new();
                    output.insert("source".to_string(), value.to_string());
                    Ok(output)
                }),
            )
            .with_command("task get", CommandDef::new().with_output("source", "who answered"))
    }

    type Constructor = fn(&PluginContext) -> anyhow::Result<PluginSpec>;

    fn catalog() -> PluginCatalog {
        let failing: Constructor = |_| anyhow::bail!("boom");
        let panicking: Constructor = |_| panic!("kaboom");
        let first: Constructor = |_| Ok(spec_returning("first", "first"));
        let second: Constructor = |_| Ok(spec_returning("second", "second"));

        let mut catalog = PluginCatalog::empty();
        catalog.register("failing", FnFactory(failing));
        catalog.register("panicking", FnFactory(panicking));
        catalog.register("first", FnFactory(first));
        catalog.register("second", FnFactory(second));
        catalog
    }

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| (*n).to_string()).collect()
    }

    #[tokio::test]
    async fn test_failures_do_not_block_later_plugins() {
        let catalog = catalog();
        let registry = ActionRegistry::shared();
        let stores = Stores::in_memory();
        let loader = PluginLoader::new(
            &catalog,
            Arc::clone(&registry),
            Arc::new(CpmConfig::default()),
            Arc::new(CpmPaths::new("/nonexistent/project", "/nonexistent/home")),
            &stores,
        );

        let report =
            loader.load_all(&names(&["failing", "panicking"]), &names(&["first", "missing"])).await;

        assert_eq!(report.loaded.len(), 1);
        assert_eq!(report.loaded[0].name, "first");
        assert_eq!(report.failed.len(), 3);
        assert!(report.failed[1].error.to_string().contains("kaboom"));
        assert!(registry.read().contains("task get"));
        assert!(registry.read().contains("first configure"));
        assert!(!registry.read().contains("failing configure"));
    }

    #[tokio::test]
    async fn test_local_overrides_global() {
        let catalog = catalog();
        let registry = ActionRegistry::shared();
        let stores = Stores::in_memory();
        let loader = PluginLoader::new(
            &catalog,
            Arc::clone(&registry),
            Arc::new(CpmConfig::default()),
            Arc::new(CpmPaths::new("/nonexistent/project", "/nonexistent/home")),
            &stores,
        );

        let report = loader.load_all(&names(&["first"]), &names(&["second"])).await;
        assert_eq!(report.commands.len(), 1);

        let ctx = loader.context_for("caller", PluginScope::Local);
        let output = ctx.execute("task get", ActionInput::new()).await.unwrap();
        assert_eq!(output.get("source").map(String::as_str), Some("second"));
    }

    #[tokio::test]
    async fn test_builtin_catalog_loads_root() {
        let catalog = PluginCatalog::builtin();
        let registry = ActionRegistry::shared();
        let stores = Stores::in_memory();
        let loader = PluginLoader::new(
            &catalog,
            Arc::clone(&registry),
            Arc::new(CpmConfig::default()),
            Arc::new(CpmPaths::new("/nonexistent/project", "/nonexistent/home")),
            &stores,
        );

        let report = loader.load_all(&[], &[]).await;
        assert_eq!(report.loaded[0].scope, PluginScope::Builtin);
        assert!(report.commands.contains_key("init"));
        assert!(registry.read().contains("plugin configure"));
    }

    #[tokio::test]
    async fn test_configure_falls_back_to_nothing_to_configure() {
        let custom: Constructor = |_| {
            Ok(PluginSpec::new("custom").with_configure(FnAction::shared(|_, _| {
                let mut output = ActionOutput::new();
                output.insert("configured".to_string(), "yes".to_string());
                Ok(output)
            })))
        };
        let mut catalog = catalog();
        catalog.register("custom", FnFactory(custom));

        let registry = ActionRegistry::shared();
        let stores = Stores::in_memory();
        let loader = PluginLoader::new(
            &catalog,
            Arc::clone(&registry),
            Arc::new(CpmConfig::default()),
            Arc::new(CpmPaths::new("/nonexistent/project", "/nonexistent/home")),
            &stores,
        );
        let report = loader.load_all(&[], &names(&["first", "custom"])).await;
        let custom = report.loaded.iter().find(|plugin| plugin.name == "custom").unwrap();
        assert_eq!(custom.actions, vec!["custom configure"]);

        let ctx = loader.context_for("caller", PluginScope::Local);
        let supplied = ctx.execute("custom configure", ActionInput::new()).await.unwrap();
        assert_eq!(supplied.get("configured").map(String::as_str), Some("yes"));

        let fallback = ctx.execute("first configure", ActionInput::new()).await.unwrap();
        assert!(fallback.is_empty());
        assert_eq!(
            NothingToConfigure::message("first"),
            "Plugin 'first' has nothing to configure"
        );
    }

    #[test]
    fn test_panic_message() {
        let message = panic_message(&"bad state");
        assert_eq!(message, "plugin panicked: bad state");
    }
}
