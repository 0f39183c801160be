//! Application state and dispatch.
//!
//! [`App::bootstrap`] wires paths, configuration, stores and plugins into a
//! command tree; [`App::run`] parses one command line against that tree and
//! invokes the matching action.

use std::path::PathBuf;
use std::sync::Arc;

use clap::error::ErrorKind;
use indexmap::IndexMap;

use crate::command::{
    build_cli, filter_outputs, resolve_invocation, surface_outputs, CommandDef, CommandTree,
};
use crate::core::{auto_sync, is_nested_invocation, ConfigSet, CpmPaths, Stores, SyncOutcome};
use crate::plugin::{
    ActionInput, ActionInvoker, ActionOutput, ActionRegistry, LoadReport, PluginCatalog,
    PluginLoader, PluginScope, SharedRegistry,
};
use crate::workflow::WorkflowAction;

/// Name of the pseudo-plugin that owns configured workflows.
pub const WORKFLOWS_PLUGIN: &str = "workflows";

/// How to set up an [`App`].
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Project root (defaults to the working directory)
    pub project_root: Option<PathBuf>,

    /// Global state directory (defaults to `$CPM_HOME` or `~/.cpm`)
    pub global_dir: Option<PathBuf>,

    /// Compiled-in plugins
    pub catalog: PluginCatalog,

    /// Run auto-sync before dispatch (still skipped when nested)
    pub auto_sync: bool,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            project_root: None,
            global_dir: None,
            catalog: PluginCatalog::builtin(),
            auto_sync: true,
        }
    }
}

impl AppOptions {
    #[must_use]
    pub fn project_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.project_root = Some(root.into());
        self
    }

    #[must_use]
    pub fn global_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.global_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn catalog(mut self, catalog: PluginCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    #[must_use]
    pub fn auto_sync(mut self, enabled: bool) -> Self {
        self.auto_sync = enabled;
        self
    }
}

/// What a call to [`App::run`] ended with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// An action ran; `outputs` holds its declared outputs.
    Completed { path: String, outputs: ActionOutput },

    /// Help, version or a usage error was printed.
    Exited(i32),

    /// No command matched these arguments.
    UnknownCommand(String),
}

/// Main application state.
pub struct App {
    paths: Arc<CpmPaths>,
    config: ConfigSet,
    stores: Stores,
    registry: SharedRegistry,
    tree: CommandTree,
    report: LoadReport,
}

impl App {
    /// Load configuration and plugins and build the command tree.
    pub async fn bootstrap(options: AppOptions) -> anyhow::Result<Self> {
        let paths = Arc::new(CpmPaths::resolve(options.project_root, options.global_dir)?);
        let config = ConfigSet::load(&paths)?;
        let stores = Stores::open(&paths)?;

        let nested = !options.auto_sync || is_nested_invocation();
        match auto_sync(&paths, nested) {
            Ok(SyncOutcome::Synced) => tracing::info!("Project synced"),
            Ok(outcome) => tracing::debug!(?outcome, "Auto-sync"),
            Err(e) => tracing::warn!(error = %format!("{e:#}"), "Auto-sync failed"),
        }

        let registry = ActionRegistry::shared();
        let loader = PluginLoader::new(
            &options.catalog,
            Arc::clone(&registry),
            Arc::clone(&config.merged),
            Arc::clone(&paths),
            &stores,
        );
        let mut report = loader.load_all(config.global_plugins(), config.local_plugins()).await;

        let mut declarations: IndexMap<String, CommandDef> = std::mem::take(&mut report.commands);
        let workflows = loader.context_for(WORKFLOWS_PLUGIN, PluginScope::Local);
        for (name, workflow) in &config.merged.workflows {
            if let Err(e) = workflow.validate(name) {
                tracing::warn!(workflow = %name, error = %e, "Skipping workflow");
                continue;
            }
            let action = Arc::new(WorkflowAction::new(name.clone(), workflow.clone()));
            registry.write().register(name, action, Arc::clone(&workflows));
            declarations.insert(name.clone(), workflow.command_def());
        }

        let mut tree = CommandTree::build(&declarations)?;
        synthesize_declarations(&mut tree, &registry);
        report.commands = declarations;

        Ok(Self { paths, config, stores, registry, tree, report })
    }

    /// Parse `args` (including the program name) and dispatch.
    pub async fn run<I, T>(&self, args: I) -> anyhow::Result<Outcome>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        let matches = match self.cli().try_get_matches_from(&args) {
            Ok(matches) => matches,
            Err(e) => return Ok(clap_outcome(&e, &args)),
        };

        let Some(invocation) = resolve_invocation(&self.tree, &matches) else {
            return Ok(Outcome::UnknownCommand(joined_args(&args)));
        };

        let path = invocation.leaf.action_path();
        let output = self.invoke(&path, invocation.input).await?;
        let outputs = filter_outputs(&invocation.leaf.definition, &output);
        surface_outputs(&outputs, invocation.json)?;
        Ok(Outcome::Completed { path, outputs })
    }

    /// Invoke an action directly, bypassing the command line.
    pub async fn invoke(&self, path: &str, input: ActionInput) -> anyhow::Result<ActionOutput> {
        ActionInvoker::new(&self.registry).invoke(path, input).await
    }

    /// The clap command line for the current tree.
    pub fn cli(&self) -> clap::Command {
        build_cli(&self.tree)
    }

    pub fn tree(&self) -> &CommandTree {
        &self.tree
    }

    pub fn paths(&self) -> &CpmPaths {
        &self.paths
    }

    pub fn config(&self) -> &ConfigSet {
        &self.config
    }

    /// Which plugins loaded and which were skipped.
    pub fn load_report(&self) -> &LoadReport {
        &self.report
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.stores.flush();
    }
}

/// Give registered actions without a declaration a bare leaf, unless that
/// would collide with the existing tree.
fn synthesize_declarations(tree: &mut CommandTree, registry: &SharedRegistry) {
    let registry = registry.read();
    for info in registry.describe() {
        if tree.leaf(&info.path).is_some() {
            continue;
        }
        let description = format!("{} action from '{}'", info.path, info.plugin);
        let definition = CommandDef::new().with_description(description);
        if let Err(e) = tree.insert(&info.path, definition) {
            tracing::warn!(action = %info.path, error = %e, "Action has no reachable command");
        }
    }
}

fn clap_outcome(error: &clap::Error, args: &[String]) -> Outcome {
    match error.kind() {
        ErrorKind::InvalidSubcommand => Outcome::UnknownCommand(joined_args(args)),
        ErrorKind::DisplayHelp
        | ErrorKind::DisplayVersion
        | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
            let _ = error.print();
            Outcome::Exited(0)
        }
        _ => {
            let _ = error.print();
            Outcome::Exited(error.exit_code())
        }
    }
}

fn joined_args(args: &[String]) -> String {
    args.iter().skip(1).map(String::as_str).collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{FnAction, FnFactory, PluginContext, PluginSpec};
    use tempfile::TempDir;

    fn echo_plugin(_ctx: &PluginContext) -> anyhow::Result<PluginSpec> {
        Ok(PluginSpec::new("echo")
            .with_action(
                "say hello",
                FnAction::shared(|_, input| {
                    let mut output = ActionOutput::new();
                    let name = input.arg("name").unwrap_or("?");
                    output.insert("greeting".to_string(), format!("hello {name}"));
                    output.insert("internal".to_string(), "hidden".to_string());
                    Ok(output)
                }),
            )
            .with_command(
                "say hello",
                CommandDef::new().with_argument("name", "who").with_output("greeting", "text"),
            )
            .with_action("say bare", FnAction::shared(|_, _| Ok(ActionOutput::new()))))
    }

    struct Fixture {
        _project: TempDir,
        _home: TempDir,
        app: App,
    }

    async fn fixture(cpm_yml: &str) -> Fixture {
        let project = TempDir::new().unwrap();
        let home = TempDir::new().unwrap();
        std::fs::write(project.path().join("cpm.yml"), cpm_yml).unwrap();

        let mut catalog = PluginCatalog::builtin();
        catalog.register("echo", FnFactory(echo_plugin));
        let options = AppOptions::default()
            .project_root(project.path())
            .global_dir(home.path())
            .catalog(catalog);
        let app = App::bootstrap(options).await.unwrap();
        Fixture { _project: project, _home: home, app }
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn test_dispatch_filters_outputs() {
        let fx = fixture("plugins: [echo]\n").await;
        let outcome = fx.app.run(["cpm", "say", "hello", "world"]).await.unwrap();

        match outcome {
            Outcome::Completed { path, outputs } => {
                assert_eq!(path, "say hello");
                assert_eq!(outputs.get("greeting").map(String::as_str), Some("hello world"));
                assert!(!outputs.contains_key("internal"));
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let fx = fixture("plugins: []\n").await;
        let outcome = fx.app.run(["cpm", "frobnicate", "now"]).await.unwrap();
        assert_eq!(outcome, Outcome::UnknownCommand("frobnicate now".to_string()));
    }

    #[tokio::test]
    async fn test_undeclared_actions_get_commands() {
        let fx = fixture("plugins: [echo]\n").await;
        assert!(fx.app.tree().leaf("say bare").is_some());
        assert!(fx.app.tree().leaf("echo configure").is_some());
        assert!(fx.app.tree().leaf("root configure").is_some());
    }

    #[tokio::test]
    async fn test_missing_plugin_is_skipped() {
        let fx = fixture("plugins: [does-not-exist, echo]\n").await;
        let report = fx.app.load_report();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].name, "does-not-exist");
        assert!(report.loaded.iter().any(|plugin| plugin.name == "echo"));
    }

    #[tokio::test]
    async fn test_workflow_registered_as_command() {
        let fx = fixture(
            "workflows:\n  deploy:\n    inputs: [env]\n    steps:\n      - id: a\n        run: 'true'\n  broken:\n    steps: []\n",
        )
        .await;
        let leaf = fx.app.tree().leaf("deploy").unwrap();
        assert!(leaf.definition.options.contains_key("env"));
        assert!(fx.app.tree().find("broken").is_none());
    }

    #[tokio::test]
    async fn test_workflow_colliding_with_namespace_is_fatal() {
        let project = TempDir::new().unwrap();
        let home = TempDir::new().unwrap();
        std::fs::write(
            project.path().join("cpm.yml"),
            "workflows:\n  plugin:\n    steps:\n      - id: a\n        run: 'true'\n",
        )
        .unwrap();
        let options = AppOptions::default().project_root(project.path()).global_dir(home.path());
        let err = App::bootstrap(options).await.err().unwrap();
        assert!(err.to_string().contains("ambiguous command"));
    }

    #[tokio::test]
    async fn test_help_exits_zero() {
        let fx = fixture("plugins: []\n").await;
        assert_eq!(fx.app.run(["cpm", "--help"]).await.unwrap(), Outcome::Exited(0));
        assert_eq!(fx.app.run(["cpm"]).await.unwrap(), Outcome::Exited(0));
    }
}
