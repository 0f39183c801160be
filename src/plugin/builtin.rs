//! The built-in `root` plugin: project setup, plugin management and
//! repository lookup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use indexmap::IndexMap;

use super::context::store_namespace;
use super::{Action, ActionInput, ActionOutput, FnAction, PluginContext, PluginSpec};
use crate::command::{CommandDef, OptionDef};
use crate::core::paths::STATE_DIR;
use crate::core::{sync_project, CpmConfig, SyncOutcome};

/// Name of the built-in plugin.
pub const ROOT_PLUGIN: &str = "root";

const GITIGNORE_ENTRIES: &str =
    "# cpm\n.cpm/_*\n.cpm/plugins\n.cpm/state.hash\n.cpm/secrets.json\n";
const NOT_A_PROJECT: &str = "please run this command inside a cpm project";

/// Create the `root` plugin.
pub fn root_plugin(_ctx: &PluginContext) -> anyhow::Result<PluginSpec> {
    let global = || OptionDef::flag("use the global configuration").short('g');

    Ok(PluginSpec::new(ROOT_PLUGIN)
        .with_action("init", FnAction::shared(init))
        .with_command("init", CommandDef::new().with_description("initialize a cpm project"))
        .with_action("sync", FnAction::shared(sync))
        .with_command("sync", CommandDef::new().with_description("sync the project state"))
        .with_action("list", FnAction::shared(list))
        .with_command("list", CommandDef::new().with_description("list repositories under rootDir"))
        .with_action("find", FnAction::shared(find))
        .with_command(
            "find",
            CommandDef::new()
                .with_description("find a repository under rootDir")
                .with_argument("query", "end of the repository path")
                .with_output("org", "organisation directory")
                .with_output("repo", "repository directory")
                .with_output("path", "full repository path"),
        )
        .with_action("plugin list", FnAction::shared(plugin_list))
        .with_command("plugin list", CommandDef::new().with_description("list loaded plugins"))
        .with_action("plugin add", FnAction::shared(plugin_add))
        .with_command(
            "plugin add",
            CommandDef::new()
                .with_description("add a plugin to the configuration")
                .with_argument("plugin", "plugin name")
                .with_option("global", global()),
        )
        .with_action("plugin remove", FnAction::shared(plugin_remove))
        .with_command(
            "plugin remove",
            CommandDef::new()
                .with_description("remove a plugin from the configuration")
                .with_argument("plugin", "plugin name")
                .with_option("global", global()),
        )
        .with_action("plugin purge", FnAction::shared(plugin_purge))
        .with_command(
            "plugin purge",
            CommandDef::new()
                .with_description("remove a plugin and its stored variables and secrets")
                .with_argument("plugin", "plugin name"),
        )
        .with_action("plugin configure", Arc::new(PluginConfigure))
        .with_command(
            "plugin configure",
            CommandDef::new()
                .with_description("configure a plugin")
                .with_argument("plugin", "plugin name"),
        )
        .with_action("workflow list", FnAction::shared(workflow_list))
        .with_command(
            "workflow list",
            CommandDef::new().with_description("list configured workflows"),
        ))
}

fn init(ctx: &PluginContext, _input: ActionInput) -> anyhow::Result<ActionOutput> {
    let paths = ctx.paths();
    if paths.is_project() {
        println!("already initialized");
        return Ok(ActionOutput::new());
    }

    CpmConfig::default().save(&paths.local_config())?;
    std::fs::create_dir_all(paths.project_dir())
        .with_context(|| format!("Failed to create {STATE_DIR}"))?;

    let gitignore = paths.gitignore();
    let existing = std::fs::read_to_string(&gitignore).unwrap_or_default();
    if !existing.contains("# cpm") {
        let mut content = existing;
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        content.push_str(GITIGNORE_ENTRIES);
        std::fs::write(&gitignore, content).context("Failed to update .gitignore")?;
    }

    sync_project(paths, true)?;
    println!("cpm project initialized");
    Ok(ActionOutput::new())
}

fn sync(ctx: &PluginContext, _input: ActionInput) -> anyhow::Result<ActionOutput> {
    match sync_project(ctx.paths(), true)? {
        SyncOutcome::NotAProject => println!("{NOT_A_PROJECT}"),
        _ => println!("project synced"),
    }
    Ok(ActionOutput::new())
}

fn root_dir(ctx: &PluginContext) -> anyhow::Result<PathBuf> {
    ctx.config().root_dir_path().context("rootDir is not configured")
}

fn sorted_dirs(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read {}", dir.display()))?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}

fn file_name(path: &Path) -> String {
    path.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default()
}

fn list(ctx: &PluginContext, _input: ActionInput) -> anyhow::Result<ActionOutput> {
    for org in sorted_dirs(&root_dir(ctx)?)? {
        println!("|--{}", file_name(&org));
        for repo in sorted_dirs(&org)? {
            println!("|  |--{} => {}", file_name(&repo), repo.display());
        }
    }
    Ok(ActionOutput::new())
}

fn find(ctx: &PluginContext, input: ActionInput) -> anyhow::Result<ActionOutput> {
    let query = input.arg("query").unwrap_or_default().to_lowercase();
    let mut output = ActionOutput::new();

    for org in sorted_dirs(&root_dir(ctx)?)? {
        for repo in sorted_dirs(&org)? {
            let path = repo.to_string_lossy().into_owned();
            if path.to_lowercase().ends_with(&query) {
                println!("{path}");
                output.insert("org".to_string(), file_name(&org));
                output.insert("repo".to_string(), file_name(&repo));
                output.insert("path".to_string(), path);
                return Ok(output);
            }
        }
    }
    Ok(output)
}

fn plugin_list(ctx: &PluginContext, _input: ActionInput) -> anyhow::Result<ActionOutput> {
    let mut plugins: IndexMap<String, (String, Vec<String>)> = IndexMap::new();
    for info in ctx.actions() {
        plugins
            .entry(info.plugin.clone())
            .or_insert_with(|| (info.scope.to_string(), Vec::new()))
            .1
            .push(info.path);
    }

    for (name, (scope, actions)) in plugins {
        println!("{name} ({scope})");
        for action in actions {
            println!("  {action}");
        }
    }
    Ok(ActionOutput::new())
}

/// Config file the `--global` flag selects, or `None` outside a project.
fn target_config(ctx: &PluginContext, input: &ActionInput) -> Option<PathBuf> {
    if input.flag("global") {
        Some(ctx.paths().global_config())
    } else if ctx.paths().is_project() {
        Some(ctx.paths().local_config())
    } else {
        None
    }
}

fn required_plugin(input: &ActionInput) -> anyhow::Result<String> {
    input.arg("plugin").map(str::to_string).context("missing plugin name")
}

fn plugin_add(ctx: &PluginContext, input: ActionInput) -> anyhow::Result<ActionOutput> {
    let plugin = required_plugin(&input)?;
    let Some(path) = target_config(ctx, &input) else {
        println!("{NOT_A_PROJECT}");
        return Ok(ActionOutput::new());
    };

    let mut config = CpmConfig::load_from_file(&path)?;
    if config.plugins.contains(&plugin) {
        println!("plugin already added");
    } else {
        config.plugins.push(plugin.clone());
        config.save(&path)?;
        println!("plugin added");
        println!("run `cpm plugin configure {plugin}` to configure it");
    }
    Ok(ActionOutput::new())
}

fn plugin_remove(ctx: &PluginContext, input: ActionInput) -> anyhow::Result<ActionOutput> {
    let plugin = required_plugin(&input)?;
    let Some(path) = target_config(ctx, &input) else {
        println!("{NOT_A_PROJECT}");
        return Ok(ActionOutput::new());
    };

    let mut config = CpmConfig::load_from_file(&path)?;
    let before = config.plugins.len();
    config.plugins.retain(|name| name != &plugin);
    if config.plugins.len() != before {
        config.save(&path)?;
    }
    println!("plugin removed");
    Ok(ActionOutput::new())
}

fn plugin_purge(ctx: &PluginContext, input: ActionInput) -> anyhow::Result<ActionOutput> {
    let plugin = required_plugin(&input)?;
    plugin_remove(ctx, input)?;

    if ctx.paths().is_project() {
        let namespace = store_namespace(&plugin);
        ctx.variables().with_namespace(namespace.clone()).clear();
        ctx.secrets().with_namespace(namespace).clear();
        println!("plugin purged");
    }
    Ok(ActionOutput::new())
}

struct PluginConfigure;

#[async_trait]
impl Action for PluginConfigure {
    async fn call(&self, ctx: &PluginContext, input: ActionInput) -> anyhow::Result<ActionOutput> {
        if !ctx.paths().is_project() {
            println!("{NOT_A_PROJECT}");
            return Ok(ActionOutput::new());
        }
        let plugin = required_plugin(&input)?;
        let result = ctx.execute(&format!("{plugin} configure"), ActionInput::new()).await?;
        println!("plugin configured");
        Ok(result)
    }
}

fn workflow_list(ctx: &PluginContext, _input: ActionInput) -> anyhow::Result<ActionOutput> {
    let workflows = &ctx.config().workflows;
    if workflows.is_empty() {
        println!("no workflows configured");
    }
    for (name, workflow) in workflows {
        let description = workflow.description.as_deref().unwrap_or("");
        if workflow.inputs.is_empty() {
            println!("{name}  {description}");
        } else {
            println!("{name}  {description}  [inputs: {}]", workflow.inputs.join(", "));
        }
    }
    Ok(ActionOutput::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CpmPaths, Stores};
    use crate::plugin::{ActionInvoker, ActionRegistry, PluginScope};
    use tempfile::TempDir;

    struct Fixture {
        _root: TempDir,
        _home: TempDir,
        ctx: PluginContext,
        stores: Stores,
    }

    fn fixture(config: CpmConfig) -> Fixture {
        let root = TempDir::new().unwrap();
        let home = TempDir::new().unwrap();
        let registry = ActionRegistry::shared();
        let stores = Stores::in_memory();
        let ctx = PluginContext::new(
            ROOT_PLUGIN,
            PluginScope::Builtin,
            Arc::new(config),
            Arc::new(CpmPaths::new(root.path(), home.path())),
            stores.for_scope(false).scoped(&store_namespace(ROOT_PLUGIN)),
            ActionInvoker::new(&registry),
        );
        Fixture { _root: root, _home: home, ctx, stores }
    }

    #[test]
    fn test_spec_declares_every_action() {
        let f = fixture(CpmConfig::default());
        let spec = root_plugin(&f.ctx).unwrap();
        for path in spec.actions.keys() {
            assert!(spec.commands.contains_key(path), "{path} has no declaration");
        }
    }

    #[test]
    fn test_init_creates_project() {
        let f = fixture(CpmConfig::default());
        init(&f.ctx, ActionInput::new()).unwrap();

        let paths = f.ctx.paths();
        assert!(paths.is_project());
        assert!(paths.project_dir().is_dir());
        assert!(paths.state_hash().is_file());
        let gitignore = std::fs::read_to_string(paths.gitignore()).unwrap();
        assert!(gitignore.contains(".cpm/secrets.json"));

        init(&f.ctx, ActionInput::new()).unwrap();
        let again = std::fs::read_to_string(paths.gitignore()).unwrap();
        assert_eq!(gitignore, again);
    }

    #[test]
    fn test_plugin_add_and_remove() {
        let f = fixture(CpmConfig::default());
        init(&f.ctx, ActionInput::new()).unwrap();

        let input = ActionInput::new().with_arg("plugin", "jira");
        plugin_add(&f.ctx, input.clone()).unwrap();
        plugin_add(&f.ctx, input.clone()).unwrap();
        let config = CpmConfig::load_from_file(&f.ctx.paths().local_config()).unwrap();
        assert_eq!(config.plugins, vec!["jira"]);

        plugin_remove(&f.ctx, input).unwrap();
        let config = CpmConfig::load_from_file(&f.ctx.paths().local_config()).unwrap();
        assert!(config.plugins.is_empty());
    }

    #[test]
    fn test_plugin_add_global_outside_project() {
        let f = fixture(CpmConfig::default());
        let input = ActionInput::new().with_arg("plugin", "jira").with_option("global", "true");
        plugin_add(&f.ctx, input).unwrap();

        let config = CpmConfig::load_from_file(&f.ctx.paths().global_config()).unwrap();
        assert_eq!(config.plugins, vec!["jira"]);
        assert!(!f.ctx.paths().is_project());
    }

    #[test]
    fn test_plugin_purge_clears_namespace() {
        let f = fixture(CpmConfig::default());
        init(&f.ctx, ActionInput::new()).unwrap();
        let (vars, secrets) = f.stores.for_scope(false).scoped("plugin:jira");
        vars.set("board", "CPM");
        secrets.set("token", "abc");

        plugin_purge(&f.ctx, ActionInput::new().with_arg("plugin", "jira")).unwrap();
        assert!(vars.entries().is_empty());
        assert!(secrets.entries().is_empty());
    }

    #[test]
    fn test_find_repository() {
        let repos = TempDir::new().unwrap();
        std::fs::create_dir_all(repos.path().join("acme").join("Widget-API")).unwrap();
        std::fs::create_dir_all(repos.path().join("acme").join("website")).unwrap();
        let config = CpmConfig {
            root_dir: Some(repos.path().to_string_lossy().into_owned()),
            ..CpmConfig::default()
        };
        let f = fixture(config);

        let output = find(&f.ctx, ActionInput::new().with_arg("query", "widget-api")).unwrap();
        assert_eq!(output.get("org").map(String::as_str), Some("acme"));
        assert_eq!(output.get("repo").map(String::as_str), Some("Widget-API"));

        let none = find(&f.ctx, ActionInput::new().with_arg("query", "nothing")).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_list_requires_root_dir() {
        let f = fixture(CpmConfig::default());
        assert!(list(&f.ctx, ActionInput::new()).is_err());
    }
}
