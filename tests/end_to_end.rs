//! Library-level tests driving [`App`] with compiled-in plugins.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use cpm::command::OptionDef;
use cpm::plugin::{FnAction, FnFactory, PluginScope};
use cpm::{
    Action, ActionInput, ActionOutput, App, AppOptions, CommandDef, Outcome, PluginCatalog,
    PluginContext, PluginSpec,
};
use tempfile::TempDir;

fn task_plugin(_ctx: &PluginContext) -> anyhow::Result<PluginSpec> {
    Ok(PluginSpec::new("tasks")
        .with_action(
            "task get",
            FnAction::shared(|_, input| {
                let mut output = ActionOutput::new();
                output.insert("id".to_string(), input.arg("id").unwrap_or_default().to_string());
                output.insert("title".to_string(), "Fix bug".to_string());
                output.insert("extra".to_string(), "ignored".to_string());
                Ok(output)
            }),
        )
        .with_command(
            "task get",
            CommandDef::new()
                .with_description("fetch a task")
                .with_argument("id", "task id")
                .with_option("full", OptionDef::flag("include everything").short('f'))
                .with_output("id", "task id")
                .with_output("title", "task title"),
        ))
}

/// Counts calls and remembers a value in its variable store.
struct Remember {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Action for Remember {
    async fn call(&self, ctx: &PluginContext, input: ActionInput) -> anyhow::Result<ActionOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(value) = input.arg("value") {
            ctx.variables().set("last", value);
        }
        let mut output = ActionOutput::new();
        output.insert("last".to_string(), ctx.variables().get("last").unwrap_or_default());
        Ok(output)
    }
}

struct Fixture {
    project: TempDir,
    home: TempDir,
}

impl Fixture {
    fn new(cpm_yml: &str) -> Self {
        let project = TempDir::new().unwrap();
        std::fs::write(project.path().join("cpm.yml"), cpm_yml).unwrap();
        Self { project, home: TempDir::new().unwrap() }
    }

    fn options(&self, catalog: PluginCatalog) -> AppOptions {
        AppOptions::default()
            .project_root(self.project.path())
            .global_dir(self.home.path())
            .catalog(catalog)
    }
}

fn catalog() -> PluginCatalog {
    let mut catalog = PluginCatalog::builtin();
    catalog.register("tasks", FnFactory(task_plugin));
    catalog
}

#[tokio::test]
async fn test_declared_outputs_only() {
    let fx = Fixture::new("plugins: [tasks]\n");
    let app = App::bootstrap(fx.options(catalog())).await.unwrap();

    let outcome = app.run(["cpm", "task", "get", "1"]).await.unwrap();
    match outcome {
        Outcome::Completed { path, outputs } => {
            assert_eq!(path, "task get");
            assert_eq!(outputs.keys().collect::<Vec<_>>(), vec!["id", "title"]);
            assert_eq!(outputs["id"], "1");
            assert_eq!(outputs["title"], "Fix bug");
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[tokio::test]
async fn test_plugin_not_listed_is_not_loaded() {
    let fx = Fixture::new("plugins: []\n");
    let app = App::bootstrap(fx.options(catalog())).await.unwrap();

    assert!(app.tree().find("task").is_none());
    let outcome = app.run(["cpm", "task", "get", "1"]).await.unwrap();
    assert_eq!(outcome, Outcome::UnknownCommand("task get 1".to_string()));
}

#[tokio::test]
async fn test_later_plugin_overrides_action() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let mut catalog = catalog();
    catalog.register(
        "override",
        FnFactory(move |_ctx: &PluginContext| -> anyhow::Result<PluginSpec> {
            Ok(PluginSpec::new("override")
                .with_action("task get", Arc::new(Remember { calls: Arc::clone(&counter) })))
        }),
    );

    let fx = Fixture::new("plugins: [tasks, override]\n");
    let app = App::bootstrap(fx.options(catalog)).await.unwrap();

    let info = app.registry().read().describe();
    let task_get = info.iter().find(|action| action.path == "task get").unwrap();
    assert_eq!(task_get.plugin, "override");
    assert_eq!(task_get.scope, PluginScope::Local);

    app.run(["cpm", "task", "get", "7"]).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_variables_persist_between_runs() {
    let calls = Arc::new(AtomicUsize::new(0));
    let make_catalog = |calls: &Arc<AtomicUsize>| {
        let calls = Arc::clone(calls);
        let mut catalog = PluginCatalog::builtin();
        catalog.register(
            "memo",
            FnFactory(move |_ctx: &PluginContext| -> anyhow::Result<PluginSpec> {
                Ok(PluginSpec::new("memo")
                    .with_action("memo set", Arc::new(Remember { calls: Arc::clone(&calls) }))
                    .with_command(
                        "memo set",
                        CommandDef::new()
                            .with_argument("value", "value to keep")
                            .with_output("last", "stored value"),
                    ))
            }),
        );
        catalog
    };

    let fx = Fixture::new("plugins: [memo]\n");
    {
        let app = App::bootstrap(fx.options(make_catalog(&calls))).await.unwrap();
        app.run(["cpm", "memo", "set", "kept"]).await.unwrap();
    }

    let app = App::bootstrap(fx.options(make_catalog(&calls))).await.unwrap();
    let output = app.invoke("memo set", ActionInput::new()).await.unwrap();
    assert_eq!(output["last"], "kept");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_failing_factory_is_isolated() {
    let mut catalog = catalog();
    catalog.register(
        "broken",
        FnFactory(|_ctx: &PluginContext| -> anyhow::Result<PluginSpec> {
            anyhow::bail!("cannot start")
        }),
    );

    let fx = Fixture::new("plugins: [broken, tasks]\n");
    let app = App::bootstrap(fx.options(catalog)).await.unwrap();

    let report = app.load_report();
    assert_eq!(report.failed.len(), 1);
    assert!(report.failed[0].error.to_string().contains("cannot start"));
    assert!(app.tree().leaf("task get").is_some());
}

#[cfg(unix)]
#[tokio::test]
async fn test_workflow_calls_plugin_outputs_through_steps() {
    let fx = Fixture::new(
        r#"
plugins: [tasks]
workflows:
  start:
    inputs: [id]
    steps:
      - id: branch
        run: echo name=task-${{ inputs.id }}
    outputs:
      branch: ${{ steps.branch.outputs.name }}
"#,
    );
    let app = App::bootstrap(fx.options(catalog())).await.unwrap();

    let output = app
        .invoke("start", ActionInput::new().with_option("id", "12"))
        .await
        .unwrap();
    assert_eq!(output["branch"], "task-12");
}
