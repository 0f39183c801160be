//! Workflows exposed as actions.

use async_trait::async_trait;

use super::{Workflow, WorkflowRunner};
use crate::core::ShellExecutor;
use crate::plugin::{Action, ActionInput, ActionOutput, PluginContext};

/// Runs a configured workflow through the shell.
#[derive(Debug, Clone)]
pub struct WorkflowAction {
    name: String,
    workflow: Workflow,
}

impl WorkflowAction {
    pub fn new(name: impl Into<String>, workflow: Workflow) -> Self {
        Self { name: name.into(), workflow }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }
}

#[async_trait]
impl Action for WorkflowAction {
    async fn call(&self, ctx: &PluginContext, input: ActionInput) -> anyhow::Result<ActionOutput> {
        let paths = ctx.paths();
        let executor = ShellExecutor::new(&paths.scratch_dir());
        let mut runner =
            WorkflowRunner::new(&self.name, &self.workflow, executor).cwd(paths.project_root());
        Ok(runner.run(&input).await?)
    }
}
