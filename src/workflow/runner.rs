//! Workflow execution engine.
//!
//! Runs steps strictly in order through a [`StepExecutor`]. Each step's
//! `run` template is resolved against the current context; its results are
//! recorded under `steps.<id>.outputs` and its environment changes are
//! carried into later steps. The first failing step ends the run.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use indexmap::IndexMap;

use super::template::resolve;
use super::{Workflow, WorkflowContext, WorkflowError};
use crate::core::{ExecOptions, StepError, StepExecutor};
use crate::plugin::{ActionInput, ActionOutput};

/// Runner state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerState {
    Pending,
    Running { step: usize },
    Completed,
    Failed { step: usize, cause: String },
}

/// Result of executing a step.
#[derive(Debug, Clone)]
pub struct StepRecord {
    /// Step id
    pub id: String,

    /// Command after placeholder resolution (empty if resolution failed)
    pub command: String,

    /// Whether the step succeeded
    pub success: bool,

    /// Exit code, when the step ran and exited
    pub exit_code: Option<i32>,

    /// Time spent in the step
    pub duration: Duration,
}

/// Runs one workflow invocation.
#[derive(Debug)]
pub struct WorkflowRunner<'w, E> {
    name: &'w str,
    workflow: &'w Workflow,
    executor: E,
    cwd: Option<PathBuf>,
    state: RunnerState,
    records: Vec<StepRecord>,
}

impl<'w, E: StepExecutor> WorkflowRunner<'w, E> {
    pub fn new(name: &'w str, workflow: &'w Workflow, executor: E) -> Self {
        Self {
            name,
            workflow,
            executor,
            cwd: None,
            state: RunnerState::Pending,
            records: Vec::new(),
        }
    }

    /// Run steps in this directory.
    #[must_use]
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Get the current state.
    pub fn state(&self) -> &RunnerState {
        &self.state
    }

    /// Per-step results so far.
    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    /// Run with the action input's options as workflow inputs.
    pub async fn run(&mut self, input: &ActionInput) -> Result<ActionOutput, WorkflowError> {
        let inputs: IndexMap<String, String> = self
            .workflow
            .inputs
            .iter()
            .filter_map(|name| input.options.get(name).map(|value| (name.clone(), value.clone())))
            .collect();
        let mut context = WorkflowContext::new(inputs);
        self.run_with_context(&mut context).await
    }

    /// Run against an explicit context.
    pub async fn run_with_context(
        &mut self,
        context: &mut WorkflowContext,
    ) -> Result<ActionOutput, WorkflowError> {
        self.workflow.validate(self.name)?;

        for (index, step) in self.workflow.steps.iter().enumerate() {
            self.state = RunnerState::Running { step: index };
            let started = Instant::now();

            let command = match resolve(&step.run, context) {
                Ok(command) => command,
                Err(source) => {
                    self.fail(index, &step.id, String::new(), None, started, source.to_string());
                    return Err(WorkflowError::Template { step: step.id.clone(), source });
                }
            };

            tracing::info!(workflow = self.name, step = %step.id, command = %command, "Executing step");
            let mut options = ExecOptions::new().environment(context.environment.clone());
            if let Some(cwd) = &self.cwd {
                options = options.cwd(cwd.clone());
            }

            match self.executor.execute(&command, &options).await {
                Ok(outcome) => {
                    self.records.push(StepRecord {
                        id: step.id.clone(),
                        command,
                        success: true,
                        exit_code: Some(0),
                        duration: started.elapsed(),
                    });
                    context.apply_environment(&outcome.environment);
                    context.record_step(&step.id, outcome.result);
                }
                Err(source) => {
                    let exit_code = match &source {
                        StepError::Failed { code, .. } => Some(*code),
                        _ => None,
                    };
                    self.fail(index, &step.id, command, exit_code, started, source.to_string());
                    return Err(WorkflowError::Step { step: step.id.clone(), source });
                }
            }
        }

        let mut output = ActionOutput::new();
        for (name, template) in &self.workflow.outputs {
            match resolve(template, context) {
                Ok(value) => {
                    output.insert(name.clone(), value);
                }
                Err(source) => {
                    tracing::warn!(
                        workflow = self.name,
                        output = %name,
                        cause = %source,
                        "Output failed"
                    );
                    self.state = RunnerState::Failed {
                        step: self.workflow.steps.len().saturating_sub(1),
                        cause: source.to_string(),
                    };
                    return Err(WorkflowError::Output { output: name.clone(), source });
                }
            }
        }

        self.state = RunnerState::Completed;
        tracing::debug!(workflow = self.name, steps = self.records.len(), "Workflow completed");
        Ok(output)
    }

    fn fail(
        &mut self,
        index: usize,
        id: &str,
        command: String,
        exit_code: Option<i32>,
        started: Instant,
        cause: String,
    ) {
        tracing::warn!(workflow = self.name, step = id, cause = %cause, "Step failed");
        self.records.push(StepRecord {
            id: id.to_string(),
            command,
            success: false,
            exit_code,
            duration: started.elapsed(),
        });
        self.state = RunnerState::Failed { step: index, cause };
    }
}
