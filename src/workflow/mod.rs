//! Workflows: named sequences of shell steps declared in `cpm.yml`.
//!
//! Each workflow becomes a command. Steps run in order; a step's `run` string
//! may reference `${{ inputs.<name> }}`, `${{ steps.<id>.outputs.<key> }}` and
//! `${{ env.<NAME> }}`. The first failing step stops the workflow.

mod action;
mod context;
mod error;
mod runner;
mod schema;
pub mod template;

pub use action::WorkflowAction;
pub use context::WorkflowContext;
pub use error::WorkflowError;
pub use runner::{RunnerState, StepRecord, WorkflowRunner};
pub use schema::{Workflow, WorkflowStep};
pub use template::{resolve, Scope, TemplateError, Value};
