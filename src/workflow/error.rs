//! Workflow error types.

use thiserror::Error;

use super::TemplateError;
use crate::core::StepError;

/// Errors that can occur while validating or running a workflow.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The workflow definition is malformed.
    #[error("invalid workflow '{name}': {reason}")]
    Invalid { name: String, reason: String },

    /// A step failed to run or exited non-zero.
    #[error("step '{step}' failed")]
    Step {
        step: String,
        #[source]
        source: StepError,
    },

    /// A step's command could not be resolved.
    #[error("step '{step}' has an invalid placeholder")]
    Template {
        step: String,
        #[source]
        source: TemplateError,
    },

    /// An output template could not be resolved.
    #[error("output '{output}' has an invalid placeholder")]
    Output {
        output: String,
        #[source]
        source: TemplateError,
    },
}

impl WorkflowError {
    /// Exit code of the failing step, if it ran and exited.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Step { source: StepError::Failed { code, .. }, .. } => Some(*code),
            _ => None,
        }
    }
}
