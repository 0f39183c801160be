//! Per-invocation workflow state.

use std::collections::BTreeMap;

use indexmap::IndexMap;

use super::template::Scope;
use crate::core::KeyValues;

/// What placeholders resolve against: inputs, earlier step outputs and the
/// environment the next step will run with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkflowContext {
    /// Resolved `--<input>` values
    pub inputs: IndexMap<String, String>,

    /// Outputs by step id
    pub steps: IndexMap<String, KeyValues>,

    /// Environment for the next step
    pub environment: BTreeMap<String, String>,
}

impl WorkflowContext {
    /// Start from the given inputs and the process environment.
    pub fn new(inputs: IndexMap<String, String>) -> Self {
        Self::with_environment(inputs, std::env::vars().collect())
    }

    pub fn with_environment(
        inputs: IndexMap<String, String>,
        environment: BTreeMap<String, String>,
    ) -> Self {
        Self { inputs, steps: IndexMap::new(), environment }
    }

    /// Record the outputs of a finished step.
    pub fn record_step(&mut self, id: &str, outputs: KeyValues) {
        self.steps.insert(id.to_string(), outputs);
    }

    /// Merge environment changes requested by a step.
    pub fn apply_environment(&mut self, delta: &KeyValues) {
        for (key, value) in delta {
            self.environment.insert(key.clone(), value.clone());
        }
    }
}

impl Scope for WorkflowContext {
    fn lookup(&self, path: &[&str]) -> Option<String> {
        match path {
            ["inputs", name] => self.inputs.get(*name).cloned(),
            ["steps", id, "outputs", key] => self.steps.get(*id)?.get(*key).cloned(),
            ["env" | "environment", name] => self.environment.get(*name).cloned(),
            _ => None,
        }
    }
}
