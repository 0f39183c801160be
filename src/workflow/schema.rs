//! Workflow definitions as written in `cpm.yml`.
//!
//! ```yaml
//! workflows:
//!   start:
//!     description: start working on a task
//!     inputs: [id]
//!     steps:
//!       - id: task
//!         run: cpm task get ${{ inputs.id }}
//!       - id: branch
//!         run: git checkout -b ${{ steps.task.outputs.id }}
//!     outputs:
//!       branch: ${{ steps.task.outputs.id }}
//! ```

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::WorkflowError;
use crate::command::{CommandDef, OptionDef, OutputDef};

static STEP_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("step id pattern is valid"));

/// A named sequence of shell steps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Workflow {
    /// Help text for the generated command
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Input names, each exposed as `--<name> <value>`
    #[serde(alias = "args", skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<String>,

    /// Steps, run in order
    pub steps: Vec<WorkflowStep>,

    /// Output templates, resolved after the last step
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub outputs: IndexMap<String, String>,
}

/// One shell step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowStep {
    /// Unique id, used in `steps.<id>.outputs.<key>`
    pub id: String,

    /// Shell command template
    pub run: String,
}

impl Workflow {
    /// Check structure before running or registering.
    pub fn validate(&self, name: &str) -> Result<(), WorkflowError> {
        let invalid = |reason: String| WorkflowError::Invalid { name: name.to_string(), reason };

        if self.steps.is_empty() {
            return Err(invalid("workflow has no steps".to_string()));
        }

        let mut seen = Vec::with_capacity(self.steps.len());
        for (index, step) in self.steps.iter().enumerate() {
            if step.id.is_empty() {
                return Err(invalid(format!("step {} has no id", index + 1)));
            }
            if !STEP_ID.is_match(&step.id) {
                return Err(invalid(format!("step id '{}' contains invalid characters", step.id)));
            }
            if seen.contains(&step.id.as_str()) {
                return Err(invalid(format!("duplicate step id '{}'", step.id)));
            }
            if step.run.trim().is_empty() {
                return Err(invalid(format!("step '{}' has nothing to run", step.id)));
            }
            seen.push(step.id.as_str());
        }

        for input in &self.inputs {
            if input.trim().is_empty() {
                return Err(invalid("empty input name".to_string()));
            }
        }
        Ok(())
    }

    /// Step by id.
    pub fn step(&self, id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|step| step.id == id)
    }

    /// The command declaration the workflow is exposed under.
    pub fn command_def(&self) -> CommandDef {
        let mut definition = CommandDef::new();
        definition.description.clone_from(&self.description);
        for input in &self.inputs {
            definition.options.insert(input.clone(), OptionDef::value(format!("input '{input}'")));
        }
        for output in self.outputs.keys() {
            definition.outputs.insert(output.clone(), OutputDef::default());
        }
        definition
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workflow(yaml: &str) -> Workflow {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_valid_workflow() {
        let wf = workflow(
            r#"
description: start a task
inputs: [id]
steps:
  - id: fetch
    run: echo id=${{ inputs.id }}
outputs:
  id: ${{ steps.fetch.outputs.id }}
"#,
        );
        assert!(wf.validate("start").is_ok());
        assert!(wf.step("fetch").is_some());
    }

    #[test]
    fn test_args_alias() {
        let wf = workflow("args: [id]\nsteps:\n  - id: a\n    run: 'true'\n");
        assert_eq!(wf.inputs, vec!["id"]);
    }

    #[test]
    fn test_no_steps_is_invalid() {
        let err = Workflow::default().validate("empty").unwrap_err();
        assert!(err.to_string().contains("no steps"));
    }

    #[test]
    fn test_duplicate_ids_are_invalid() {
        let wf = workflow("steps:\n  - id: a\n    run: 'true'\n  - id: a\n    run: 'false'\n");
        assert!(wf.validate("dup").unwrap_err().to_string().contains("duplicate step id 'a'"));
    }

    #[test]
    fn test_bad_step_ids() {
        let wf = workflow("steps:\n  - run: 'true'\n");
        assert!(wf.validate("wf").is_err());

        let wf = workflow("steps:\n  - id: 'a.b'\n    run: 'true'\n");
        assert!(wf.validate("wf").is_err());
    }

    #[test]
    fn test_empty_run_is_invalid() {
        let wf = workflow("steps:\n  - id: a\n    run: '  '\n");
        assert!(wf.validate("wf").is_err());
    }

    #[test]
    fn test_command_def() {
        let wf = workflow(
            "description: d\ninputs: [id, title]\nsteps:\n  - id: a\n    run: 'true'\noutputs:\n  x: '1'\n",
        );
        let def = wf.command_def();
        assert_eq!(def.description.as_deref(), Some("d"));
        assert!(def.options["id"].value_required);
        assert_eq!(def.options.keys().collect::<Vec<_>>(), vec!["id", "title"]);
        assert!(def.outputs.contains_key("x"));
        assert!(def.arguments.is_empty());
    }
}
