//! Declarative command definitions.
//!
//! Plugins and workflows describe their commands with these types; they are
//! also the `commands` section of an external plugin manifest.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// How a command looks on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CommandDef {
    /// Help text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Positional arguments, in order
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub arguments: IndexMap<String, ArgumentDef>,

    /// Named options (`--name`)
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub options: IndexMap<String, OptionDef>,

    /// Output keys surfaced to the caller
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub outputs: IndexMap<String, OutputDef>,
}

impl CommandDef {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add a required positional argument.
    #[must_use]
    pub fn with_argument(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.arguments.insert(name.into(), ArgumentDef::new(description));
        self
    }

    #[must_use]
    pub fn with_option(mut self, name: impl Into<String>, option: OptionDef) -> Self {
        self.options.insert(name.into(), option);
        self
    }

    #[must_use]
    pub fn with_output(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.outputs.insert(name.into(), OutputDef { description: Some(description.into()) });
        self
    }
}

/// A positional argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ArgumentDef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub required: bool,
}

impl ArgumentDef {
    pub fn new(description: impl Into<String>) -> Self {
        Self { description: Some(description.into()), required: true }
    }

    #[must_use]
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

impl Default for ArgumentDef {
    fn default() -> Self {
        Self { description: None, required: true }
    }
}

/// A named option. Without `value_required` it is a boolean flag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OptionDef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub short_name: Option<char>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub value_required: bool,
}

impl OptionDef {
    /// An option that takes a value.
    pub fn value(description: impl Into<String>) -> Self {
        Self { short_name: None, description: Some(description.into()), value_required: true }
    }

    /// A boolean flag.
    pub fn flag(description: impl Into<String>) -> Self {
        Self { short_name: None, description: Some(description.into()), value_required: false }
    }

    #[must_use]
    pub fn short(mut self, short: char) -> Self {
        self.short_name = Some(short);
        self
    }
}

/// A declared output key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputDef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_shape() {
        let def: CommandDef = serde_json::from_str(
            r#"{
                "description": "get a task",
                "arguments": { "id": { "description": "task id" }, "extra": { "required": false } },
                "options": { "all": { "shortName": "a" }, "status": { "valueRequired": true } },
                "outputs": { "id": {}, "title": { "description": "task title" } }
            }"#,
        )
        .unwrap();

        assert!(def.arguments["id"].required);
        assert!(!def.arguments["extra"].required);
        assert_eq!(def.options["all"].short_name, Some('a'));
        assert!(!def.options["all"].value_required);
        assert!(def.options["status"].value_required);
        assert_eq!(def.outputs.keys().collect::<Vec<_>>(), vec!["id", "title"]);
    }

    #[test]
    fn test_builder() {
        let def = CommandDef::new()
            .with_description("clone a repo")
            .with_argument("url", "repository url")
            .with_option("branch", OptionDef::value("branch to check out").short('b'))
            .with_output("path", "checkout path");

        assert_eq!(def.description.as_deref(), Some("clone a repo"));
        assert!(def.arguments["url"].required);
        assert_eq!(def.options["branch"].short_name, Some('b'));
        assert!(def.outputs.contains_key("path"));
    }
}
