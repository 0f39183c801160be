//! Turning parsed arguments into an action call and surfacing its outputs.

use std::io::Write;

use anyhow::Context;
use clap::ArgMatches;

use super::clap_builder::{argument_id, option_id, JSON_ARG};
use super::{CommandDef, CommandTree, CommandTreeNode, LeafCommand};
use crate::core::paths::OUTPUT_ENV;
use crate::plugin::{ActionInput, ActionOutput};

/// A parsed command ready to dispatch.
#[derive(Debug)]
pub struct Invocation<'t> {
    pub leaf: &'t LeafCommand,
    pub input: ActionInput,
    /// `--json` was given
    pub json: bool,
}

/// Walk the matched subcommands down to a leaf.
pub fn resolve_invocation<'t>(tree: &'t CommandTree, matches: &ArgMatches) -> Option<Invocation<'t>> {
    let mut children = tree.children();
    let mut current = matches;
    loop {
        let (name, sub) = current.subcommand()?;
        match children.get(name)? {
            CommandTreeNode::Leaf(leaf) => {
                return Some(Invocation {
                    leaf,
                    input: collect_input(&leaf.definition, sub),
                    json: flag(sub, JSON_ARG),
                })
            }
            CommandTreeNode::Namespace(next) => {
                children = next;
                current = sub;
            }
        }
    }
}

/// Collect declared arguments and options. Flags appear only when set, with
/// the value `"true"`.
pub fn collect_input(definition: &CommandDef, matches: &ArgMatches) -> ActionInput {
    let mut input = ActionInput::new();
    for name in definition.arguments.keys() {
        if let Some(value) = value(matches, &argument_id(name)) {
            input.args.insert(name.clone(), value);
        }
    }
    for (name, option) in &definition.options {
        let id = option_id(name);
        if option.value_required {
            if let Some(value) = value(matches, &id) {
                input.options.insert(name.clone(), value);
            }
        } else if flag(matches, &id) {
            input.options.insert(name.clone(), "true".to_string());
        }
    }
    input
}

fn value(matches: &ArgMatches, id: &str) -> Option<String> {
    matches.try_get_one::<String>(id).ok().flatten().cloned()
}

fn flag(matches: &ArgMatches, id: &str) -> bool {
    matches.try_get_one::<bool>(id).ok().flatten().copied().unwrap_or(false)
}

/// Keep only declared outputs, in declaration order. Declared keys the
/// action did not return are left out.
pub fn filter_outputs(definition: &CommandDef, output: &ActionOutput) -> ActionOutput {
    definition
        .outputs
        .keys()
        .filter_map(|key| output.get(key).map(|value| (key.clone(), value.clone())))
        .collect()
}

/// Report outputs to a parent step (via `$CPM_OUTPUT`) and, with `--json`,
/// on stdout.
pub fn surface_outputs(outputs: &ActionOutput, json: bool) -> anyhow::Result<()> {
    if let Some(path) = std::env::var_os(OUTPUT_ENV).filter(|path| !path.is_empty()) {
        if !outputs.is_empty() {
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Failed to open output file {path:?}"))?;
            file.write_all(format_key_values(outputs).as_bytes())
                .context("Failed to write outputs")?;
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(outputs)?);
    }
    Ok(())
}

/// `key=value` lines. Newlines inside values are flattened so each pair
/// stays on one line.
pub fn format_key_values(outputs: &ActionOutput) -> String {
    outputs
        .iter()
        .map(|(key, value)| format!("{key}={}\n", value.replace(['\r', '\n'], " ")))
        .collect()
}

/// Message shown when no command matches.
pub fn unknown_command_message(args: &str) -> String {
    format!(
        "Unknown command: {args}\n\nSee --help for a list of available commands\nOr you may have a missing plugin."
    )
}
