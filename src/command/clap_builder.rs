//! Builds the clap command line from a [`CommandTree`].
//!
//! Namespaces become subcommand groups, leaves become subcommands with
//! positional arguments and options. The root carries the global
//! `--verbose` and `--json` flags.

use clap::{Arg, ArgAction, Command as ClapCommand};

use super::{CommandDef, CommandTree, CommandTreeNode, LeafCommand};
use crate::{APP_NAME, VERSION};

/// Id of the global verbose flag.
pub const VERBOSE_ARG: &str = "verbose";
/// Id of the global JSON output flag.
pub const JSON_ARG: &str = "json";

const RESERVED_LONGS: [&str; 4] = [VERBOSE_ARG, JSON_ARG, "help", "version"];
const RESERVED_SHORTS: [char; 3] = ['v', 'h', 'V'];

/// Clap id of a positional argument.
pub fn argument_id(name: &str) -> String {
    format!("arg:{name}")
}

/// Clap id of an option.
pub fn option_id(name: &str) -> String {
    format!("opt:{name}")
}

/// Builds the complete command line from the tree.
pub fn build_cli(tree: &CommandTree) -> ClapCommand {
    let mut root = create_root_command();
    for (name, node) in tree.children() {
        root = root.subcommand(build_node(name, node));
    }
    root
}

/// Creates the root command with global flags.
fn create_root_command() -> ClapCommand {
    ClapCommand::new(APP_NAME)
        .version(VERSION)
        .about("Plugin-extensible project manager")
        .arg_required_else_help(true)
        .arg(
            Arg::new(VERBOSE_ARG)
                .short('v')
                .long(VERBOSE_ARG)
                .help("Enable verbose logging")
                .global(true)
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(JSON_ARG)
                .long(JSON_ARG)
                .help("Print command outputs as JSON")
                .global(true)
                .action(ArgAction::SetTrue),
        )
}

fn build_node(name: &str, node: &CommandTreeNode) -> ClapCommand {
    match node {
        CommandTreeNode::Leaf(leaf) => build_leaf(name, leaf),
        CommandTreeNode::Namespace(children) => {
            let mut group = ClapCommand::new(name.to_string())
                .subcommand_required(true)
                .arg_required_else_help(true);
            for (child_name, child) in children {
                group = group.subcommand(build_node(child_name, child));
            }
            group
        }
    }
}

fn build_leaf(name: &str, leaf: &LeafCommand) -> ClapCommand {
    let definition = &leaf.definition;
    let mut command = ClapCommand::new(name.to_string());
    if let Some(description) = &definition.description {
        command = command.about(description.clone());
    }
    command = add_positional_arguments(command, definition);
    add_options(command, definition)
}

/// Positional arguments keep their declaration order. Once an optional
/// argument appears, every later one is optional too.
fn add_positional_arguments(mut command: ClapCommand, definition: &CommandDef) -> ClapCommand {
    let mut required_allowed = true;
    for (index, (name, argument)) in definition.arguments.iter().enumerate() {
        let required = required_allowed && argument.required;
        if !argument.required {
            required_allowed = false;
        }

        let mut arg = Arg::new(argument_id(name))
            .index(index + 1)
            .required(required)
            .value_name(name.to_uppercase())
            .action(ArgAction::Set);
        if let Some(description) = &argument.description {
            arg = arg.help(description.clone());
        }
        command = command.arg(arg);
    }
    command
}

fn add_options(mut command: ClapCommand, definition: &CommandDef) -> ClapCommand {
    for (name, option) in &definition.options {
        if RESERVED_LONGS.contains(&name.as_str()) {
            tracing::warn!(option = %name, "Option name is reserved and was skipped");
            continue;
        }

        let mut arg = Arg::new(option_id(name)).long(name.clone());
        if let Some(short) = option.short_name.filter(|s| !RESERVED_SHORTS.contains(s)) {
            arg = arg.short(short);
        }
        if let Some(description) = &option.description {
            arg = arg.help(description.clone());
        }
        arg = if option.value_required {
            arg.value_name(name.to_uppercase()).action(ArgAction::Set)
        } else {
            arg.action(ArgAction::SetTrue)
        };
        command = command.arg(arg);
    }
    command
}
