//! Command declarations and the command line built from them.

mod clap_builder;
mod definition;
mod dispatch;
mod tree;

pub use clap_builder::{argument_id, build_cli, option_id, JSON_ARG, VERBOSE_ARG};
pub use definition::{ArgumentDef, CommandDef, OptionDef, OutputDef};
pub use dispatch::{
    collect_input, filter_outputs, format_key_values, resolve_invocation, surface_outputs,
    unknown_command_message, Invocation,
};
pub use tree::{normalize_path, split_path, CommandError, CommandTree, CommandTreeNode, LeafCommand};
