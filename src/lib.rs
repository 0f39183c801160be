//! # cpm
//!
//! Plugin-extensible project manager for your terminal.
//!
//! cpm builds its command line at startup from what plugins and `cpm.yml`
//! declare. Plugins contribute actions keyed by a space-separated path
//! (`task get`); workflows chain shell steps whose `key=value` results feed
//! later steps through `${{ ... }}` placeholders.
//!
//! ## Quick Start
//!
//! ```bash
//! # Create cpm.yml and .cpm/ in the current directory
//! cpm init
//!
//! # Run a workflow declared in cpm.yml
//! cpm start --id 42
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
// Allow common patterns that are intentional in this codebase
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::future_not_send)]

pub mod app;
pub mod command;
pub mod core;
pub mod plugin;
pub mod workflow;

// Re-export commonly used types
pub use app::{App, AppOptions, Outcome};
pub use command::{CommandDef, CommandError, CommandTree};
pub use core::{CpmConfig, CpmPaths, ShellExecutor, StepError, StepExecutor};
pub use plugin::{
    Action, ActionInput, ActionOutput, PluginCatalog, PluginContext, PluginError, PluginSpec,
};
pub use workflow::{Workflow, WorkflowError, WorkflowRunner};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "cpm";
