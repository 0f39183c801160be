//! Core types and functionality for cpm.
//!
//! This module contains the pieces every other layer builds on: locations,
//! configuration, persistent stores, project sync and shell step execution.

mod config;
mod executor;
pub mod paths;
mod store;
mod sync;

pub use config::{ConfigSet, CpmConfig};
pub use executor::{
    parse_key_values, Echo, ExecOptions, KeyValues, ShellExecutor, StepError, StepExecutor,
    StepOutcome,
};
pub use paths::CpmPaths;
pub use store::{KeyValueStore, NamespacedStore, StorePair, Stores};
pub use sync::{auto_sync, is_nested_invocation, sync_project, SyncOutcome};
