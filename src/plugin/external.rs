//! External plugins.
//!
//! An external plugin is an executable named `cpm-plugin-<name>` in a
//! `plugins` directory. It speaks a small contract:
//!
//! - `cpm-plugin-<name> describe` prints a JSON manifest on stdout
//! - `cpm-plugin-<name> invoke <path...>` runs one action, reading its input
//!   from `$CPM_INPUT` and reporting results like any other shell step

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use super::{
    Action, ActionInput, ActionOutput, ActionRef, PluginContext, PluginError, PluginFactory,
    PluginResult, PluginSpec,
};
use crate::command::CommandDef;
use crate::core::paths::{INPUT_ENV, PLUGIN_ENV};
use crate::core::{ExecOptions, ShellExecutor, StepExecutor};

/// Executable name prefix.
pub const EXECUTABLE_PREFIX: &str = "cpm-plugin-";

const DESCRIBE_TIMEOUT: Duration = Duration::from_secs(10);

static PLUGIN_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9_-]*$").expect("plugin name pattern is valid"));

/// Whether `name` may be used as a plugin name.
pub fn is_valid_name(name: &str) -> bool {
    PLUGIN_NAME.is_match(name)
}

/// What `describe` prints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PluginManifest {
    pub name: String,
    pub actions: Vec<String>,
    pub commands: IndexMap<String, CommandDef>,
    /// The plugin implements `invoke configure`
    pub configure: bool,
}

/// A located plugin executable.
#[derive(Debug, Clone)]
pub struct ExternalPlugin {
    name: String,
    executable: PathBuf,
}

impl ExternalPlugin {
    /// Find the executable for `name` inside `plugins_dir`.
    pub fn locate(name: &str, plugins_dir: &Path) -> PluginResult<Self> {
        if !is_valid_name(name) {
            return Err(PluginError::InvalidName(name.to_string()));
        }

        let candidate = plugins_dir.join(format!("{EXECUTABLE_PREFIX}{name}"));
        let executable = candidate.canonicalize().map_err(|_| {
            PluginError::load(name, format!("not installed (looked for {})", candidate.display()))
        })?;
        let dir = plugins_dir.canonicalize()?;
        if !executable.starts_with(&dir) {
            return Err(PluginError::load(
                name,
                "executable resolves outside the plugins directory",
            ));
        }
        if !executable.is_file() {
            return Err(PluginError::load(name, "not a regular file"));
        }

        Ok(Self { name: name.to_string(), executable })
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Run `describe` and parse the manifest.
    pub async fn describe(&self) -> PluginResult<PluginManifest> {
        let mut command = tokio::process::Command::new(&self.executable);
        command
            .arg("describe")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let output = tokio::time::timeout(DESCRIBE_TIMEOUT, command.output())
            .await
            .map_err(|_| {
                PluginError::protocol(
                    &self.name,
                    format!("describe timed out after {} seconds", DESCRIBE_TIMEOUT.as_secs()),
                )
            })??;

        if !output.status.success() {
            return Err(PluginError::protocol(
                &self.name,
                format!("describe exited with {}", output.status),
            ));
        }

        let manifest: PluginManifest = serde_json::from_slice(&output.stdout)?;
        if !manifest.name.is_empty() && manifest.name != self.name {
            tracing::warn!(
                plugin = %self.name,
                manifest = %manifest.name,
                "Manifest name differs from the configured name"
            );
        }
        Ok(manifest)
    }
}

#[async_trait]
impl PluginFactory for ExternalPlugin {
    async fn create(&self, _ctx: &PluginContext) -> anyhow::Result<PluginSpec> {
        let manifest = self.describe().await?;

        let mut spec = PluginSpec::new(self.name.clone());
        for path in &manifest.actions {
            spec.actions.insert(path.clone(), self.action(path));
        }
        if manifest.configure {
            spec.configure = Some(self.action("configure"));
        }
        spec.commands = manifest.commands;
        Ok(spec)
    }
}

impl ExternalPlugin {
    fn action(&self, path: &str) -> ActionRef {
        Arc::new(ExternalAction {
            plugin: self.name.clone(),
            executable: self.executable.clone(),
            path: path.to_string(),
        })
    }
}

/// One action of an external plugin.
struct ExternalAction {
    plugin: String,
    executable: PathBuf,
    path: String,
}

#[async_trait]
impl Action for ExternalAction {
    async fn call(&self, ctx: &PluginContext, input: ActionInput) -> anyhow::Result<ActionOutput> {
        let mut environment: BTreeMap<String, String> = std::env::vars().collect();
        environment.insert(INPUT_ENV.to_string(), serde_json::to_string(&input)?);
        environment.insert(PLUGIN_ENV.to_string(), self.plugin.clone());

        let mut command = shell_quote(&self.executable.to_string_lossy());
        command.push_str(" invoke");
        for segment in self.path.split_whitespace() {
            command.push(' ');
            command.push_str(&shell_quote(segment));
        }

        let executor = ShellExecutor::new(&ctx.paths().scratch_dir());
        let options =
            ExecOptions::new().cwd(ctx.paths().project_root()).environment(environment);
        let outcome = executor.execute(&command, &options).await?;
        Ok(outcome.result)
    }
}

/// Quote a word for `sh`.
fn shell_quote(word: &str) -> String {
    if !word.is_empty()
        && word.chars().all(|c| c.is_ascii_alphanumeric() || "-_./=:".contains(c))
    {
        return word.to_string();
    }
    format!("'{}'", word.replace('\'', r"'\''"))
}
