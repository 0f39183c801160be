//! Configuration management for cpm.
//!
//! Configuration lives in `cpm.yml` files: a global one in the user-wide
//! state directory and a local one at the project root. Both are optional.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::paths::CpmPaths;
use crate::workflow::Workflow;

/// Contents of one `cpm.yml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CpmConfig {
    /// Directory repositories are organised under (`~` is expanded)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_dir: Option<String>,

    /// Plugins to load, in order
    pub plugins: Vec<String>,

    /// Named workflows, exposed as commands
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub workflows: IndexMap<String, Workflow>,

    /// Plugin-specific sections, passed through untouched
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl CpmConfig {
    /// Load configuration from a file. A missing file yields the default.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };
        Self::parse(&content).with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    /// Parse configuration from YAML text.
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Overlay `local` on `global`: scalar keys and sections from the local
    /// file win and workflows are merged by name.
    ///
    /// The merged view carries no plugin list. Plugin lists belong to one
    /// scope each; read them through [`ConfigSet::global_plugins`] and
    /// [`ConfigSet::local_plugins`].
    pub fn merged(global: &Self, local: &Self) -> Self {
        let mut merged = global.clone();
        merged.plugins.clear();
        if local.root_dir.is_some() {
            merged.root_dir.clone_from(&local.root_dir);
        }
        for (name, workflow) in &local.workflows {
            merged.workflows.insert(name.clone(), workflow.clone());
        }
        for (key, value) in &local.extra {
            merged.extra.insert(key.clone(), value.clone());
        }
        merged
    }

    /// `rootDir` with `~` and environment variables expanded.
    pub fn root_dir_path(&self) -> Option<PathBuf> {
        let raw = self.root_dir.as_deref()?;
        let expanded = shellexpand::full(raw).unwrap_or_else(|_| raw.into());
        Some(PathBuf::from(expanded.as_ref()))
    }

    /// A plugin-specific section.
    pub fn section(&self, name: &str) -> Option<&serde_yaml::Value> {
        self.extra.get(name)
    }
}

/// Global, local and merged configuration for one invocation.
#[derive(Debug, Clone)]
pub struct ConfigSet {
    pub global: CpmConfig,
    pub local: Option<CpmConfig>,
    pub merged: Arc<CpmConfig>,
}

impl ConfigSet {
    /// Load both files. The local file is only read inside a project.
    pub fn load(paths: &CpmPaths) -> anyhow::Result<Self> {
        let global = CpmConfig::load_from_file(&paths.global_config())?;
        let local = if paths.is_project() {
            Some(CpmConfig::load_from_file(&paths.local_config())?)
        } else {
            None
        };
        Ok(Self::from_parts(global, local))
    }

    pub fn from_parts(global: CpmConfig, local: Option<CpmConfig>) -> Self {
        let merged = match &local {
            Some(local) => CpmConfig::merged(&global, local),
            None => CpmConfig::merged(&global, &CpmConfig::default()),
        };
        Self { global, local, merged: Arc::new(merged) }
    }

    /// Plugins listed in the global file.
    pub fn global_plugins(&self) -> &[String] {
        &self.global.plugins
    }

    /// Plugins listed in the local file.
    pub fn local_plugins(&self) -> &[String] {
        self.local.as_ref().map_or(&[], |local| local.plugins.as_slice())
    }
}
