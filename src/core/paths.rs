//! Well-known locations and environment variable names.
//!
//! A *project* is a directory that contains a `cpm.yml`. Project state lives
//! in `<project>/.cpm`, user-wide state in `~/.cpm` (or `$CPM_HOME`).

use std::path::{Path, PathBuf};

use anyhow::Context;

/// File a child step appends `key=value` result lines to.
pub const OUTPUT_ENV: &str = "CPM_OUTPUT";
/// File a child step appends `KEY=value` environment lines to.
pub const ENVIRONMENT_ENV: &str = "CPM_ENVIRONMENT";
/// Set on every spawned step; its presence marks a nested invocation.
pub const PARENT_PID_ENV: &str = "CPM_PARENT_PID";
/// JSON-encoded action input handed to external plugins.
pub const INPUT_ENV: &str = "CPM_INPUT";
/// Name of the plugin an external action belongs to.
pub const PLUGIN_ENV: &str = "CPM_PLUGIN";
/// Overrides the user-wide state directory.
pub const HOME_ENV: &str = "CPM_HOME";
/// Overrides the log filter.
pub const LOG_ENV: &str = "CPM_LOG";

/// Configuration file name, both local and global.
pub const CONFIG_FILE: &str = "cpm.yml";
/// Name of the per-project state folder.
pub const STATE_DIR: &str = ".cpm";

const PLUGINS_DIR: &str = "plugins";
const VARIABLES_FILE: &str = "variables.json";
const SECRETS_FILE: &str = "secrets.json";
const STATE_HASH_FILE: &str = "state.hash";

/// Resolved locations for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpmPaths {
    project_root: PathBuf,
    global_dir: PathBuf,
}

impl CpmPaths {
    /// Create paths from an explicit project root and global state directory.
    pub fn new(project_root: impl Into<PathBuf>, global_dir: impl Into<PathBuf>) -> Self {
        Self { project_root: project_root.into(), global_dir: global_dir.into() }
    }

    /// Resolve paths for the current process.
    ///
    /// Either side may be overridden; the rest falls back to the working
    /// directory and `$CPM_HOME` / `~/.cpm`.
    pub fn resolve(
        project_root: Option<PathBuf>,
        global_dir: Option<PathBuf>,
    ) -> anyhow::Result<Self> {
        let project_root = match project_root {
            Some(root) => root,
            None => std::env::current_dir().context("Failed to read the working directory")?,
        };
        let global_dir = match global_dir {
            Some(dir) => dir,
            None => default_global_dir()?,
        };
        Ok(Self::new(project_root, global_dir))
    }

    /// Directory the current invocation treats as the project root.
    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// `<project>/.cpm`.
    pub fn project_dir(&self) -> PathBuf {
        self.project_root.join(STATE_DIR)
    }

    /// `<project>/cpm.yml`.
    pub fn local_config(&self) -> PathBuf {
        self.project_root.join(CONFIG_FILE)
    }

    /// Whether the working directory is a project.
    pub fn is_project(&self) -> bool {
        self.local_config().is_file()
    }

    /// User-wide state directory.
    pub fn global_dir(&self) -> &Path {
        &self.global_dir
    }

    /// `<global>/cpm.yml`.
    pub fn global_config(&self) -> PathBuf {
        self.global_dir.join(CONFIG_FILE)
    }

    /// Directory external plugins are looked up in.
    pub fn plugins_dir(&self, global: bool) -> PathBuf {
        self.state_dir(global).join(PLUGINS_DIR)
    }

    /// Directory holding the variable and secret stores for a scope.
    ///
    /// Outside a project the local scope falls back to the global directory.
    pub fn state_dir(&self, global: bool) -> PathBuf {
        if global || !self.is_project() {
            self.global_dir.clone()
        } else {
            self.project_dir()
        }
    }

    /// Directory for per-process scratch files.
    pub fn scratch_dir(&self) -> PathBuf {
        self.state_dir(false)
    }

    /// Hash of the last synced `cpm.yml`.
    pub fn state_hash(&self) -> PathBuf {
        self.project_dir().join(STATE_HASH_FILE)
    }

    /// `<project>/.gitignore`.
    pub fn gitignore(&self) -> PathBuf {
        self.project_root.join(".gitignore")
    }
}

/// Variable store file inside a state directory.
pub fn variables_file(state_dir: &Path) -> PathBuf {
    state_dir.join(VARIABLES_FILE)
}

/// Secret store file inside a state directory.
pub fn secrets_file(state_dir: &Path) -> PathBuf {
    state_dir.join(SECRETS_FILE)
}

fn default_global_dir() -> anyhow::Result<PathBuf> {
    if let Some(home) = std::env::var_os(HOME_ENV).filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(home));
    }
    dirs::home_dir()
        .map(|home| home.join(STATE_DIR))
        .context("Could not determine the home directory; set CPM_HOME")
}
