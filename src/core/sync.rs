//! Project synchronisation.
//!
//! A project is "synced" when `.cpm/state.hash` holds the SHA-256 of the
//! current `cpm.yml`. Syncing prepares the project state folder.

use anyhow::Context;
use sha2::{Digest, Sha256};

use super::paths::{CpmPaths, PARENT_PID_ENV};

/// Result of a sync attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The working directory has no `cpm.yml`.
    NotAProject,
    /// Running inside another cpm step.
    Skipped,
    /// The stored hash already matches.
    UpToDate,
    /// State was (re)created.
    Synced,
}

/// Whether this process was started by a cpm step.
pub fn is_nested_invocation() -> bool {
    std::env::var_os(PARENT_PID_ENV).is_some()
}

/// Sync before dispatch unless this is a nested invocation.
pub fn auto_sync(paths: &CpmPaths, nested: bool) -> anyhow::Result<SyncOutcome> {
    if nested {
        return Ok(SyncOutcome::Skipped);
    }
    sync_project(paths, false)
}

/// Sync the project. `force` re-runs even when the hash matches.
pub fn sync_project(paths: &CpmPaths, force: bool) -> anyhow::Result<SyncOutcome> {
    if !paths.is_project() {
        return Ok(SyncOutcome::NotAProject);
    }

    let config_path = paths.local_config();
    let content = std::fs::read(&config_path)
        .with_context(|| format!("Failed to read {}", config_path.display()))?;
    let hash = format!("{:x}", Sha256::digest(&content));

    let stored = std::fs::read_to_string(paths.state_hash()).unwrap_or_default();
    if !force && stored.trim() == hash {
        return Ok(SyncOutcome::UpToDate);
    }

    let plugins_dir = paths.plugins_dir(false);
    std::fs::create_dir_all(&plugins_dir)
        .with_context(|| format!("Failed to create {}", plugins_dir.display()))?;
    std::fs::write(paths.state_hash(), &hash).context("Failed to record project state")?;

    tracing::info!(project = %paths.project_root().display(), "Project synced");
    Ok(SyncOutcome::Synced)
}
