//! Shell step execution.
//!
//! Runs one shell command string and collects its structured results. A step
//! reports results in two ways:
//!
//! - printing `key=value` lines on stdout (stdout is still echoed to the terminal)
//! - appending `key=value` lines to the file named by `$CPM_OUTPUT`
//!
//! Lines appended to `$CPM_ENVIRONMENT` become environment changes that the
//! caller may carry into later steps. File entries win over stdout entries.
//!
//! stdin and stderr are inherited, stdout is piped so it can be parsed. A
//! child therefore does not see a terminal on stdout, and a prompt without a
//! trailing newline only appears once its line is complete. Steps that need
//! an interactive prompt should write it to stderr.
//!
//! When cpm itself runs inside a step, its own steps echo to stderr. Only the
//! outputs it surfaces through `$CPM_OUTPUT` reach the outer step.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command as ProcessCommand;
use tokio::sync::Notify;

use super::paths::{ENVIRONMENT_ENV, OUTPUT_ENV, PARENT_PID_ENV};
use super::sync::is_nested_invocation;

/// Ordered `key=value` pairs.
pub type KeyValues = IndexMap<String, String>;

/// Errors raised while running a step.
#[derive(Debug, Error)]
pub enum StepError {
    /// The command exited with a non-zero status.
    #[error("command `{command}` exited with status {code}")]
    Failed { command: String, code: i32 },

    /// The command was terminated by a signal.
    #[error("command `{command}` was terminated by a signal")]
    Signalled { command: String },

    /// The user interrupted the run.
    #[error("command `{command}` was interrupted")]
    Cancelled { command: String },

    /// The shell could not be started.
    #[error("failed to start `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Scratch file handling failed.
    #[error("scratch file error: {0}")]
    Io(#[from] std::io::Error),
}

/// Options for a single step.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Working directory (defaults to the current one).
    pub cwd: Option<PathBuf>,

    /// Complete environment for the child. `None` inherits the process environment.
    pub environment: Option<BTreeMap<String, String>>,
}

impl ExecOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    #[must_use]
    pub fn environment(mut self, environment: BTreeMap<String, String>) -> Self {
        self.environment = Some(environment);
        self
    }
}

/// What a successful step produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOutcome {
    /// Result pairs, stdout first, overlaid by the output file.
    pub result: KeyValues,

    /// Environment changes requested by the step.
    pub environment: KeyValues,
}

/// Something that can run a shell step.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, command: &str, options: &ExecOptions)
        -> Result<StepOutcome, StepError>;
}

static SCRATCH_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Where stdout lines of a step are echoed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Echo {
    Stdout,
    Stderr,
    Off,
}

impl Echo {
    /// Stdout, or stderr when this process was started by a cpm step.
    pub fn current() -> Self {
        if is_nested_invocation() {
            Self::Stderr
        } else {
            Self::Stdout
        }
    }

    fn line(self, line: &str) {
        match self {
            Self::Stdout => println!("{line}"),
            Self::Stderr => eprintln!("{line}"),
            Self::Off => {}
        }
    }
}

/// Runs steps through the platform shell.
///
/// Owns two scratch files that are truncated before every step and removed
/// when the executor is dropped.
#[derive(Debug)]
pub struct ShellExecutor {
    output_file: PathBuf,
    environment_file: PathBuf,
    echo: Echo,
    cancel: Option<Arc<Notify>>,
}

impl ShellExecutor {
    /// Create an executor whose scratch files live in `scratch_dir`.
    pub fn new(scratch_dir: &Path) -> Self {
        let pid = std::process::id();
        let seq = SCRATCH_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self {
            output_file: scratch_dir.join(format!("_output.{pid}.{seq}.txt")),
            environment_file: scratch_dir.join(format!("_environment.{pid}.{seq}.txt")),
            echo: Echo::current(),
            cancel: None,
        }
    }

    /// Where stdout lines are echoed.
    #[must_use]
    pub fn echo(mut self, echo: Echo) -> Self {
        self.echo = echo;
        self
    }

    /// Cancel a running step when `notify` fires, as Ctrl-C does.
    #[must_use]
    pub fn cancel_on(mut self, notify: Arc<Notify>) -> Self {
        self.cancel = Some(notify);
        self
    }

    pub fn output_file(&self) -> &Path {
        &self.output_file
    }

    pub fn environment_file(&self) -> &Path {
        &self.environment_file
    }

    async fn reset_scratch(&self) -> std::io::Result<()> {
        if let Some(parent) = self.output_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.output_file, b"").await?;
        tokio::fs::write(&self.environment_file, b"").await?;
        Ok(())
    }
}

impl Drop for ShellExecutor {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.output_file);
        let _ = std::fs::remove_file(&self.environment_file);
    }
}

#[async_trait]
impl StepExecutor for ShellExecutor {
    async fn execute(
        &self,
        command: &str,
        options: &ExecOptions,
    ) -> Result<StepOutcome, StepError> {
        self.reset_scratch().await?;

        let (shell, shell_arg) = get_shell();
        let mut cmd = ProcessCommand::new(shell);
        cmd.arg(shell_arg).arg(command);

        if let Some(ref dir) = options.cwd {
            cmd.current_dir(dir);
        }

        let environment = match &options.environment {
            Some(environment) => environment.clone(),
            None => std::env::vars().collect(),
        };
        cmd.env_clear()
            .envs(&environment)
            .env(OUTPUT_ENV, &self.output_file)
            .env(ENVIRONMENT_ENV, &self.environment_file)
            .env(PARENT_PID_ENV, std::process::id().to_string());

        cmd.stdin(Stdio::inherit()).stderr(Stdio::inherit()).stdout(Stdio::piped());
        cmd.kill_on_drop(true);

        tracing::debug!(command, "Spawning step");
        let mut child = cmd
            .spawn()
            .map_err(|source| StepError::Spawn { command: command.to_string(), source })?;

        let stdout = child.stdout.take();
        let echo = self.echo;
        let collect_stdout = async move {
            let mut pairs = KeyValues::new();
            let Some(stdout) = stdout else {
                return pairs;
            };
            let mut reader = BufReader::new(stdout);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buf);
                        let line = line.trim_end_matches(['\n', '\r']);
                        echo.line(line);
                        if let Some((key, value)) = parse_line(line) {
                            pairs.insert(key, value);
                        }
                    }
                    Err(e) => {
                        // Keep draining so the child never writes to a closed pipe.
                        tracing::debug!(error = %e, "Failed to read step stdout");
                        let _ = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await;
                        break;
                    }
                }
            }
            pairs
        };

        let finished = {
            let run = async { tokio::join!(child.wait(), collect_stdout) };
            tokio::select! {
                done = run => Some(done),
                () = interrupted() => None,
                () = cancelled(self.cancel.as_deref()) => None,
            }
        };

        let Some((status, stdout_pairs)) = finished else {
            let _ = child.kill().await;
            tracing::warn!(command, "Step interrupted");
            return Err(StepError::Cancelled { command: command.to_string() });
        };

        let status = status?;
        if !status.success() {
            return Err(match status.code() {
                Some(code) => StepError::Failed { command: command.to_string(), code },
                None => StepError::Signalled { command: command.to_string() },
            });
        }

        let mut result = stdout_pairs;
        result.extend(read_key_values(&self.output_file).await?);
        let environment = read_key_values(&self.environment_file).await?;

        Ok(StepOutcome { result, environment })
    }
}

/// Resolves when the user presses Ctrl-C. Never resolves if the handler
/// cannot be installed.
async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn cancelled(notify: Option<&Notify>) {
    match notify {
        Some(notify) => notify.notified().await,
        None => std::future::pending::<()>().await,
    }
}

async fn read_key_values(path: &Path) -> std::io::Result<KeyValues> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(parse_key_values(&content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(KeyValues::new()),
        Err(e) => Err(e),
    }
}

/// Parse `key=value` lines. The value is everything after the first `=`;
/// lines without a key are ignored and later keys win.
pub fn parse_key_values(content: &str) -> KeyValues {
    content.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<(String, String)> {
    let line = line.trim_end_matches('\r');
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return None;
    }
    Some((key.to_string(), value.to_string()))
}

/// Get the shell to use for command execution.
fn get_shell() -> (&'static str, &'static str) {
    if cfg!(target_os = "windows") {
        ("cmd", "/C")
    } else {
        ("sh", "-c")
    }
}
