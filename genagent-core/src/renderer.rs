//! # Scene runners
//!
//! A `SceneRunner` takes a script on disk and reports either the rendered
//! image or the Python error text, which feeds the script repair loop.
//!
//! - `BlenderRunner` runs Blender headless as a child process.
//! - `ManualRunner` asks the user to run the script and report back.

use crate::config::RenderConfig;
use crate::error::{Error, ErrorKind, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Lines of output kept when reporting a failure
const TAIL_LINES: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Rendered(PathBuf),
    /// Python error text for the repair loop
    ScriptError(String),
}

#[allow(async_fn_in_trait)]
pub trait SceneRunner {
    fn name(&self) -> &str;

    /// True when the runner renders on its own and needs the render epilogue
    fn headless(&self) -> bool;

    async fn run(&self, script_path: &Path, output_path: &Path) -> Result<RunOutcome>;
}

// ============================================================================
// Blender subprocess
// ============================================================================

#[derive(Debug, Clone)]
pub struct BlenderRunner {
    program: PathBuf,
    /// Arguments placed before Blender's own (e.g. a wrapper script)
    launcher_args: Vec<String>,
    timeout: Duration,
}

impl BlenderRunner {
    pub fn new(program: impl Into<PathBuf>, timeout_secs: u64) -> Self {
        Self {
            program: program.into(),
            launcher_args: Vec::new(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// `None` when no Blender executable is configured
    pub fn from_config(render: &RenderConfig) -> Option<Self> {
        render
            .blender_path
            .as_ref()
            .map(|path| Self::new(path.clone(), render.timeout_secs))
    }

    pub fn with_launcher_args(mut self, args: Vec<String>) -> Self {
        self.launcher_args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self, script_path: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.launcher_args)
            .arg("--background")
            .arg("--factory-startup")
            .arg("--python-exit-code")
            .arg("1")
            .arg("--python")
            .arg(script_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl SceneRunner for BlenderRunner {
    fn name(&self) -> &str {
        "blender"
    }

    fn headless(&self) -> bool {
        true
    }

    async fn run(&self, script_path: &Path, output_path: &Path) -> Result<RunOutcome> {
        tracing::info!(
            blender = %self.program.display(),
            script = %script_path.display(),
            "running blender"
        );
        remove_stale(output_path).await?;

        let child = self.command(script_path).spawn().map_err(|e| {
            let kind = match e.kind() {
                std::io::ErrorKind::NotFound => ErrorKind::FileNotFound,
                std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
                _ => ErrorKind::RenderFailed,
            };
            Error::new(kind, format!("failed to start blender: {}", e))
                .with_operation("BlenderRunner::run")
                .with_context("program", self.program.display().to_string())
                .set_source(e)
        })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| {
                Error::render_failed(format!("failed to collect blender output: {}", e))
                    .with_operation("BlenderRunner::run")
                    .set_source(e)
            })?,
            Err(_) => {
                tracing::warn!(secs = self.timeout.as_secs(), "blender timed out");
                return Err(Error::render_timeout(self.timeout.as_secs())
                    .with_operation("BlenderRunner::run")
                    .with_context("script", script_path.display().to_string()));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if let Some(trace) = script_error(&stderr).or_else(|| script_error(&stdout)) {
            tracing::warn!(status = ?output.status.code(), "script raised an error");
            return Ok(RunOutcome::ScriptError(trace));
        }
        if !output.status.success() {
            let text = if stderr.trim().is_empty() { &stdout } else { &stderr };
            return Ok(RunOutcome::ScriptError(format!(
                "blender exited with {}\n{}",
                output.status,
                tail(text, TAIL_LINES)
            )));
        }
        if !output_path.exists() {
            return Err(Error::render_failed("blender finished without writing the image")
                .with_operation("BlenderRunner::run")
                .with_context("output", output_path.display().to_string())
                .with_context("stdout_tail", tail(&stdout, 10)));
        }

        tracing::info!(image = %output_path.display(), "render complete");
        Ok(RunOutcome::Rendered(output_path.to_path_buf()))
    }
}

/// Delete an image left by an earlier run so a script that renders nothing
/// cannot pass it off as its own.
pub async fn remove_stale(output_path: &Path) -> Result<()> {
    match tokio::fs::remove_file(output_path).await {
        Ok(()) => {
            tracing::debug!(image = %output_path.display(), "removed stale render");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::new(ErrorKind::IoFailed, format!("cannot remove stale render: {}", e))
            .with_operation("renderer::remove_stale")
            .with_context("output", output_path.display().to_string())
            .set_source(e)),
    }
}

/// Python traceback or Blender `Error:` lines in `text`
pub fn script_error(text: &str) -> Option<String> {
    if let Some(start) = text.find("Traceback (most recent call last)") {
        let trace: Vec<&str> = text[start..].lines().take(TAIL_LINES).collect();
        return Some(trace.join("\n"));
    }
    let errors: Vec<&str> = text
        .lines()
        .filter(|line| line.trim_start().starts_with("Error:"))
        .collect();
    if errors.is_empty() {
        None
    } else {
        Some(errors.join("\n"))
    }
}

fn tail(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}

// ============================================================================
// Interactive
// ============================================================================

/// The user runs the script in Blender and reports the result.
#[derive(Debug, Clone)]
pub struct ManualRunner {
    max_path_attempts: usize,
}

impl Default for ManualRunner {
    fn default() -> Self {
        Self { max_path_attempts: 3 }
    }
}

impl ManualRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn prompt(script_path: PathBuf, max_attempts: usize) -> Result<RunOutcome> {
        use dialoguer::Input;

        println!("Scene script saved to {}; run it in Blender.", script_path.display());

        let error: String = Input::new()
            .with_prompt("Paste the Blender error (press Enter if it ran cleanly)")
            .allow_empty(true)
            .interact_text()
            .map_err(prompt_error)?;
        if !error.trim().is_empty() {
            return Ok(RunOutcome::ScriptError(error.trim().to_string()));
        }

        for attempt in 1..=max_attempts {
            let raw: String = Input::new()
                .with_prompt("Path of the rendered image")
                .interact_text()
                .map_err(prompt_error)?;
            let path = PathBuf::from(strip_quotes(&raw));
            if path.is_file() {
                return Ok(RunOutcome::Rendered(path));
            }
            println!("No file at {} ({}/{})", path.display(), attempt, max_attempts);
        }

        Err(Error::new(ErrorKind::ImageUnreadable, "no rendered image supplied")
            .with_operation("ManualRunner::run")
            .with_context("attempts", max_attempts.to_string()))
    }
}

fn prompt_error(e: dialoguer::Error) -> Error {
    Error::new(ErrorKind::IoFailed, format!("failed to read user input: {}", e)).set_source(e)
}

/// Trim whitespace and one pair of surrounding quotes
pub fn strip_quotes(raw: &str) -> &str {
    let s = raw.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = s.strip_prefix(quote).and_then(|r| r.strip_suffix(quote)) {
            return inner.trim();
        }
    }
    s
}

impl SceneRunner for ManualRunner {
    fn name(&self) -> &str {
        "manual"
    }

    fn headless(&self) -> bool {
        false
    }

    async fn run(&self, script_path: &Path, _output_path: &Path) -> Result<RunOutcome> {
        let script_path = script_path.to_path_buf();
        let attempts = self.max_path_attempts;
        tokio::task::spawn_blocking(move || Self::prompt(script_path, attempts))
            .await
            .map_err(|e| Error::unexpected(format!("prompt task failed: {}", e)).set_source(e))?
    }
}
