//! Executor: writes scene scripts to disk and runs them through a
//! [`SceneRunner`].

use genagent_core::config::Config;
use genagent_core::error::{Error, ErrorKind, Result};
use genagent_core::renderer::remove_stale;
use genagent_core::script::with_render_epilogue;
use genagent_core::{RunOutcome, SceneRunner};
use std::path::{Path, PathBuf};

pub struct ExecutorAgent<'a, R> {
    runner: &'a R,
    config: &'a Config,
}

impl<'a, R: SceneRunner> ExecutorAgent<'a, R> {
    pub fn new(runner: &'a R, config: &'a Config) -> Self {
        Self { runner, config }
    }

    pub fn runner(&self) -> &R {
        self.runner
    }

    /// `<output_path>/scene_<iteration>.<ext>`
    pub fn output_path(&self, iteration: usize) -> PathBuf {
        let render = &self.config.render;
        render
            .output_path
            .join(format!("scene_{}.{}", iteration, render.output_format.extension()))
    }

    /// Write `script` to the configured script path.
    pub async fn save_script(&self, script: &str) -> Result<PathBuf> {
        let path = self.config.render.script_path.clone();
        ensure_parent(&path).await?;
        tokio::fs::write(&path, script).await.map_err(|e| {
            Error::new(ErrorKind::IoFailed, format!("failed to write scene script: {}", e))
                .with_operation("ExecutorAgent::save_script")
                .with_context("path", path.display().to_string())
                .set_source(e)
        })?;
        tracing::debug!(path = %path.display(), bytes = script.len(), "saved scene script");
        Ok(path)
    }

    /// Save and run `script`. Headless runners get the render epilogue so the
    /// image lands at [`output_path`](Self::output_path).
    pub async fn execute(&self, script: &str, iteration: usize) -> Result<RunOutcome> {
        let output = absolute(self.output_path(iteration));
        ensure_parent(&output).await?;
        remove_stale(&output).await?;

        let script_path = if self.runner.headless() {
            self.save_script(&with_render_epilogue(script, self.config, &output)).await?
        } else {
            self.save_script(script).await?
        };

        tracing::info!(runner = self.runner.name(), iteration, "executing scene script");
        let outcome = self.runner.run(&script_path, &output).await?;
        match &outcome {
            RunOutcome::Rendered(image) => tracing::info!(image = %image.display(), "scene rendered"),
            RunOutcome::ScriptError(text) => {
                tracing::warn!(error = text.lines().last().unwrap_or_default(), "scene script failed")
            }
        }
        Ok(outcome)
    }
}

fn absolute(path: PathBuf) -> PathBuf {
    std::path::absolute(&path).unwrap_or(path)
}

async fn ensure_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => tokio::fs::create_dir_all(dir).await.map_err(|e| {
            Error::new(ErrorKind::IoFailed, format!("failed to create directory: {}", e))
                .with_context("path", dir.display().to_string())
                .set_source(e)
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeRunner, Step};
    use tempfile::TempDir;

    fn config(dir: &Path) -> Config {
        let mut config = Config::default();
        config.render.output_path = dir.join("renders");
        config.render.script_path = dir.join("scripts").join("gen_scene.py");
        config
    }

    #[tokio::test]
    async fn test_save_script_creates_dirs() {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path());
        let runner = FakeRunner::new(vec![]);
        let executor = ExecutorAgent::new(&runner, &config);

        let path = executor.save_script("import bpy\n").await.unwrap();
        assert_eq!(path, config.render.script_path);
        assert_eq!(std::fs::read_to_string(path).unwrap(), "import bpy\n");
    }

    #[tokio::test]
    async fn test_headless_run_gets_epilogue() {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path());
        let runner = FakeRunner::new(vec![Step::Render]);
        let executor = ExecutorAgent::new(&runner, &config);

        let outcome = executor
            .execute("import bpy\nbpy.ops.render.render(write_still=True)\n", 2)
            .await
            .unwrap();
        let expected = dir.path().join("renders").join("scene_2.png");
        assert_eq!(outcome, RunOutcome::Rendered(expected.clone()));
        assert!(expected.is_file());

        let scripts = runner.scripts.lock().unwrap();
        assert_eq!(scripts.len(), 1);
        assert!(scripts[0].contains("scene_2.png"));
        assert_eq!(scripts[0].matches("bpy.ops.render.render(write_still=True)").count(), 1);
    }

    #[tokio::test]
    async fn test_interactive_run_keeps_script() {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path());
        let runner = FakeRunner::new(vec![Step::Fail("NameError: name 'x' is not defined")]).interactive();
        let executor = ExecutorAgent::new(&runner, &config);

        let outcome = executor.execute("import bpy\nx\n", 1).await.unwrap();
        assert!(matches!(outcome, RunOutcome::ScriptError(ref e) if e.starts_with("NameError")));
        assert_eq!(runner.scripts.lock().unwrap()[0], "import bpy\nx\n");
    }

    #[tokio::test]
    async fn test_stale_render_removed_before_run() {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path());
        let stale = dir.path().join("renders").join("scene_1.png");
        std::fs::create_dir_all(stale.parent().unwrap()).unwrap();
        std::fs::write(&stale, b"previous run").unwrap();

        let runner = FakeRunner::new(vec![Step::Fail("Error: nothing rendered")]);
        let executor = ExecutorAgent::new(&runner, &config);

        let outcome = executor.execute("import bpy\n", 1).await.unwrap();
        assert!(matches!(outcome, RunOutcome::ScriptError(_)));
        assert!(!stale.exists());
    }
}
