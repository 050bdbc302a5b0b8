//! The plan → execute → verify → reflect loop.

use crate::executor::ExecutorAgent;
use crate::planner::{Plan, PlannerAgent};
use crate::verifier::VerifierAgent;
use genagent_core::config::{Config, PlanMode};
use genagent_core::error::{Error, Result};
use genagent_core::memory::{embed_text, CharCodeEmbedder, MemoryRecord, SceneMemory};
use genagent_core::{LlmProvider, RunOutcome, SceneRunner, UsageTracker, Verification};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Nearest earlier records consulted before the first plan
const SIMILAR_RECORDS: usize = 3;

#[derive(Debug, Clone, Serialize)]
pub struct IterationReport {
    pub iteration: usize,
    pub reasoning: String,
    pub script: String,
    /// Repairs needed before the script rendered
    pub fix_attempts: usize,
    pub image: PathBuf,
    pub verification: Verification,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub task: String,
    pub iterations: Vec<IterationReport>,
    pub best_score: Option<u8>,
    pub passed: bool,
    pub final_script: String,
    pub final_image: Option<PathBuf>,
    pub usage: UsageTracker,
}

impl PipelineReport {
    /// The attempt the final script and image come from
    pub fn best(&self) -> Option<&IterationReport> {
        self.iterations
            .iter()
            .find(|it| Some(it.image.as_path()) == self.final_image.as_deref())
    }
}

/// Progress notifications for interactive front ends
#[derive(Debug)]
pub enum PipelineEvent<'a> {
    /// Streamed planner text
    PlanDelta(&'a str),
    Planned { iteration: usize, plan: &'a Plan },
    ScriptFailed { iteration: usize, attempt: usize, error: &'a str },
    Rendered { iteration: usize, image: &'a Path },
    Verified { iteration: usize, verification: &'a Verification },
    Reflection(&'a str),
}

type EventHandler = Box<dyn Fn(&PipelineEvent<'_>) + Send + Sync>;

pub struct Pipeline<P, R> {
    provider: P,
    runner: R,
    config: Config,
    memory: SceneMemory,
    streaming: bool,
    on_event: Option<EventHandler>,
}

impl<P: LlmProvider, R: SceneRunner> Pipeline<P, R> {
    pub fn new(provider: P, runner: R, config: Config, memory: SceneMemory) -> Self {
        Self {
            provider,
            runner,
            config,
            memory,
            streaming: false,
            on_event: None,
        }
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn with_event_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&PipelineEvent<'_>) + Send + Sync + 'static,
    {
        self.on_event = Some(Box::new(handler));
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn memory(&self) -> &SceneMemory {
        &self.memory
    }

    pub fn into_memory(self) -> SceneMemory {
        self.memory
    }

    fn emit(&self, event: PipelineEvent<'_>) {
        if let Some(handler) = &self.on_event {
            handler(&event);
        }
    }

    /// Embedding for memory records; falls back to the built-in embedder
    /// when the provider cannot embed.
    async fn embed(&self, task: &str) -> Vec<f32> {
        let model = &self.config.memory.embedding_model;
        match embed_text(&self.provider, model, task).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, model = %model, "embedding failed, using char-code");
                CharCodeEmbedder::default().embed(task)
            }
        }
    }

    pub async fn run(&mut self, task: &str) -> Result<PipelineReport> {
        let pass_score = self.config.pipeline.pass_score;
        let max_iterations = self.config.pipeline.max_iterations.max(1);
        let mode = self.config.pipeline.mode;

        let embedding = self.embed(task).await;
        // Lessons from similar earlier requests guide the first plan
        let mut reflection = self.memory.similar_lessons(&embedding, SIMILAR_RECORDS, pass_score);
        tracing::info!(
            task,
            mode = ?mode,
            runner = self.runner.name(),
            lessons = !reflection.is_empty(),
            "starting scene pipeline"
        );

        let mut planner = PlannerAgent::new(&self.provider, &self.config);
        let mut verifier = VerifierAgent::new(&self.provider, &self.config);
        let executor = ExecutorAgent::new(&self.runner, &self.config);

        let mut iterations: Vec<IterationReport> = Vec::new();
        let mut best: Option<usize> = None;

        for iteration in 1..=max_iterations {
            let hint = Some(reflection.as_str()).filter(|r| !r.is_empty());
            let previous = iterations.last();

            let plan = match previous {
                Some(last) if mode == PlanMode::Script => {
                    let script = planner
                        .optimize(task, &last.script, &last.verification.analysis, hint)
                        .await?;
                    Plan {
                        reasoning: format!("revised from iteration {}", last.iteration),
                        script,
                        scene_plan: None,
                    }
                }
                _ if self.streaming => {
                    planner
                        .plan_streaming(task, hint, |delta| self.emit(PipelineEvent::PlanDelta(delta)))
                        .await?
                }
                _ => planner.plan(task, hint).await?,
            };
            self.emit(PipelineEvent::Planned { iteration, plan: &plan });

            let mut record = MemoryRecord::new(task)
                .with_reasoning(plan.reasoning.clone())
                .with_script(plan.script.clone())
                .with_embedding(embedding.clone());
            if let Some(scene_plan) = &plan.scene_plan {
                record = record.with_plan(scene_plan.clone());
            }
            self.memory.add(record).await?;

            // Repair until the script renders
            let mut script = plan.script.clone();
            let mut fix_attempts = 0;
            let image = loop {
                match executor.execute(&script, iteration).await? {
                    RunOutcome::Rendered(image) => break image,
                    RunOutcome::ScriptError(error) => {
                        if fix_attempts >= self.config.pipeline.max_fix_attempts {
                            return Err(Error::script_failed(error)
                                .with_operation("Pipeline::run")
                                .with_context("attempts", fix_attempts.to_string())
                                .with_context("iteration", iteration.to_string()));
                        }
                        fix_attempts += 1;
                        self.emit(PipelineEvent::ScriptFailed {
                            iteration,
                            attempt: fix_attempts,
                            error: &error,
                        });

                        script = planner.fix_script(&script, &error).await?;
                        self.memory
                            .add(
                                MemoryRecord::new(task)
                                    .with_reasoning(format!(
                                        "fix attempt {}: {}",
                                        fix_attempts,
                                        error.lines().last().unwrap_or_default()
                                    ))
                                    .with_script(script.clone())
                                    .with_embedding(embedding.clone()),
                            )
                            .await?;
                    }
                }
            };
            self.emit(PipelineEvent::Rendered { iteration, image: &image });

            let verification = verifier.verify(&image, task).await?;
            self.emit(PipelineEvent::Verified { iteration, verification: &verification });
            self.memory
                .add(
                    MemoryRecord::new(task)
                        .with_reasoning(plan.reasoning.clone())
                        .with_script(script.clone())
                        .with_verification(verification.clone())
                        .with_embedding(embedding.clone()),
                )
                .await?;

            let passed = verification.passed(pass_score);
            let score = verification.score;
            iterations.push(IterationReport {
                iteration,
                reasoning: plan.reasoning,
                script,
                fix_attempts,
                image,
                verification,
            });

            let improved = match best {
                Some(i) => score > iterations[i].verification.score,
                None => true,
            };
            if improved {
                best = Some(iterations.len() - 1);
            }

            if passed {
                tracing::info!(iteration, score = ?score, "scene passed verification");
                break;
            }

            reflection = self.memory.reflect(pass_score);
            if !reflection.is_empty() {
                self.emit(PipelineEvent::Reflection(&reflection));
            }
        }

        let mut usage = planner.usage().clone();
        usage.merge(verifier.usage());

        let best = best
            .and_then(|i| iterations.get(i))
            .ok_or_else(|| Error::unexpected("pipeline finished without an attempt"))?;
        let best_score = best.verification.score;
        let passed = best.verification.passed(pass_score);
        let final_script = best.script.clone();
        let final_image = Some(best.image.clone());

        let report = PipelineReport {
            task: task.to_string(),
            iterations,
            best_score,
            passed,
            final_script,
            final_image,
            usage,
        };

        if !report.passed {
            tracing::warn!(
                iterations = report.iterations.len(),
                best_score = ?report.best_score,
                "iteration budget exhausted"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeRunner, ScriptedProvider, Step};
    use genagent_core::config::MemoryConfig;
    use genagent_core::ErrorKind;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    const PLAN: &str = "Reasoning:\nA sofa.\nBlender script:\n```python\nimport bpy  # v1\n```";

    async fn setup(dir: &Path) -> (Config, SceneMemory) {
        let mut config = Config::default();
        config.render.output_path = dir.join("renders");
        config.render.script_path = dir.join("gen_scene.py");
        config.memory = MemoryConfig {
            path: dir.join("memory"),
            ..Default::default()
        };
        let memory = SceneMemory::open(&config.memory).await.unwrap();
        (config, memory)
    }

    #[tokio::test]
    async fn test_passes_first_iteration() {
        let dir = TempDir::new().unwrap();
        let (config, memory) = setup(dir.path()).await;
        let provider = ScriptedProvider::new([PLAN, "Match score: 90\nSuggestions: none"]);
        let runner = FakeRunner::new(vec![Step::Render]);

        let mut pipeline = Pipeline::new(provider, runner, config, memory);
        let report = pipeline.run("a sofa").await.unwrap();

        assert!(report.passed);
        assert_eq!(report.best_score, Some(90));
        assert_eq!(report.iterations.len(), 1);
        assert_eq!(report.final_script, "import bpy  # v1");
        assert!(report.final_image.as_ref().unwrap().ends_with("scene_1.png"));
        assert_eq!(report.best().map(|b| b.iteration), Some(1));
        assert_eq!(report.usage.total_calls, 2);

        // plan + verification
        assert_eq!(pipeline.memory().len(), 2);
        assert_eq!(pipeline.memory().records()[1].score(), Some(90));
    }

    #[tokio::test]
    async fn test_fix_loop_repairs_script() {
        let dir = TempDir::new().unwrap();
        let (config, memory) = setup(dir.path()).await;
        let provider = ScriptedProvider::new([
            PLAN,
            "```python\nimport bpy  # fixed\n```",
            "Match score: 88",
        ]);
        let runner = FakeRunner::new(vec![Step::Fail("Traceback\nNameError: x"), Step::Render]);

        let events = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&events);
        let mut pipeline = Pipeline::new(provider, runner, config, memory).with_event_handler(move |event| {
            if let PipelineEvent::ScriptFailed { attempt, .. } = event {
                seen.lock().unwrap().push(*attempt);
            }
        });
        let report = pipeline.run("a sofa").await.unwrap();

        assert!(report.passed);
        assert_eq!(report.iterations[0].fix_attempts, 1);
        assert_eq!(report.final_script, "import bpy  # fixed");
        assert_eq!(*events.lock().unwrap(), vec![1]);

        // plan + fix + verification
        let records = pipeline.memory().records();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].reasoning, "fix attempt 1: NameError: x");
    }

    #[tokio::test]
    async fn test_fix_loop_exhaustion_is_error() {
        let dir = TempDir::new().unwrap();
        let (mut config, memory) = setup(dir.path()).await;
        config.pipeline.max_fix_attempts = 1;
        let provider = ScriptedProvider::new([PLAN, "```python\nimport bpy  # still bad\n```"]);
        let runner = FakeRunner::new(vec![Step::Fail("Error: one"), Step::Fail("Error: two")]);

        let mut pipeline = Pipeline::new(provider, runner, config, memory);
        let err = pipeline.run("a sofa").await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ScriptFailed);
        assert_eq!(err.context_value("attempts"), Some("1"));
        assert_eq!(err.context_value("iteration"), Some("1"));
    }

    #[tokio::test]
    async fn test_budget_exhausted_returns_best() {
        let dir = TempDir::new().unwrap();
        let (mut config, memory) = setup(dir.path()).await;
        config.pipeline.max_iterations = 3;
        let provider = ScriptedProvider::new([
            PLAN,
            "Match score: 40\nSuggestions: add a lamp",
            "```python\nimport bpy  # v2\n```",
            "Match score: 70\nSuggestions: brighter light",
            "```python\nimport bpy  # v3\n```",
            "no score at all",
        ]);
        let runner = FakeRunner::new(vec![]);

        let mut pipeline = Pipeline::new(provider, runner, config, memory);
        let report = pipeline.run("a sofa and a lamp").await.unwrap();

        assert!(!report.passed);
        assert_eq!(report.iterations.len(), 3);
        assert_eq!(report.best_score, Some(70));
        assert_eq!(report.final_script, "import bpy  # v2");
        assert!(report.final_image.as_ref().unwrap().ends_with("scene_2.png"));
        assert_eq!(report.iterations[1].reasoning, "revised from iteration 1");
        assert_eq!(report.usage.total_calls, 6);
    }

    #[tokio::test]
    async fn test_reflection_feeds_next_prompt() {
        let dir = TempDir::new().unwrap();
        let (mut config, memory) = setup(dir.path()).await;
        config.pipeline.max_iterations = 2;
        config.pipeline.mode = PlanMode::Structured;
        let provider = Arc::new(ScriptedProvider::new([
            r#"{"objects": [{"type": "sofa"}], "style": "modern"}"#,
            "Match score: 30\nSuggestions: the sofa is floating",
            r#"{"objects": [{"type": "sofa"}, {"type": "lamp"}]}"#,
            "Match score: 95",
        ]));
        let runner = FakeRunner::new(vec![]);

        let mut pipeline = Pipeline::new(SharedProvider(Arc::clone(&provider)), runner, config, memory);
        let report = pipeline.run("a sofa").await.unwrap();

        assert!(report.passed);
        assert_eq!(report.iterations.len(), 2);
        assert!(provider.prompt(2).contains("- score 30: the sofa is floating"));

        let patterns = pipeline.memory().analyze_patterns();
        assert_eq!(patterns.common_objects[0], ("sofa".to_string(), 2));
    }

    #[tokio::test]
    async fn test_similar_request_lessons_seed_first_plan() {
        let dir = TempDir::new().unwrap();
        let (config, mut memory) = setup(dir.path()).await;
        let earlier = Verification {
            score: Some(20),
            suggestions: "the sofa faces the wall".to_string(),
            ..Default::default()
        };
        memory
            .add(
                MemoryRecord::new("a sofa")
                    .with_verification(earlier)
                    .with_embedding(CharCodeEmbedder::default().embed("a sofa")),
            )
            .await
            .unwrap();
        let provider = Arc::new(ScriptedProvider::new([PLAN, "Match score: 90"]));
        let runner = FakeRunner::new(vec![]);

        let mut pipeline = Pipeline::new(SharedProvider(Arc::clone(&provider)), runner, config, memory);
        pipeline.run("a sofa").await.unwrap();

        assert!(provider.prompt(0).contains("- score 20: the sofa faces the wall"));
    }

    #[tokio::test]
    async fn test_streaming_plan_emits_deltas() {
        let dir = TempDir::new().unwrap();
        let (config, memory) = setup(dir.path()).await;
        let provider = ScriptedProvider::new([PLAN, "Match score: 99"]);
        let runner = FakeRunner::new(vec![]);

        let streamed = Arc::new(Mutex::new(String::new()));
        let sink = Arc::clone(&streamed);
        let mut pipeline = Pipeline::new(provider, runner, config, memory)
            .with_streaming(true)
            .with_event_handler(move |event| {
                if let PipelineEvent::PlanDelta(delta) = event {
                    sink.lock().unwrap().push_str(delta);
                }
            });
        pipeline.run("a sofa").await.unwrap();

        assert_eq!(*streamed.lock().unwrap(), PLAN);
    }

    /// Lets a test keep a handle on the provider the pipeline owns
    struct SharedProvider(Arc<ScriptedProvider>);

    impl LlmProvider for SharedProvider {
        fn name(&self) -> &str {
            self.0.name()
        }

        fn models(&self) -> Vec<String> {
            self.0.models()
        }

        fn default_model(&self) -> &str {
            self.0.default_model()
        }

        async fn complete(
            &self,
            request: genagent_core::CompletionRequest,
        ) -> std::result::Result<genagent_core::CompletionResponse, genagent_core::ProviderError> {
            self.0.complete(request).await
        }

        async fn stream(
            &self,
            request: genagent_core::CompletionRequest,
        ) -> std::result::Result<genagent_core::StreamReceiver, genagent_core::ProviderError> {
            self.0.stream(request).await
        }
    }
}
