//! Planner: turns a request into a Blender script, repairs failing scripts
//! and rewrites scripts from verifier feedback.

use crate::agent;
use crate::prompts;
use genagent_core::config::{AgentRole, Config, PlanMode};
use genagent_core::response::{extract_code_block, split_reasoning_and_script};
use genagent_core::script::{compile_plan, fallback_template};
use genagent_core::{ChatMessage, LlmProvider, Result, ScenePlan, UsageTracker};
use std::path::PathBuf;

/// One planning result
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub reasoning: String,
    pub script: String,
    /// Present when the script was compiled from a structured plan
    pub scene_plan: Option<ScenePlan>,
}

pub struct PlannerAgent<'a, P> {
    provider: &'a P,
    config: &'a Config,
    mode: PlanMode,
    usage: UsageTracker,
}

impl<'a, P: LlmProvider> PlannerAgent<'a, P> {
    pub fn new(provider: &'a P, config: &'a Config) -> Self {
        Self {
            provider,
            config,
            mode: config.pipeline.mode,
            usage: UsageTracker::new(),
        }
    }

    pub fn with_mode(mut self, mode: PlanMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> PlanMode {
        self.mode
    }

    pub fn usage(&self) -> &UsageTracker {
        &self.usage
    }

    fn messages(&self, task: &str, reflection: Option<&str>) -> Vec<ChatMessage> {
        let prompt = match self.mode {
            PlanMode::Script => prompts::script_plan(task, reflection),
            PlanMode::Structured => prompts::structured_plan(task, reflection),
        };
        vec![ChatMessage::system(prompts::PLANNER_SYSTEM), ChatMessage::user(prompt)]
    }

    /// Render target baked into compiled scripts; headless runs override it.
    fn default_output(&self) -> PathBuf {
        let render = &self.config.render;
        render
            .output_path
            .join(format!("scene.{}", render.output_format.extension()))
    }

    pub async fn plan(&mut self, task: &str, reflection: Option<&str>) -> Result<Plan> {
        let messages = self.messages(task, reflection);
        let answer = agent::complete(
            self.provider,
            self.config.role(AgentRole::Planner),
            messages,
            &mut self.usage,
            "PlannerAgent::plan",
        )
        .await?;
        Ok(self.interpret(task, &answer))
    }

    /// Like [`plan`](Self::plan), handing each text delta to `on_text`.
    pub async fn plan_streaming<F>(&mut self, task: &str, reflection: Option<&str>, on_text: F) -> Result<Plan>
    where
        F: FnMut(&str),
    {
        let messages = self.messages(task, reflection);
        let answer = agent::complete_streaming(
            self.provider,
            self.config.role(AgentRole::Planner),
            messages,
            &mut self.usage,
            "PlannerAgent::plan_streaming",
            on_text,
        )
        .await?;
        Ok(self.interpret(task, &answer))
    }

    fn interpret(&self, task: &str, answer: &str) -> Plan {
        match self.mode {
            PlanMode::Script => {
                let (reasoning, script) = split_reasoning_and_script(answer);
                tracing::info!(reasoning_chars = reasoning.len(), script_chars = script.len(), "planned script");
                Plan {
                    reasoning,
                    script,
                    scene_plan: None,
                }
            }
            PlanMode::Structured => self.compile(task, answer),
        }
    }

    fn compile(&self, task: &str, answer: &str) -> Plan {
        let output = self.default_output();
        let compiled = ScenePlan::from_model_output(answer)
            .and_then(|plan| compile_plan(&plan, self.config, &output).map(|script| (plan, script)));

        match compiled {
            Ok((plan, script)) => {
                tracing::info!(objects = plan.objects.len(), "compiled structured plan");
                Plan {
                    reasoning: describe(&plan),
                    script,
                    scene_plan: Some(plan),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "unusable scene plan, using fallback template");
                Plan {
                    reasoning: format!("fallback template: {}", e.message()),
                    script: fallback_template(task, self.config, &output),
                    scene_plan: None,
                }
            }
        }
    }

    /// Ask for a repaired script given Blender's error text.
    pub async fn fix_script(&mut self, script: &str, error: &str) -> Result<String> {
        let messages = vec![
            ChatMessage::system(prompts::PLANNER_SYSTEM),
            ChatMessage::user(prompts::fix_script(script, error)),
        ];
        let answer = agent::complete(
            self.provider,
            self.config.role(AgentRole::Executor),
            messages,
            &mut self.usage,
            "PlannerAgent::fix_script",
        )
        .await?;
        Ok(extract_code_block(&answer, "python"))
    }

    /// Rewrite `last_script` from the verifier's analysis.
    pub async fn optimize(
        &mut self,
        task: &str,
        last_script: &str,
        analysis: &str,
        reflection: Option<&str>,
    ) -> Result<String> {
        let messages = vec![
            ChatMessage::system(prompts::PLANNER_SYSTEM),
            ChatMessage::user(prompts::optimize(task, last_script, analysis, reflection)),
        ];
        let answer = agent::complete(
            self.provider,
            self.config.role(AgentRole::Planner),
            messages,
            &mut self.usage,
            "PlannerAgent::optimize",
        )
        .await?;
        Ok(extract_code_block(&answer, "python"))
    }
}

/// Short human summary of a structured plan
fn describe(plan: &ScenePlan) -> String {
    let kinds: Vec<&str> = plan.objects.iter().map(|o| o.kind.as_str()).collect();
    let mut out = format!("{} objects: {}", kinds.len(), kinds.join(", "));
    if let Some(style) = plan.style.as_deref().filter(|s| !s.is_empty()) {
        out.push_str(&format!("; style {}", style));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProvider;

    const SCRIPT_ANSWER: &str = "Reasoning:\nOne sofa against the wall.\n\
                                 Blender script:\n```python\nimport bpy\nbpy.ops.mesh.primitive_cube_add()\n```\n";

    #[tokio::test]
    async fn test_plan_script_mode() {
        let provider = ScriptedProvider::new([SCRIPT_ANSWER]);
        let config = Config::default();
        let mut planner = PlannerAgent::new(&provider, &config);

        let plan = planner.plan("a sofa", Some("- score 30: sofa missing")).await.unwrap();
        assert_eq!(plan.reasoning, "One sofa against the wall.");
        assert!(plan.script.starts_with("import bpy"));
        assert!(plan.scene_plan.is_none());

        assert!(provider.prompt(0).contains("- score 30: sofa missing"));
        {
            let requests = provider.requests.lock().unwrap();
            assert_eq!(requests[0].model.as_deref(), Some("qwen-plus"));
            assert_eq!(requests[0].temperature, Some(0.7));
        }
        assert_eq!(planner.usage().total_calls, 1);
    }

    #[tokio::test]
    async fn test_plan_structured_mode() {
        let answer = r#"Here you go:
```json
{"objects": [{"type": "sofa", "position": "center"}, {"type": "tv", "position": "back wall"}], "style": "modern"}
```"#;
        let provider = ScriptedProvider::new([answer]);
        let config = Config::default();
        let mut planner = PlannerAgent::new(&provider, &config).with_mode(PlanMode::Structured);

        let plan = planner.plan("living room", None).await.unwrap();
        assert_eq!(plan.reasoning, "2 objects: sofa, tv; style modern");
        assert_eq!(plan.scene_plan.as_ref().map(|p| p.objects.len()), Some(2));
        assert!(plan.script.contains("bpy.ops.render.render(write_still=True)"));
        assert!(provider.prompt(0).contains("Allowed object types"));
    }

    #[tokio::test]
    async fn test_structured_falls_back_to_template() {
        let provider = ScriptedProvider::new([
            r#"{"objects": [{"type": "spaceship"}]}"#,
            "no json here",
        ]);
        let config = Config::default();
        let mut planner = PlannerAgent::new(&provider, &config).with_mode(PlanMode::Structured);

        let unknown = planner.plan("a spaceship", None).await.unwrap();
        assert!(unknown.scene_plan.is_none());
        assert!(unknown.reasoning.starts_with("fallback template"));
        assert!(unknown.script.contains("Fallback scene for: a spaceship"));

        let garbage = planner.plan("anything", None).await.unwrap();
        assert!(garbage.script.contains("CoffeeTable"));
    }

    #[tokio::test]
    async fn test_plan_streaming_reports_deltas() {
        let provider = ScriptedProvider::new([SCRIPT_ANSWER]);
        let config = Config::default();
        let mut planner = PlannerAgent::new(&provider, &config);

        let mut streamed = String::new();
        let plan = planner
            .plan_streaming("a sofa", None, |delta| streamed.push_str(delta))
            .await
            .unwrap();
        assert_eq!(streamed, SCRIPT_ANSWER);
        assert!(plan.script.contains("primitive_cube_add"));
        assert_eq!(planner.usage().total_tokens(), 15);
    }

    #[tokio::test]
    async fn test_fix_and_optimize() {
        let provider = ScriptedProvider::new([
            "```python\nimport bpy  # fixed\n```",
            "Improved:\n```python\nimport bpy  # better\n```",
        ]);
        let config = Config::default();
        let mut planner = PlannerAgent::new(&provider, &config);

        let fixed = planner.fix_script("import bpy\nbad()", "NameError: bad").await.unwrap();
        assert_eq!(fixed, "import bpy  # fixed");
        assert!(provider.prompt(0).contains("NameError: bad"));
        {
            let requests = provider.requests.lock().unwrap();
            assert_eq!(requests[0].temperature, Some(0.2));
        }

        let better = planner
            .optimize("a sofa", "import bpy", "score 50: sofa too small", None)
            .await
            .unwrap();
        assert_eq!(better, "import bpy  # better");
        assert!(provider.prompt(1).contains("sofa too small"));
    }

    #[tokio::test]
    async fn test_empty_answer_is_malformed() {
        let provider = ScriptedProvider::new(["   "]);
        let config = Config::default();
        let mut planner = PlannerAgent::new(&provider, &config);

        let err = planner.plan("a sofa", None).await.unwrap_err();
        assert_eq!(err.kind(), genagent_core::ErrorKind::ResponseMalformed);
    }

    #[tokio::test]
    async fn test_provider_failure_maps_kind() {
        let provider = ScriptedProvider::new(Vec::<String>::new());
        let config = Config::default();
        let mut planner = PlannerAgent::new(&provider, &config);

        let err = planner.plan("a sofa", None).await.unwrap_err();
        assert_eq!(err.kind(), genagent_core::ErrorKind::InferenceFailed);
        assert_eq!(err.context_value("model"), Some("qwen-plus"));
        assert_eq!(err.context_value("attempts"), Some("3"));
        assert_eq!(err.status(), genagent_core::ErrorStatus::Persistent);
        assert_eq!(provider.calls(), 3);
    }
}
