//! Scripted provider and runner used by the agent tests.

use genagent_core::provider::ProviderError;
use genagent_core::{
    CompletionRequest, CompletionResponse, FinishReason, LlmProvider, Result, RunOutcome,
    SceneRunner, StreamChunk, StreamReceiver, Usage,
};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const USAGE: Usage = Usage {
    prompt_tokens: 10,
    completion_tokens: 5,
    total_tokens: 15,
};

/// Answers requests from a queue, in call order
#[derive(Default)]
pub struct ScriptedProvider {
    answers: Mutex<VecDeque<String>>,
    pub requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn next_answer(&self, request: CompletionRequest) -> std::result::Result<String, ProviderError> {
        self.requests.lock().unwrap().push(request);
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::Other("no scripted answer left".into()))
    }

    /// Text of the last user message of request `index`
    pub fn prompt(&self, index: usize) -> String {
        let requests = self.requests.lock().unwrap();
        requests[index]
            .messages
            .last()
            .and_then(|m| m.content.clone())
            .unwrap_or_default()
    }

    pub fn images(&self, index: usize) -> usize {
        let requests = self.requests.lock().unwrap();
        requests[index].messages.iter().map(|m| m.images.len()).sum()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn models(&self) -> Vec<String> {
        vec!["scripted".into()]
    }

    fn default_model(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: CompletionRequest) -> std::result::Result<CompletionResponse, ProviderError> {
        let model = request.model.clone().unwrap_or_default();
        let content = self.next_answer(request)?;
        Ok(CompletionResponse {
            id: "scripted".into(),
            model,
            content: Some(content),
            finish_reason: FinishReason::Stop,
            usage: USAGE,
        })
    }

    async fn stream(&self, request: CompletionRequest) -> std::result::Result<StreamReceiver, ProviderError> {
        let content = self.next_answer(request)?;
        let mut chunks: Vec<StreamChunk> = content
            .split_inclusive('\n')
            .map(|line| StreamChunk::Text(line.to_string()))
            .collect();
        chunks.push(StreamChunk::Done {
            finish_reason: FinishReason::Stop,
            usage: Some(USAGE),
        });
        Ok(StreamReceiver::new(futures_util::stream::iter(chunks)))
    }
}

/// Scripted step for `FakeRunner`
pub enum Step {
    Render,
    Fail(&'static str),
}

/// Plays back outcomes and keeps every script it was handed
pub struct FakeRunner {
    steps: Mutex<VecDeque<Step>>,
    pub scripts: Mutex<Vec<String>>,
    headless: bool,
}

impl FakeRunner {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            scripts: Mutex::new(Vec::new()),
            headless: true,
        }
    }

    pub fn interactive(mut self) -> Self {
        self.headless = false;
        self
    }
}

impl SceneRunner for FakeRunner {
    fn name(&self) -> &str {
        "fake"
    }

    fn headless(&self) -> bool {
        self.headless
    }

    async fn run(&self, script_path: &Path, output_path: &Path) -> Result<RunOutcome> {
        let script = std::fs::read_to_string(script_path)?;
        self.scripts.lock().unwrap().push(script);

        let step = self.steps.lock().unwrap().pop_front().unwrap_or(Step::Render);
        match step {
            Step::Render => {
                if let Some(dir) = output_path.parent() {
                    std::fs::create_dir_all(dir)?;
                }
                std::fs::write(output_path, b"\x89PNG fake")?;
                Ok(RunOutcome::Rendered(PathBuf::from(output_path)))
            }
            Step::Fail(error) => Ok(RunOutcome::ScriptError(error.to_string())),
        }
    }
}
