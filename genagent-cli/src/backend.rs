//! Concrete provider and runner chosen from the configuration.

use genagent_core::config::Config;
use genagent_core::error::{self, Result};
use genagent_core::provider::ProviderError;
use genagent_core::{
    AnthropicProvider, BlenderRunner, CompletionRequest, CompletionResponse, LlmProvider,
    ManualRunner, OpenAIProvider, ProviderType, RunOutcome, SceneRunner, StreamReceiver,
};
use std::path::Path;

pub enum Backend {
    OpenAI(OpenAIProvider),
    Anthropic(AnthropicProvider),
}

impl Backend {
    pub fn from_config(config: &Config) -> Result<Self> {
        let provider_config = config.provider_config();
        if provider_config.api_key.is_none() {
            tracing::warn!(
                env = %config.api.api_key_env,
                "no API key resolved; only keyless endpoints will accept requests"
            );
        }

        let backend = match config.provider {
            ProviderType::OpenAI => OpenAIProvider::new(provider_config).map(Backend::OpenAI),
            ProviderType::Anthropic => AnthropicProvider::new(provider_config).map(Backend::Anthropic),
        };
        backend.map_err(|e| error::from_provider(e, &config.agents.planner.model).with_operation("Backend::from_config"))
    }
}

impl LlmProvider for Backend {
    fn name(&self) -> &str {
        match self {
            Backend::OpenAI(p) => p.name(),
            Backend::Anthropic(p) => p.name(),
        }
    }

    fn models(&self) -> Vec<String> {
        match self {
            Backend::OpenAI(p) => p.models(),
            Backend::Anthropic(p) => p.models(),
        }
    }

    fn default_model(&self) -> &str {
        match self {
            Backend::OpenAI(p) => p.default_model(),
            Backend::Anthropic(p) => p.default_model(),
        }
    }

    async fn complete(&self, request: CompletionRequest) -> std::result::Result<CompletionResponse, ProviderError> {
        match self {
            Backend::OpenAI(p) => p.complete(request).await,
            Backend::Anthropic(p) => p.complete(request).await,
        }
    }

    async fn stream(&self, request: CompletionRequest) -> std::result::Result<StreamReceiver, ProviderError> {
        match self {
            Backend::OpenAI(p) => p.stream(request).await,
            Backend::Anthropic(p) => p.stream(request).await,
        }
    }

    async fn embed(&self, model: &str, inputs: &[String]) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        match self {
            Backend::OpenAI(p) => p.embed(model, inputs).await,
            Backend::Anthropic(p) => p.embed(model, inputs).await,
        }
    }
}

pub enum Runner {
    Blender(BlenderRunner),
    Manual(ManualRunner),
}

impl Runner {
    /// Blender when configured and not overridden, else the interactive runner
    pub fn select(config: &Config, manual: bool) -> Self {
        match BlenderRunner::from_config(&config.render) {
            Some(blender) if !manual => Runner::Blender(blender),
            _ => {
                if !manual {
                    tracing::info!("render.blender_path not set, running scripts manually");
                }
                Runner::Manual(ManualRunner::new())
            }
        }
    }
}

impl SceneRunner for Runner {
    fn name(&self) -> &str {
        match self {
            Runner::Blender(r) => r.name(),
            Runner::Manual(r) => r.name(),
        }
    }

    fn headless(&self) -> bool {
        match self {
            Runner::Blender(r) => r.headless(),
            Runner::Manual(r) => r.headless(),
        }
    }

    async fn run(&self, script_path: &Path, output_path: &Path) -> Result<RunOutcome> {
        match self {
            Runner::Blender(r) => r.run(script_path, output_path).await,
            Runner::Manual(r) => r.run(script_path, output_path).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runner_selection() {
        let mut config = Config::default();
        assert!(matches!(Runner::select(&config, false), Runner::Manual(_)));

        config.render.blender_path = Some("/opt/blender/blender".into());
        assert!(matches!(Runner::select(&config, false), Runner::Blender(_)));
        assert!(matches!(Runner::select(&config, true), Runner::Manual(_)));
    }

    #[test]
    fn test_backend_follows_provider() {
        let mut config = Config::default();
        let backend = Backend::from_config(&config).unwrap();
        assert_eq!(backend.name(), "openai");

        config.provider = ProviderType::Anthropic;
        let backend = Backend::from_config(&config).unwrap();
        assert_eq!(backend.name(), "anthropic");
    }
}
