//! # genagent core
//!
//! Building blocks for turning a natural-language scene request into a
//! rendered Blender image.
//!
//! ## Core Concepts
//! - **Provider**: Trait-based LLM communication (OpenAI-compatible, Anthropic)
//! - **Config**: Layered YAML + environment settings for every stage
//! - **Scene**: Structured scene plans, object catalog and placement
//! - **Script**: Blender Python generation from plans or templates
//! - **Renderer**: Headless Blender runner and a manual fallback
//! - **Memory**: Persistent history of attempts with similarity search

pub mod error;
pub mod config;
pub mod provider;
pub mod response;
pub mod scene;
pub mod script;
pub mod renderer;
pub mod memory;
pub mod logging;

pub use error::{Error, ErrorKind, ErrorStatus, Result};
pub use config::{AgentRole, Config, PlanMode, RoleConfig};
pub use provider::{
    LlmProvider, ProviderConfig, ProviderType, ProviderError,
    ChatMessage, ImageAttachment, Role, CompletionRequest, CompletionResponse,
    StreamChunk, StreamReceiver, FinishReason, Usage, UsageTracker,
    OpenAIProvider, AnthropicProvider,
};
pub use response::{parse_verification, Verification};
pub use scene::{layout, CameraPose, PlacedObject, ScenePlan, SceneObject};
pub use script::{compile_plan, fallback_template, with_render_epilogue, BlenderScript};
pub use renderer::{BlenderRunner, ManualRunner, RunOutcome, SceneRunner};
pub use memory::{embed_text, CharCodeEmbedder, MemoryRecord, PatternReport, SceneMemory, SimilarRecord};
pub use logging::init_logging;
