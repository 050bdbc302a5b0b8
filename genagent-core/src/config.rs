//! # Configuration
//!
//! One `Config` tree is loaded at process start and handed to every agent.
//! Sources are layered with the `config` crate: serde defaults, then the YAML
//! file, then `GENAGENT__*` environment variables (`__` separates the prefix
//! and each nesting level, so `GENAGENT__RENDER__SAMPLES=64` overrides
//! `render.samples`).
//!
//! API keys are looked up in the environment first. A literal `api.api_key`
//! in the file still works but is reported as a warning.

use crate::error::{self, Result};
use crate::provider::{ProviderConfig, ProviderType, DASHSCOPE_BASE_URL};
use crate::scene::LightKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "GENAGENT";

/// Env var consulted for the API key unless `api.api_key_env` says otherwise
pub const DEFAULT_API_KEY_ENV: &str = "GENAGENT_API_KEY";

/// Built-in embedder identifier
pub const CHAR_CODE_EMBEDDER: &str = "char-code";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub provider: ProviderType,
    pub api: ApiConfig,
    pub agents: AgentConfig,
    pub scene: SceneDefaults,
    pub memory: MemoryConfig,
    pub render: RenderConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

impl Default for ProviderType {
    fn default() -> Self {
        ProviderType::OpenAI
    }
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    /// Name of the environment variable holding the key
    pub api_key_env: String,
    /// Plaintext key; accepted for compatibility, prefer `api_key_env`
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DASHSCOPE_BASE_URL.to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            api_key: None,
            timeout_secs: 120,
        }
    }
}

impl ApiConfig {
    /// Resolve the API key from the process environment.
    pub fn resolve_api_key(&self, provider: ProviderType) -> Option<String> {
        self.resolve_api_key_with(provider, |name| std::env::var(name).ok())
    }

    /// Resolve the API key using `lookup` for environment variables.
    ///
    /// Order: `api_key_env`, the provider's conventional variables, then the
    /// plaintext `api_key`.
    pub fn resolve_api_key_with<F>(&self, provider: ProviderType, lookup: F) -> Option<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut candidates = vec![self.api_key_env.as_str()];
        match provider {
            ProviderType::Anthropic => candidates.push("ANTHROPIC_API_KEY"),
            ProviderType::OpenAI if self.base_url.contains("dashscope") => {
                candidates.extend(["DASHSCOPE_API_KEY", "OPENAI_API_KEY"])
            }
            ProviderType::OpenAI => candidates.extend(["OPENAI_API_KEY", "DASHSCOPE_API_KEY"]),
        }

        for name in candidates {
            if name.is_empty() {
                continue;
            }
            if let Some(value) = lookup(name).filter(|v| !v.trim().is_empty()) {
                tracing::debug!(env = name, "api key resolved from environment");
                return Some(value);
            }
        }

        let literal = self.api_key.clone().filter(|k| !k.trim().is_empty());
        if literal.is_some() {
            tracing::warn!(
                "api.api_key is stored in plaintext; set {} instead",
                self.api_key_env
            );
        }
        literal
    }
}

/// Which agent a model setting belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentRole {
    Planner,
    Executor,
    Verifier,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Planner => "planner",
            AgentRole::Executor => "executor",
            AgentRole::Verifier => "verifier",
        }
    }
}

/// Per-role model selection and sampling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleConfig {
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> usize {
    4000
}

fn default_top_p() -> f32 {
    0.9
}

impl RoleConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            top_p: default_top_p(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub planner: RoleConfig,
    /// Used for script repair
    pub executor: RoleConfig,
    pub verifier: RoleConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            planner: RoleConfig::new("qwen-plus"),
            executor: RoleConfig::new("qwen-plus").with_temperature(0.2),
            verifier: RoleConfig::new("qwen-vl-max").with_temperature(0.2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomDimensions {
    pub width: f32,
    pub length: f32,
    pub height: f32,
}

impl Default for RoomDimensions {
    fn default() -> Self {
        Self { width: 8.0, length: 8.0, height: 3.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightingDefaults {
    #[serde(rename = "type")]
    pub kind: LightKind,
    pub intensity: f32,
    pub color: [f32; 3],
}

impl Default for LightingDefaults {
    fn default() -> Self {
        Self {
            kind: LightKind::Sun,
            intensity: 10.0,
            color: [1.0, 1.0, 1.0],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraDefaults {
    /// Field of view in degrees
    pub fov: f32,
    /// Distance in front of the room centre (camera sits at -y)
    pub distance: f32,
    pub height: f32,
}

impl Default for CameraDefaults {
    fn default() -> Self {
        Self { fov: 60.0, distance: 6.0, height: 2.0 }
    }
}

/// Placement rules for one object category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementConstraint {
    pub min_spacing: f32,
    pub wall_clearance: f32,
    /// Allowed object-centre heights `[low, high]`
    pub height_range: Option<[f32; 2]>,
}

impl Default for PlacementConstraint {
    fn default() -> Self {
        Self {
            min_spacing: 0.0,
            wall_clearance: 0.0,
            height_range: None,
        }
    }
}

/// A named surface material
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialPreset {
    pub color: [f32; 3],
    #[serde(default = "default_roughness")]
    pub roughness: f32,
    #[serde(default)]
    pub metallic: f32,
}

fn default_roughness() -> f32 {
    0.5
}

impl MaterialPreset {
    pub fn new(color: [f32; 3], roughness: f32, metallic: f32) -> Self {
        Self { color, roughness, metallic }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneDefaults {
    pub room: RoomDimensions,
    pub lighting: LightingDefaults,
    pub camera: CameraDefaults,
    /// Keyed by object category (`furniture`, `decoration`, `electronics`, `basic`)
    pub placement: BTreeMap<String, PlacementConstraint>,
    pub materials: BTreeMap<String, MaterialPreset>,
}

impl Default for SceneDefaults {
    fn default() -> Self {
        let mut placement = BTreeMap::new();
        placement.insert(
            "furniture".to_string(),
            PlacementConstraint {
                min_spacing: 0.5,
                wall_clearance: 0.3,
                height_range: Some([0.0, 2.5]),
            },
        );
        placement.insert(
            "decoration".to_string(),
            PlacementConstraint {
                min_spacing: 0.2,
                wall_clearance: 0.1,
                height_range: Some([0.0, 2.8]),
            },
        );

        let mut materials = BTreeMap::new();
        materials.insert("wood".to_string(), MaterialPreset::new([0.55, 0.35, 0.2], 0.6, 0.0));
        materials.insert("fabric".to_string(), MaterialPreset::new([0.5, 0.5, 0.5], 0.9, 0.0));
        materials.insert("metal".to_string(), MaterialPreset::new([0.7, 0.7, 0.72], 0.25, 0.9));
        materials.insert("glass".to_string(), MaterialPreset::new([0.8, 0.8, 1.0], 0.05, 0.0));

        Self {
            room: RoomDimensions::default(),
            lighting: LightingDefaults::default(),
            camera: CameraDefaults::default(),
            placement,
            materials,
        }
    }
}

impl SceneDefaults {
    pub fn placement_for(&self, category: &str) -> Option<&PlacementConstraint> {
        self.placement.get(&category.to_lowercase())
    }

    pub fn material(&self, name: &str) -> Option<&MaterialPreset> {
        self.materials.get(&name.to_lowercase())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub max_history: usize,
    /// `char-code` for the built-in embedder, otherwise a provider embedding model
    pub embedding_model: String,
    /// Maximum L2 distance for a memory to count as similar
    pub similarity_threshold: f32,
    /// Directory holding `memories.json`
    pub path: PathBuf,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_history: 1000,
            embedding_model: CHAR_CODE_EMBEDDER.to_string(),
            similarity_threshold: 0.8,
            path: PathBuf::from("data"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RenderEngine {
    Cycles,
    #[serde(alias = "BLENDER_EEVEE", alias = "EEVEE_NEXT", alias = "BLENDER_EEVEE_NEXT")]
    Eevee,
    #[serde(alias = "BLENDER_WORKBENCH")]
    Workbench,
}

impl RenderEngine {
    /// Identifier Blender expects in `scene.render.engine`
    pub fn blender_id(&self) -> &'static str {
        match self {
            RenderEngine::Cycles => "CYCLES",
            RenderEngine::Eevee => "BLENDER_EEVEE_NEXT",
            RenderEngine::Workbench => "BLENDER_WORKBENCH",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ImageFormat {
    Png,
    Jpeg,
}

impl ImageFormat {
    pub fn blender_id(&self) -> &'static str {
        match self {
            ImageFormat::Png => "PNG",
            ImageFormat::Jpeg => "JPEG",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
        }
    }

    pub fn media_type(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub engine: RenderEngine,
    pub samples: u32,
    pub resolution: [u32; 2],
    pub output_format: ImageFormat,
    /// Directory rendered images are written to
    pub output_path: PathBuf,
    /// Blender executable; unset means the user runs scripts manually
    pub blender_path: Option<PathBuf>,
    pub timeout_secs: u64,
    /// Where the current scene script is written
    pub script_path: PathBuf,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            engine: RenderEngine::Cycles,
            samples: 128,
            resolution: [1920, 1080],
            output_format: ImageFormat::Png,
            output_path: PathBuf::from("output"),
            blender_path: None,
            timeout_secs: 600,
            script_path: PathBuf::from("gen_scene.py"),
        }
    }
}

/// How the planner produces a script
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanMode {
    /// Model writes the Blender script directly after a reasoning chain
    Script,
    /// Model returns a JSON scene plan that we compile into a script
    Structured,
}

impl std::str::FromStr for PlanMode {
    type Err = genagent_error::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "script" => Ok(PlanMode::Script),
            "structured" => Ok(PlanMode::Structured),
            other => Err(error::config_invalid(format!(
                "unknown plan mode '{}', expected 'script' or 'structured'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub mode: PlanMode,
    /// Verification score that ends the loop
    pub pass_score: u8,
    pub max_iterations: usize,
    pub max_fix_attempts: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: PlanMode::Script,
            pass_score: 85,
            max_iterations: 5,
            max_fix_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn, error, off
    pub level: String,
    /// text or json
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

impl Config {
    /// Load from a YAML file with environment overlay, then validate.
    pub fn load(path: &Path) -> Result<Self> {
        let path_str = path.to_str().ok_or_else(|| {
            error::config_invalid(format!("config path is not valid UTF-8: {}", path.display()))
        })?;

        let built = ::config::Config::builder()
            .add_source(
                ::config::File::with_name(path_str)
                    .format(::config::FileFormat::Yaml)
                    .required(true),
            )
            .add_source(env_source())
            .build()
            .map_err(|e| {
                error::config_invalid(e.to_string())
                    .with_operation("config::load")
                    .with_context("path", path.display().to_string())
                    .set_source(e)
            })?;

        let config: Config = built.try_deserialize().map_err(|e| {
            error::config_invalid(e.to_string())
                .with_operation("config::load")
                .with_context("path", path.display().to_string())
                .set_source(e)
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overlay, for runs without a config file.
    pub fn from_env() -> Result<Self> {
        let built = ::config::Config::builder()
            .add_source(env_source())
            .build()
            .map_err(|e| error::config_invalid(e.to_string()).set_source(e))?;

        let config: Config = built
            .try_deserialize()
            .map_err(|e| error::config_invalid(e.to_string()).set_source(e))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML document without environment overlay or validation.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| {
            error::config_invalid(e.to_string())
                .with_operation("config::from_yaml_str")
                .set_source(e)
        })
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| error::serialization_error(e.to_string()).set_source(e))
    }

    pub fn role(&self, role: AgentRole) -> &RoleConfig {
        match role {
            AgentRole::Planner => &self.agents.planner,
            AgentRole::Executor => &self.agents.executor,
            AgentRole::Verifier => &self.agents.verifier,
        }
    }

    /// Copy with the plaintext key masked, for display
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.api.api_key.is_some() {
            copy.api.api_key = Some("***".to_string());
        }
        copy
    }

    /// Check every invariant and report all violations at once.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        for role in [AgentRole::Planner, AgentRole::Executor, AgentRole::Verifier] {
            let rc = self.role(role);
            let name = role.as_str();
            if rc.model.trim().is_empty() {
                problems.push(format!("agents.{}.model must not be empty", name));
            }
            if !(0.0..=2.0).contains(&rc.temperature) {
                problems.push(format!("agents.{}.temperature must be within [0, 2]", name));
            }
            if !(rc.top_p > 0.0 && rc.top_p <= 1.0) {
                problems.push(format!("agents.{}.top_p must be within (0, 1]", name));
            }
            if rc.max_tokens == 0 {
                problems.push(format!("agents.{}.max_tokens must be positive", name));
            }
        }

        if self.api.base_url.trim().is_empty() {
            problems.push("api.base_url must not be empty".to_string());
        }
        if self.api.timeout_secs == 0 {
            problems.push("api.timeout_secs must be positive".to_string());
        }

        let room = &self.scene.room;
        if room.width <= 0.0 || room.length <= 0.0 || room.height <= 0.0 {
            problems.push("scene.room dimensions must be positive".to_string());
        }
        if self.scene.lighting.intensity < 0.0 {
            problems.push("scene.lighting.intensity must not be negative".to_string());
        }
        if !unit_range(&self.scene.lighting.color) {
            problems.push("scene.lighting.color channels must be within [0, 1]".to_string());
        }
        let cam = &self.scene.camera;
        if !(cam.fov > 0.0 && cam.fov < 180.0) {
            problems.push("scene.camera.fov must be within (0, 180)".to_string());
        }
        if cam.distance <= 0.0 {
            problems.push("scene.camera.distance must be positive".to_string());
        }

        for (category, rule) in &self.scene.placement {
            if rule.min_spacing < 0.0 {
                problems.push(format!("scene.placement.{}.min_spacing must not be negative", category));
            }
            if rule.wall_clearance < 0.0 {
                problems.push(format!("scene.placement.{}.wall_clearance must not be negative", category));
            }
            if let Some([low, high]) = rule.height_range {
                if low > high {
                    problems.push(format!(
                        "scene.placement.{}.height_range lower bound {} exceeds upper bound {}",
                        category, low, high
                    ));
                }
            }
        }

        for (name, preset) in &self.scene.materials {
            if !unit_range(&preset.color) {
                problems.push(format!("scene.materials.{}.color channels must be within [0, 1]", name));
            }
            if !(0.0..=1.0).contains(&preset.roughness) {
                problems.push(format!("scene.materials.{}.roughness must be within [0, 1]", name));
            }
            if !(0.0..=1.0).contains(&preset.metallic) {
                problems.push(format!("scene.materials.{}.metallic must be within [0, 1]", name));
            }
        }

        if self.memory.max_history == 0 {
            problems.push("memory.max_history must be positive".to_string());
        }
        if self.memory.similarity_threshold < 0.0 {
            problems.push("memory.similarity_threshold must not be negative".to_string());
        }
        if self.memory.embedding_model.trim().is_empty() {
            problems.push("memory.embedding_model must not be empty".to_string());
        }

        let [w, h] = self.render.resolution;
        if w == 0 || h == 0 {
            problems.push("render.resolution must be a pair of positive integers".to_string());
        }
        if self.render.samples == 0 {
            problems.push("render.samples must be positive".to_string());
        }
        if self.render.timeout_secs == 0 {
            problems.push("render.timeout_secs must be positive".to_string());
        }

        if self.pipeline.pass_score > 100 {
            problems.push("pipeline.pass_score must be within [0, 100]".to_string());
        }
        if self.pipeline.max_iterations == 0 {
            problems.push("pipeline.max_iterations must be positive".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(error::config_invalid(problems.join("; "))
                .with_operation("config::validate")
                .with_context("violations", problems.len().to_string()))
        }
    }

    /// Build the provider configuration for this config.
    pub fn provider_config(&self) -> ProviderConfig {
        let api_key = self.api.resolve_api_key(self.provider);
        let base = match self.provider {
            ProviderType::OpenAI => ProviderConfig::openai(api_key.clone().unwrap_or_default()),
            ProviderType::Anthropic => ProviderConfig::anthropic(api_key.clone().unwrap_or_default()),
        };
        let mut pc = base
            .with_base_url(self.api.base_url.clone())
            .with_model(self.agents.planner.model.clone())
            .with_timeout(self.api.timeout_secs);
        pc.api_key = api_key;
        pc
    }
}

fn env_source() -> ::config::Environment {
    ::config::Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
}

fn unit_range(values: &[f32]) -> bool {
    values.iter().all(|v| (0.0..=1.0).contains(v))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
provider: openai
api:
  base_url: https://dashscope.aliyuncs.com/compatible-mode/v1
  api_key_env: MY_QWEN_KEY
agents:
  planner:
    model: qwen-max
    temperature: 0.5
  verifier:
    model: qwen-vl-max
    max_tokens: 1500
scene:
  room: { width: 6.0, length: 5.0, height: 2.8 }
  placement:
    furniture: { min_spacing: 0.4, wall_clearance: 0.2, height_range: [0.0, 1.5] }
  materials:
    oak: { color: [0.6, 0.4, 0.2], roughness: 0.7 }
render:
  engine: EEVEE
  samples: 64
  resolution: [800, 600]
pipeline:
  mode: structured
  pass_score: 90
"#;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.agents.planner.model, "qwen-plus");
        assert_eq!(config.agents.verifier.model, "qwen-vl-max");
        assert_eq!(config.render.resolution, [1920, 1080]);
        assert_eq!(config.pipeline.pass_score, 85);
        assert_eq!(config.memory.max_history, 1000);
    }

    #[test]
    fn test_parse_yaml() {
        let config = Config::from_yaml_str(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.agents.planner.model, "qwen-max");
        assert_eq!(config.agents.planner.temperature, 0.5);
        assert_eq!(config.agents.planner.top_p, 0.9);
        assert_eq!(config.agents.verifier.max_tokens, 1500);
        // Untouched section keeps its defaults
        assert_eq!(config.agents.executor.model, "qwen-plus");
        assert_eq!(config.scene.room.width, 6.0);
        assert_eq!(config.scene.material("OAK").unwrap().roughness, 0.7);
        assert_eq!(config.scene.material("oak").unwrap().metallic, 0.0);
        assert_eq!(config.render.engine, RenderEngine::Eevee);
        assert_eq!(config.render.engine.blender_id(), "BLENDER_EEVEE_NEXT");
        assert_eq!(config.pipeline.mode, PlanMode::Structured);
    }

    #[test]
    fn test_height_range_must_be_ordered() {
        let mut config = Config::default();
        config.scene.placement.insert(
            "lamp".into(),
            PlacementConstraint { height_range: Some([2.0, 1.0]), ..Default::default() },
        );
        let err = config.validate().unwrap_err();
        assert_eq!(err.kind(), error::ErrorKind::ConfigInvalid);
        assert!(err.message().contains("scene.placement.lamp.height_range"));
    }

    #[test]
    fn test_all_violations_reported() {
        let mut config = Config::default();
        config.render.resolution = [0, 1080];
        config.agents.planner.top_p = 0.0;
        config.scene.materials.insert("neon".into(), MaterialPreset::new([1.5, 0.0, 0.0], 0.5, 0.0));

        let err = config.validate().unwrap_err();
        assert!(err.message().contains("render.resolution"));
        assert!(err.message().contains("agents.planner.top_p"));
        assert!(err.message().contains("scene.materials.neon.color"));
        assert_eq!(err.context_value("violations"), Some("3"));
    }

    #[test]
    fn test_api_key_resolution_order() {
        let mut config = Config::from_yaml_str(SAMPLE).unwrap();
        config.api.api_key = Some("sk-plaintext".into());

        let key = config.api.resolve_api_key_with(config.provider, |name| match name {
            "MY_QWEN_KEY" => Some("sk-from-custom".into()),
            "DASHSCOPE_API_KEY" => Some("sk-from-dashscope".into()),
            _ => None,
        });
        assert_eq!(key.as_deref(), Some("sk-from-custom"));

        let key = config.api.resolve_api_key_with(config.provider, |name| match name {
            "DASHSCOPE_API_KEY" => Some("sk-from-dashscope".into()),
            _ => None,
        });
        assert_eq!(key.as_deref(), Some("sk-from-dashscope"));

        let key = config.api.resolve_api_key_with(config.provider, |_| None);
        assert_eq!(key.as_deref(), Some("sk-plaintext"));
    }

    #[test]
    fn test_redacted_masks_key() {
        let mut config = Config::default();
        config.api.api_key = Some("sk-secret".into());
        let shown = config.redacted().to_yaml().unwrap();
        assert!(!shown.contains("sk-secret"));
        assert!(shown.contains("***"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.render.samples, 64);
        assert_eq!(config.render.resolution, [800, 600]);
    }

    #[test]
    fn test_environment_overrides_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "memory:\n  max_history: 50\n  similarity_threshold: 0.6\nagents:\n  executor:\n    model: qwen-plus\n",
        )
        .unwrap();

        // keys no other test reads
        std::env::set_var("GENAGENT__MEMORY__MAX_HISTORY", "7");
        std::env::set_var("GENAGENT__AGENTS__EXECUTOR__MODEL", "qwen-coder-plus");
        let loaded = Config::load(&path);
        std::env::remove_var("GENAGENT__MEMORY__MAX_HISTORY");
        std::env::remove_var("GENAGENT__AGENTS__EXECUTOR__MODEL");

        let config = loaded.unwrap();
        assert_eq!(config.memory.max_history, 7);
        assert_eq!(config.agents.executor.model, "qwen-coder-plus");
        assert_eq!(config.memory.similarity_threshold, 0.6);
    }

    #[test]
    fn test_single_underscore_prefix_is_ignored() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "pipeline:\n  max_fix_attempts: 2\n").unwrap();

        std::env::set_var("GENAGENT_PIPELINE__MAX_FIX_ATTEMPTS", "9");
        let loaded = Config::load(&path);
        std::env::remove_var("GENAGENT_PIPELINE__MAX_FIX_ATTEMPTS");

        assert_eq!(loaded.unwrap().pipeline.max_fix_attempts, 2);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "render:\n  resolution: [0, 0]\n").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert_eq!(err.kind(), error::ErrorKind::ConfigInvalid);
    }

    #[test]
    fn test_plan_mode_from_str() {
        assert_eq!("Structured".parse::<PlanMode>().unwrap(), PlanMode::Structured);
        assert!("freeform".parse::<PlanMode>().is_err());
    }

    #[test]
    fn test_shipped_config_matches_defaults() {
        let shipped = Config::from_yaml_str(include_str!("../../config/config.yaml")).unwrap();
        assert_eq!(shipped, Config::default());
    }
}
