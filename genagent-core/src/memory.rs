//! # Scene Memory
//!
//! Every planning attempt and verification is kept as a `MemoryRecord` in
//! `<memory.path>/memories.json`. The store backs three things:
//! - similar-request lookup by embedding (brute-force L2 distance)
//! - reflection text summarizing earlier low-score attempts for the planner
//! - frequency statistics over past scene plans
//!
//! History is capped at `max_history`; the oldest records are dropped first.

use crate::config::{MemoryConfig, CHAR_CODE_EMBEDDER};
use crate::error::{self, Result};
use crate::provider::LlmProvider;
use crate::response::Verification;
use crate::scene::{frequencies, normalize_kind, ScenePlan};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name inside the memory directory
pub const MEMORY_FILE: &str = "memories.json";

/// Dimension of the built-in character-code embedding
pub const CHAR_CODE_DIM: usize = 100;

/// One remembered attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub instruction: String,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub script: Option<String>,
    #[serde(default)]
    pub plan: Option<ScenePlan>,
    #[serde(default)]
    pub verification: Option<Verification>,
    #[serde(default)]
    pub embedding: Vec<f32>,
    /// Unix seconds
    #[serde(default)]
    pub created_at: u64,
}

impl MemoryRecord {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            reasoning: String::new(),
            script: None,
            plan: None,
            verification: None,
            embedding: Vec::new(),
            created_at: now_secs(),
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    pub fn with_script(mut self, script: impl Into<String>) -> Self {
        self.script = Some(script.into());
        self
    }

    pub fn with_plan(mut self, plan: ScenePlan) -> Self {
        self.plan = Some(plan);
        self
    }

    pub fn with_verification(mut self, verification: Verification) -> Self {
        self.verification = Some(verification);
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }

    pub fn score(&self) -> Option<u8> {
        self.verification.as_ref().and_then(|v| v.score)
    }
}

/// A search hit
#[derive(Debug, Clone, Copy)]
pub struct SimilarRecord<'a> {
    pub distance: f32,
    pub record: &'a MemoryRecord,
}

/// Frequency tables over remembered scene plans
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PatternReport {
    pub common_objects: Vec<(String, usize)>,
    pub common_styles: Vec<(String, usize)>,
    pub common_relationships: Vec<(String, usize)>,
}

#[derive(Debug)]
pub struct SceneMemory {
    /// `None` keeps everything in memory
    file: Option<PathBuf>,
    records: Vec<MemoryRecord>,
    max_history: usize,
    similarity_threshold: f32,
}

impl SceneMemory {
    /// Open the store in `config.path`; a missing file means no history.
    pub async fn open(config: &MemoryConfig) -> Result<Self> {
        let file = config.path.join(MEMORY_FILE);
        let records = load_records(&file).await?;
        tracing::debug!(path = %file.display(), records = records.len(), "opened scene memory");

        let mut memory = Self {
            file: Some(file),
            records,
            max_history: config.max_history,
            similarity_threshold: config.similarity_threshold,
        };
        memory.trim();
        Ok(memory)
    }

    /// Non-persistent store
    pub fn in_memory(config: &MemoryConfig) -> Self {
        Self {
            file: None,
            records: Vec::new(),
            max_history: config.max_history,
            similarity_threshold: config.similarity_threshold,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    pub fn records(&self) -> &[MemoryRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Append, drop the oldest beyond `max_history`, persist.
    pub async fn add(&mut self, record: MemoryRecord) -> Result<()> {
        self.records.push(record);
        self.trim();
        self.save().await
    }

    fn trim(&mut self) {
        if self.records.len() > self.max_history {
            let excess = self.records.len() - self.max_history;
            self.records.drain(..excess);
        }
    }

    async fn save(&self) -> Result<()> {
        let Some(file) = &self.file else {
            return Ok(());
        };
        if let Some(dir) = file.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                error::memory_failed(format!("failed to create memory dir: {}", e))
                    .with_context("path", dir.display().to_string())
                    .set_source(e)
            })?;
        }

        let content = serde_json::to_string_pretty(&self.records)
            .map_err(|e| error::serialization_error(e.to_string()).set_source(e))?;

        // Write then rename so an interrupted save keeps the previous file
        let tmp = file.with_extension("json.tmp");
        let written = match tokio::fs::write(&tmp, content).await {
            Ok(()) => tokio::fs::rename(&tmp, file).await,
            Err(e) => Err(e),
        };
        written.map_err(|e| {
            error::memory_failed(format!("failed to write memories: {}", e))
                .with_operation("SceneMemory::save")
                .with_context("path", file.display().to_string())
                .set_source(e)
        })
    }

    /// Up to `k` records closer than the similarity threshold, nearest first.
    /// Records embedded with a different dimension are skipped.
    pub fn search_similar(&self, embedding: &[f32], k: usize) -> Vec<SimilarRecord<'_>> {
        let mut hits: Vec<SimilarRecord<'_>> = self
            .records
            .iter()
            .filter(|r| r.embedding.len() == embedding.len())
            .map(|record| SimilarRecord {
                distance: squared_l2(embedding, &record.embedding),
                record,
            })
            .filter(|hit| hit.distance < self.similarity_threshold)
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(k);
        hits
    }

    /// Bullet list of earlier attempts scoring below `pass_score`, or an
    /// empty string when there are none.
    pub fn reflect(&self, pass_score: u8) -> String {
        lessons(self.records.iter(), pass_score)
    }

    /// Like [`reflect`](Self::reflect), restricted to the `k` records
    /// nearest to `embedding`. Seeds the first plan of a new request.
    pub fn similar_lessons(&self, embedding: &[f32], k: usize, pass_score: u8) -> String {
        lessons(
            self.search_similar(embedding, k).into_iter().map(|hit| hit.record),
            pass_score,
        )
    }

    pub fn analyze_patterns(&self) -> PatternReport {
        let plans: Vec<&ScenePlan> = self.records.iter().filter_map(|r| r.plan.as_ref()).collect();

        let objects: Vec<String> = plans
            .iter()
            .flat_map(|p| p.objects.iter().map(|o| normalize_kind(&o.kind)))
            .collect();
        let styles: Vec<String> = plans
            .iter()
            .filter_map(|p| p.style.as_deref())
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        let relationships: Vec<&str> = plans
            .iter()
            .flat_map(|p| p.objects.iter())
            .flat_map(|o| o.relationships.iter().map(|r| r.kind.as_str()))
            .collect();

        PatternReport {
            common_objects: frequencies(objects.iter().map(String::as_str)),
            common_styles: frequencies(styles.iter().map(String::as_str)),
            common_relationships: frequencies(relationships),
        }
    }
}

/// Records in `file`; a missing file is an empty history.
async fn load_records(file: &Path) -> Result<Vec<MemoryRecord>> {
    let content = match tokio::fs::read_to_string(file).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(error::memory_failed(format!("failed to read memories: {}", e))
                .with_context("path", file.display().to_string())
                .set_source(e))
        }
    };
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&content).map_err(|e| {
        error::memory_failed(format!("corrupt memory file: {}", e))
            .with_operation("SceneMemory::open")
            .with_context("path", file.display().to_string())
            .set_source(e)
    })
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn lessons<'a>(records: impl Iterator<Item = &'a MemoryRecord>, pass_score: u8) -> String {
    let problems: Vec<String> = records
        .filter_map(|record| {
            let verification = record.verification.as_ref()?;
            let score = verification.score.filter(|s| *s < pass_score)?;
            let advice = if verification.suggestions.trim().is_empty() {
                verification.issues.join("; ")
            } else {
                one_line(&verification.suggestions)
            };
            (!advice.is_empty()).then(|| format!("- score {}: {}", score, advice))
        })
        .collect();

    if problems.is_empty() {
        return String::new();
    }
    format!("Avoid these problems from earlier attempts:\n{}", problems.join("\n"))
}

fn one_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn now_secs() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ============================================================================
// Embeddings
// ============================================================================

/// Fixed-size vector of the first characters' code points scaled by 1/255
#[derive(Debug, Clone, Copy)]
pub struct CharCodeEmbedder {
    pub dimension: usize,
}

impl Default for CharCodeEmbedder {
    fn default() -> Self {
        Self { dimension: CHAR_CODE_DIM }
    }
}

impl CharCodeEmbedder {
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0; self.dimension];
        for (slot, ch) in v.iter_mut().zip(text.chars()) {
            *slot = ch as u32 as f32 / 255.0;
        }
        v
    }
}

/// Embed `text` with `model`: the built-in embedder for `char-code`,
/// otherwise the provider's embedding endpoint.
pub async fn embed_text<P: LlmProvider>(provider: &P, model: &str, text: &str) -> Result<Vec<f32>> {
    if model == CHAR_CODE_EMBEDDER {
        return Ok(CharCodeEmbedder::default().embed(text));
    }
    let mut vectors = provider
        .embed(model, &[text.to_string()])
        .await
        .map_err(|e| error::from_provider(e, model).with_operation("memory::embed_text"))?;
    vectors
        .pop()
        .ok_or_else(|| error::response_malformed("embedding response was empty"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{
        CompletionRequest, CompletionResponse, ProviderError, StreamReceiver,
    };
    use crate::scene::{RelationKind, Relationship, SceneObject};
    use tempfile::TempDir;

    fn config(dir: &Path) -> MemoryConfig {
        MemoryConfig {
            max_history: 3,
            path: dir.to_path_buf(),
            ..Default::default()
        }
    }

    fn scored(instruction: &str, score: u8, suggestions: &str) -> MemoryRecord {
        MemoryRecord::new(instruction).with_verification(Verification {
            score: Some(score),
            suggestions: suggestions.to_string(),
            ..Default::default()
        })
    }

    #[test]
    fn test_char_code_embedding() {
        let v = CharCodeEmbedder::default().embed("ab");
        assert_eq!(v.len(), CHAR_CODE_DIM);
        assert_eq!(v[0], 97.0 / 255.0);
        assert_eq!(v[1], 98.0 / 255.0);
        assert_eq!(v[2], 0.0);

        let long = "x".repeat(300);
        assert_eq!(CharCodeEmbedder::default().embed(&long).len(), CHAR_CODE_DIM);
    }

    #[tokio::test]
    async fn test_add_trims_and_persists() {
        let dir = TempDir::new().unwrap();
        let mut memory = SceneMemory::open(&config(dir.path())).await.unwrap();
        assert!(memory.is_empty());

        for i in 0..5 {
            memory.add(MemoryRecord::new(format!("scene {}", i))).await.unwrap();
        }
        assert_eq!(memory.len(), 3);
        assert_eq!(memory.records()[0].instruction, "scene 2");

        let reopened = SceneMemory::open(&config(dir.path())).await.unwrap();
        assert_eq!(reopened.records(), memory.records());
        assert!(dir.path().join(MEMORY_FILE).exists());
        assert!(!dir.path().join("memories.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(MEMORY_FILE), "{ not json").unwrap();
        let err = SceneMemory::open(&config(dir.path())).await.unwrap_err();
        assert_eq!(err.kind(), error::ErrorKind::MemoryFailed);
    }

    #[tokio::test]
    async fn test_search_similar() {
        let mut memory = SceneMemory::in_memory(&MemoryConfig {
            similarity_threshold: 0.5,
            ..Default::default()
        });
        memory.add(MemoryRecord::new("far").with_embedding(vec![1.0, 1.0])).await.unwrap();
        memory.add(MemoryRecord::new("near").with_embedding(vec![0.1, 0.0])).await.unwrap();
        memory.add(MemoryRecord::new("nearer").with_embedding(vec![0.0, 0.05])).await.unwrap();
        memory.add(MemoryRecord::new("other dim").with_embedding(vec![0.0])).await.unwrap();

        let hits = memory.search_similar(&[0.0, 0.0], 5);
        let names: Vec<_> = hits.iter().map(|h| h.record.instruction.as_str()).collect();
        assert_eq!(names, vec!["nearer", "near"]);

        assert_eq!(memory.search_similar(&[0.0, 0.0], 1).len(), 1);
    }

    #[tokio::test]
    async fn test_reflect() {
        let mut memory = SceneMemory::in_memory(&MemoryConfig::default());
        assert_eq!(memory.reflect(85), "");

        memory.add(scored("room", 60, "Move the lamp\nnext to the sofa")).await.unwrap();
        memory.add(scored("room", 90, "Fine")).await.unwrap();
        memory.add(MemoryRecord::new("room").with_script("import bpy")).await.unwrap();
        memory
            .add(MemoryRecord::new("room").with_verification(Verification {
                score: Some(40),
                issues: vec!["tv missing".into(), "too dark".into()],
                ..Default::default()
            }))
            .await
            .unwrap();

        let reflection = memory.reflect(85);
        assert_eq!(
            reflection,
            "Avoid these problems from earlier attempts:\n\
             - score 60: Move the lamp next to the sofa\n\
             - score 40: tv missing; too dark"
        );
    }

    #[tokio::test]
    async fn test_similar_lessons_only_from_nearby_requests() {
        let mut memory = SceneMemory::in_memory(&MemoryConfig::default());
        memory
            .add(scored("bedroom", 50, "add a bedside lamp").with_embedding(vec![0.0, 0.1]))
            .await
            .unwrap();
        memory
            .add(scored("kitchen", 40, "the fridge is missing").with_embedding(vec![5.0, 5.0]))
            .await
            .unwrap();
        memory
            .add(scored("bedroom", 95, "fine").with_embedding(vec![0.0, 0.0]))
            .await
            .unwrap();

        assert_eq!(
            memory.similar_lessons(&[0.0, 0.0], 3, 85),
            "Avoid these problems from earlier attempts:\n- score 50: add a bedside lamp"
        );
        assert_eq!(memory.similar_lessons(&[0.0], 3, 85), "");
    }

    #[tokio::test]
    async fn test_analyze_patterns() {
        let mut memory = SceneMemory::in_memory(&MemoryConfig::default());
        let plan = |style: &str| ScenePlan {
            objects: vec![
                SceneObject::new("Sofa", "center"),
                SceneObject::new("coffee table", "center")
                    .with_relationship(Relationship::new(RelationKind::NextTo, "sofa")),
            ],
            style: Some(style.to_string()),
            ..Default::default()
        };
        memory.add(MemoryRecord::new("a").with_plan(plan("modern"))).await.unwrap();
        memory.add(MemoryRecord::new("b").with_plan(plan("Modern"))).await.unwrap();
        memory.add(MemoryRecord::new("c").with_plan(plan("industrial"))).await.unwrap();
        memory.add(MemoryRecord::new("d")).await.unwrap();

        let report = memory.analyze_patterns();
        assert_eq!(
            report.common_objects,
            vec![("coffee_table".to_string(), 3), ("sofa".to_string(), 3)]
        );
        assert_eq!(report.common_styles[0], ("modern".to_string(), 2));
        assert_eq!(report.common_relationships, vec![("next_to".to_string(), 3)]);
    }

    struct EmbeddingOnly;

    impl LlmProvider for EmbeddingOnly {
        fn name(&self) -> &str {
            "embedding-only"
        }

        fn models(&self) -> Vec<String> {
            vec!["text-embedding-v3".into()]
        }

        fn default_model(&self) -> &str {
            "text-embedding-v3"
        }

        async fn complete(&self, _request: CompletionRequest) -> std::result::Result<CompletionResponse, ProviderError> {
            Err(ProviderError::Unsupported("complete".into()))
        }

        async fn stream(&self, _request: CompletionRequest) -> std::result::Result<StreamReceiver, ProviderError> {
            Err(ProviderError::Unsupported("stream".into()))
        }

        async fn embed(&self, _model: &str, inputs: &[String]) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
            Ok(inputs.iter().map(|t| vec![t.len() as f32]).collect())
        }
    }

    #[tokio::test]
    async fn test_embed_text_dispatch() {
        let local = embed_text(&EmbeddingOnly, CHAR_CODE_EMBEDDER, "sofa").await.unwrap();
        assert_eq!(local.len(), CHAR_CODE_DIM);

        let remote = embed_text(&EmbeddingOnly, "text-embedding-v3", "sofa").await.unwrap();
        assert_eq!(remote, vec![4.0]);
    }
}
