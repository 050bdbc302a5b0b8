//! Verifier: scores a rendered image against the request with a
//! vision-language model.

use crate::agent;
use crate::prompts;
use genagent_core::config::{AgentRole, Config};
use genagent_core::error::{Error, Result};
use genagent_core::{parse_verification, ChatMessage, ImageAttachment, LlmProvider, UsageTracker, Verification};
use std::path::Path;

pub struct VerifierAgent<'a, P> {
    provider: &'a P,
    config: &'a Config,
    usage: UsageTracker,
}

impl<'a, P: LlmProvider> VerifierAgent<'a, P> {
    pub fn new(provider: &'a P, config: &'a Config) -> Self {
        Self {
            provider,
            config,
            usage: UsageTracker::new(),
        }
    }

    pub fn usage(&self) -> &UsageTracker {
        &self.usage
    }

    pub async fn verify(&mut self, image_path: &Path, task: &str) -> Result<Verification> {
        let bytes = tokio::fs::read(image_path).await.map_err(|e| {
            Error::image_unreadable(image_path.display().to_string())
                .with_operation("VerifierAgent::verify")
                .set_source(e)
        })?;
        if bytes.is_empty() {
            return Err(Error::image_unreadable(image_path.display().to_string())
                .with_operation("VerifierAgent::verify")
                .with_context("reason", "empty file"));
        }

        let image = ImageAttachment::from_bytes(self.media_type(image_path), &bytes);
        let messages = vec![
            ChatMessage::system(prompts::VERIFIER_SYSTEM),
            ChatMessage::user(prompts::verify(task)).with_image(image),
        ];
        let answer = agent::complete(
            self.provider,
            self.config.role(AgentRole::Verifier),
            messages,
            &mut self.usage,
            "VerifierAgent::verify",
        )
        .await?;

        let verification = parse_verification(&answer);
        match verification.score {
            Some(score) => tracing::info!(score, issues = verification.issues.len(), "scene verified"),
            None => tracing::warn!("verifier gave no score"),
        }
        Ok(verification)
    }

    fn media_type(&self, path: &Path) -> &'static str {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("png") => "image/png",
            Some("jpg") | Some("jpeg") => "image/jpeg",
            _ => self.config.render.output_format.media_type(),
        }
    }

    /// Human-readable summary
    pub fn feedback(&self, verification: &Verification) -> String {
        feedback(verification, self.config.pipeline.pass_score)
    }
}

/// Score, issues and suggestions as plain text
pub fn feedback(verification: &Verification, pass_score: u8) -> String {
    let mut out = String::from("Scene verification\n\n");

    match verification.score {
        Some(score) => {
            let verdict = if verification.passed(pass_score) { "pass" } else { "below target" };
            out.push_str(&format!("Score: {}/100 ({}, target {})\n", score, verdict, pass_score));
        }
        None => out.push_str("Score: none given\n"),
    }

    if !verification.issues.is_empty() {
        out.push_str("\nIssues:\n");
        for issue in &verification.issues {
            out.push_str(&format!("- {}\n", issue));
        }
    }
    if !verification.suggestions.trim().is_empty() {
        out.push_str("\nSuggestions:\n");
        out.push_str(verification.suggestions.trim());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProvider;
    use genagent_core::ErrorKind;
    use tempfile::TempDir;

    const ANSWER: &str = "1. Match score: 72\n\
                          2. Issues:\n- the lamp is missing\n- the sofa faces the wall\n\
                          3. Suggestions:\nRotate the sofa 180 degrees and add a floor lamp.";

    #[tokio::test]
    async fn test_verify_sends_image() {
        let dir = TempDir::new().unwrap();
        let image = dir.path().join("scene_1.png");
        std::fs::write(&image, b"\x89PNG fake").unwrap();

        let provider = ScriptedProvider::new([ANSWER]);
        let config = Config::default();
        let mut verifier = VerifierAgent::new(&provider, &config);

        let verification = verifier.verify(&image, "a sofa and a lamp").await.unwrap();
        assert_eq!(verification.score, Some(72));
        assert_eq!(verification.issues.len(), 2);
        assert!(verification.suggestions.contains("floor lamp"));

        assert_eq!(provider.images(0), 1);
        assert!(provider.prompt(0).contains("Description: a sofa and a lamp"));
        {
            let requests = provider.requests.lock().unwrap();
            assert_eq!(requests[0].model.as_deref(), Some("qwen-vl-max"));
            let attachment = &requests[0].messages[1].images[0];
            assert_eq!(attachment.media_type, "image/png");
        }
    }

    #[tokio::test]
    async fn test_unreadable_image() {
        let dir = TempDir::new().unwrap();
        let provider = ScriptedProvider::new([ANSWER]);
        let config = Config::default();
        let mut verifier = VerifierAgent::new(&provider, &config);

        let missing = verifier.verify(&dir.path().join("nope.png"), "x").await.unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::ImageUnreadable);

        let empty = dir.path().join("empty.png");
        std::fs::write(&empty, b"").unwrap();
        let err = verifier.verify(&empty, "x").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ImageUnreadable);
        assert_eq!(provider.calls(), 0);
    }

    #[test]
    fn test_feedback() {
        let provider = ScriptedProvider::default();
        let config = Config::default();
        let verifier = VerifierAgent::new(&provider, &config);

        let text = verifier.feedback(&Verification {
            score: Some(72),
            issues: vec!["lamp missing".into()],
            suggestions: "add a lamp".into(),
            analysis: String::new(),
        });
        assert!(text.contains("Score: 72/100 (below target, target 85)"));
        assert!(text.contains("- lamp missing"));
        assert!(text.contains("add a lamp"));

        let none = verifier.feedback(&Verification::default());
        assert!(none.contains("Score: none given"));
    }
}
