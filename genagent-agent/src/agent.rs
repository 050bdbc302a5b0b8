//! Model calls shared by the agents: request building from a role's
//! settings, usage accounting and provider error mapping.

use genagent_core::config::RoleConfig;
use genagent_core::error::{self, Result};
use genagent_core::{ChatMessage, CompletionRequest, LlmProvider, StreamChunk, UsageTracker};
use std::time::Duration;

pub(crate) fn request(role: &RoleConfig, messages: Vec<ChatMessage>) -> CompletionRequest {
    CompletionRequest::new(messages)
        .with_model(role.model.clone())
        .with_temperature(role.temperature)
        .with_max_tokens(role.max_tokens)
        .with_top_p(role.top_p)
}

/// Attempts per call for retryable failures (network, rate limit, 5xx)
const MAX_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(250);

/// Complete and return the text; an empty answer is malformed.
pub(crate) async fn complete<P: LlmProvider>(
    provider: &P,
    role: &RoleConfig,
    messages: Vec<ChatMessage>,
    usage: &mut UsageTracker,
    operation: &'static str,
) -> Result<String> {
    tracing::debug!(model = %role.model, messages = messages.len(), operation, "model call");

    let mut attempt = 1;
    let response = loop {
        match provider.complete(request(role, messages.clone())).await {
            Ok(response) => break response,
            Err(e) => {
                let err = error::from_provider(e, &role.model).with_operation(operation);
                if !err.is_retryable() {
                    return Err(err);
                }
                if attempt >= MAX_ATTEMPTS {
                    return Err(err.with_context("attempts", attempt.to_string()).persist());
                }
                let delay = RETRY_DELAY * 2u32.pow(attempt - 1);
                tracing::warn!(error = %err, attempt, delay_ms = delay.as_millis() as u64, "model call failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    };
    usage.track(&role.model, &response.usage);

    let content = response.content.unwrap_or_default();
    if content.trim().is_empty() {
        return Err(error::response_malformed("model returned no content")
            .with_operation(operation)
            .with_context("model", role.model.clone()));
    }
    tracing::debug!(chars = content.len(), "model answered");
    Ok(content)
}

/// Streaming variant; `on_text` sees every delta as it arrives.
pub(crate) async fn complete_streaming<P, F>(
    provider: &P,
    role: &RoleConfig,
    messages: Vec<ChatMessage>,
    usage: &mut UsageTracker,
    operation: &'static str,
    mut on_text: F,
) -> Result<String>
where
    P: LlmProvider,
    F: FnMut(&str),
{
    let mut receiver = provider
        .stream(request(role, messages).with_streaming(true))
        .await
        .map_err(|e| error::from_provider(e, &role.model).with_operation(operation))?;

    let mut text = String::new();
    let mut final_usage = None;
    while let Some(chunk) = receiver.next_chunk().await {
        match chunk {
            StreamChunk::Text(delta) => {
                on_text(&delta);
                text.push_str(&delta);
            }
            StreamChunk::Done { usage, .. } => {
                final_usage = usage;
                break;
            }
            StreamChunk::Error(e) => {
                return Err(genagent_core::Error::inference_failed(e)
                    .with_operation(operation)
                    .with_context("model", role.model.clone()));
            }
        }
    }
    usage.track(&role.model, &final_usage.unwrap_or_default());

    if text.trim().is_empty() {
        return Err(error::response_malformed("model streamed no content")
            .with_operation(operation)
            .with_context("model", role.model.clone()));
    }
    Ok(text)
}
