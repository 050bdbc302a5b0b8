//! Anthropic Claude provider implementation

use super::*;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Anthropic Claude provider
pub struct AnthropicProvider {
    client: Client,
    config: ProviderConfig,
}

impl AnthropicProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let client = build_client(config.timeout_secs.unwrap_or(120))?;
        Ok(Self { client, config })
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or("https://api.anthropic.com/v1")
            .trim_end_matches('/')
    }

    fn build_request(&self, request: &CompletionRequest, stream: bool) -> AnthropicRequest {
        let model = request.model.as_deref().unwrap_or(self.default_model());

        // System prompt travels outside the message list
        let mut system = None;
        let mut messages = Vec::new();
        for msg in &request.messages {
            if msg.role == Role::System {
                system = msg.content.clone();
            } else {
                messages.push(AnthropicMessage::from(msg));
            }
        }

        AnthropicRequest {
            model: model.to_string(),
            messages,
            system,
            max_tokens: request.max_tokens.unwrap_or(4096),
            temperature: request.temperature,
            top_p: request.top_p,
            stream: Some(stream),
            stop_sequences: request.stop.clone(),
        }
    }

    async fn send(&self, body: &AnthropicRequest) -> Result<reqwest::Response, ProviderError> {
        let api_key = self.config.api_key.as_ref()
            .ok_or(ProviderError::AuthenticationFailed)?;

        let mut req = self.client
            .post(format!("{}/messages", self.base_url()))
            .header("x-api-key", api_key)
            .header("content-type", "application/json")
            .json(body);

        if !self.config.headers.contains_key("anthropic-version") {
            req = req.header("anthropic-version", "2023-06-01");
        }
        for (key, value) in &self.config.headers {
            req = req.header(key, value);
        }

        let response = req.send().await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, text, retry_after));
        }
        Ok(response)
    }
}

impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn models(&self) -> Vec<String> {
        vec![
            "claude-sonnet-4-20250514".into(),
            "claude-opus-4-20250514".into(),
            "claude-3-5-sonnet-20241022".into(),
            "claude-3-5-haiku-20241022".into(),
        ]
    }

    fn default_model(&self) -> &str {
        self.config.default_model.as_deref().unwrap_or("claude-sonnet-4-20250514")
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let body = self.build_request(&request, false);
        let response = self.send(&body).await?;

        let api_response: AnthropicResponse = response.json().await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        let content: String = api_response
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Other => None,
            })
            .collect();

        let finish_reason = parse_stop_reason(api_response.stop_reason.as_deref());

        let usage = Usage {
            prompt_tokens: api_response.usage.input_tokens,
            completion_tokens: api_response.usage.output_tokens,
            total_tokens: api_response.usage.input_tokens + api_response.usage.output_tokens,
        };

        Ok(CompletionResponse {
            id: api_response.id,
            model: api_response.model,
            content: if content.is_empty() { None } else { Some(content) },
            finish_reason,
            usage,
        })
    }

    async fn stream(&self, request: CompletionRequest) -> Result<StreamReceiver, ProviderError> {
        let body = self.build_request(&request, true);
        let response = self.send(&body).await?;

        // Create async stream from SSE response
        let stream = async_stream::stream! {
            use futures_util::StreamExt;

            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk_result) = byte_stream.next().await {
                match chunk_result {
                    Ok(bytes) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));

                        // Process complete SSE events
                        while let Some(pos) = buffer.find("\n\n") {
                            let event = buffer[..pos].to_string();
                            buffer = buffer[pos + 2..].to_string();

                            let mut event_type = None;
                            let mut event_data = None;

                            for line in event.lines() {
                                if let Some(t) = line.strip_prefix("event: ") {
                                    event_type = Some(t.to_string());
                                } else if let Some(d) = line.strip_prefix("data: ") {
                                    event_data = Some(d.to_string());
                                }
                            }

                            let (Some(etype), Some(data)) = (event_type, event_data) else {
                                continue;
                            };
                            match etype.as_str() {
                                "content_block_delta" => {
                                    if let Ok(delta) = serde_json::from_str::<ContentBlockDelta>(&data) {
                                        if let DeltaContent::TextDelta { text } = delta.delta {
                                            yield StreamChunk::Text(text);
                                        }
                                    }
                                }
                                "message_delta" => {
                                    if let Ok(delta) = serde_json::from_str::<MessageDelta>(&data) {
                                        if let Some(reason) = delta.delta.stop_reason {
                                            yield StreamChunk::Done {
                                                finish_reason: parse_stop_reason(Some(&reason)),
                                                usage: delta.usage.map(|u| Usage {
                                                    prompt_tokens: 0, // Not available in delta
                                                    completion_tokens: u.output_tokens,
                                                    total_tokens: u.output_tokens,
                                                }),
                                            };
                                        }
                                    }
                                }
                                "message_stop" => {
                                    yield StreamChunk::Done {
                                        finish_reason: FinishReason::Stop,
                                        usage: None,
                                    };
                                    return;
                                }
                                "error" => {
                                    yield StreamChunk::Error(data);
                                    return;
                                }
                                _ => {}
                            }
                        }
                    }
                    Err(e) => {
                        yield StreamChunk::Error(e.to_string());
                        return;
                    }
                }
            }
        };

        Ok(StreamReceiver::new(stream))
    }
}

fn parse_stop_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("end_turn") | Some("stop_sequence") => FinishReason::Stop,
        Some("max_tokens") => FinishReason::Length,
        _ => FinishReason::Unknown,
    }
}

// ============================================================================
// Anthropic API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: AnthropicContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum AnthropicContent {
    Text(String),
    Blocks(Vec<AnthropicContentBlock>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Image { source: ImageSource },
    Text { text: String },
}

#[derive(Debug, Serialize)]
struct ImageSource {
    r#type: &'static str,
    media_type: String,
    data: String,
}

impl From<&ChatMessage> for AnthropicMessage {
    fn from(msg: &ChatMessage) -> Self {
        let role = match msg.role {
            Role::Assistant => "assistant",
            Role::User | Role::System => "user",
        };

        let text = msg.content.clone().unwrap_or_default();
        let content = if msg.images.is_empty() {
            AnthropicContent::Text(text)
        } else {
            // Images first, then the question about them
            let mut blocks: Vec<_> = msg
                .images
                .iter()
                .map(|img| AnthropicContentBlock::Image {
                    source: ImageSource {
                        r#type: "base64",
                        media_type: img.media_type.clone(),
                        data: img.data_base64.clone(),
                    },
                })
                .collect();
            blocks.push(AnthropicContentBlock::Text { text });
            AnthropicContent::Blocks(blocks)
        };

        Self { role, content }
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: usize,
    output_tokens: usize,
}

// Streaming types
#[derive(Debug, Deserialize)]
struct ContentBlockDelta {
    delta: DeltaContent,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum DeltaContent {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessageDelta {
    delta: MessageDeltaContent,
    usage: Option<DeltaUsage>,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaContent {
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeltaUsage {
    output_tokens: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt_is_lifted() {
        let provider = AnthropicProvider::new(ProviderConfig::anthropic("sk-ant")).unwrap();
        let request = CompletionRequest::new(vec![
            ChatMessage::system("You plan 3D scenes"),
            ChatMessage::user("Two chairs"),
        ]);
        let body = provider.build_request(&request, false);

        assert_eq!(body.system.as_deref(), Some("You plan 3D scenes"));
        assert_eq!(body.messages.len(), 1);
        assert_eq!(body.max_tokens, 4096);
    }

    #[test]
    fn test_image_block_precedes_text() {
        let msg = ChatMessage::user("Rate it").with_image(ImageAttachment::new("image/png", "QUJD"));
        let json = serde_json::to_value(AnthropicMessage::from(&msg)).unwrap();

        assert_eq!(json["content"][0]["type"], "image");
        assert_eq!(json["content"][0]["source"]["type"], "base64");
        assert_eq!(json["content"][0]["source"]["data"], "QUJD");
        assert_eq!(json["content"][1]["type"], "text");
    }

    #[test]
    fn test_response_ignores_non_text_blocks() {
        let raw = r#"{
            "id": "msg_1", "model": "claude", "stop_reason": "end_turn",
            "content": [{"type": "thinking", "thinking": "..."}, {"type": "text", "text": "Score: 90"}],
            "usage": {"input_tokens": 10, "output_tokens": 4}
        }"#;
        let parsed: AnthropicResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.content.len(), 2);
        assert!(matches!(parsed.content[1], ContentBlock::Text { .. }));
    }
}
