//! Anthropic Messages API
//!
//! System turns travel in a separate `system` field rather than in the
//! message list, and `max_tokens` is mandatory.

use super::*;
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
pub const API_VERSION: &str = "2023-06-01";

const DEFAULT_MAX_TOKENS: usize = 8192;

pub struct AnthropicProvider {
    client: Client,
    config: ProviderConfig,
}

impl AnthropicProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let client = config.http_client(120)?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        let base = self.config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        format!("{}/messages", base.trim_end_matches('/'))
    }
}

/// Several system turns are joined in order with a blank line.
fn build_request<'a>(model: &'a str, request: &'a CompletionRequest) -> MessagesBody<'a> {
    let mut system: Vec<&str> = Vec::new();
    let mut messages = Vec::with_capacity(request.messages.len());
    for msg in &request.messages {
        match msg.role {
            Role::System => system.push(&msg.content),
            Role::User => messages.push(Turn { role: "user", content: &msg.content }),
            Role::Assistant => messages.push(Turn { role: "assistant", content: &msg.content }),
        }
    }

    MessagesBody {
        model,
        system: if system.is_empty() { None } else { Some(system.join("\n\n")) },
        messages,
        max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        temperature: request.temperature,
        stop_sequences: request.stop.as_deref(),
    }
}

impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn default_model(&self) -> &str {
        self.config.default_model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let model = request.model.as_deref().unwrap_or(self.default_model());
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or(ProviderError::AuthenticationFailed)?;

        let mut http = self
            .client
            .post(self.endpoint())
            .header("x-api-key", api_key)
            .json(&build_request(model, &request));
        if !self.config.headers.contains_key("anthropic-version") {
            http = http.header("anthropic-version", API_VERSION);
        }
        for (key, value) in &self.config.headers {
            http = http.header(key, value);
        }

        let response = http
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status.as_u16(), body, model));
        }

        let reply: MessagesReply = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(reply.into_completion(model))
    }
}

// Wire types

#[derive(Debug, Serialize)]
struct MessagesBody<'a> {
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Turn<'a>>,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<&'a [String]>,
}

#[derive(Debug, Serialize)]
struct Turn<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesReply {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: TokenCounts,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
struct TokenCounts {
    #[serde(default)]
    input_tokens: usize,
    #[serde(default)]
    output_tokens: usize,
}

impl MessagesReply {
    fn into_completion(self, requested_model: &str) -> CompletionResponse {
        let text: String = self
            .content
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Other => None,
            })
            .collect();

        let finish_reason = match self.stop_reason.as_deref() {
            Some("end_turn" | "stop_sequence") => FinishReason::Stop,
            Some("max_tokens") => FinishReason::Length,
            Some("refusal") => FinishReason::ContentFilter,
            _ => FinishReason::Unknown,
        };

        CompletionResponse {
            id: self.id,
            model: if self.model.is_empty() {
                requested_model.to_string()
            } else {
                self.model
            },
            content: if text.is_empty() { None } else { Some(text) },
            finish_reason,
            usage: Usage {
                prompt_tokens: self.usage.input_tokens,
                completion_tokens: self.usage.output_tokens,
                total_tokens: self.usage.input_tokens + self.usage.output_tokens,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_turns_are_lifted() {
        let request = CompletionRequest::new(vec![
            ChatMessage::system("rule one"),
            ChatMessage::system("rule two"),
            ChatMessage::user("task"),
        ]);
        let body = serde_json::to_value(build_request("m", &request)).unwrap();

        assert_eq!(body["system"], "rule one\n\nrule two");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["max_tokens"], 8192);
    }

    #[test]
    fn test_reply_skips_non_text_blocks() {
        let body = r#"{
            "id": "msg_1",
            "content": [{"type": "thinking", "thinking": "..."}, {"type": "text", "text": "result = 2.0"}],
            "stop_reason": "max_tokens",
            "usage": {"input_tokens": 10, "output_tokens": 4}
        }"#;
        let reply: MessagesReply = serde_json::from_str(body).unwrap();
        let completion = reply.into_completion("claude-test");

        assert_eq!(completion.content.as_deref(), Some("result = 2.0"));
        assert_eq!(completion.model, "claude-test");
        assert_eq!(completion.finish_reason, FinishReason::Length);
        assert_eq!(completion.usage.total_tokens, 14);
    }

    #[test]
    fn test_reply_without_text_has_no_content() {
        let reply: MessagesReply = serde_json::from_str(r#"{"content": []}"#).unwrap();
        assert_eq!(reply.into_completion("m").text(), "");
    }
}
