//! Google Gemini provider (`generateContent` REST API)
//!
//! System turns go into `systemInstruction`; user and assistant turns become
//! `contents` with the roles `user` and `model`.

use super::*;
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Gemini provider
pub struct GeminiProvider {
    client: Client,
    config: ProviderConfig,
}

impl GeminiProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let client = config.http_client(300)?;
        Ok(Self { client, config })
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
    }
}

fn build_request(request: &CompletionRequest) -> GeminiRequest {
    let mut system = Vec::new();
    let mut contents = Vec::new();
    for msg in &request.messages {
        match msg.role {
            Role::System => system.push(GeminiPart { text: msg.content.clone() }),
            Role::User => contents.push(GeminiContent {
                role: Some("user".into()),
                parts: vec![GeminiPart { text: msg.content.clone() }],
            }),
            Role::Assistant => contents.push(GeminiContent {
                role: Some("model".into()),
                parts: vec![GeminiPart { text: msg.content.clone() }],
            }),
        }
    }

    let generation_config = if request.temperature.is_some()
        || request.max_tokens.is_some()
        || request.stop.is_some()
    {
        Some(GenerationConfig {
            temperature: request.temperature,
            max_output_tokens: request.max_tokens,
            stop_sequences: request.stop.clone(),
        })
    } else {
        None
    };

    GeminiRequest {
        contents,
        system_instruction: if system.is_empty() {
            None
        } else {
            Some(GeminiContent { role: None, parts: system })
        },
        generation_config,
    }
}

impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn default_model(&self) -> &str {
        self.config.default_model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let model = request.model.as_deref().unwrap_or(self.default_model()).to_string();
        let api_request = build_request(&request);

        let api_key = self.config.api_key.as_ref()
            .filter(|k| !k.is_empty())
            .ok_or(ProviderError::AuthenticationFailed)?;

        let mut req = self.client
            .post(format!("{}/models/{}:generateContent", self.base_url(), model))
            .header("x-goog-api-key", api_key)
            .json(&api_request);

        for (key, value) in &self.config.headers {
            req = req.header(key, value);
        }

        let response = req.send().await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, text, &model));
        }

        let api_response: GeminiResponse = response.json().await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        Ok(api_response.into_completion(model))
    }
}

// ============================================================================
// Gemini API Types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsage>,
    model_version: Option<String>,
    response_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    prompt_token_count: usize,
    #[serde(default)]
    candidates_token_count: usize,
    #[serde(default)]
    total_token_count: usize,
}

impl GeminiResponse {
    fn into_completion(self, requested_model: String) -> CompletionResponse {
        let candidate = self.candidates.into_iter().next();

        let finish_reason = match candidate.as_ref().and_then(|c| c.finish_reason.as_deref()) {
            Some("STOP") => FinishReason::Stop,
            Some("MAX_TOKENS") => FinishReason::Length,
            Some("SAFETY") | Some("RECITATION") | Some("BLOCKLIST") | Some("PROHIBITED_CONTENT") => {
                FinishReason::ContentFilter
            }
            _ => FinishReason::Unknown,
        };

        let text: String = candidate
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();

        let usage = self.usage_metadata.map(|u| Usage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        }).unwrap_or_default();

        CompletionResponse {
            id: self.response_id.unwrap_or_default(),
            model: self.model_version.unwrap_or(requested_model),
            content: if text.is_empty() { None } else { Some(text) },
            finish_reason,
            usage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_maps_roles() {
        let request = CompletionRequest::new(vec![
            ChatMessage::system("You are a data analysis expert."),
            ChatMessage::user("task"),
            ChatMessage::assistant("draft"),
        ]);
        let body = serde_json::to_value(build_request(&request)).unwrap();

        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "You are a data analysis expert.");
        assert!(body["systemInstruction"].get("role").is_none());
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][1]["role"], "model");
        assert!(body.get("generationConfig").is_none());
    }

    #[test]
    fn test_generation_config_only_when_set() {
        let request = CompletionRequest::new(vec![ChatMessage::user("x")]).with_max_tokens(1024);
        let body = serde_json::to_value(build_request(&request)).unwrap();
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 1024);
    }

    #[test]
    fn test_response_conversion() {
        let body = r#"{
            "candidates": [{"content": {"role": "model", "parts": [{"text": "```python\n"}, {"text": "result = 2.0\n```"}]}, "finishReason": "STOP"}],
            "usageMetadata": {"promptTokenCount": 40, "candidatesTokenCount": 9, "totalTokenCount": 49},
            "modelVersion": "gemini-2.5-flash",
            "responseId": "abc"
        }"#;
        let parsed: GeminiResponse = serde_json::from_str(body).unwrap();
        let completion = parsed.into_completion("fallback".into());

        assert_eq!(completion.content.as_deref(), Some("```python\nresult = 2.0\n```"));
        assert_eq!(completion.finish_reason, FinishReason::Stop);
        assert_eq!(completion.usage.total_tokens, 49);
        assert_eq!(completion.model, "gemini-2.5-flash");
    }

    #[test]
    fn test_blocked_response_has_no_content() {
        let body = r#"{"candidates": [{"finishReason": "SAFETY"}]}"#;
        let parsed: GeminiResponse = serde_json::from_str(body).unwrap();
        let completion = parsed.into_completion("gemini-2.5-flash".into());

        assert!(completion.content.is_none());
        assert_eq!(completion.finish_reason, FinishReason::ContentFilter);
        assert_eq!(completion.model, "gemini-2.5-flash");
    }
}
