//! OpenAI 兼容提供商实现 (chat completions + embeddings)

use async_trait::async_trait;
use kbrag_core::{KbRagError, Message, Result, Role};

use crate::providers::{AIProvider, ProviderConfig, send_json};
use crate::types::{
    ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, FinishReason, TokenUsage,
};

/// OpenAI 提供商
pub struct OpenAIProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new(config: ProviderConfig) -> Self {
        let client = reqwest::Client::new();
        Self { config, client }
    }

    fn get_base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or("https://api.openai.com/v1")
            .trim_end_matches('/')
    }

    fn convert_messages(&self, messages: Vec<Message>) -> Vec<serde_json::Value> {
        messages
            .into_iter()
            .map(|m| {
                let role = match m.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };

                serde_json::json!({
                    "role": role,
                    "content": m.text_content().unwrap_or_default()
                })
            })
            .collect()
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.config.api_key.as_deref() {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

#[async_trait]
impl AIProvider for OpenAIProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.get_base_url());
        let model = if request.model.is_empty() {
            self.config.default_model.clone()
        } else {
            request.model
        };

        let body = serde_json::json!({
            "model": model,
            "messages": self.convert_messages(request.messages),
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "stream": false
        });

        let json = send_json(
            self.authorized(self.client.post(&url)).json(&body),
            "chat",
            KbRagError::AIProvider,
        )
        .await?;

        parse_chat_response(&json)
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse> {
        let url = format!("{}/embeddings", self.get_base_url());

        let json = send_json(
            self.authorized(self.client.post(&url)).json(&serde_json::json!({
                "input": request.input,
                "model": request.model,
            })),
            "embedding",
            KbRagError::Embedding,
        )
        .await?;

        let embeddings = json["data"]
            .as_array()
            .ok_or_else(|| KbRagError::Embedding("响应缺少 data 字段".to_string()))?
            .iter()
            .map(|item| crate::embedding::parse_embedding_value(&item["embedding"]))
            .collect::<Result<Vec<_>>>()?;

        Ok(EmbeddingResponse {
            embeddings,
            model: json["model"].as_str().unwrap_or(&request.model).to_string(),
            usage: TokenUsage::new(
                json["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as usize,
                0,
            ),
        })
    }
}

fn parse_chat_response(json: &serde_json::Value) -> Result<ChatResponse> {
    let choice = json["choices"]
        .as_array()
        .and_then(|choices| choices.first())
        .ok_or_else(|| KbRagError::AIProvider("响应缺少 choices 字段".to_string()))?;

    let content = choice["message"]["content"].as_str().unwrap_or("");

    let usage = json.get("usage").filter(|u| u.is_object()).map(|u| {
        TokenUsage::new(
            u["prompt_tokens"].as_u64().unwrap_or(0) as usize,
            u["completion_tokens"].as_u64().unwrap_or(0) as usize,
        )
    });

    Ok(ChatResponse {
        id: json["id"].as_str().unwrap_or("").to_string(),
        model: json["model"].as_str().unwrap_or("").to_string(),
        message: Message::assistant(content),
        usage,
        finish_reason: FinishReason::from_wire(choice["finish_reason"].as_str()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_provider_creation() {
        let config = ProviderConfig {
            name: "openai".to_string(),
            api_key: Some("test-key".to_string()),
            base_url: Some("http://localhost:8080/v1/".to_string()),
            default_model: "gpt-4o-mini".to_string(),
        };
        let provider = OpenAIProvider::new(config);
        assert_eq!(provider.name(), "openai");
        assert_eq!(provider.get_base_url(), "http://localhost:8080/v1");
    }

    #[test]
    fn test_parse_chat_response() {
        let json = serde_json::json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o-mini",
            "choices": [{"message": {"role": "assistant", "content": "hi"}, "finish_reason": "length"}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3}
        });
        let response = parse_chat_response(&json).unwrap();
        assert_eq!(response.text(), "hi");
        assert_eq!(response.usage, Some(TokenUsage::new(12, 3)));
        assert_eq!(response.finish_reason, FinishReason::Length);
    }

    #[test]
    fn test_parse_chat_response_without_usage() {
        let json = serde_json::json!({
            "choices": [{"message": {"content": "ok"}}]
        });
        let response = parse_chat_response(&json).unwrap();
        assert!(response.usage.is_none());
        assert!(parse_chat_response(&serde_json::json!({"choices": []})).is_err());
    }
}
