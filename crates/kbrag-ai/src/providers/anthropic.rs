//! Anthropic Claude 提供商实现

use async_trait::async_trait;
use kbrag_core::{KbRagError, Message, Result, Role};
use reqwest::header;

use crate::providers::{AIProvider, ProviderConfig, send_json};
use crate::types::{ChatRequest, ChatResponse, FinishReason, TokenUsage};

/// Anthropic 提供商
pub struct AnthropicProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(config: ProviderConfig) -> Self {
        let client = reqwest::Client::new();
        Self { config, client }
    }

    fn get_base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or("https://api.anthropic.com/v1")
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
                    "content": [{"type": "text", "text": m.text_content().unwrap_or_default()}]
                })
            })
            .collect()
    }
}

#[async_trait]
impl AIProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/messages", self.get_base_url());

        let model = if request.model.is_empty() {
            self.config.default_model.clone()
        } else {
            request.model
        };

        let mut body = serde_json::json!({
            "model": model,
            "messages": self.convert_messages(request.messages),
            "max_tokens": request.max_tokens.unwrap_or(1024),
        });

        if let Some(temp) = request.temperature {
            body["temperature"] = serde_json::json!(temp);
        }

        let api_key = self.config.api_key.as_deref().unwrap_or("");

        let json = send_json(
            self.client
                .post(&url)
                .header("x-api-key", api_key)
                .header("anthropic-version", "2023-06-01")
                .header(header::CONTENT_TYPE, "application/json")
                .json(&body),
            "chat",
            KbRagError::AIProvider,
        )
        .await?;

        parse_messages_response(&json)
    }
}

/// 解析 Messages API 响应: 拼接所有 text 块
fn parse_messages_response(json: &serde_json::Value) -> Result<ChatResponse> {
    let blocks = json["content"]
        .as_array()
        .ok_or_else(|| KbRagError::AIProvider("响应缺少 content 字段".to_string()))?;

    let content: String = blocks
        .iter()
        .filter(|b| b["type"].as_str().unwrap_or("text") == "text")
        .filter_map(|b| b["text"].as_str())
        .collect();

    let usage = json.get("usage").filter(|u| u.is_object()).map(|u| {
        TokenUsage::new(
            u["input_tokens"].as_u64().unwrap_or(0) as usize,
            u["output_tokens"].as_u64().unwrap_or(0) as usize,
        )
    });

    Ok(ChatResponse {
        id: json["id"].as_str().unwrap_or("").to_string(),
        model: json["model"].as_str().unwrap_or("").to_string(),
        message: Message::assistant(content.trim()),
        usage,
        finish_reason: FinishReason::from_wire(json["stop_reason"].as_str()),
    })
}
