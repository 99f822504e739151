//! Embedding Provider Trait
//!
//! 定义独立的嵌入向量生成接口

use std::sync::Arc;

use async_trait::async_trait;
use kbrag_core::{EmbeddingConfig, KbRagError, Result};

use crate::providers::{AIProvider, OpenAIProvider, ProviderConfig, send_json};
use crate::types::EmbeddingRequest;

pub type Embedding = Vec<f32>;
pub type Embeddings = Vec<Embedding>;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;
    fn dimensions(&self) -> usize;
    /// 服务可接受的最大输入 token 数，调用方负责截断
    fn max_input_tokens(&self) -> usize;
    async fn embed(&self, text: &str) -> Result<Embedding>;
    async fn embed_batch(&self, texts: &[String]) -> Result<Embeddings>;
}

/// 解析嵌入向量，兼容以 JSON 字符串编码的数组
pub fn parse_embedding_value(value: &serde_json::Value) -> Result<Embedding> {
    let decoded;
    let array = match value {
        serde_json::Value::String(s) => {
            decoded = serde_json::from_str::<serde_json::Value>(s)
                .map_err(|e| KbRagError::Embedding(format!("嵌入向量字符串无法解析: {}", e)))?;
            &decoded
        }
        other => other,
    };

    array
        .as_array()
        .ok_or_else(|| KbRagError::Embedding("嵌入向量不是数组".to_string()))?
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| KbRagError::Embedding(format!("嵌入向量包含非数值元素: {}", v)))
        })
        .collect()
}

/// 基于 AIProvider 的嵌入适配器
pub struct AIProviderEmbeddingAdapter {
    provider: Arc<dyn AIProvider>,
    model: String,
    dimensions: usize,
    max_input_tokens: usize,
}

impl AIProviderEmbeddingAdapter {
    pub fn new(
        provider: Arc<dyn AIProvider>,
        model: String,
        dimensions: usize,
        max_input_tokens: usize,
    ) -> Self {
        Self {
            provider,
            model,
            dimensions,
            max_input_tokens,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for AIProviderEmbeddingAdapter {
    fn name(&self) -> &str {
        self.provider.name()
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn max_input_tokens(&self) -> usize {
        self.max_input_tokens
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        let embeddings = self.embed_batch(&[text.to_string()]).await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| KbRagError::Embedding("嵌入服务返回空结果".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Embeddings> {
        let request = EmbeddingRequest {
            model: self.model.clone(),
            input: texts.to_vec(),
        };

        let response = self.provider.embed(request).await?;
        Ok(response.embeddings)
    }
}

pub struct OllamaEmbedding {
    model: String,
    base_url: String,
    dimensions: usize,
    max_input_tokens: usize,
    client: reqwest::Client,
}

impl OllamaEmbedding {
    pub fn new(model: &str) -> Self {
        let dimensions = match model {
            "nomic-embed-text" => 768,
            "mxbai-embed-large" => 1024,
            _ => 768,
        };
        Self {
            model: model.to_string(),
            base_url: "http://localhost:11434".to_string(),
            dimensions,
            max_input_tokens: 2048,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = dimensions;
        self
    }

    pub fn with_max_input_tokens(mut self, max_input_tokens: usize) -> Self {
        self.max_input_tokens = max_input_tokens;
        self
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedding {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn max_input_tokens(&self) -> usize {
        self.max_input_tokens
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        let json = send_json(
            self.client
                .post(format!("{}/api/embeddings", self.base_url))
                .json(&serde_json::json!({
                    "model": self.model,
                    "prompt": text,
                })),
            "embedding",
            KbRagError::Embedding,
        )
        .await?;

        parse_embedding_value(&json["embedding"])
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Embeddings> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }
}

/// 根据配置创建嵌入服务
pub fn create_embedding_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "ollama" => {
            let mut ollama = OllamaEmbedding::new(&config.model)
                .with_dimensions(config.dimensions)
                .with_max_input_tokens(config.max_input_tokens);
            if let Some(url) = &config.base_url {
                ollama = ollama.with_base_url(url);
            }
            Ok(Arc::new(ollama))
        }
        "openai" | "openai_compatible" | "custom" => {
            let provider = OpenAIProvider::new(ProviderConfig {
                name: config.provider.clone(),
                api_key: config.api_key.clone(),
                base_url: config.base_url.clone(),
                default_model: config.model.clone(),
            });
            Ok(Arc::new(AIProviderEmbeddingAdapter::new(
                Arc::new(provider),
                config.model.clone(),
                config.dimensions,
                config.max_input_tokens,
            )))
        }
        "anthropic" => Err(KbRagError::Config(
            "Anthropic (Claude) does not provide embedding API. Please use openai or ollama."
                .to_string(),
        )),
        other => Err(KbRagError::Config(format!("未知的嵌入服务: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_embedding_array() {
        let v = parse_embedding_value(&json!([0.5, -1, 2.25])).unwrap();
        assert_eq!(v, vec![0.5, -1.0, 2.25]);
    }

    #[test]
    fn test_parse_embedding_encoded_as_string() {
        let v = parse_embedding_value(&json!("[0.1, 0.2]")).unwrap();
        assert_eq!(v.len(), 2);
        assert!((v[1] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_parse_embedding_rejects_garbage() {
        assert!(parse_embedding_value(&json!({"x": 1})).is_err());
        assert!(parse_embedding_value(&json!(["a"])).is_err());
        assert!(parse_embedding_value(&json!("not json")).is_err());
    }

    #[test]
    fn test_create_embedding_provider() {
        let mut config = EmbeddingConfig::default();
        let provider = create_embedding_provider(&config).unwrap();
        assert_eq!(provider.dimensions(), 1536);
        assert_eq!(provider.max_input_tokens(), 8000);

        config.provider = "ollama".to_string();
        config.model = "nomic-embed-text".to_string();
        config.dimensions = 768;
        let provider = create_embedding_provider(&config).unwrap();
        assert_eq!(provider.name(), "ollama");
        assert_eq!(provider.dimensions(), 768);

        config.provider = "anthropic".to_string();
        assert!(create_embedding_provider(&config).is_err());
    }

    #[tokio::test]
    async fn test_adapter_over_chat_only_provider_reports_embedding_error() {
        let provider = crate::providers::AnthropicProvider::new(ProviderConfig {
            name: "anthropic".to_string(),
            api_key: Some("test-key".to_string()),
            base_url: None,
            default_model: "claude-3-5-haiku-latest".to_string(),
        });
        let adapter =
            AIProviderEmbeddingAdapter::new(Arc::new(provider), "any".to_string(), 4, 512);

        let err = adapter.embed("hello").await.unwrap_err();
        assert!(matches!(err, KbRagError::Embedding(msg) if msg.contains("anthropic")));
    }
}
