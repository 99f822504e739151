//! AI 提供商实现

mod anthropic;
mod factory;
mod openai;

pub use anthropic::*;
pub use factory::*;
pub use openai::*;

use async_trait::async_trait;
use kbrag_core::{KbRagError, Result};

use crate::types::{ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse};

/// AI 提供商 Trait
#[async_trait]
pub trait AIProvider: Send + Sync {
    /// 提供商名称
    fn name(&self) -> &str;

    /// 发送聊天请求
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse>;

    /// 生成嵌入向量，不提供嵌入接口的提供商沿用默认实现
    async fn embed(&self, _request: EmbeddingRequest) -> Result<EmbeddingResponse> {
        Err(KbRagError::Embedding(format!("{} 不提供嵌入接口", self.name())))
    }
}

/// 提供商配置
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub name: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub default_model: String,
}

/// 发送请求并解析 JSON 响应
///
/// 连接失败与 5xx/429 归为瞬时错误，其余非成功状态交给 `permanent` 构造。
pub(crate) async fn send_json(
    request: reqwest::RequestBuilder,
    service: &str,
    permanent: fn(String) -> kbrag_core::KbRagError,
) -> Result<serde_json::Value> {
    let response = request
        .send()
        .await
        .map_err(|e| kbrag_core::KbRagError::transient(service, format!("请求失败: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        return Err(kbrag_core::KbRagError::from_status(
            service,
            status.as_u16(),
            &error_text,
            permanent,
        ));
    }

    response
        .json()
        .await
        .map_err(|e| permanent(format!("{} 解析响应失败: {}", service, e)))
}
