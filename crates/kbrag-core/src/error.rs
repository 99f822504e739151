//! 统一错误处理

use thiserror::Error;

#[derive(Error, Debug)]
pub enum KbRagError {
    #[error("配置错误: {0}")]
    Config(String),

    /// 致命校验错误 (例如嵌入维度与索引维度不一致)，不会重试
    #[error("校验错误: {0}")]
    Validation(String),

    /// 可重试的瞬时错误 (网络、5xx、429)
    #[error("{service} 瞬时错误: {message}")]
    Transient { service: String, message: String },

    #[error("{service} 调用超时 ({seconds}s)")]
    Timeout { service: String, seconds: u64 },

    #[error("{service} 重试 {attempts} 次后仍失败: {last}")]
    RetriesExhausted {
        service: String,
        attempts: u32,
        last: String,
    },

    #[error("运行已取消")]
    Cancelled,

    #[error("AI 提供商错误: {0}")]
    AIProvider(String),

    #[error("嵌入服务错误: {0}")]
    Embedding(String),

    #[error("向量存储错误: {0}")]
    VectorStore(String),

    #[error("Token 计数错误: {0}")]
    TokenCount(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl KbRagError {
    pub fn transient(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            service: service.into(),
            message: message.into(),
        }
    }

    /// 是否值得重试
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Timeout { .. })
    }

    /// 按 HTTP 状态码归类服务错误: 5xx 与 429 视为瞬时错误
    pub fn from_status(
        service: &str,
        status: u16,
        body: &str,
        permanent: fn(String) -> KbRagError,
    ) -> Self {
        if status >= 500 || status == 429 {
            Self::transient(service, format!("HTTP {}: {}", status, body))
        } else {
            permanent(format!("{} HTTP {}: {}", service, status, body))
        }
    }
}

pub type Result<T> = std::result::Result<T, KbRagError>;
