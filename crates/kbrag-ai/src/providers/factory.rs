//! AI 提供商工厂

use std::sync::Arc;

use kbrag_core::{AiConfig, KbRagError, Result};

use super::{AIProvider, AnthropicProvider, OpenAIProvider, ProviderConfig};

/// 提供商类型枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderType {
    /// OpenAI 及所有 OpenAI 兼容服务
    OpenAI,
    Anthropic,
}

impl ProviderType {
    /// 从字符串解析提供商类型
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "openai" | "openai_compatible" | "custom" => Some(ProviderType::OpenAI),
            "anthropic" | "claude" => Some(ProviderType::Anthropic),
            _ => None,
        }
    }
}

/// 根据配置创建生成模型提供商
pub fn create_provider(config: &AiConfig) -> Result<Arc<dyn AIProvider>> {
    let provider_type = ProviderType::parse(&config.provider)
        .ok_or_else(|| KbRagError::Config(format!("未知的 AI 提供商: {}", config.provider)))?;

    let provider_config = ProviderConfig {
        name: config.provider.clone(),
        api_key: config.api_key.clone(),
        base_url: config.base_url.clone(),
        default_model: config.model.clone(),
    };

    let provider: Arc<dyn AIProvider> = match provider_type {
        ProviderType::OpenAI => Arc::new(OpenAIProvider::new(provider_config)),
        ProviderType::Anthropic => Arc::new(AnthropicProvider::new(provider_config)),
    };

    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_provider_type() {
        assert_eq!(ProviderType::parse("OpenAI"), Some(ProviderType::OpenAI));
        assert_eq!(ProviderType::parse("claude"), Some(ProviderType::Anthropic));
        assert_eq!(ProviderType::parse("bedrock"), None);
    }

    #[test]
    fn test_create_provider() {
        let mut config = AiConfig::default();
        config.provider = "anthropic".to_string();
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.name(), "anthropic");

        config.provider = "unknown".to_string();
        assert!(matches!(create_provider(&config), Err(KbRagError::Config(_))));
    }
}
