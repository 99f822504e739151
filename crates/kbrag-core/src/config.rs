//! 配置管理

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{KbRagError, Result};

/// 主配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// 生成模型配置
    pub ai: AiConfig,
    /// 嵌入服务配置
    pub embedding: EmbeddingConfig,
    /// 向量索引配置
    pub vector: VectorConfig,
    /// 问答循环配置
    pub agent: AgentLoopConfig,
    /// 外部调用重试配置
    pub retry: RetryConfig,
}

/// 生成模型配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    /// openai | anthropic
    pub provider: String,
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub planner: CompletionParams,
    pub generator: CompletionParams,
    pub evaluator: CompletionParams,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            base_url: None,
            planner: CompletionParams::new(400, 0.2),
            generator: CompletionParams::new(500, 0.3),
            evaluator: CompletionParams::new(300, 0.2),
        }
    }
}

/// 单次补全参数
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CompletionParams {
    pub max_tokens: usize,
    pub temperature: f32,
}

impl CompletionParams {
    pub fn new(max_tokens: usize, temperature: f32) -> Self {
        Self {
            max_tokens,
            temperature,
        }
    }
}

/// 嵌入服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// openai | ollama
    pub provider: String,
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    /// 向量维度，必须与索引维度一致
    pub dimensions: usize,
    /// 服务可接受的最大输入 token 数
    pub max_input_tokens: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "text-embedding-3-small".to_string(),
            api_key: None,
            base_url: None,
            dimensions: 1536,
            max_input_tokens: 8000,
        }
    }
}

/// 向量索引配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    /// 后端类型
    pub backend: VectorBackend,
    /// 进程内精确索引配置
    pub flat: Option<FlatIndexConfig>,
    /// OpenSearch k-NN 配置
    pub open_search: Option<OpenSearchConfig>,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            backend: VectorBackend::Flat,
            flat: Some(FlatIndexConfig::default()),
            open_search: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum VectorBackend {
    Flat,
    OpenSearch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatIndexConfig {
    /// 语料快照 (JSON)，每项包含 id、文本与向量
    pub path: PathBuf,
}

impl Default for FlatIndexConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/kb_index.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenSearchConfig {
    pub url: String,
    pub index: String,
    /// 向量字段名
    pub field: String,
    /// 文本字段名
    pub text_field: String,
    /// 候选池大小
    pub num_candidates: usize,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for OpenSearchConfig {
    fn default() -> Self {
        Self {
            url: "https://localhost:9200".to_string(),
            index: "kb-rag".to_string(),
            field: "embedding".to_string(),
            text_field: "text".to_string(),
            num_candidates: 100,
            username: None,
            password: None,
        }
    }
}

/// 问答循环配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentLoopConfig {
    /// 每轮保留的段落数
    pub k: usize,
    /// 相似度阈值
    pub min_score: f32,
    /// 最大迭代次数
    pub max_iterations: u32,
    /// 检索阶段的并发查询上限
    pub max_concurrent_queries: usize,
    /// 回答语言 (可选)
    pub answer_language: Option<String>,
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self {
            k: 4,
            min_score: 0.2,
            max_iterations: 3,
            max_concurrent_queries: 4,
            answer_language: None,
        }
    }
}

/// 外部调用重试配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// 首次调用之外的最大重试次数
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// 单次调用超时 (秒)
    pub timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 500,
            max_backoff_ms: 8000,
            timeout_secs: 60,
        }
    }
}

impl Config {
    /// 从文件加载配置
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| KbRagError::Config(format!("读取配置文件失败: {}", e)))?;

        let config: Config = serde_json::from_str(&content)
            .map_err(|e| KbRagError::Config(format!("解析配置文件失败: {}", e)))?;

        Ok(config)
    }

    /// 用进程环境变量覆盖配置
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// 用任意键值来源覆盖配置
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(provider) = get("KBRAG_AI_PROVIDER") {
            self.ai.provider = provider;
        }
        if let Some(model) = get("KBRAG_AI_MODEL") {
            self.ai.model = model;
        }
        if let Some(base_url) = get("KBRAG_AI_BASE_URL") {
            self.ai.base_url = Some(base_url);
        }
        if let Some(key) = get("KBRAG_AI_API_KEY") {
            self.ai.api_key = Some(key);
        } else if self.ai.api_key.is_none() {
            let vendor_key = match self.ai.provider.as_str() {
                "anthropic" => get("ANTHROPIC_API_KEY"),
                _ => get("OPENAI_API_KEY"),
            };
            self.ai.api_key = vendor_key;
        }

        if let Some(model) = get("KBRAG_EMBED_MODEL") {
            self.embedding.model = model;
        }
        if let Some(base_url) = get("KBRAG_EMBED_BASE_URL") {
            self.embedding.base_url = Some(base_url);
        }
        if let Some(key) = get("KBRAG_EMBED_API_KEY") {
            self.embedding.api_key = Some(key);
        } else if self.embedding.api_key.is_none() && self.embedding.provider == "openai" {
            self.embedding.api_key = get("OPENAI_API_KEY");
        }

        if let Some(url) = get("KBRAG_OPENSEARCH_URL") {
            self.vector.backend = VectorBackend::OpenSearch;
            self.vector.open_search.get_or_insert_with(OpenSearchConfig::default).url = url;
        }
        if let Some(index) = get("KBRAG_OPENSEARCH_INDEX") {
            self.vector.open_search.get_or_insert_with(OpenSearchConfig::default).index = index;
        }
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.agent.k == 0 {
            return Err(KbRagError::Config("agent.k 必须大于 0".to_string()));
        }
        if self.agent.max_iterations == 0 {
            return Err(KbRagError::Config(
                "agent.max_iterations 必须大于 0".to_string(),
            ));
        }
        if !(-1.0..=1.0).contains(&self.agent.min_score) {
            return Err(KbRagError::Config(format!(
                "agent.min_score 超出范围 [-1, 1]: {}",
                self.agent.min_score
            )));
        }
        if self.agent.max_concurrent_queries == 0 {
            return Err(KbRagError::Config(
                "agent.max_concurrent_queries 必须大于 0".to_string(),
            ));
        }
        if self.embedding.dimensions == 0 {
            return Err(KbRagError::Config(
                "embedding.dimensions 必须大于 0".to_string(),
            ));
        }
        match self.vector.backend {
            VectorBackend::Flat if self.vector.flat.is_none() => Err(KbRagError::Config(
                "vector.backend = flat 但缺少 vector.flat 配置".to_string(),
            )),
            VectorBackend::OpenSearch if self.vector.open_search.is_none() => {
                Err(KbRagError::Config(
                    "vector.backend = open_search 但缺少 vector.open_search 配置".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.agent.k, 4);
        assert_eq!(config.agent.max_iterations, 3);
        assert_eq!(config.vector.backend, VectorBackend::Flat);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kbrag.json");
        std::fs::write(
            &path,
            r#"{"agent": {"k": 6}, "vector": {"backend": "open_search", "open_search": {"url": "http://os:9200"}}}"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.agent.k, 6);
        assert_eq!(config.agent.max_iterations, 3);
        assert_eq!(config.vector.backend, VectorBackend::OpenSearch);
        let os = config.vector.open_search.unwrap();
        assert_eq!(os.url, "http://os:9200");
        assert_eq!(os.num_candidates, 100);
        assert_eq!(os.field, "embedding");
    }

    #[test]
    fn test_serialized_config_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kbrag.json");

        let mut config = Config::default();
        config.agent.answer_language = Some("Korean".to_string());
        std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.agent.answer_language.as_deref(), Some("Korean"));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("KBRAG_AI_PROVIDER", "anthropic"),
            ("ANTHROPIC_API_KEY", "sk-ant"),
            ("OPENAI_API_KEY", "sk-openai"),
            ("KBRAG_OPENSEARCH_URL", "https://aoss.example.com"),
        ]);

        let mut config = Config::default();
        config.apply_overrides_from(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.ai.provider, "anthropic");
        assert_eq!(config.ai.api_key.as_deref(), Some("sk-ant"));
        assert_eq!(config.embedding.api_key.as_deref(), Some("sk-openai"));
        assert_eq!(config.vector.backend, VectorBackend::OpenSearch);
        assert_eq!(
            config.vector.open_search.unwrap().url,
            "https://aoss.example.com"
        );
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.agent.max_iterations = 0;
        assert!(matches!(config.validate(), Err(KbRagError::Config(_))));

        let mut config = Config::default();
        config.agent.min_score = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.vector.backend = VectorBackend::OpenSearch;
        assert!(config.validate().is_err());
    }
}
