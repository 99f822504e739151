//! 向量索引后端实现

mod flat;
mod opensearch;

use async_trait::async_trait;
use kbrag_core::{KbRagError, Result, VectorBackend, VectorConfig};
use std::sync::Arc;

pub use flat::FlatIpIndex;
pub use opensearch::OpenSearchKnnIndex;

use super::types::{SearchRequest, SearchResult};

/// 向量索引 Trait
///
/// 返回结果按分数降序，"无结果" 占位项已在实现内部剔除。
#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn name(&self) -> &str;
    /// 索引向量维度
    fn dimension(&self) -> usize;
    async fn search(&self, request: SearchRequest) -> Result<Vec<SearchResult>>;
}

/// 根据配置创建向量索引
pub fn create_index(config: &VectorConfig, dimension: usize) -> Result<Arc<dyn VectorIndex>> {
    match config.backend {
        VectorBackend::Flat => {
            let flat = config.flat.clone().unwrap_or_default();
            let index = FlatIpIndex::load(&flat.path, dimension)?;
            tracing::info!(
                "已加载进程内索引 {} ({} 条, {} 维)",
                flat.path.display(),
                index.len(),
                dimension
            );
            Ok(Arc::new(index))
        }
        VectorBackend::OpenSearch => {
            let os = config.open_search.clone().ok_or_else(|| {
                KbRagError::Config("backend 为 open_search 时必须提供 open_search 配置".to_string())
            })?;
            Ok(Arc::new(OpenSearchKnnIndex::new(os, dimension)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbrag_core::{FlatIndexConfig, OpenSearchConfig};

    #[test]
    fn test_create_flat_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kb.json");
        std::fs::write(&path, r#"[["a", "alpha", [1.0, 0.0]]]"#).unwrap();

        let config = VectorConfig {
            backend: VectorBackend::Flat,
            flat: Some(FlatIndexConfig { path }),
            open_search: None,
        };
        let index = create_index(&config, 2).unwrap();
        assert_eq!(index.name(), "flat_ip");
        assert_eq!(index.dimension(), 2);
    }

    #[test]
    fn test_create_open_search_index() {
        let mut config = VectorConfig {
            backend: VectorBackend::OpenSearch,
            flat: None,
            open_search: None,
        };
        assert!(matches!(create_index(&config, 8), Err(KbRagError::Config(_))));

        config.open_search = Some(OpenSearchConfig::default());
        let index = create_index(&config, 8).unwrap();
        assert_eq!(index.name(), "opensearch");
    }
}
