//! OpenSearch k-NN 索引

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::VectorIndex;
use crate::types::{KnnSchema, Passage, SearchRequest, SearchResult};
use kbrag_core::{KbRagError, OpenSearchConfig, Result};

pub struct OpenSearchKnnIndex {
    config: OpenSearchConfig,
    dimension: usize,
    client: reqwest::Client,
}

impl OpenSearchKnnIndex {
    pub fn new(config: OpenSearchConfig, dimension: usize) -> Self {
        Self {
            config,
            dimension,
            client: reqwest::Client::new(),
        }
    }

    fn search_url(&self) -> String {
        format!(
            "{}/{}/_search",
            self.config.url.trim_end_matches('/'),
            self.config.index
        )
    }

    /// 按 schema 构造查询体
    pub fn query_body(&self, request: &SearchRequest) -> Value {
        let field = self.config.field.as_str();
        let knn = match request.schema {
            KnnSchema::Primary => json!({
                "field": field,
                "query_vector": request.vector,
                "k": request.k,
                "num_candidates": request.num_candidates,
            }),
            KnnSchema::Legacy => json!({
                field: {
                    "vector": request.vector,
                    "k": request.k,
                }
            }),
        };

        json!({
            "size": request.k,
            "query": { "knn": knn },
        })
    }

    /// 把 hits.hits 归一为 Passage，缺文本的命中视为无结果
    fn parse_hits(&self, json: &Value) -> Vec<SearchResult> {
        let Some(hits) = json["hits"]["hits"].as_array() else {
            return Vec::new();
        };

        hits.iter()
            .filter_map(|hit| {
                let source = &hit["_source"];
                let text = source[self.config.text_field.as_str()].as_str()?;
                let id = source["doc_id"]
                    .as_str()
                    .or_else(|| hit["_id"].as_str())
                    .map(str::to_string);
                let score = hit["_score"].as_f64().unwrap_or(0.0) as f32;

                Some(SearchResult {
                    score,
                    passage: Passage::new(id, text),
                })
            })
            .collect()
    }
}

#[async_trait]
impl VectorIndex for OpenSearchKnnIndex {
    fn name(&self) -> &str {
        "opensearch"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn search(&self, request: SearchRequest) -> Result<Vec<SearchResult>> {
        let body = self.query_body(&request);
        tracing::debug!(schema = ?request.schema, k = request.k, "OpenSearch k-NN 查询");

        let mut builder = self.client.post(self.search_url()).json(&body);
        if let Some(username) = &self.config.username {
            builder = builder.basic_auth(username, self.config.password.as_deref());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| KbRagError::transient("search", format!("请求失败: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(KbRagError::from_status(
                "search",
                status.as_u16(),
                &error_text,
                KbRagError::VectorStore,
            ));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| KbRagError::VectorStore(format!("解析搜索响应失败: {}", e)))?;

        Ok(self.parse_hits(&json))
    }
}
