//! 向量索引类型定义

use serde::{Deserialize, Serialize};

/// 去重键按字符截取的前缀长度
pub const DEDUP_PREFIX_CHARS: usize = 32;

/// 可检索的文本单元
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Passage {
    /// 稳定标识，可能缺失
    pub id: Option<String>,
    pub text: String,
}

impl Passage {
    pub fn new(id: Option<String>, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
        }
    }

    pub fn with_id(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(Some(id.into()), text)
    }

    /// 去重键: 有 id 用 id，否则取文本前 32 个字符
    pub fn dedup_key(&self) -> String {
        match &self.id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => self.text.chars().take(DEDUP_PREFIX_CHARS).collect(),
        }
    }
}

/// k-NN 查询体格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnnSchema {
    /// `{"knn": {"field": f, "query_vector": v, "k": k, "num_candidates": n}}`
    #[default]
    Primary,
    /// `{"knn": {f: {"vector": v, "k": k}}}`
    Legacy,
}

/// 搜索请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    /// 查询向量
    pub vector: Vec<f32>,
    /// 返回数量
    pub k: usize,
    /// 候选池大小 (仅近似检索使用)
    pub num_candidates: usize,
    pub schema: KnnSchema,
}

impl SearchRequest {
    pub fn new(vector: Vec<f32>, k: usize) -> Self {
        Self {
            vector,
            k,
            num_candidates: 100,
            schema: KnnSchema::Primary,
        }
    }

    pub fn with_num_candidates(mut self, num_candidates: usize) -> Self {
        self.num_candidates = num_candidates;
        self
    }

    pub fn with_schema(mut self, schema: KnnSchema) -> Self {
        self.schema = schema;
        self
    }
}

/// 搜索结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub score: f32,
    pub passage: Passage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_key_prefers_id() {
        let passage = Passage::with_id("doc-7", "Some text");
        assert_eq!(passage.dedup_key(), "doc-7");
    }

    #[test]
    fn test_dedup_key_uses_char_prefix() {
        let text = "에이전틱 루프는 계획하고 검색하고 답변을 만든 다음 스스로 평가한다";
        let passage = Passage::new(None, text);
        let key = passage.dedup_key();
        assert_eq!(key.chars().count(), DEDUP_PREFIX_CHARS);
        assert!(text.starts_with(&key));

        let short = Passage::new(Some(String::new()), "short");
        assert_eq!(short.dedup_key(), "short");
    }

    #[test]
    fn test_search_request_builder() {
        let request = SearchRequest::new(vec![0.1, 0.2], 4)
            .with_num_candidates(50)
            .with_schema(KnnSchema::Legacy);
        assert_eq!(request.k, 4);
        assert_eq!(request.num_candidates, 50);
        assert_eq!(request.schema, KnnSchema::Legacy);
    }
}
