//! 进程内精确内积索引
//!
//! 向量在写入与查询时都做 L2 归一化，内积即余弦相似度。

use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::sync::RwLock;

use crate::VectorIndex;
use crate::types::{Passage, SearchRequest, SearchResult};
use kbrag_core::{KbRagError, Result};

/// 结果不足 k 条时的占位下标
const NO_RESULT: i64 = -1;

struct IndexEntry {
    passage: Passage,
    vector: Vec<f32>,
}

/// 语料快照中的单条记录
///
/// 兼容 `["id", "text", [..]]` 与 `{"doc_id"|"id": .., "text": .., "vector"|"embedding": [..]}` 两种写法。
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CorpusEntry {
    Pair(Option<String>, String, Vec<f32>),
    Record(CorpusRecord),
}

#[derive(Debug, Deserialize)]
struct CorpusRecord {
    #[serde(default, alias = "id")]
    doc_id: Option<String>,
    text: String,
    #[serde(alias = "embedding")]
    vector: Vec<f32>,
}

impl CorpusEntry {
    fn into_parts(self) -> (Passage, Vec<f32>) {
        match self {
            CorpusEntry::Pair(id, text, vector) => (Passage::new(id, text), vector),
            CorpusEntry::Record(r) => (Passage::new(r.doc_id, r.text), r.vector),
        }
    }
}

/// 精确内积索引
pub struct FlatIpIndex {
    dimension: usize,
    entries: RwLock<Vec<IndexEntry>>,
}

impl FlatIpIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            entries: RwLock::new(Vec::new()),
        }
    }

    /// 从 JSON 语料快照加载，维度不符的条目直接报错
    pub fn load(path: &Path, dimension: usize) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            KbRagError::VectorStore(format!("读取索引文件 {} 失败: {}", path.display(), e))
        })?;
        Self::from_json(&content, dimension)
    }

    pub fn from_json(content: &str, dimension: usize) -> Result<Self> {
        let entries: Vec<CorpusEntry> = serde_json::from_str(content)?;
        let index = Self::new(dimension);
        for (position, entry) in entries.into_iter().enumerate() {
            let (passage, vector) = entry.into_parts();
            index.add(passage, vector).map_err(|e| match e {
                KbRagError::Validation(msg) => {
                    KbRagError::Validation(format!("第 {} 条记录: {}", position, msg))
                }
                other => other,
            })?;
        }
        Ok(index)
    }

    /// 写入一条记录
    pub fn add(&self, passage: Passage, vector: Vec<f32>) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(KbRagError::Validation(format!(
                "向量维度不匹配: 记录 {} 维, 索引 {} 维",
                vector.len(),
                self.dimension
            )));
        }

        let mut entries = self
            .entries
            .write()
            .map_err(|_| KbRagError::VectorStore("Lock poisoned".to_string()))?;
        entries.push(IndexEntry {
            passage,
            vector: normalize(&vector),
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 返回前 k 个 (分数, 下标)，不足 k 时以 -1 补齐
    fn top_k(entries: &[IndexEntry], query: &[f32], k: usize) -> Vec<(f32, i64)> {
        let mut scored: Vec<(f32, i64)> = entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (dot(query, &entry.vector), i as i64))
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        while scored.len() < k {
            scored.push((f32::NEG_INFINITY, NO_RESULT));
        }
        scored
    }
}

#[async_trait]
impl VectorIndex for FlatIpIndex {
    fn name(&self) -> &str {
        "flat_ip"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn search(&self, request: SearchRequest) -> Result<Vec<SearchResult>> {
        if request.vector.len() != self.dimension {
            return Err(KbRagError::Validation(format!(
                "查询向量维度不匹配: {} != {}",
                request.vector.len(),
                self.dimension
            )));
        }

        let entries = self
            .entries
            .read()
            .map_err(|_| KbRagError::VectorStore("Lock poisoned".to_string()))?;

        let query = normalize(&request.vector);
        let results = Self::top_k(&entries, &query, request.k)
            .into_iter()
            .filter(|(_, idx)| *idx != NO_RESULT)
            .map(|(score, idx)| SearchResult {
                score,
                passage: entries[idx as usize].passage.clone(),
            })
            .collect();

        Ok(results)
    }
}

fn normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    v.iter().map(|x| x / (norm + 1e-12)).collect()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
