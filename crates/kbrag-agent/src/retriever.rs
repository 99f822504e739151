//! Retriever: 多查询检索、去重与排序

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::{StreamExt, TryStreamExt, stream};
use kbrag_ai::{EmbeddingProvider, SimpleTokenCounter, TokenCounter};
use kbrag_core::{CancellationToken, KbRagError, Result, RetryPolicy, with_retry};
use kbrag_vector::{KnnSchema, SearchRequest, SearchResult, VectorIndex};
use tracing::{debug, warn};

use crate::types::{Hit, Query};

pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    counter: Arc<dyn TokenCounter>,
    retry: RetryPolicy,
    max_concurrent_queries: usize,
    num_candidates: usize,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, index: Arc<dyn VectorIndex>) -> Self {
        Self {
            embedder,
            index,
            counter: Arc::new(SimpleTokenCounter::new()),
            retry: RetryPolicy::default(),
            max_concurrent_queries: 4,
            num_candidates: 100,
        }
    }

    pub fn with_token_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.counter = counter;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_concurrent_queries(mut self, n: usize) -> Self {
        self.max_concurrent_queries = n.max(1);
        self
    }

    pub fn with_num_candidates(mut self, n: usize) -> Self {
        self.num_candidates = n;
        self
    }

    /// 并发执行所有查询，合并后去重、排序并截断到 k
    pub async fn retrieve(
        &self,
        queries: &[Query],
        k: usize,
        min_score: f32,
        cancel: &CancellationToken,
    ) -> Result<Vec<Hit>> {
        let per_query: Vec<Vec<Hit>> = stream::iter(queries)
            .map(|query| self.search_one(query, k, min_score, cancel))
            .buffered(self.max_concurrent_queries)
            .try_collect()
            .await?;

        let merged: Vec<Hit> = per_query.into_iter().flatten().collect();
        let total = merged.len();
        let hits = dedup_and_rank(merged, k);
        debug!("{} 个查询共 {} 条命中，去重后保留 {}", queries.len(), total, hits.len());
        Ok(hits)
    }

    async fn search_one(
        &self,
        query: &Query,
        k: usize,
        min_score: f32,
        cancel: &CancellationToken,
    ) -> Result<Vec<Hit>> {
        let text = self
            .counter
            .truncate(&query.text, self.embedder.max_input_tokens());
        if text.len() < query.text.len() {
            debug!("查询超过嵌入输入上限，已截断");
        }

        let embedder = &self.embedder;
        let vector = with_retry(&self.retry, cancel, "embedding", move || {
            let text = text.clone();
            async move { embedder.embed(&text).await }
        })
        .await?;

        if vector.len() != self.index.dimension() {
            return Err(KbRagError::Validation(format!(
                "嵌入维度 {} 与索引维度 {} 不一致",
                vector.len(),
                self.index.dimension()
            )));
        }

        let request = SearchRequest::new(vector, k).with_num_candidates(self.num_candidates);
        let index = self.index.as_ref();
        let per_call = self.retry.timeout;
        // 每次尝试最多两次调用，各自计时
        let attempt_policy = self
            .retry
            .clone()
            .with_timeout(per_call.saturating_mul(2));
        let results = with_retry(&attempt_policy, cancel, "search", move || {
            let request = request.clone();
            async move { search_with_fallback(index, request, per_call).await }
        })
        .await?;

        Ok(results
            .into_iter()
            .filter(|r| r.score.is_finite() && r.score >= min_score)
            .filter(|r| !r.passage.text.is_empty())
            .map(|r| Hit {
                score: r.score,
                passage: r.passage,
                query: query.clone(),
            })
            .collect())
    }
}

/// 先发主查询体，失败后改发旧版查询体
///
/// 两次都失败且主查询体的错误可重试时返回该错误，由外层重试整个尝试。
async fn search_with_fallback(
    index: &dyn VectorIndex,
    request: SearchRequest,
    timeout: Duration,
) -> Result<Vec<SearchResult>> {
    let primary_err = match timed_search(index, request.clone(), timeout).await {
        Ok(results) => return Ok(results),
        Err(e) => e,
    };

    warn!("{} 主查询格式失败 ({})，改用旧版格式", index.name(), primary_err);
    match timed_search(index, request.with_schema(KnnSchema::Legacy), timeout).await {
        Ok(results) => Ok(results),
        Err(legacy_err) if primary_err.is_transient() => {
            debug!("旧版格式同样失败 ({})，按主查询的瞬时错误重试", legacy_err);
            Err(primary_err)
        }
        Err(legacy_err) => Err(legacy_err),
    }
}

async fn timed_search(
    index: &dyn VectorIndex,
    request: SearchRequest,
    timeout: Duration,
) -> Result<Vec<SearchResult>> {
    tokio::time::timeout(timeout, index.search(request))
        .await
        .map_err(|_| KbRagError::Timeout {
            service: "search".to_string(),
            seconds: timeout.as_secs(),
        })?
}

/// 稳定降序排序，同一去重键只保留首个，截断到 k
pub fn dedup_and_rank(mut hits: Vec<Hit>, k: usize) -> Vec<Hit> {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut seen = HashSet::new();
    hits.retain(|hit| seen.insert(hit.dedup_key()));
    hits.truncate(k);
    hits
}
