//! kbrag 测试替身
//!
//! 手写的脚本化 mock，供各 crate 的集成测试共享。

pub mod ai {
    use async_trait::async_trait;
    use kbrag_ai::{
        AIProvider, ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, FinishReason,
        TokenUsage,
    };
    use kbrag_core::{KbRagError, Message, Result};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// 注入的失败类型
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Failure {
        /// 可重试的瞬时错误
        Transient,
        /// 不可重试的提供商错误
        Permanent,
    }

    /// 按顺序回放脚本响应的生成模型
    ///
    /// 队列耗尽后一直返回最后一条响应。
    #[derive(Clone)]
    pub struct MockAiProvider {
        responses: Arc<Mutex<VecDeque<String>>>,
        last: Arc<Mutex<String>>,
        prompts: Arc<Mutex<Vec<String>>>,
        failures: Arc<Mutex<VecDeque<Failure>>>,
        usage: Option<TokenUsage>,
    }

    impl Default for MockAiProvider {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockAiProvider {
        pub fn new() -> Self {
            Self {
                responses: Arc::new(Mutex::new(VecDeque::new())),
                last: Arc::new(Mutex::new("Mock AI response".to_string())),
                prompts: Arc::new(Mutex::new(Vec::new())),
                failures: Arc::new(Mutex::new(VecDeque::new())),
                usage: Some(TokenUsage::new(10, 20)),
            }
        }

        pub fn with_response(self, response: impl Into<String>) -> Self {
            self.responses.lock().unwrap().push_back(response.into());
            self
        }

        pub fn with_responses<I, S>(self, responses: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            self.responses
                .lock()
                .unwrap()
                .extend(responses.into_iter().map(Into::into));
            self
        }

        /// 每次调用上报的用量，None 表示服务不返回用量
        pub fn with_usage(mut self, usage: Option<TokenUsage>) -> Self {
            self.usage = usage;
            self
        }

        /// 接下来的调用依次失败
        pub fn fail_next(&self, failure: Failure, times: usize) {
            let mut failures = self.failures.lock().unwrap();
            for _ in 0..times {
                failures.push_back(failure);
            }
        }

        pub fn call_count(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }

        /// 已收到的提示词 (按调用顺序)
        pub fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AIProvider for MockAiProvider {
        fn name(&self) -> &str {
            "mock-ai-provider"
        }

        async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
            let prompt = request
                .messages
                .iter()
                .filter_map(|m| m.text_content())
                .collect::<Vec<_>>()
                .join("\n");
            self.prompts.lock().unwrap().push(prompt);

            if let Some(failure) = self.failures.lock().unwrap().pop_front() {
                return Err(match failure {
                    Failure::Transient => KbRagError::transient("chat", "mock connection reset"),
                    Failure::Permanent => KbRagError::AIProvider("mock bad request".to_string()),
                });
            }

            let content = {
                let mut last = self.last.lock().unwrap();
                if let Some(next) = self.responses.lock().unwrap().pop_front() {
                    *last = next;
                }
                last.clone()
            };

            Ok(ChatResponse {
                id: "mock-chat-1".to_string(),
                model: "mock-model".to_string(),
                message: Message::assistant(content),
                usage: self.usage,
                finish_reason: FinishReason::Stop,
            })
        }

        async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse> {
            Ok(EmbeddingResponse {
                embeddings: request.input.iter().map(|_| vec![1.0, 0.0]).collect(),
                model: "mock-embedding".to_string(),
                usage: TokenUsage::default(),
            })
        }
    }
}

pub mod embedding {
    use async_trait::async_trait;
    use kbrag_ai::{Embedding, EmbeddingProvider, Embeddings};
    use kbrag_core::{KbRagError, Result};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// 按文本查表的嵌入服务，未登记的文本返回第一维为 1 的单位向量
    #[derive(Clone)]
    pub struct MockEmbedding {
        dimensions: usize,
        max_input_tokens: usize,
        vectors: Arc<Mutex<HashMap<String, Embedding>>>,
        inputs: Arc<Mutex<Vec<String>>>,
        transient_failures: Arc<Mutex<usize>>,
    }

    impl MockEmbedding {
        pub fn new(dimensions: usize) -> Self {
            Self {
                dimensions,
                max_input_tokens: 8000,
                vectors: Arc::new(Mutex::new(HashMap::new())),
                inputs: Arc::new(Mutex::new(Vec::new())),
                transient_failures: Arc::new(Mutex::new(0)),
            }
        }

        pub fn with_max_input_tokens(mut self, max_input_tokens: usize) -> Self {
            self.max_input_tokens = max_input_tokens;
            self
        }

        pub fn with_vector(self, text: impl Into<String>, vector: Embedding) -> Self {
            self.vectors.lock().unwrap().insert(text.into(), vector);
            self
        }

        pub fn fail_next(&self, times: usize) {
            *self.transient_failures.lock().unwrap() += times;
        }

        /// 实际收到的输入文本
        pub fn inputs(&self) -> Vec<String> {
            self.inputs.lock().unwrap().clone()
        }

        pub fn call_count(&self) -> usize {
            self.inputs.lock().unwrap().len()
        }

        fn unit_vector(&self) -> Embedding {
            let mut v = vec![0.0; self.dimensions];
            if let Some(first) = v.first_mut() {
                *first = 1.0;
            }
            v
        }
    }

    #[async_trait]
    impl EmbeddingProvider for MockEmbedding {
        fn name(&self) -> &str {
            "mock-embedding"
        }

        fn model(&self) -> &str {
            "mock-embedding-model"
        }

        fn dimensions(&self) -> usize {
            self.dimensions
        }

        fn max_input_tokens(&self) -> usize {
            self.max_input_tokens
        }

        async fn embed(&self, text: &str) -> Result<Embedding> {
            self.inputs.lock().unwrap().push(text.to_string());

            {
                let mut failures = self.transient_failures.lock().unwrap();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(KbRagError::transient("embedding", "mock throttled"));
                }
            }

            let vectors = self.vectors.lock().unwrap();
            Ok(vectors
                .get(text)
                .cloned()
                .unwrap_or_else(|| self.unit_vector()))
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Embeddings> {
            let mut results = Vec::with_capacity(texts.len());
            for text in texts {
                results.push(self.embed(text).await?);
            }
            Ok(results)
        }
    }
}

pub mod vector {
    use async_trait::async_trait;
    use kbrag_core::{KbRagError, Result};
    use kbrag_vector::{KnnSchema, Passage, SearchRequest, SearchResult, VectorIndex};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use crate::ai::Failure;

    /// 构造一条带 id 的搜索结果
    pub fn result(score: f32, id: &str, text: &str) -> SearchResult {
        SearchResult {
            score,
            passage: Passage::with_id(id, text),
        }
    }

    /// 构造一条无 id 的搜索结果
    pub fn anonymous(score: f32, text: &str) -> SearchResult {
        SearchResult {
            score,
            passage: Passage::new(None, text),
        }
    }

    /// 按查询向量返回预置结果的索引
    #[derive(Clone)]
    pub struct MockVectorIndex {
        dimension: usize,
        scripted: Arc<Mutex<Vec<(Vec<f32>, Vec<SearchResult>)>>>,
        default_results: Arc<Mutex<Vec<SearchResult>>>,
        requests: Arc<Mutex<Vec<KnnSchema>>>,
        failures: Arc<Mutex<VecDeque<Failure>>>,
        primary_stall: Option<Duration>,
        reject_primary: bool,
        reject_legacy: bool,
        reject_all: bool,
    }

    impl MockVectorIndex {
        pub fn new(dimension: usize) -> Self {
            Self {
                dimension,
                scripted: Arc::new(Mutex::new(Vec::new())),
                default_results: Arc::new(Mutex::new(Vec::new())),
                requests: Arc::new(Mutex::new(Vec::new())),
                failures: Arc::new(Mutex::new(VecDeque::new())),
                primary_stall: None,
                reject_primary: false,
                reject_legacy: false,
                reject_all: false,
            }
        }

        /// 查询向量等于 `vector` 时返回 `results`
        pub fn with_results(self, vector: Vec<f32>, results: Vec<SearchResult>) -> Self {
            self.scripted.lock().unwrap().push((vector, results));
            self
        }

        pub fn with_default_results(self, results: Vec<SearchResult>) -> Self {
            *self.default_results.lock().unwrap() = results;
            self
        }

        /// 模拟只认旧版查询体的集群
        pub fn rejecting_primary(mut self) -> Self {
            self.reject_primary = true;
            self
        }

        /// 模拟只认新版查询体的集群
        pub fn rejecting_legacy(mut self) -> Self {
            self.reject_legacy = true;
            self
        }

        /// 主查询体请求先挂起 `stall`
        pub fn stalling_primary(mut self, stall: Duration) -> Self {
            self.primary_stall = Some(stall);
            self
        }

        /// 接下来的调用依次失败，不区分查询体
        pub fn fail_next(&self, failure: Failure, times: usize) {
            let mut failures = self.failures.lock().unwrap();
            for _ in 0..times {
                failures.push_back(failure);
            }
        }

        pub fn rejecting_all(mut self) -> Self {
            self.reject_all = true;
            self
        }

        /// 收到的请求 schema (按调用顺序)
        pub fn requests(&self) -> Vec<KnnSchema> {
            self.requests.lock().unwrap().clone()
        }

        pub fn call_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl VectorIndex for MockVectorIndex {
        fn name(&self) -> &str {
            "mock-index"
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        async fn search(&self, request: SearchRequest) -> Result<Vec<SearchResult>> {
            self.requests.lock().unwrap().push(request.schema);

            if let (Some(stall), KnnSchema::Primary) = (self.primary_stall, request.schema) {
                tokio::time::sleep(stall).await;
            }

            let failure = self.failures.lock().unwrap().pop_front();
            if let Some(failure) = failure {
                return Err(match failure {
                    Failure::Transient => KbRagError::transient("search", "mock HTTP 503"),
                    Failure::Permanent => {
                        KbRagError::VectorStore("mock HTTP 400: bad request".to_string())
                    }
                });
            }

            let rejected = match request.schema {
                KnnSchema::Primary => self.reject_primary,
                KnnSchema::Legacy => self.reject_legacy,
            };
            if self.reject_all || rejected {
                return Err(KbRagError::VectorStore(
                    "mock HTTP 400: unknown knn parameter".to_string(),
                ));
            }

            let scripted = self.scripted.lock().unwrap();
            let mut results = scripted
                .iter()
                .find(|(v, _)| *v == request.vector)
                .map(|(_, r)| r.clone())
                .unwrap_or_else(|| self.default_results.lock().unwrap().clone());
            results.truncate(request.k);
            Ok(results)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ai::{Failure, MockAiProvider};
    use super::vector::{MockVectorIndex, result};
    use kbrag_ai::{AIProvider, ChatRequest};
    use kbrag_vector::{KnnSchema, SearchRequest, VectorIndex};
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_mock_ai_replays_script_then_repeats_last() {
        let provider = MockAiProvider::new().with_responses(["one", "two"]);

        let mut texts = Vec::new();
        for _ in 0..3 {
            let response = assert_ok!(provider.chat(ChatRequest::single_prompt("m", "hi")).await);
            texts.push(response.text());
        }

        assert_eq!(texts, vec!["one", "two", "two"]);
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn test_mock_ai_failure_injection() {
        let provider = MockAiProvider::new();
        provider.fail_next(Failure::Transient, 1);

        let err = assert_err!(provider.chat(ChatRequest::single_prompt("m", "hi")).await);
        assert!(err.is_transient());
        assert_ok!(provider.chat(ChatRequest::single_prompt("m", "hi")).await);
    }

    #[tokio::test]
    async fn test_mock_index_rejects_primary() {
        let index = MockVectorIndex::new(2)
            .with_default_results(vec![result(0.9, "a", "alpha")])
            .rejecting_primary();

        assert_err!(index.search(SearchRequest::new(vec![1.0, 0.0], 4)).await);
        let results = assert_ok!(
            index
                .search(SearchRequest::new(vec![1.0, 0.0], 4).with_schema(KnnSchema::Legacy))
                .await
        );
        assert_eq!(results.len(), 1);
        assert_eq!(index.requests(), vec![KnnSchema::Primary, KnnSchema::Legacy]);
    }

    #[tokio::test]
    async fn test_mock_index_failure_injection() {
        let index = MockVectorIndex::new(2)
            .with_default_results(vec![result(0.9, "a", "alpha")])
            .rejecting_legacy();
        index.fail_next(Failure::Transient, 1);

        let err = assert_err!(index.search(SearchRequest::new(vec![1.0, 0.0], 4)).await);
        assert!(err.is_transient());
        assert_err!(
            index
                .search(SearchRequest::new(vec![1.0, 0.0], 4).with_schema(KnnSchema::Legacy))
                .await
        );
        assert_ok!(index.search(SearchRequest::new(vec![1.0, 0.0], 4)).await);
        assert_eq!(index.call_count(), 3);
    }
}
