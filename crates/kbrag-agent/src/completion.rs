//! 带重试的单轮生成调用

use std::sync::Arc;

use kbrag_ai::{AIProvider, ChatRequest};
use kbrag_core::{CancellationToken, CompletionParams, Result, RetryPolicy, with_retry};

use crate::types::Completion;

/// 生成模型调用的公共参数
#[derive(Clone)]
pub struct ChatClient {
    provider: Arc<dyn AIProvider>,
    model: String,
    retry: RetryPolicy,
}

impl ChatClient {
    pub fn new(provider: Arc<dyn AIProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// 发送单条 user 提示词，返回文本与用量
    pub async fn complete(
        &self,
        service: &str,
        prompt: String,
        params: &CompletionParams,
        cancel: &CancellationToken,
    ) -> Result<Completion<String>> {
        let request = ChatRequest::single_prompt(self.model.clone(), prompt)
            .with_max_tokens(params.max_tokens)
            .with_temperature(params.temperature);
        let provider = &self.provider;

        let response = with_retry(&self.retry, cancel, service, move || {
            let request = request.clone();
            async move { provider.chat(request).await }
        })
        .await?;

        Ok(Completion::new(response.text(), response.usage))
    }
}
