//! Planner: 决定是否检索以及检索什么

use async_trait::async_trait;
use kbrag_core::{CancellationToken, CompletionParams, Result};
use tracing::warn;

use crate::completion::ChatClient;
use crate::parse::{Parsed, parse_plan};
use crate::types::{Completion, Plan};

const PLANNER_INSTRUCTIONS: &str = "You are a planning assistant. Given a user question, produce a concise plan \
for how to answer it. Decide whether retrieval is needed, and if so, propose 1-3 search queries. \
Respond as strict JSON: {\"plan\":\"...\", \"need_retrieval\": true|false, \"queries\": [\"q1\",\"q2\"]}";

#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(
        &self,
        question: &str,
        cancel: &CancellationToken,
    ) -> Result<Completion<Parsed<Plan>>>;
}

pub fn planner_prompt(question: &str) -> String {
    format!("{}\n\nUser question: {}", PLANNER_INSTRUCTIONS, question)
}

/// 基于生成模型的 Planner
pub struct LlmPlanner {
    client: ChatClient,
    params: CompletionParams,
}

impl LlmPlanner {
    pub fn new(client: ChatClient, params: CompletionParams) -> Self {
        Self { client, params }
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn plan(
        &self,
        question: &str,
        cancel: &CancellationToken,
    ) -> Result<Completion<Parsed<Plan>>> {
        let completion = self
            .client
            .complete("planner", planner_prompt(question), &self.params, cancel)
            .await?;

        let parsed = parse_plan(&completion.value);
        if parsed.is_fallback() {
            warn!("Planner 输出无法解析为 JSON，按需要检索处理");
        }

        Ok(Completion::new(parsed, completion.usage))
    }
}
