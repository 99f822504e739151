//! Evaluator: 判断答案是否充分

use async_trait::async_trait;
use kbrag_core::{CancellationToken, CompletionParams, Result};
use tracing::warn;

use crate::completion::ChatClient;
use crate::parse::{Parsed, parse_evaluation};
use crate::types::{Completion, EvaluationResult};

const EVALUATOR_INSTRUCTIONS: &str = "Evaluate if the provided answer sufficiently addresses the user's question. \
Output strict JSON: {\"sufficient\": true|false, \"reason\":\"...\", \"followup_queries\":[\"kw1\",\"kw2\"]}";

#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(
        &self,
        question: &str,
        answer: &str,
        cancel: &CancellationToken,
    ) -> Result<Completion<Parsed<EvaluationResult>>>;
}

pub fn evaluator_prompt(question: &str, answer: &str) -> String {
    format!(
        "{}\n\nQuestion: {}\n\nAnswer:\n{}",
        EVALUATOR_INSTRUCTIONS, question, answer
    )
}

pub struct LlmEvaluator {
    client: ChatClient,
    params: CompletionParams,
}

impl LlmEvaluator {
    pub fn new(client: ChatClient, params: CompletionParams) -> Self {
        Self { client, params }
    }
}

#[async_trait]
impl Evaluator for LlmEvaluator {
    async fn evaluate(
        &self,
        question: &str,
        answer: &str,
        cancel: &CancellationToken,
    ) -> Result<Completion<Parsed<EvaluationResult>>> {
        let completion = self
            .client
            .complete(
                "evaluator",
                evaluator_prompt(question, answer),
                &self.params,
                cancel,
            )
            .await?;

        let parsed = parse_evaluation(&completion.value);
        if parsed.is_fallback() {
            warn!("Evaluator 输出无法解析为 JSON，判为不充分");
        }

        Ok(Completion::new(parsed, completion.usage))
    }
}
