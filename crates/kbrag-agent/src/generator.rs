//! Generator: 基于检索上下文生成答案

use async_trait::async_trait;
use kbrag_core::{CancellationToken, CompletionParams, Result};

use crate::completion::ChatClient;
use crate::types::{Completion, Hit};

#[async_trait]
pub trait Generator: Send + Sync {
    async fn answer(
        &self,
        question: &str,
        hits: &[Hit],
        cancel: &CancellationToken,
    ) -> Result<Completion<String>>;
}

/// 编号上下文块: `[i] score=0.873 | text`
pub fn context_block(hits: &[Hit]) -> String {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| format!("[{}] score={:.3} | {}", i + 1, hit.score, hit.passage.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn generator_prompt(question: &str, hits: &[Hit], answer_language: Option<&str>) -> String {
    let mut prompt = format!(
        "You are a precise assistant. Answer the question ONLY using the context. \
If the context is insufficient, say so explicitly and propose what extra info is needed.\n\n\
Context:\n{}\n\nQuestion: {}",
        context_block(hits),
        question
    );
    if let Some(language) = answer_language {
        prompt.push_str(&format!("\nAnswer in {}.", language));
    }
    prompt
}

pub struct LlmGenerator {
    client: ChatClient,
    params: CompletionParams,
    answer_language: Option<String>,
}

impl LlmGenerator {
    pub fn new(client: ChatClient, params: CompletionParams) -> Self {
        Self {
            client,
            params,
            answer_language: None,
        }
    }

    pub fn with_answer_language(mut self, language: Option<String>) -> Self {
        self.answer_language = language;
        self
    }
}

#[async_trait]
impl Generator for LlmGenerator {
    async fn answer(
        &self,
        question: &str,
        hits: &[Hit],
        cancel: &CancellationToken,
    ) -> Result<Completion<String>> {
        let prompt = generator_prompt(question, hits, self.answer_language.as_deref());
        let completion = self
            .client
            .complete("generator", prompt, &self.params, cancel)
            .await?;
        Ok(Completion::new(
            completion.value.trim().to_string(),
            completion.usage,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Query, QueryOrigin};
    use kbrag_vector::Passage;

    fn hit(score: f32, text: &str) -> Hit {
        Hit {
            score,
            passage: Passage::new(None, text),
            query: Query::new("q", QueryOrigin::User),
        }
    }

    #[test]
    fn test_context_block_format() {
        let block = context_block(&[hit(0.8734, "first"), hit(0.5, "second")]);
        assert_eq!(block, "[1] score=0.873 | first\n\n[2] score=0.500 | second");
    }

    #[test]
    fn test_generator_prompt_language() {
        let hits = [hit(0.9, "ctx")];
        let prompt = generator_prompt("What?", &hits, None);
        assert!(prompt.contains("ONLY using the context"));
        assert!(prompt.ends_with("Question: What?"));

        let prompt = generator_prompt("What?", &hits, Some("Korean"));
        assert!(prompt.ends_with("\nAnswer in Korean."));
    }
}
