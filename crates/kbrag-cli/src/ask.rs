//! 按配置组装问答循环，并渲染结果

use std::sync::Arc;

use anyhow::{Context, Result};
use kbrag_agent::{
    ChatClient, LlmEvaluator, LlmGenerator, LlmPlanner, Orchestrator, Retriever, RunResult,
};
use kbrag_ai::{create_embedding_provider, create_provider, create_token_counter};
use kbrag_core::{Config, RetryPolicy};
use kbrag_vector::create_index;
use tracing::info;

/// 由配置创建所有服务客户端并注入 Orchestrator
pub fn build_orchestrator(config: &Config) -> Result<Orchestrator> {
    let provider = create_provider(&config.ai).context("创建生成模型客户端失败")?;
    let embedder =
        create_embedding_provider(&config.embedding).context("创建嵌入服务客户端失败")?;
    let index = create_index(&config.vector, config.embedding.dimensions)
        .context("打开向量索引失败")?;

    info!(
        "生成模型: {} / {}，嵌入: {} / {}，索引: {}",
        provider.name(),
        config.ai.model,
        embedder.name(),
        embedder.model(),
        index.name()
    );

    let retry = RetryPolicy::from(&config.retry);
    let counter = Arc::from(create_token_counter(true, &config.embedding.model));
    let num_candidates = config
        .vector
        .open_search
        .as_ref()
        .map(|os| os.num_candidates)
        .unwrap_or(100);

    let retriever = Retriever::new(embedder, index)
        .with_token_counter(counter)
        .with_retry_policy(retry.clone())
        .with_max_concurrent_queries(config.agent.max_concurrent_queries)
        .with_num_candidates(num_candidates);

    let chat = ChatClient::new(provider, config.ai.model.clone()).with_retry_policy(retry);

    Ok(Orchestrator::new(
        Arc::new(LlmPlanner::new(chat.clone(), config.ai.planner)),
        Arc::new(retriever),
        Arc::new(
            LlmGenerator::new(chat.clone(), config.ai.generator)
                .with_answer_language(config.agent.answer_language.clone()),
        ),
        Arc::new(LlmEvaluator::new(chat, config.ai.evaluator)),
    ))
}

/// 文本输出: 最终答案与元信息
pub fn render(result: &RunResult) -> String {
    let tokens = if result.usage.total_tokens > 0 {
        format!(
            "tokens=prompt:{} completion:{}\n",
            result.usage.prompt_tokens, result.usage.completion_tokens
        )
    } else {
        String::new()
    };

    format!(
        "\n=== FINAL ANSWER ===\n\n{}\n\n--- meta ---\niterations={}\nexit={}\n{}",
        result.answer, result.iterations, result.exit, tokens
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbrag_agent::ExitReason;
    use kbrag_ai::TokenUsage;

    #[test]
    fn test_render_text_output() {
        let result = RunResult {
            question: "q".to_string(),
            answer: "forty-two".to_string(),
            iterations: 2,
            exit: ExitReason::MaxIterationsReached,
            history: Vec::new(),
            usage: TokenUsage::new(12, 3),
        };

        let out = render(&result);
        assert!(out.contains("=== FINAL ANSWER ===\n\nforty-two\n"));
        assert!(out.contains("iterations=2"));
        assert!(out.contains("exit=max_iterations_reached"));
        assert!(out.contains("tokens=prompt:12 completion:3"));
    }

    #[test]
    fn test_render_omits_tokens_without_usage() {
        let result = RunResult {
            question: "q".to_string(),
            answer: "no idea".to_string(),
            iterations: 1,
            exit: ExitReason::ExhaustedNoFollowup,
            history: Vec::new(),
            usage: TokenUsage::default(),
        };

        assert_eq!(
            render(&result),
            "\n=== FINAL ANSWER ===\n\nno idea\n\n--- meta ---\niterations=1\nexit=exhausted_no_followup\n"
        );
    }

    #[test]
    fn test_build_orchestrator_reports_missing_index() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.vector.flat = Some(kbrag_core::FlatIndexConfig {
            path: dir.path().join("missing.json"),
        });

        let err = build_orchestrator(&config).err().unwrap();
        assert!(err.to_string().contains("打开向量索引失败"));
    }

    #[test]
    fn test_build_orchestrator_with_flat_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kb.json");
        std::fs::write(&path, r#"[["doc1", "hello", [1.0, 0.0]]]"#).unwrap();

        let mut config = Config::default();
        config.embedding.dimensions = 2;
        config.vector.flat = Some(kbrag_core::FlatIndexConfig { path });

        assert!(build_orchestrator(&config).is_ok());
    }
}
