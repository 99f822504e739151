//! 问答循环类型定义

use kbrag_ai::TokenUsage;
use kbrag_core::AgentLoopConfig;
use kbrag_vector::Passage;
use serde::{Deserialize, Serialize};

use crate::parse::Parsed;

/// 检索为空时返回的固定答案
pub const INSUFFICIENT_CONTEXT_ANSWER: &str =
    "No relevant context was found in the knowledge base, so this question cannot be answered.";

/// 查询来源
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueryOrigin {
    /// 用户原始问题
    User,
    /// Planner 首轮给出的查询
    Planner,
    /// 追加关键词后 Planner 给出的查询
    Followup,
}

/// 一次检索请求
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Query {
    pub text: String,
    pub origin: QueryOrigin,
}

impl Query {
    pub fn new(text: impl Into<String>, origin: QueryOrigin) -> Self {
        Self {
            text: text.into(),
            origin,
        }
    }
}

/// 查询与段落的一次带分数关联
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Hit {
    pub score: f32,
    pub passage: Passage,
    /// 产生该命中的查询
    pub query: Query,
}

impl Hit {
    pub fn dedup_key(&self) -> String {
        self.passage.dedup_key()
    }
}

/// Planner 的决策
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Plan {
    /// 诊断用的计划说明
    pub plan: String,
    pub need_retrieval: bool,
    pub queries: Vec<String>,
}

/// Evaluator 的判定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EvaluationResult {
    pub sufficient: bool,
    pub reason: String,
    pub followup_queries: Vec<String>,
}

/// 模型调用结果及其用量
#[derive(Debug, Clone, PartialEq)]
pub struct Completion<T> {
    pub value: T,
    pub usage: Option<TokenUsage>,
}

impl<T> Completion<T> {
    pub fn new(value: T, usage: Option<TokenUsage>) -> Self {
        Self { value, usage }
    }
}

/// 每轮生成的答案
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Answer {
    pub text: String,
    /// 支撑答案的段落
    pub hits: Vec<Hit>,
    pub iteration: u32,
    /// 是否基于检索到的上下文生成
    pub grounded: bool,
    pub usage: Option<TokenUsage>,
}

impl Answer {
    /// 检索为空时的固定答案
    pub fn insufficient_context(iteration: u32) -> Self {
        Self {
            text: INSUFFICIENT_CONTEXT_ANSWER.to_string(),
            hits: Vec::new(),
            iteration,
            grounded: false,
            usage: None,
        }
    }
}

/// 一轮迭代的记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub iteration: u32,
    /// 本轮使用的 (可能已追加关键词的) 问题
    pub working_question: String,
    pub plan: Parsed<Plan>,
    pub queries: Vec<Query>,
    pub answer: Answer,
    /// 检索为空时不做评估
    pub evaluation: Option<Parsed<EvaluationResult>>,
}

/// 循环结束原因
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Sufficient,
    ExhaustedNoFollowup,
    MaxIterationsReached,
    Cancelled,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExitReason::Sufficient => "sufficient",
            ExitReason::ExhaustedNoFollowup => "exhausted_no_followup",
            ExitReason::MaxIterationsReached => "max_iterations_reached",
            ExitReason::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// 一次运行的结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunResult {
    pub question: String,
    pub answer: String,
    pub iterations: u32,
    pub exit: ExitReason,
    pub history: Vec<HistoryEntry>,
    /// 本次运行所有生成模型调用的用量之和
    pub usage: TokenUsage,
}

/// 单次运行参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunOptions {
    pub k: usize,
    pub min_score: f32,
    pub max_iterations: u32,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from(&AgentLoopConfig::default())
    }
}

impl From<&AgentLoopConfig> for RunOptions {
    fn from(config: &AgentLoopConfig) -> Self {
        Self {
            k: config.k,
            min_score: config.min_score,
            max_iterations: config.max_iterations,
        }
    }
}

impl RunOptions {
    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_options_from_config() {
        let options = RunOptions::default();
        assert_eq!(options.k, 4);
        assert_eq!(options.max_iterations, 3);
        assert!((options.min_score - 0.2).abs() < f32::EPSILON);

        let options = options.with_k(2).with_max_iterations(5);
        assert_eq!(options.k, 2);
        assert_eq!(options.max_iterations, 5);
    }

    #[test]
    fn test_exit_reason_serializes_snake_case() {
        let json = serde_json::to_string(&ExitReason::MaxIterationsReached).unwrap();
        assert_eq!(json, "\"max_iterations_reached\"");
        assert_eq!(ExitReason::ExhaustedNoFollowup.to_string(), "exhausted_no_followup");
    }

    #[test]
    fn test_insufficient_context_answer() {
        let answer = Answer::insufficient_context(1);
        assert!(!answer.grounded);
        assert!(answer.hits.is_empty());
        assert_eq!(answer.text, INSUFFICIENT_CONTEXT_ANSWER);
    }
}
