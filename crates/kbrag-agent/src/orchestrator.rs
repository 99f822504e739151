//! Orchestrator - 规划、检索、生成、评估的循环控制
//!
//! 每轮依次经过 Planning → Retrieving → Answering → Evaluating，
//! 由评估结果决定退出或携带追加关键词进入下一轮。

use std::sync::Arc;

use kbrag_ai::TokenUsage;
use kbrag_core::{CancellationToken, KbRagError, Result};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::evaluator::Evaluator;
use crate::generator::Generator;
use crate::parse::Parsed;
use crate::planner::Planner;
use crate::retriever::Retriever;
use crate::types::{
    Answer, EvaluationResult, ExitReason, HistoryEntry, Plan, Query, QueryOrigin, RunOptions,
    RunResult,
};

/// 单轮内部阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Planning,
    Retrieving,
    Answering,
    Evaluating,
}

/// 一轮结束后的状态转移
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Exit(ExitReason),
    Continue { followups: Vec<String> },
}

impl Transition {
    /// 由评估结果决定下一步
    pub fn from_evaluation(evaluation: &EvaluationResult) -> Self {
        if evaluation.sufficient {
            Transition::Exit(ExitReason::Sufficient)
        } else if evaluation.followup_queries.is_empty() {
            Transition::Exit(ExitReason::ExhaustedNoFollowup)
        } else {
            Transition::Continue {
                followups: evaluation.followup_queries.clone(),
            }
        }
    }
}

/// 在工作问题后追加检索关键词
pub fn augment_question(working: &str, followups: &[String]) -> String {
    format!(
        "{}\n(additional search keywords: {})",
        working,
        followups.join(", ")
    )
}

/// 一次运行的状态，只属于当前运行
struct LoopState {
    original: String,
    working: String,
    iteration: u32,
    continued: bool,
    history: Vec<HistoryEntry>,
    usage: TokenUsage,
}

impl LoopState {
    fn new(question: &str) -> Self {
        Self {
            original: question.to_string(),
            working: question.to_string(),
            iteration: 0,
            continued: false,
            history: Vec::new(),
            usage: TokenUsage::default(),
        }
    }

    fn finish(self, exit: ExitReason) -> RunResult {
        let answer = self
            .history
            .last()
            .map(|entry| entry.answer.text.clone())
            .unwrap_or_default();

        RunResult {
            question: self.original,
            answer,
            iterations: self.iteration,
            exit,
            history: self.history,
            usage: self.usage,
        }
    }
}

struct IterationOutcome {
    entry: HistoryEntry,
    usage: TokenUsage,
    transition: Transition,
}

/// 问答循环控制器
pub struct Orchestrator {
    planner: Arc<dyn Planner>,
    retriever: Arc<Retriever>,
    generator: Arc<dyn Generator>,
    evaluator: Arc<dyn Evaluator>,
}

impl Orchestrator {
    pub fn new(
        planner: Arc<dyn Planner>,
        retriever: Arc<Retriever>,
        generator: Arc<dyn Generator>,
        evaluator: Arc<dyn Evaluator>,
    ) -> Self {
        Self {
            planner,
            retriever,
            generator,
            evaluator,
        }
    }

    /// 执行一次完整的问答循环
    pub async fn run(
        &self,
        question: &str,
        options: RunOptions,
        cancel: &CancellationToken,
    ) -> Result<RunResult> {
        if options.max_iterations == 0 {
            return Err(KbRagError::Validation(
                "max_iterations 必须大于 0".to_string(),
            ));
        }
        if options.k == 0 {
            return Err(KbRagError::Validation("k 必须大于 0".to_string()));
        }
        if question.trim().is_empty() {
            return Err(KbRagError::Validation("问题不能为空".to_string()));
        }

        info!(
            "开始问答循环 (k={}, min_score={}, max_iterations={})",
            options.k, options.min_score, options.max_iterations
        );

        let mut state = LoopState::new(question);

        loop {
            if state.iteration >= options.max_iterations {
                info!("达到最大迭代次数 {}", options.max_iterations);
                return Ok(state.finish(ExitReason::MaxIterationsReached));
            }
            if cancel.is_cancelled() {
                return Ok(state.finish(ExitReason::Cancelled));
            }

            let iteration = state.iteration + 1;
            let span = info_span!("rag.iteration", iteration);
            let outcome = self
                .run_iteration(&state, iteration, options, cancel)
                .instrument(span)
                .await;

            let outcome = match outcome {
                Ok(outcome) => outcome,
                Err(KbRagError::Cancelled) => {
                    warn!("第 {} 轮执行中被取消", iteration);
                    return Ok(state.finish(ExitReason::Cancelled));
                }
                Err(e) => return Err(e),
            };

            state.iteration = iteration;
            state.usage += outcome.usage;
            state.history.push(outcome.entry);

            match outcome.transition {
                Transition::Exit(exit) => {
                    info!("第 {} 轮结束: {}", iteration, exit);
                    return Ok(state.finish(exit));
                }
                Transition::Continue { followups } => {
                    debug!("追加检索关键词: {:?}", followups);
                    state.working = augment_question(&state.working, &followups);
                    state.continued = true;
                }
            }
        }
    }

    async fn run_iteration(
        &self,
        state: &LoopState,
        iteration: u32,
        options: RunOptions,
        cancel: &CancellationToken,
    ) -> Result<IterationOutcome> {
        let mut usage = TokenUsage::default();

        debug!(phase = ?Phase::Planning);
        let plan = self.planner.plan(&state.working, cancel).await?;
        usage += plan.usage.unwrap_or_default();
        let plan = plan.value;
        let queries = self.select_queries(state, &plan);

        debug!(phase = ?Phase::Retrieving, queries = queries.len());
        let hits = self
            .retriever
            .retrieve(&queries, options.k, options.min_score, cancel)
            .await?;

        if hits.is_empty() {
            info!("没有高于阈值的段落，跳过生成与评估");
            return Ok(IterationOutcome {
                entry: HistoryEntry {
                    iteration,
                    working_question: state.working.clone(),
                    plan,
                    queries,
                    answer: Answer::insufficient_context(iteration),
                    evaluation: None,
                },
                usage,
                transition: Transition::Exit(ExitReason::ExhaustedNoFollowup),
            });
        }

        debug!(phase = ?Phase::Answering, hits = hits.len());
        let generated = self.generator.answer(&state.working, &hits, cancel).await?;
        usage += generated.usage.unwrap_or_default();
        let answer = Answer {
            text: generated.value,
            hits,
            iteration,
            grounded: true,
            usage: generated.usage,
        };

        debug!(phase = ?Phase::Evaluating);
        let evaluation = self
            .evaluator
            .evaluate(&state.original, &answer.text, cancel)
            .await?;
        usage += evaluation.usage.unwrap_or_default();
        let evaluation = evaluation.value;
        let transition = Transition::from_evaluation(evaluation.value());

        Ok(IterationOutcome {
            entry: HistoryEntry {
                iteration,
                working_question: state.working.clone(),
                plan,
                queries,
                answer,
                evaluation: Some(evaluation),
            },
            usage,
            transition,
        })
    }

    /// 不需要检索或没有给出查询时，以原始问题作为唯一查询
    fn select_queries(&self, state: &LoopState, plan: &Parsed<Plan>) -> Vec<Query> {
        let plan = plan.value();
        if !plan.need_retrieval || plan.queries.is_empty() {
            return vec![Query::new(state.original.clone(), QueryOrigin::User)];
        }

        let origin = if state.continued {
            QueryOrigin::Followup
        } else {
            QueryOrigin::Planner
        };
        plan.queries
            .iter()
            .map(|q| Query::new(q.clone(), origin))
            .collect()
    }
}
