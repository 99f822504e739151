//! kbrag Agent - 检索增强问答循环
//!
//! - Planner 决定是否检索、生成检索查询
//! - Retriever 并发检索、去重、排序
//! - Generator 基于上下文作答，Evaluator 判断是否充分
//! - Orchestrator 驱动循环直到充分、无追加关键词或达到迭代上限

pub mod completion;
pub mod evaluator;
pub mod generator;
pub mod orchestrator;
pub mod parse;
pub mod planner;
pub mod retriever;
pub mod types;

pub use completion::*;
pub use evaluator::*;
pub use generator::*;
pub use orchestrator::*;
pub use parse::*;
pub use planner::*;
pub use retriever::*;
pub use types::*;

pub use kbrag_core::{KbRagError, Result};
