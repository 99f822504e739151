//! kbrag AI - 生成模型与嵌入服务抽象层
//!
//! 支持的提供商：
//! - OpenAI 及 OpenAI 兼容服务 (chat + embeddings)
//! - Anthropic (Claude, 仅 chat)
//! - Ollama (本地嵌入)

pub mod embedding;
pub mod providers;
pub mod tokenizer;
pub mod types;

pub use embedding::*;
pub use providers::*;
pub use tokenizer::*;
pub use types::*;
