//! kbrag Vector - 向量索引抽象层
//!
//! 提供统一的近邻检索接口，支持两种后端：
//! - 进程内精确索引 (L2 归一化 + 内积)
//! - OpenSearch k-NN (HTTP)

pub mod store;
pub mod types;

pub use store::*;
pub use types::*;
