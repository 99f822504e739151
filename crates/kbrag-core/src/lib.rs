//! kbrag Core - 核心类型和抽象
//!
//! 提供错误处理、配置、消息模型以及外部调用的重试/超时/取消封装。

pub mod config;
pub mod error;
pub mod message;
pub mod retry;

pub use config::*;
pub use error::*;
pub use message::*;
pub use retry::*;

pub use tokio_util::sync::CancellationToken;
