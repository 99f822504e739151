//! 外部调用的超时、重试与取消
//!
//! 嵌入、向量检索与生成模型调用都经过 [`with_retry`]：
//! - 每次调用带超时
//! - 瞬时错误 (网络 / 5xx / 429 / 超时) 按指数退避重试，次数有上限
//! - 取消令牌触发时立即返回 [`KbRagError::Cancelled`]

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RetryConfig;
use crate::{KbRagError, Result};

/// 重试策略
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// 首次调用之外的最大重试次数
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// 单次调用超时
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

impl RetryPolicy {
    /// 第 `retry` 次重试前的等待时间 (从 0 开始)
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.min(16));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }
}

/// 按策略执行一次外部调用
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    service: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.max_retries + 1;
    let mut last_error: Option<KbRagError> = None;

    for attempt in 0..attempts {
        if cancel.is_cancelled() {
            return Err(KbRagError::Cancelled);
        }

        if attempt > 0 {
            let delay = policy.backoff(attempt - 1);
            debug!(
                "{} 第 {}/{} 次尝试，等待 {}ms",
                service,
                attempt + 1,
                attempts,
                delay.as_millis()
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(KbRagError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(KbRagError::Cancelled),
            outcome = tokio::time::timeout(policy.timeout, op()) => outcome,
        };

        let error = match outcome {
            Ok(Ok(value)) => {
                if attempt > 0 {
                    info!("{} 在第 {} 次尝试成功", service, attempt + 1);
                }
                return Ok(value);
            }
            Ok(Err(e)) => e,
            Err(_) => KbRagError::Timeout {
                service: service.to_string(),
                seconds: policy.timeout.as_secs(),
            },
        };

        if !error.is_transient() {
            return Err(error);
        }

        warn!(
            "{} 调用失败: {} (尝试 {}/{})",
            service,
            error,
            attempt + 1,
            attempts
        );
        last_error = Some(error);
    }

    Err(KbRagError::RetriesExhausted {
        service: service.to_string(),
        attempts,
        last: last_error.map(|e| e.to_string()).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_retries(max_retries)
            .with_backoff(Duration::from_millis(1), Duration::from_millis(2))
            .with_timeout(Duration::from_millis(200))
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let policy = RetryPolicy::default()
            .with_backoff(Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(350));
        assert_eq!(policy.backoff(40), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_transient_error_is_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = with_retry(&fast_policy(3), &CancellationToken::new(), "embedding", || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(KbRagError::transient("embedding", "502"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<()> =
            with_retry(&fast_policy(3), &CancellationToken::new(), "search", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(KbRagError::Validation("dimension mismatch".to_string()))
                }
            })
            .await;

        assert!(matches!(result, Err(KbRagError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let result: Result<()> =
            with_retry(&fast_policy(2), &CancellationToken::new(), "chat", || async {
                Err(KbRagError::transient("chat", "503"))
            })
            .await;

        match result {
            Err(KbRagError::RetriesExhausted {
                service, attempts, ..
            }) => {
                assert_eq!(service, "chat");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_counts_as_transient() {
        let policy = fast_policy(1).with_timeout(Duration::from_millis(10));
        let result: Result<()> = with_retry(&policy, &CancellationToken::new(), "chat", || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(
            result,
            Err(KbRagError::RetriesExhausted { attempts: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_cancelled_before_call() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = with_retry(&fast_policy(3), &cancel, "embedding", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

        assert!(matches!(result, Err(KbRagError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_in_flight_call() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let policy = fast_policy(0).with_timeout(Duration::from_secs(10));
        let result: Result<()> = with_retry(&policy, &cancel, "chat", || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(KbRagError::Cancelled)));
    }
}
