use std::time::Duration;

use rand::Rng;
use tracing::debug;

use taskflow_core::errors::TaskError;
use taskflow_core::models::RetryPolicy;

/// 失败分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// 暂时性失败，按策略重试
    Transient,
    /// 永久性失败，立即FAILURE
    Permanent,
    /// 超出time_limit被强制终止，默认不重试
    Timeout,
}

/// 重试决策
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// 延迟delay后重新发布（retry_count加一）
    Retry { delay: Duration },
    /// 不再重试，记录FAILURE
    GiveUp,
}

/// 重试控制器
///
/// 退避: delay = min(max_delay, base_delay * 2^retry_count)，
/// 启用抖动时附加 [0, delay/2] 的随机量。
#[derive(Debug, Clone, Default)]
pub struct RetryController;

impl RetryController {
    pub fn new() -> Self {
        Self
    }

    /// 将处理函数错误归类
    pub fn classify(error: &TaskError) -> FailureKind {
        match error {
            TaskError::Transient(_) => FailureKind::Transient,
            TaskError::Permanent(_) => FailureKind::Permanent,
        }
    }

    /// 决定是否重试以及延迟多久
    pub fn decide(
        &self,
        kind: FailureKind,
        retry_count: u32,
        policy: &RetryPolicy,
    ) -> RetryDecision {
        let retryable = match kind {
            FailureKind::Transient => true,
            FailureKind::Permanent => false,
            FailureKind::Timeout => policy.retry_on_timeout,
        };
        if !retryable || retry_count >= policy.max_retries {
            debug!(
                "不再重试: kind={:?}, retry_count={}, max_retries={}",
                kind, retry_count, policy.max_retries
            );
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry {
            delay: self.delay_with_jitter(policy, retry_count),
        }
    }

    fn delay_with_jitter(&self, policy: &RetryPolicy, retry_count: u32) -> Duration {
        let base = policy.backoff_delay(retry_count);
        if !policy.jitter {
            return base;
        }
        let half_ms = (base.as_millis() as u64) / 2;
        if half_ms == 0 {
            return base;
        }
        let jitter_ms = rand::rng().random_range(0..=half_ms);
        base + Duration::from_millis(jitter_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_retries: u32, jitter: bool) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay_ms: 1_000,
            max_delay_ms: 8_000,
            jitter,
            retry_on_timeout: false,
        }
    }

    #[test]
    fn test_classification() {
        assert_eq!(
            RetryController::classify(&TaskError::transient("网络抖动")),
            FailureKind::Transient
        );
        assert_eq!(
            RetryController::classify(&TaskError::permanent("参数非法")),
            FailureKind::Permanent
        );
    }

    #[test]
    fn test_permanent_failure_never_retries() {
        let controller = RetryController::new();
        assert_eq!(
            controller.decide(FailureKind::Permanent, 0, &policy(5, false)),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn test_transient_retries_until_exhausted() {
        let controller = RetryController::new();
        let policy = policy(2, false);
        assert_eq!(
            controller.decide(FailureKind::Transient, 0, &policy),
            RetryDecision::Retry {
                delay: Duration::from_secs(1)
            }
        );
        assert_eq!(
            controller.decide(FailureKind::Transient, 1, &policy),
            RetryDecision::Retry {
                delay: Duration::from_secs(2)
            }
        );
        // 第三次失败时重试预算耗尽
        assert_eq!(
            controller.decide(FailureKind::Transient, 2, &policy),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn test_timeout_respects_opt_in() {
        let controller = RetryController::new();
        let mut p = policy(3, false);
        assert_eq!(
            controller.decide(FailureKind::Timeout, 0, &p),
            RetryDecision::GiveUp
        );
        p.retry_on_timeout = true;
        assert!(matches!(
            controller.decide(FailureKind::Timeout, 0, &p),
            RetryDecision::Retry { .. }
        ));
    }

    #[test]
    fn test_jittered_delay_bounded() {
        let controller = RetryController::new();
        let policy = policy(10, true);
        for retry_count in 0..6 {
            let base = policy.backoff_delay(retry_count);
            for _ in 0..50 {
                let delay = controller.delay_with_jitter(&policy, retry_count);
                assert!(delay >= base);
                assert!(delay <= base + base / 2 + Duration::from_millis(1));
            }
        }
    }

    #[test]
    fn test_delay_non_decreasing_and_capped() {
        let controller = RetryController::new();
        let policy = policy(10, false);
        let mut previous = Duration::ZERO;
        for retry_count in 0..10 {
            match controller.decide(FailureKind::Transient, retry_count, &policy) {
                RetryDecision::Retry { delay } => {
                    assert!(delay >= previous);
                    assert!(delay <= policy.max_delay());
                    previous = delay;
                }
                RetryDecision::GiveUp => unreachable!(),
            }
        }
    }
}
