use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{TaskQueueError, TaskQueueResult};

/// 重试策略
///
/// 退避公式: delay = min(max_delay, base_delay * 2^retry_count)，
/// 启用抖动时再附加 [0, delay/2] 的随机量。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// 最大重试次数
    pub max_retries: u32,
    /// 基础重试间隔（毫秒）
    pub base_delay_ms: u64,
    /// 最大重试间隔（毫秒）
    pub max_delay_ms: u64,
    /// 是否启用随机抖动
    pub jitter: bool,
    /// 执行超时是否计入重试（默认超时视为永久失败）
    #[serde(default)]
    pub retry_on_timeout: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,   // 1秒
            max_delay_ms: 300_000,  // 5分钟
            jitter: true,
            retry_on_timeout: false,
        }
    }
}

impl RetryPolicy {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// 不含抖动的退避间隔
    pub fn backoff_delay(&self, retry_count: u32) -> Duration {
        let factor = 2u64.saturating_pow(retry_count.min(32));
        let delay_ms = self.base_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }
}

/// 速率限制：interval时间窗口内最多ops次执行
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimit {
    pub ops: u32,
    pub interval_ms: u64,
}

impl RateLimit {
    pub fn per_second(ops: u32) -> Self {
        Self {
            ops,
            interval_ms: 1_000,
        }
    }

    pub fn per_minute(ops: u32) -> Self {
        Self {
            ops,
            interval_ms: 60_000,
        }
    }

    /// 解析Celery风格的速率字符串，如 "10/s"、"50/m"、"100/h"
    pub fn parse(spec: &str) -> TaskQueueResult<Self> {
        let (ops_str, unit) = spec
            .split_once('/')
            .ok_or_else(|| TaskQueueError::config_error(format!("无效的速率限制: {spec}")))?;
        let ops: u32 = ops_str
            .trim()
            .parse()
            .map_err(|_| TaskQueueError::config_error(format!("无效的速率限制: {spec}")))?;
        if ops == 0 {
            return Err(TaskQueueError::config_error(format!(
                "速率限制次数必须大于0: {spec}"
            )));
        }
        let interval_ms = match unit.trim() {
            "s" => 1_000,
            "m" => 60_000,
            "h" => 3_600_000,
            other => {
                return Err(TaskQueueError::config_error(format!(
                    "无效的速率限制时间单位: {other}"
                )))
            }
        };
        Ok(Self { ops, interval_ms })
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// 平均令牌补充周期
    pub fn replenish_period(&self) -> Duration {
        Duration::from_millis((self.interval_ms / self.ops as u64).max(1))
    }
}

/// 任务定义
///
/// 进程启动时注册一次，运行期间只读。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// 任务名（全局唯一）
    pub name: String,
    /// 目标队列
    pub queue: String,
    /// 重试策略
    pub retry_policy: RetryPolicy,
    /// 速率限制（None表示不限流）
    pub rate_limit: Option<RateLimit>,
    /// 执行时间上限（毫秒，None表示不限制）
    pub time_limit_ms: Option<u64>,
}

impl TaskDefinition {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            queue: "default".to_string(),
            retry_policy: RetryPolicy::default(),
            rate_limit: None,
            time_limit_ms: None,
        }
    }

    pub fn queue<S: Into<String>>(mut self, queue: S) -> Self {
        self.queue = queue.into();
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn rate_limit(mut self, limit: RateLimit) -> Self {
        self.rate_limit = Some(limit);
        self
    }

    pub fn time_limit(mut self, limit: Duration) -> Self {
        self.time_limit_ms = Some(limit.as_millis() as u64);
        self
    }

    pub fn time_limit_duration(&self) -> Option<Duration> {
        self.time_limit_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_delay_exponential_and_capped() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            jitter: false,
            retry_on_timeout: false,
        };
        assert_eq!(policy.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(4));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(8));
        // 超过上限后封顶
        assert_eq!(policy.backoff_delay(4), Duration::from_secs(10));
        assert_eq!(policy.backoff_delay(40), Duration::from_secs(10));
    }

    #[test]
    fn test_rate_limit_parse() {
        assert_eq!(RateLimit::parse("10/m").unwrap(), RateLimit::per_minute(10));
        assert_eq!(RateLimit::parse("2/s").unwrap(), RateLimit::per_second(2));
        assert_eq!(
            RateLimit::parse("100/h").unwrap(),
            RateLimit {
                ops: 100,
                interval_ms: 3_600_000
            }
        );
        assert!(RateLimit::parse("abc").is_err());
        assert!(RateLimit::parse("0/s").is_err());
        assert!(RateLimit::parse("5/d").is_err());
    }

    #[test]
    fn test_rate_limit_replenish_period() {
        assert_eq!(
            RateLimit::per_second(2).replenish_period(),
            Duration::from_millis(500)
        );
        assert_eq!(
            RateLimit::per_minute(10).replenish_period(),
            Duration::from_secs(6)
        );
    }

    #[test]
    fn test_task_definition_builder() {
        let def = TaskDefinition::new("tasks.fetch_url")
            .queue("network_queue")
            .rate_limit(RateLimit::per_minute(50))
            .time_limit(Duration::from_secs(300));
        assert_eq!(def.name, "tasks.fetch_url");
        assert_eq!(def.queue, "network_queue");
        assert_eq!(def.rate_limit, Some(RateLimit::per_minute(50)));
        assert_eq!(def.time_limit_duration(), Some(Duration::from_secs(300)));
    }
}
