use std::collections::HashMap;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tracing::{info, warn};

use taskflow_core::models::RateLimit;
use taskflow_core::registry::TaskRegistry;

/// 按任务名的令牌桶限流器
///
/// 桶容量为1、补充周期为interval/ops，保证任意长度为interval的
/// 滑动窗口内分发次数不超过ops。令牌不可用时报告建议等待时长，
/// 执行引擎据此延迟重新入队而非阻塞分发循环。
///
/// 每个worker持有独立的桶；多worker消费同一限流任务时，
/// 应按worker数均分配置的速率。
pub struct TaskRateLimiter {
    limiters: HashMap<String, DefaultDirectRateLimiter>,
    clock: DefaultClock,
}

impl TaskRateLimiter {
    /// 从注册表中带rate_limit的任务定义构建
    pub fn from_registry(registry: &TaskRegistry) -> Self {
        let mut limiters = HashMap::new();
        for name in registry.names() {
            let Some(definition) = registry.definition(name) else {
                continue;
            };
            let Some(limit) = &definition.rate_limit else {
                continue;
            };
            match Self::quota(limit) {
                Some(quota) => {
                    info!(
                        "任务 {} 限流: {}次/{}毫秒",
                        name, limit.ops, limit.interval_ms
                    );
                    limiters.insert(name.to_string(), RateLimiter::direct(quota));
                }
                None => warn!("任务 {} 的速率限制配置非法，忽略", name),
            }
        }
        Self {
            limiters,
            clock: DefaultClock::default(),
        }
    }

    fn quota(limit: &RateLimit) -> Option<Quota> {
        if limit.ops == 0 || limit.interval_ms == 0 {
            return None;
        }
        Quota::with_period(limit.replenish_period())
    }

    /// 尝试获取令牌
    ///
    /// 返回None表示获取成功可以分发；Some(wait)表示令牌不可用，
    /// 最早在wait之后才有令牌。未配置限流的任务总是成功。
    pub fn acquire(&self, task_name: &str) -> Option<Duration> {
        let limiter = self.limiters.get(task_name)?;
        match limiter.check() {
            Ok(()) => None,
            Err(not_until) => {
                let wait = not_until.wait_time_from(self.clock.now());
                // 建议等待至少1毫秒，避免立即重新入队空转
                Some(wait.max(Duration::from_millis(1)))
            }
        }
    }

    pub fn is_limited(&self, task_name: &str) -> bool {
        self.limiters.contains_key(task_name)
    }
}
