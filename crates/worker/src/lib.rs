//! taskflow worker：消费队列、执行任务、推进工作流。
//!
//! - `ExecutionEngine`：单条投递的分发流程（状态机、限流、重试、链/组推进）
//! - `WorkerService`：消费循环与并发控制
//! - `TaskRateLimiter` / `RetryController`：引擎内部的限流与重试决策

pub mod engine;
pub mod rate_limiter;
pub mod retry;
pub mod service;

pub use engine::ExecutionEngine;
pub use rate_limiter::TaskRateLimiter;
pub use retry::{FailureKind, RetryController, RetryDecision};
pub use service::{WorkerService, WorkerServiceBuilder};
