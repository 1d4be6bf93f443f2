use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::errors::{TaskError, TaskQueueResult};
use crate::models::{ResultPayload, TaskState};
use crate::traits::ResultStore;

/// 任务执行上下文
///
/// 显式传入处理函数，替代隐式的bound-self：进度上报与
/// 当前重试次数都通过它读取。
#[derive(Clone)]
pub struct TaskContext {
    task_id: String,
    task_name: String,
    retry_count: u32,
    store: Arc<dyn ResultStore>,
}

impl TaskContext {
    pub fn new(
        task_id: String,
        task_name: String,
        retry_count: u32,
        store: Arc<dyn ResultStore>,
    ) -> Self {
        Self {
            task_id,
            task_name,
            retry_count,
            store,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    /// 本次执行是第几次重试（首次执行为0）
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// 上报进度元数据，写入PROGRESS状态
    pub async fn report_progress(&self, meta: Value) -> TaskQueueResult<()> {
        self.store
            .update(&self.task_id, TaskState::Progress, ResultPayload::progress(meta))
            .await
            .map(|_| ())
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("task_id", &self.task_id)
            .field("task_name", &self.task_name)
            .field("retry_count", &self.retry_count)
            .finish()
    }
}

/// 任务处理能力
///
/// 返回值写入结果存储；错误交由重试控制器分类。
/// 投递语义为至少一次，处理函数需自行保证幂等。
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(
        &self,
        ctx: TaskContext,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Value, TaskError>;
}
