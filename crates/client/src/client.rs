use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, info};

use taskflow_core::errors::{TaskQueueError, TaskQueueResult};
use taskflow_core::models::{ResultPayload, TaskMessage, TaskResultRecord, TaskState};
use taskflow_core::registry::TaskRegistry;
use taskflow_core::traits::{MessageTransport, ResultStore};

/// 提交选项
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// 覆盖任务定义中的目标队列
    pub queue: Option<String>,
    /// 相对延迟
    pub countdown: Option<Duration>,
    /// 绝对执行时间（已过去的时刻立即投递）
    pub eta: Option<DateTime<Utc>>,
}

impl SubmitOptions {
    pub fn queue<S: Into<String>>(mut self, queue: S) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn countdown(mut self, delay: Duration) -> Self {
        self.countdown = Some(delay);
        self
    }

    pub fn eta(mut self, eta: DateTime<Utc>) -> Self {
        self.eta = Some(eta);
        self
    }

    /// 相对延迟与绝对时间统一折算为发布延迟
    pub(crate) fn delay(&self, now: DateTime<Utc>) -> Duration {
        if let Some(countdown) = self.countdown {
            return countdown;
        }
        if let Some(eta) = self.eta {
            return (eta - now).to_std().unwrap_or(Duration::ZERO);
        }
        Duration::ZERO
    }
}

/// 任务队列客户端：提交、撤销与结果查询
///
/// 提交前对照注册表校验任务名；传输层不可达时提交同步失败，
/// 不产生悬空的PENDING记录。
pub struct TaskQueueClient {
    transport: Arc<dyn MessageTransport>,
    store: Arc<dyn ResultStore>,
    registry: Arc<TaskRegistry>,
    default_queue: String,
}

impl TaskQueueClient {
    pub fn new(
        transport: Arc<dyn MessageTransport>,
        store: Arc<dyn ResultStore>,
        registry: Arc<TaskRegistry>,
    ) -> Self {
        Self {
            transport,
            store,
            registry,
            default_queue: "default".to_string(),
        }
    }

    pub fn default_queue<S: Into<String>>(mut self, queue: S) -> Self {
        self.default_queue = queue.into();
        self
    }

    pub fn store(&self) -> Arc<dyn ResultStore> {
        self.store.clone()
    }

    pub(crate) fn transport(&self) -> Arc<dyn MessageTransport> {
        self.transport.clone()
    }

    pub(crate) fn registry(&self) -> Arc<TaskRegistry> {
        self.registry.clone()
    }

    /// 提交单个任务
    pub async fn submit(
        &self,
        task_name: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        options: SubmitOptions,
    ) -> TaskQueueResult<AsyncResult> {
        let queue = self.resolve_queue(task_name, options.queue.as_deref())?;
        let mut message = TaskMessage::new(task_name, args, &queue);
        message.kwargs = kwargs;

        let delay = options.delay(Utc::now());
        if !delay.is_zero() {
            message.not_before =
                Some(Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero()));
        }

        self.publish_pending(&queue, &message, delay).await?;
        info!("提交任务 {} ({})到队列 {}", message.id, task_name, queue);
        Ok(AsyncResult::new(message.id, self.store.clone()))
    }

    /// 撤销任务
    ///
    /// 仅对尚未进入终态的任务生效；已开始执行的任务不被打断，
    /// 但其结果会被作废。返回撤销是否生效。
    pub async fn revoke(&self, task_id: &str) -> TaskQueueResult<bool> {
        self.store.put_pending(task_id).await?;
        let revoked = self
            .store
            .update(task_id, TaskState::Revoked, ResultPayload::empty())
            .await?;
        if revoked {
            info!("任务 {} 已撤销", task_id);
        } else {
            debug!("任务 {} 已进入终态，撤销无效", task_id);
        }
        Ok(revoked)
    }

    /// 获取已提交任务的结果句柄
    pub fn result(&self, task_id: &str) -> AsyncResult {
        AsyncResult::new(task_id.to_string(), self.store.clone())
    }

    /// 先写PENDING再发布，发布失败时错误同步返回
    pub(crate) async fn publish_pending(
        &self,
        queue: &str,
        message: &TaskMessage,
        delay: Duration,
    ) -> TaskQueueResult<()> {
        self.store.put_pending(&message.id).await?;
        self.transport.publish(queue, message, delay).await
    }

    /// 队列解析顺序：显式覆盖 > 任务定义 > 默认队列
    pub(crate) fn resolve_queue(
        &self,
        task_name: &str,
        explicit: Option<&str>,
    ) -> TaskQueueResult<String> {
        let Some(definition) = self.registry.definition(task_name) else {
            return Err(TaskQueueError::unknown_task(task_name));
        };
        Ok(explicit
            .map(|q| q.to_string())
            .unwrap_or_else(|| definition.queue.clone()))
    }

    pub(crate) fn default_queue_name(&self) -> &str {
        &self.default_queue
    }
}

/// 异步结果句柄
#[derive(Clone)]
pub struct AsyncResult {
    id: String,
    store: Arc<dyn ResultStore>,
}

impl AsyncResult {
    pub fn new(id: String, store: Arc<dyn ResultStore>) -> Self {
        Self { id, store }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// 当前状态记录快照
    pub async fn get(&self) -> TaskQueueResult<Option<TaskResultRecord>> {
        self.store.get(&self.id).await
    }

    /// 阻塞等待终态，超时返回`TaskQueueError::WaitTimeout`
    pub async fn wait(&self, timeout: Duration) -> TaskQueueResult<TaskResultRecord> {
        self.store.wait(&self.id, timeout).await
    }

    /// 是否已进入终态
    pub async fn is_ready(&self) -> TaskQueueResult<bool> {
        Ok(self
            .get()
            .await?
            .map(|record| record.state.is_terminal())
            .unwrap_or(false))
    }
}

impl std::fmt::Debug for AsyncResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncResult").field("id", &self.id).finish()
    }
}
