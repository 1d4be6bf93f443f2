use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use taskflow_core::errors::{TaskError, TaskQueueResult};
use taskflow_core::models::{
    Delivery, ResultPayload, Signature, TaskMessage, TaskState,
};
use taskflow_core::registry::TaskRegistry;
use taskflow_core::traits::{MessageTransport, ResultStore, TaskContext};

use crate::rate_limiter::TaskRateLimiter;
use crate::retry::{FailureKind, RetryController, RetryDecision};

/// 执行引擎：单条投递的完整分发流程
///
/// 消费到确认之间，消息状态只属于当前worker；跨worker共享的
/// 只有结果存储中的记录与组屏障。链的推进、和弦回调的发布
/// 都发生在成员任务成功之后、确认投递之前。
pub struct ExecutionEngine {
    registry: Arc<TaskRegistry>,
    transport: Arc<dyn MessageTransport>,
    store: Arc<dyn ResultStore>,
    rate_limiter: Arc<TaskRateLimiter>,
    retry: RetryController,
    default_queue: String,
}

impl ExecutionEngine {
    pub fn new(
        registry: Arc<TaskRegistry>,
        transport: Arc<dyn MessageTransport>,
        store: Arc<dyn ResultStore>,
        default_queue: String,
    ) -> Self {
        let rate_limiter = Arc::new(TaskRateLimiter::from_registry(&registry));
        Self {
            registry,
            transport,
            store,
            rate_limiter,
            retry: RetryController::new(),
            default_queue,
        }
    }

    pub fn store(&self) -> Arc<dyn ResultStore> {
        self.store.clone()
    }

    /// 处理一条投递
    ///
    /// 返回Err仅表示基础设施故障（如重发失败），调用方应
    /// nack(requeue)保留消息；业务失败在内部转化为状态记录。
    pub async fn handle_delivery(&self, delivery: &Delivery) -> TaskQueueResult<()> {
        let message = &delivery.message;

        // 撤销/重复投递检查：分发前观察到终态则丢弃
        if let Some(record) = self.store.get(&message.id).await? {
            if record.state == TaskState::Revoked {
                info!("任务 {} 已撤销，丢弃投递", message.id);
                // 撤销对下游等同失败：中止链并封禁和弦回调
                self.propagate_failure(message).await?;
                self.transport.ack(delivery).await?;
                return Ok(());
            }
            if record.state.is_terminal() {
                debug!("任务 {} 已完成，忽略重复投递", message.id);
                self.transport.ack(delivery).await?;
                return Ok(());
            }
        }

        // 解析任务定义：未注册属配置错误，永久失败不重试
        let Some(registered) = self.registry.get(&message.task_name) else {
            warn!("未注册的任务: {}，标记FAILURE", message.task_name);
            self.force_failure(&message.id, &format!("未注册的任务: {}", message.task_name))
                .await?;
            self.propagate_failure(message).await?;
            self.transport.ack(delivery).await?;
            return Ok(());
        };
        let definition = registered.definition.clone();
        let handler = registered.handler.clone();

        // 限流：令牌不可用时按建议延迟原样重新入队，不计入重试
        if let Some(wait) = self.rate_limiter.acquire(&message.task_name) {
            debug!(
                "任务 {} 触发限流，{}毫秒后重新入队",
                message.id,
                wait.as_millis()
            );
            self.transport.publish(&delivery.queue, message, wait).await?;
            self.transport.ack(delivery).await?;
            return Ok(());
        }

        // STARTED的CAS失败意味着并发撤销，放弃执行
        if !self
            .store
            .update(&message.id, TaskState::Started, ResultPayload::empty())
            .await?
        {
            info!("任务 {} 无法进入STARTED（已撤销或完成），丢弃", message.id);
            self.transport.ack(delivery).await?;
            return Ok(());
        }

        let ctx = TaskContext::new(
            message.id.clone(),
            message.task_name.clone(),
            message.retry_count,
            self.store.clone(),
        );
        let outcome = self
            .execute_handler(handler, ctx, message, definition.time_limit_duration())
            .await;

        match outcome {
            Ok(value) => self.complete_success(delivery, value).await?,
            Err((kind, error)) => {
                self.complete_failure(delivery, &definition.retry_policy, kind, error)
                    .await?
            }
        }
        self.transport.ack(delivery).await?;
        Ok(())
    }

    async fn execute_handler(
        &self,
        handler: Arc<dyn taskflow_core::traits::TaskHandler>,
        ctx: TaskContext,
        message: &TaskMessage,
        time_limit: Option<Duration>,
    ) -> Result<Value, (FailureKind, String)> {
        let run = handler.run(ctx, message.args.clone(), message.kwargs.clone());
        let result: Result<Value, TaskError> = match time_limit {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        "任务 {} 超出时间上限 {}毫秒，强制终止",
                        message.id,
                        limit.as_millis()
                    );
                    return Err((
                        FailureKind::Timeout,
                        format!("任务执行超时（上限{}毫秒）", limit.as_millis()),
                    ));
                }
            },
            None => run.await,
        };
        result.map_err(|e| (RetryController::classify(&e), e.to_string()))
    }

    /// 成功路径：写SUCCESS并推进链/组屏障
    async fn complete_success(&self, delivery: &Delivery, value: Value) -> TaskQueueResult<()> {
        let message = &delivery.message;
        let wrote = self
            .store
            .update(
                &message.id,
                TaskState::Success,
                ResultPayload::success(value.clone()),
            )
            .await?;
        if !wrote {
            // 执行期间被撤销：结果作废，下游按失败处理
            if let Some(record) = self.store.get(&message.id).await? {
                if record.state == TaskState::Revoked {
                    info!("任务 {} 在执行期间被撤销，结果作废", message.id);
                    self.propagate_failure(message).await?;
                }
            }
            return Ok(());
        }
        debug!("任务 {} 执行成功", message.id);

        self.advance_chain(message, &value).await?;
        self.advance_group(message, value).await?;
        Ok(())
    }

    /// 失败路径：重试或FAILURE，FAILURE时向下游传播
    async fn complete_failure(
        &self,
        delivery: &Delivery,
        policy: &taskflow_core::models::RetryPolicy,
        kind: FailureKind,
        error: String,
    ) -> TaskQueueResult<()> {
        let message = &delivery.message;
        match self.retry.decide(kind, message.retry_count, policy) {
            RetryDecision::Retry { delay } => {
                info!(
                    "任务 {} 第{}次重试，延迟{}毫秒: {}",
                    message.id,
                    message.retry_count + 1,
                    delay.as_millis(),
                    error
                );
                self.store
                    .update(&message.id, TaskState::Retry, ResultPayload::failure(&error))
                    .await?;
                // 重试是一条新消息，原投递随后确认，避免重复处理
                let mut retry_message = message.clone();
                retry_message.increment_retry();
                self.transport
                    .publish(&delivery.queue, &retry_message, delay)
                    .await?;
            }
            RetryDecision::GiveUp => {
                warn!("任务 {} 失败: {}", message.id, error);
                self.store
                    .update(
                        &message.id,
                        TaskState::Failure,
                        ResultPayload::failure(&error),
                    )
                    .await?;
                self.propagate_failure(message).await?;
            }
        }
        Ok(())
    }

    /// 链推进：前驱结果作为第一个位置参数注入下一节点
    async fn advance_chain(&self, message: &TaskMessage, value: &Value) -> TaskQueueResult<()> {
        if message.chain.is_empty() {
            return Ok(());
        }
        let mut remaining = message.chain.clone();
        let next_signature = remaining.remove(0);
        let queue = self.queue_for(&next_signature);

        let mut next = TaskMessage::from_signature(&next_signature, &queue);
        next.args.insert(0, value.clone());
        next.parent_id = Some(message.id.clone());
        next.chain = remaining;

        let delay = next_signature
            .countdown_ms
            .map(Duration::from_millis)
            .unwrap_or(Duration::ZERO);
        self.store.put_pending(&next.id).await?;
        self.transport.publish(&queue, &next, delay).await?;
        debug!("链推进: {} -> {}", message.id, next.id);
        Ok(())
    }

    /// 组屏障：原子递增完成计数，最后完成者负责发布和弦回调
    async fn advance_group(&self, message: &TaskMessage, value: Value) -> TaskQueueResult<()> {
        let (Some(group_id), Some(index), Some(size)) =
            (&message.group_id, message.group_index, message.group_size)
        else {
            return Ok(());
        };
        let completed = self
            .store
            .record_group_member(group_id, index, value)
            .await?;
        debug!("组 {} 完成进度: {}/{}", group_id, completed, size);
        if completed < size {
            return Ok(());
        }

        // 恰好一个worker观察到计数到达total，由它发布回调
        if let Some(callback) = &message.chord {
            if self.store.is_group_failed(group_id).await? {
                debug!("组 {} 已标记失败，回调不发布", group_id);
            } else {
                let results = self.store.group_results(group_id).await?;
                let queue = self.queue_for(callback);
                let mut callback_message = TaskMessage::from_signature(callback, &queue);
                callback_message.args.insert(0, Value::Array(results));
                callback_message.parent_id = Some(group_id.clone());
                self.store.put_pending(&callback_message.id).await?;
                self.transport
                    .publish(&queue, &callback_message, Duration::ZERO)
                    .await?;
                info!("组 {} 全部完成，发布和弦回调 {}", group_id, callback_message.id);
            }
        }
        self.store.remove_group(group_id).await?;
        Ok(())
    }

    /// 失败传播：中止链的剩余节点；和弦成员失败/撤销时封禁回调
    async fn propagate_failure(&self, message: &TaskMessage) -> TaskQueueResult<()> {
        for signature in &message.chain {
            self.force_failure(
                &signature.id,
                &format!("链上游任务 {} 失败，节点被中止", message.id),
            )
            .await?;
        }
        if let Some(group_id) = &message.group_id {
            self.store.fail_group(group_id).await?;
            if let Some(callback) = &message.chord {
                self.force_failure(
                    &callback.id,
                    &format!("和弦成员 {} 失败，回调不执行", message.id),
                )
                .await?;
            }
        }
        Ok(())
    }

    /// 未执行即失败的任务也沿STARTED -> FAILURE路径写入，
    /// 保证状态转移不跳过STARTED。
    async fn force_failure(&self, task_id: &str, error: &str) -> TaskQueueResult<()> {
        self.store.put_pending(task_id).await?;
        self.store
            .update(task_id, TaskState::Started, ResultPayload::empty())
            .await?;
        self.store
            .update(task_id, TaskState::Failure, ResultPayload::failure(error))
            .await?;
        Ok(())
    }

    fn queue_for(&self, signature: &Signature) -> String {
        signature
            .queue
            .clone()
            .or_else(|| {
                self.registry
                    .definition(&signature.task_name)
                    .map(|d| d.queue.clone())
            })
            .unwrap_or_else(|| self.default_queue.clone())
    }
}
