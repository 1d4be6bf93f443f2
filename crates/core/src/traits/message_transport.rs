use std::time::Duration;

use async_trait::async_trait;

use crate::errors::TaskQueueResult;
use crate::models::{Delivery, TaskMessage};

/// 队列声明参数
#[derive(Debug, Clone, PartialEq)]
pub struct QueueDeclaration {
    pub name: String,
    /// 是否持久化
    pub durable: bool,
    /// 每个消费者的预取数量
    pub prefetch: u16,
}

impl QueueDeclaration {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            durable: true,
            prefetch: 1,
        }
    }

    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    pub fn prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = prefetch;
        self
    }
}

/// 消息传输抽象接口
///
/// 底层中间件不可达时，publish/consume返回
/// `TaskQueueError::TransportUnavailable`；调用方应退避重连，
/// 执行引擎将其视为暂停而非任务失败。
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// 持久化入队；delay大于零时延迟到now+delay才对消费者可见
    async fn publish(
        &self,
        queue: &str,
        message: &TaskMessage,
        delay: Duration,
    ) -> TaskQueueResult<()>;

    /// 从指定队列取出至多prefetch条未确认投递
    async fn consume(&self, queue: &str, prefetch: u16) -> TaskQueueResult<Vec<Delivery>>;

    /// 确认处理完成，消息永久移除
    async fn ack(&self, delivery: &Delivery) -> TaskQueueResult<()>;

    /// 拒绝投递；requeue为true时重新入队等待再次投递
    async fn nack(&self, delivery: &Delivery, requeue: bool) -> TaskQueueResult<()>;

    /// 声明队列（幂等）
    async fn declare_queue(&self, declaration: &QueueDeclaration) -> TaskQueueResult<()>;

    /// 清空队列
    async fn purge_queue(&self, queue: &str) -> TaskQueueResult<()>;

    /// 队列中待投递的消息数量
    async fn queue_size(&self, queue: &str) -> TaskQueueResult<u32>;
}
