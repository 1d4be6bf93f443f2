use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use taskflow_core::errors::{TaskQueueError, TaskQueueResult};
use taskflow_core::models::{Delivery, TaskMessage};
use taskflow_core::traits::{MessageTransport, QueueDeclaration};

/// 内存消息传输实现
///
/// 面向单进程（eager）部署与测试：延迟可见性基于tokio时钟，
/// 未确认投递在nack(requeue)后回到队首。语义与RabbitMQ实现
/// 保持一致，可直接替换。
pub struct InMemoryTransport {
    queues: Mutex<HashMap<String, QueueState>>,
    unacked: Mutex<HashMap<u64, PendingDelivery>>,
    next_tag: AtomicU64,
    /// 模拟中间件不可达（测试传输层故障路径）
    available: AtomicBool,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<TaskMessage>,
    /// (可见时间, 消息)，消费时到期的条目被提升到ready
    delayed: Vec<(Instant, TaskMessage)>,
}

struct PendingDelivery {
    queue: String,
    message: TaskMessage,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            unacked: Mutex::new(HashMap::new()),
            next_tag: AtomicU64::new(1),
            available: AtomicBool::new(true),
        }
    }

    /// 模拟中间件可达性切换
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> TaskQueueResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TaskQueueError::transport_error("内存传输已标记为不可达"))
        }
    }

    /// 到期的延迟消息提升到ready队尾
    fn promote_due(state: &mut QueueState, now: Instant) {
        let mut due: Vec<TaskMessage> = Vec::new();
        state.delayed.retain(|(visible_at, message)| {
            if *visible_at <= now {
                due.push(message.clone());
                false
            } else {
                true
            }
        });
        for message in due {
            state.ready.push_back(message);
        }
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageTransport for InMemoryTransport {
    async fn publish(
        &self,
        queue: &str,
        message: &TaskMessage,
        delay: Duration,
    ) -> TaskQueueResult<()> {
        self.check_available()?;
        let mut queues = self.queues.lock().await;
        let state = queues.entry(queue.to_string()).or_default();
        if delay.is_zero() {
            state.ready.push_back(message.clone());
        } else {
            let mut delayed_message = message.clone();
            delayed_message.not_before =
                Some(Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64));
            state
                .delayed
                .push((Instant::now() + delay, delayed_message));
        }
        debug!("消息 {} 已发布到队列 {}", message.id, queue);
        Ok(())
    }

    async fn consume(&self, queue: &str, prefetch: u16) -> TaskQueueResult<Vec<Delivery>> {
        self.check_available()?;
        let mut queues = self.queues.lock().await;
        let state = queues.entry(queue.to_string()).or_default();
        Self::promote_due(state, Instant::now());

        let mut deliveries = Vec::new();
        let mut unacked = self.unacked.lock().await;
        while deliveries.len() < prefetch as usize {
            let Some(message) = state.ready.pop_front() else {
                break;
            };
            let delivery_tag = self.next_tag.fetch_add(1, Ordering::SeqCst);
            unacked.insert(
                delivery_tag,
                PendingDelivery {
                    queue: queue.to_string(),
                    message: message.clone(),
                },
            );
            deliveries.push(Delivery {
                message,
                queue: queue.to_string(),
                delivery_tag,
            });
        }
        Ok(deliveries)
    }

    async fn ack(&self, delivery: &Delivery) -> TaskQueueResult<()> {
        let mut unacked = self.unacked.lock().await;
        if unacked.remove(&delivery.delivery_tag).is_none() {
            warn!("确认了未知的投递: tag={}", delivery.delivery_tag);
        }
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> TaskQueueResult<()> {
        let pending = {
            let mut unacked = self.unacked.lock().await;
            unacked.remove(&delivery.delivery_tag)
        };
        let Some(pending) = pending else {
            warn!("拒绝了未知的投递: tag={}", delivery.delivery_tag);
            return Ok(());
        };
        if requeue {
            let mut queues = self.queues.lock().await;
            let state = queues.entry(pending.queue).or_default();
            state.ready.push_front(pending.message);
        }
        Ok(())
    }

    async fn declare_queue(&self, declaration: &QueueDeclaration) -> TaskQueueResult<()> {
        let mut queues = self.queues.lock().await;
        queues.entry(declaration.name.clone()).or_default();
        debug!("队列 {} 声明成功", declaration.name);
        Ok(())
    }

    async fn purge_queue(&self, queue: &str) -> TaskQueueResult<()> {
        let mut queues = self.queues.lock().await;
        if let Some(state) = queues.get_mut(queue) {
            state.ready.clear();
            state.delayed.clear();
        }
        Ok(())
    }

    async fn queue_size(&self, queue: &str) -> TaskQueueResult<u32> {
        let queues = self.queues.lock().await;
        Ok(queues
            .get(queue)
            .map(|s| (s.ready.len() + s.delayed.len()) as u32)
            .unwrap_or(0))
    }
}
