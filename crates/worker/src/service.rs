use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use taskflow_core::errors::{TaskQueueError, TaskQueueResult};
use taskflow_core::registry::TaskRegistry;
use taskflow_core::traits::{MessageTransport, QueueDeclaration, ResultStore};

use crate::engine::ExecutionEngine;

/// worker服务构建器
pub struct WorkerServiceBuilder {
    registry: Arc<TaskRegistry>,
    transport: Arc<dyn MessageTransport>,
    store: Arc<dyn ResultStore>,
    queues: Vec<String>,
    default_queue: String,
    prefetch: u16,
    max_concurrent: usize,
    poll_interval: Duration,
    reconnect_backoff: Duration,
}

impl WorkerServiceBuilder {
    pub fn new(
        registry: Arc<TaskRegistry>,
        transport: Arc<dyn MessageTransport>,
        store: Arc<dyn ResultStore>,
    ) -> Self {
        let queues = registry.queues();
        Self {
            registry,
            transport,
            store,
            queues,
            default_queue: "default".to_string(),
            prefetch: 4,
            max_concurrent: 8,
            poll_interval: Duration::from_millis(100),
            reconnect_backoff: Duration::from_secs(5),
        }
    }

    /// 覆盖消费的队列列表（默认取注册表涉及的全部队列）
    pub fn queues(mut self, queues: Vec<String>) -> Self {
        self.queues = queues;
        self
    }

    pub fn default_queue<S: Into<String>>(mut self, queue: S) -> Self {
        self.default_queue = queue.into();
        self
    }

    pub fn prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = prefetch;
        self
    }

    pub fn max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    pub fn build(self) -> WorkerService {
        let engine = Arc::new(ExecutionEngine::new(
            self.registry,
            self.transport.clone(),
            self.store,
            self.default_queue,
        ));
        let (shutdown_tx, _) = broadcast::channel(1);
        WorkerService {
            engine,
            transport: self.transport,
            queues: self.queues,
            prefetch: self.prefetch,
            concurrency: Arc::new(Semaphore::new(self.max_concurrent)),
            poll_interval: self.poll_interval,
            reconnect_backoff: self.reconnect_backoff,
            shutdown_tx,
        }
    }
}

/// worker服务：轮询消费队列并交给执行引擎
///
/// 并发上限由信号量约束；传输层不可达时按固定间隔退避重连，
/// 期间不视为任务失败。
pub struct WorkerService {
    engine: Arc<ExecutionEngine>,
    transport: Arc<dyn MessageTransport>,
    queues: Vec<String>,
    prefetch: u16,
    concurrency: Arc<Semaphore>,
    poll_interval: Duration,
    reconnect_backoff: Duration,
    shutdown_tx: broadcast::Sender<()>,
}

impl WorkerService {
    pub fn builder(
        registry: Arc<TaskRegistry>,
        transport: Arc<dyn MessageTransport>,
        store: Arc<dyn ResultStore>,
    ) -> WorkerServiceBuilder {
        WorkerServiceBuilder::new(registry, transport, store)
    }

    pub fn engine(&self) -> Arc<ExecutionEngine> {
        self.engine.clone()
    }

    /// 声明全部消费队列（幂等，启动时调用一次）
    pub async fn declare_queues(&self) -> TaskQueueResult<()> {
        for queue in &self.queues {
            let declaration = QueueDeclaration::new(queue.clone()).prefetch(self.prefetch);
            self.transport.declare_queue(&declaration).await?;
            debug!("声明队列: {}", queue);
        }
        Ok(())
    }

    /// 执行一轮消费
    ///
    /// 依次轮询每个队列，取到的投递并发交给执行引擎，在途数量
    /// 受max_concurrent约束；信号量满时暂停取新投递。本轮全部
    /// 处理完成后返回投递数量，测试中以此驱动确定性推进。
    pub async fn poll_once(&self) -> TaskQueueResult<usize> {
        let mut handles: Vec<JoinHandle<()>> = Vec::new();
        for queue in &self.queues {
            let deliveries = self.transport.consume(queue, self.prefetch).await?;
            for delivery in deliveries {
                let permit = self
                    .concurrency
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| TaskQueueError::Internal("并发信号量已关闭".to_string()))?;
                let engine = self.engine.clone();
                let transport = self.transport.clone();
                handles.push(tokio::spawn(async move {
                    if let Err(e) = engine.handle_delivery(&delivery).await {
                        error!("任务 {} 处理出错: {}，重新入队", delivery.message.id, e);
                        if let Err(e) = transport.nack(&delivery, true).await {
                            error!("重新入队失败: {}", e);
                        }
                    }
                    drop(permit);
                }));
            }
        }
        let handled = handles.len();
        for handle in handles {
            if let Err(e) = handle.await {
                error!("任务执行体异常退出: {}", e);
            }
        }
        Ok(handled)
    }

    /// 主循环：消费直至停止信号
    pub async fn run(&self) -> TaskQueueResult<()> {
        info!("worker启动，消费队列: {:?}", self.queues);
        self.declare_queues().await?;
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("收到停止信号，worker退出");
                    return Ok(());
                }
                result = self.poll_once() => {
                    match result {
                        Ok(0) => tokio::time::sleep(self.poll_interval).await,
                        Ok(n) => debug!("本轮处理{}条投递", n),
                        Err(TaskQueueError::TransportUnavailable(reason)) => {
                            warn!(
                                "传输层不可达: {}，{}秒后重试",
                                reason,
                                self.reconnect_backoff.as_secs()
                            );
                            tokio::time::sleep(self.reconnect_backoff).await;
                        }
                        Err(e) => {
                            error!("消费出错: {}，{}秒后重试", e, self.reconnect_backoff.as_secs());
                            tokio::time::sleep(self.reconnect_backoff).await;
                        }
                    }
                }
            }
        }
    }

    /// 后台启动
    pub fn start(self: Arc<Self>) -> JoinHandle<TaskQueueResult<()>> {
        tokio::spawn(async move { self.run().await })
    }

    /// 请求停止；正在执行的任务处理完当前投递后退出
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
