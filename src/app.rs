use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{error, info};

use taskflow_beat::BeatScheduler;
use taskflow_client::TaskQueueClient;
use taskflow_core::config::{AppConfig, BackendKind, TransportKind};
use taskflow_core::models::ScheduleEntry;
use taskflow_core::registry::TaskRegistry;
use taskflow_core::traits::{MessageTransport, ResultStore};
use taskflow_infrastructure::{
    InMemoryResultStore, InMemoryTransport, RabbitMqTransport, RedisResultStore,
};
use taskflow_worker::WorkerService;

use crate::tasks;

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    Worker,
    Beat,
    All,
}

/// 应用：按配置装配传输层、结果后端与各服务
///
/// in_memory传输加memory后端即嵌入式单进程部署，
/// rabbitmq加redis为多进程分布式部署，业务代码无感知。
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    worker_id: String,
    registry: Arc<TaskRegistry>,
    transport: Arc<dyn MessageTransport>,
    store: Arc<dyn ResultStore>,
}

impl Application {
    pub async fn new(config: AppConfig, mode: AppMode, worker_id: String) -> Result<Self> {
        let transport: Arc<dyn MessageTransport> = match config.transport.kind {
            TransportKind::InMemory => {
                info!("使用内存消息传输（嵌入式部署）");
                Arc::new(InMemoryTransport::new())
            }
            TransportKind::Rabbitmq => {
                info!("连接RabbitMQ: {}", config.transport.url);
                Arc::new(
                    RabbitMqTransport::new(&config.transport)
                        .await
                        .context("初始化RabbitMQ传输失败")?,
                )
            }
        };

        let store: Arc<dyn ResultStore> = match config.result_backend.kind {
            BackendKind::Memory => {
                info!("使用内存结果后端");
                Arc::new(InMemoryResultStore::new())
            }
            BackendKind::Redis => {
                info!("连接Redis结果后端: {}", config.result_backend.url);
                Arc::new(
                    RedisResultStore::new(&config.result_backend)
                        .await
                        .context("初始化Redis结果后端失败")?,
                )
            }
        };

        Ok(Self {
            config,
            mode,
            worker_id,
            registry: tasks::build_registry(),
            transport,
            store,
        })
    }

    /// 构建指向同一传输/后端的客户端（嵌入式模式下提交任务用）
    pub fn client(&self) -> TaskQueueClient {
        TaskQueueClient::new(
            self.transport.clone(),
            self.store.clone(),
            self.registry.clone(),
        )
        .default_queue(self.config.transport.default_queue.clone())
    }

    /// 运行至收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let mut handles = Vec::new();

        let worker = if matches!(self.mode, AppMode::Worker | AppMode::All) {
            let worker = Arc::new(self.build_worker());
            info!(
                "Worker {} 启动，队列: {:?}",
                self.worker_id, self.config.worker.queues
            );
            handles.push(worker.clone().start());
            Some(worker)
        } else {
            None
        };

        let beat_shutdown = if matches!(self.mode, AppMode::Beat | AppMode::All) {
            let entries = self.schedule_entries()?;
            if entries.is_empty() {
                info!("无调度条目，Beat不启动");
                None
            } else {
                let beat = BeatScheduler::new(self.transport.clone(), self.store.clone(), entries)
                    .default_queue(self.config.transport.default_queue.clone());
                let shutdown = beat.shutdown_handle();
                info!("Beat启动");
                handles.push(beat.start());
                Some(shutdown)
            }
        } else {
            None
        };

        let _ = shutdown_rx.recv().await;
        info!("停止各服务...");
        if let Some(worker) = &worker {
            worker.stop();
        }
        if let Some(shutdown) = &beat_shutdown {
            let _ = shutdown.send(());
        }

        for handle in handles {
            match tokio::time::timeout(Duration::from_secs(10), handle).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => error!("服务退出时出错: {e}"),
                Ok(Err(e)) => error!("服务任务异常: {e}"),
                Err(_) => error!("服务停止超时"),
            }
        }
        info!("全部服务已停止");
        Ok(())
    }

    fn build_worker(&self) -> taskflow_worker::WorkerService {
        WorkerService::builder(
            self.registry.clone(),
            self.transport.clone(),
            self.store.clone(),
        )
        .queues(self.config.worker.queues.clone())
        .default_queue(self.config.transport.default_queue.clone())
        .prefetch(self.config.transport.prefetch)
        .max_concurrent(self.config.worker.max_concurrent_tasks)
        .poll_interval(Duration::from_millis(self.config.worker.poll_interval_ms))
        .reconnect_backoff(Duration::from_millis(self.config.worker.reconnect_backoff_ms))
        .build()
    }

    fn schedule_entries(&self) -> Result<Vec<ScheduleEntry>> {
        self.config
            .beat
            .entries
            .iter()
            .map(|c| c.to_entry().context("解析调度条目失败"))
            .collect()
    }
}
