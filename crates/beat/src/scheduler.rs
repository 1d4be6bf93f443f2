use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use taskflow_core::errors::TaskQueueResult;
use taskflow_core::models::{ScheduleEntry, TaskMessage};
use taskflow_core::traits::{MessageTransport, ResultStore};

/// 定时调度器（Beat）
///
/// 单实例进程：持有全部调度条目，按next_run从早到晚休眠唤醒，
/// 到期的条目发布一条普通任务消息后推进到下一次触发时间。
/// 语义为至少一次：进程在发布后、快照前崩溃时，重启可能重复
/// 触发一次，消费方以scheduled_at字段去重。
pub struct BeatScheduler {
    entries: Vec<ScheduleEntry>,
    transport: Arc<dyn MessageTransport>,
    store: Arc<dyn ResultStore>,
    default_queue: String,
    /// 无到期条目时的最长休眠时间
    max_sleep: Duration,
    shutdown_tx: broadcast::Sender<()>,
}

impl BeatScheduler {
    pub fn new(
        transport: Arc<dyn MessageTransport>,
        store: Arc<dyn ResultStore>,
        entries: Vec<ScheduleEntry>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            entries,
            transport,
            store,
            default_queue: "default".to_string(),
            max_sleep: Duration::from_millis(500),
            shutdown_tx,
        }
    }

    pub fn default_queue<S: Into<String>>(mut self, queue: S) -> Self {
        self.default_queue = queue.into();
        self
    }

    pub fn max_sleep(mut self, max_sleep: Duration) -> Self {
        self.max_sleep = max_sleep;
        self
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    /// 初始化next_run（已通过快照恢复的条目不受影响）
    pub fn initialize(&mut self, now: DateTime<Utc>) -> TaskQueueResult<()> {
        for entry in &mut self.entries {
            entry.initialize_next_run(now)?;
            debug!(
                "调度条目 {} 下一次触发: {:?}",
                entry.name, entry.next_run
            );
        }
        Ok(())
    }

    /// 导出各条目的next_run快照（进程重启时恢复用）
    pub fn snapshot_next_runs(&self) -> HashMap<String, DateTime<Utc>> {
        self.entries
            .iter()
            .filter_map(|e| e.next_run.map(|t| (e.name.clone(), t)))
            .collect()
    }

    /// 恢复快照；快照中不存在的条目保持未初始化
    pub fn restore_next_runs(&mut self, snapshot: &HashMap<String, DateTime<Utc>>) {
        for entry in &mut self.entries {
            if let Some(next_run) = snapshot.get(&entry.name) {
                entry.next_run = Some(*next_run);
            }
        }
    }

    /// 触发全部到期条目，返回本轮发布的消息数
    ///
    /// 发布失败的条目保留原next_run，下一轮重试；
    /// 单个条目的故障不影响其余条目。
    pub async fn tick(&mut self, now: DateTime<Utc>) -> TaskQueueResult<usize> {
        let mut fired = 0;
        for index in 0..self.entries.len() {
            if !self.entries[index].is_due(now) {
                continue;
            }
            let entry = self.entries[index].clone();
            match self.fire(&entry).await {
                Ok(()) => {
                    self.entries[index].advance(now)?;
                    fired += 1;
                }
                Err(e) => {
                    warn!("调度条目 {} 触发失败: {}，下一轮重试", entry.name, e);
                }
            }
        }
        Ok(fired)
    }

    /// 最近的下一次触发时间
    pub fn next_wakeup(&self) -> Option<DateTime<Utc>> {
        self.entries.iter().filter_map(|e| e.next_run).min()
    }

    async fn fire(&self, entry: &ScheduleEntry) -> TaskQueueResult<()> {
        let queue = entry
            .queue
            .clone()
            .unwrap_or_else(|| self.default_queue.clone());
        let mut message = TaskMessage::new(entry.task_name.clone(), entry.args.clone(), queue.clone());
        message.scheduled_at = entry.next_run;

        self.store.put_pending(&message.id).await?;
        self.transport
            .publish(&queue, &message, Duration::ZERO)
            .await?;
        info!(
            "调度条目 {} 触发，任务 {} 发布到队列 {}",
            entry.name, message.id, queue
        );
        Ok(())
    }

    /// 主循环：休眠到最近的触发时刻，到期即发布
    pub async fn run(&mut self) -> TaskQueueResult<()> {
        info!("Beat启动，共{}个调度条目", self.entries.len());
        self.initialize(Utc::now())?;
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            let now = Utc::now();
            let sleep = self
                .next_wakeup()
                .map(|wakeup| (wakeup - now).to_std().unwrap_or(Duration::ZERO))
                .unwrap_or(self.max_sleep)
                .min(self.max_sleep);

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("收到停止信号，Beat退出");
                    return Ok(());
                }
                _ = tokio::time::sleep(sleep) => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        error!("调度触发出错: {}", e);
                    }
                }
            }
        }
    }

    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// 后台启动
    pub fn start(mut self) -> JoinHandle<TaskQueueResult<()>> {
        tokio::spawn(async move { self.run().await })
    }
}
