use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::time::Instant;
use tracing::debug;

use taskflow_core::errors::{TaskQueueError, TaskQueueResult};
use taskflow_core::models::{GroupBarrier, ResultPayload, TaskResultRecord, TaskState};
use taskflow_core::traits::ResultStore;

/// 内存结果存储实现
///
/// 终态转移在记录锁内做CAS检查；等待方通过Notify唤醒，
/// 每次终态写入后广播。组屏障在单独的锁下递增，保证
/// 并发完成时计数恰好一次到达total。
pub struct InMemoryResultStore {
    records: RwLock<HashMap<String, TaskResultRecord>>,
    groups: Mutex<HashMap<String, GroupBarrier>>,
    notify: Notify,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            groups: Mutex::new(HashMap::new()),
            notify: Notify::new(),
        }
    }
}

impl Default for InMemoryResultStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn put_pending(&self, task_id: &str) -> TaskQueueResult<()> {
        let mut records = self.records.write().await;
        records
            .entry(task_id.to_string())
            .or_insert_with(|| TaskResultRecord::pending(task_id));
        Ok(())
    }

    async fn update(
        &self,
        task_id: &str,
        state: TaskState,
        payload: ResultPayload,
    ) -> TaskQueueResult<bool> {
        let updated = {
            let mut records = self.records.write().await;
            let record = records
                .entry(task_id.to_string())
                .or_insert_with(|| TaskResultRecord::pending(task_id));
            if !record.state.can_transition_to(state) {
                debug!(
                    "拒绝状态转移 {} -> {}: 任务 {}",
                    record.state, state, task_id
                );
                false
            } else {
                record.apply(state, payload);
                true
            }
        };
        if updated && state.is_terminal() {
            self.notify.notify_waiters();
        }
        Ok(updated)
    }

    async fn get(&self, task_id: &str) -> TaskQueueResult<Option<TaskResultRecord>> {
        let records = self.records.read().await;
        Ok(records.get(task_id).cloned())
    }

    async fn wait(&self, task_id: &str, timeout: Duration) -> TaskQueueResult<TaskResultRecord> {
        let deadline = Instant::now() + timeout;
        loop {
            // 先注册唤醒再检查，避免检查与通知之间的丢失
            let notified = self.notify.notified();
            if let Some(record) = self.get(task_id).await? {
                if record.is_ready() {
                    return Ok(record);
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(TaskQueueError::WaitTimeout {
                    id: task_id.to_string(),
                });
            }
        }
    }

    async fn init_group(&self, group_id: &str, total: usize) -> TaskQueueResult<()> {
        let mut groups = self.groups.lock().await;
        groups
            .entry(group_id.to_string())
            .or_insert_with(|| GroupBarrier::new(group_id, total));
        Ok(())
    }

    async fn record_group_member(
        &self,
        group_id: &str,
        index: usize,
        value: Value,
    ) -> TaskQueueResult<usize> {
        let mut groups = self.groups.lock().await;
        let barrier = groups.get_mut(group_id).ok_or_else(|| {
            TaskQueueError::store_error(format!("组屏障不存在: {group_id}"))
        })?;
        // 重复投递的成员不再计数（SUCCESS的CAS已挡住大多数情况）
        if barrier.results.contains_key(&index) {
            return Ok(barrier.completed);
        }
        barrier.results.insert(index, value);
        barrier.completed += 1;
        debug_assert!(barrier.completed <= barrier.total);
        Ok(barrier.completed)
    }

    async fn group_results(&self, group_id: &str) -> TaskQueueResult<Vec<Value>> {
        let groups = self.groups.lock().await;
        let barrier = groups.get(group_id).ok_or_else(|| {
            TaskQueueError::store_error(format!("组屏障不存在: {group_id}"))
        })?;
        Ok(barrier.ordered_results())
    }

    async fn fail_group(&self, group_id: &str) -> TaskQueueResult<()> {
        let mut groups = self.groups.lock().await;
        if let Some(barrier) = groups.get_mut(group_id) {
            barrier.failed = true;
        }
        Ok(())
    }

    async fn is_group_failed(&self, group_id: &str) -> TaskQueueResult<bool> {
        let groups = self.groups.lock().await;
        Ok(groups.get(group_id).map(|b| b.failed).unwrap_or(false))
    }

    async fn remove_group(&self, group_id: &str) -> TaskQueueResult<()> {
        let mut groups = self.groups.lock().await;
        groups.remove(group_id);
        Ok(())
    }
}
