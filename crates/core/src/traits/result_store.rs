use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::TaskQueueResult;
use crate::models::{ResultPayload, TaskResultRecord, TaskState};

/// 结果存储抽象接口：任务id到状态记录的持久化映射
///
/// 终态记录由外部过期策略（TTL）清理，存储本身不主动删除。
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// 写入初始PENDING记录（已存在时不覆盖）
    async fn put_pending(&self, task_id: &str) -> TaskQueueResult<()>;

    /// 更新任务状态
    ///
    /// 对同一id的并发更新必须原子：进入终态的转移以
    /// "当前未处于终态且转移合法"为CAS条件，PROGRESS允许
    /// 最后写入者胜出。返回false表示转移被拒绝（如记录已进入终态）。
    async fn update(
        &self,
        task_id: &str,
        state: TaskState,
        payload: ResultPayload,
    ) -> TaskQueueResult<bool>;

    /// 读取当前记录
    async fn get(&self, task_id: &str) -> TaskQueueResult<Option<TaskResultRecord>>;

    /// 阻塞等待终态，超时返回`TaskQueueError::WaitTimeout`
    ///
    /// 仅供调用方使用，绝不在执行引擎的分发循环内调用。
    async fn wait(&self, task_id: &str, timeout: Duration) -> TaskQueueResult<TaskResultRecord>;

    /// 创建组屏障记录
    async fn init_group(&self, group_id: &str, total: usize) -> TaskQueueResult<()>;

    /// 记录一个成员结果并原子递增完成计数，返回新计数
    ///
    /// 多个成员可能在不同worker上同时完成，这是系统中唯一
    /// 要求跨worker原子性的操作。
    async fn record_group_member(
        &self,
        group_id: &str,
        index: usize,
        value: Value,
    ) -> TaskQueueResult<usize>;

    /// 按group_index顺序收集成员结果
    async fn group_results(&self, group_id: &str) -> TaskQueueResult<Vec<Value>>;

    /// 标记组失败（和弦回调不再发布）
    async fn fail_group(&self, group_id: &str) -> TaskQueueResult<()>;

    /// 组是否已标记失败
    async fn is_group_failed(&self, group_id: &str) -> TaskQueueResult<bool>;

    /// 屏障释放或失败后移除记录
    async fn remove_group(&self, group_id: &str) -> TaskQueueResult<()>;
}
