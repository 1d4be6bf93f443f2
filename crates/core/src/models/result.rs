use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 任务状态
///
/// 状态机：PENDING -> STARTED -> (PROGRESS)* -> SUCCESS
///                 \-> REVOKED          \-> RETRY -> STARTED ...
///                                       \-> FAILURE
/// SUCCESS / FAILURE / REVOKED为终态，一经写入不再变化。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskState {
    Pending,
    Started,
    Progress,
    Success,
    Failure,
    Retry,
    Revoked,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Success | TaskState::Failure | TaskState::Revoked
        )
    }

    /// 状态转移是否合法
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            // 任一非终态都可被撤销
            (_, TaskState::Revoked) => true,
            (TaskState::Pending, TaskState::Started) => true,
            (TaskState::Started, TaskState::Progress)
            | (TaskState::Started, TaskState::Success)
            | (TaskState::Started, TaskState::Failure)
            | (TaskState::Started, TaskState::Retry) => true,
            (TaskState::Progress, TaskState::Progress)
            | (TaskState::Progress, TaskState::Success)
            | (TaskState::Progress, TaskState::Failure)
            | (TaskState::Progress, TaskState::Retry) => true,
            // 重试消息重新投递后再次进入STARTED
            (TaskState::Retry, TaskState::Started) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskState::Pending => "PENDING",
            TaskState::Started => "STARTED",
            TaskState::Progress => "PROGRESS",
            TaskState::Success => "SUCCESS",
            TaskState::Failure => "FAILURE",
            TaskState::Retry => "RETRY",
            TaskState::Revoked => "REVOKED",
        };
        write!(f, "{s}")
    }
}

/// 状态更新携带的载荷
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultPayload {
    /// SUCCESS时的返回值
    pub value: Option<Value>,
    /// FAILURE时的错误描述
    pub error: Option<String>,
    /// PROGRESS时的进度元数据（任意结构）
    pub progress: Option<Value>,
}

impl ResultPayload {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn success(value: Value) -> Self {
        Self {
            value: Some(value),
            ..Self::default()
        }
    }

    pub fn failure<S: Into<String>>(error: S) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn progress(meta: Value) -> Self {
        Self {
            progress: Some(meta),
            ..Self::default()
        }
    }
}

/// 任务结果记录，每个任务id一条
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResultRecord {
    pub id: String,
    pub state: TaskState,
    pub value: Option<Value>,
    pub error: Option<String>,
    pub progress: Option<Value>,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskResultRecord {
    pub fn pending<S: Into<String>>(id: S) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            state: TaskState::Pending,
            value: None,
            error: None,
            progress: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state.is_terminal()
    }

    /// 应用一次状态更新（合法性由存储层的CAS保证）
    pub fn apply(&mut self, state: TaskState, payload: ResultPayload) {
        self.state = state;
        if let Some(value) = payload.value {
            self.value = Some(value);
        }
        if let Some(error) = payload.error {
            self.error = Some(error);
        }
        if let Some(progress) = payload.progress {
            self.progress = Some(progress);
        }
        if state == TaskState::Retry {
            self.retry_count += 1;
        }
        self.updated_at = Utc::now();
    }
}

/// 组屏障记录：在飞行中的组/和弦的同步点
///
/// completed只增不减且不超过total；和弦回调在completed第一次
/// 达到total时发布，恰好一次。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupBarrier {
    pub group_id: String,
    pub total: usize,
    pub completed: usize,
    /// 按group_index索引的成员结果
    pub results: BTreeMap<usize, Value>,
    /// 任一成员失败或被撤销后置位，回调不再发布
    pub failed: bool,
    pub created_at: DateTime<Utc>,
}

impl GroupBarrier {
    pub fn new<S: Into<String>>(group_id: S, total: usize) -> Self {
        Self {
            group_id: group_id.into(),
            total,
            completed: 0,
            results: BTreeMap::new(),
            failed: false,
            created_at: Utc::now(),
        }
    }

    /// 按索引顺序收集成员结果（全部成员完成后调用）
    pub fn ordered_results(&self) -> Vec<Value> {
        self.results.values().cloned().collect()
    }
}
