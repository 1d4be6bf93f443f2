use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// 任务签名：尚未发布的任务调用描述
///
/// 工作流组合器在构图阶段使用，id在构造时即分配，
/// 以便链/和弦的下游节点在发布前就能被等待。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub id: String,
    pub task_name: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
    /// 覆盖任务定义中的目标队列
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    /// 发布延迟（毫秒）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub countdown_ms: Option<u64>,
}

impl Signature {
    pub fn new<S: Into<String>>(task_name: S) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_name: task_name.into(),
            args: Vec::new(),
            kwargs: Map::new(),
            queue: None,
            countdown_ms: None,
        }
    }

    pub fn arg(mut self, value: Value) -> Self {
        self.args.push(value);
        self
    }

    pub fn args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn kwarg<S: Into<String>>(mut self, key: S, value: Value) -> Self {
        self.kwargs.insert(key.into(), value);
        self
    }

    pub fn queue<S: Into<String>>(mut self, queue: S) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn countdown(mut self, delay: std::time::Duration) -> Self {
        self.countdown_ms = Some(delay.as_millis() as u64);
        self
    }
}

/// 任务消息（传输层载荷，JSON自描述格式）
///
/// 提交时创建，每次投递恰好消费一次（可能被重新投递）。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMessage {
    /// 全局唯一任务id
    pub id: String,
    pub task_name: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
    /// 目标队列
    pub queue: String,
    /// 已重试次数
    #[serde(default)]
    pub retry_count: u32,
    /// 延迟可见时间（仅作观测用途，可见性由传输层保证）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,
    /// 链上前驱任务id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// 组/和弦成员标记
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_size: Option<usize>,
    /// 链上剩余节点（本任务成功后由执行引擎依次推进）
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chain: Vec<Signature>,
    /// 和弦回调（全部成员成功后由最后完成者发布）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chord: Option<Box<Signature>>,
    /// Beat调度标记，便于消费方对定时触发去重
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl TaskMessage {
    pub fn new<S: Into<String>>(task_name: S, args: Vec<Value>, queue: S) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_name: task_name.into(),
            args,
            kwargs: Map::new(),
            queue: queue.into(),
            retry_count: 0,
            not_before: None,
            parent_id: None,
            group_id: None,
            group_index: None,
            group_size: None,
            chain: Vec::new(),
            chord: None,
            scheduled_at: None,
        }
    }

    /// 由签名展开为消息，签名未指定队列时使用default_queue
    pub fn from_signature(signature: &Signature, default_queue: &str) -> Self {
        Self {
            id: signature.id.clone(),
            task_name: signature.task_name.clone(),
            args: signature.args.clone(),
            kwargs: signature.kwargs.clone(),
            queue: signature
                .queue
                .clone()
                .unwrap_or_else(|| default_queue.to_string()),
            retry_count: 0,
            not_before: None,
            parent_id: None,
            group_id: None,
            group_index: None,
            group_size: None,
            chain: Vec::new(),
            chord: None,
            scheduled_at: None,
        }
    }

    pub fn increment_retry(&mut self) {
        self.retry_count += 1;
    }

    pub fn is_retry_exhausted(&self, max_retries: u32) -> bool {
        self.retry_count >= max_retries
    }

    pub fn is_group_member(&self) -> bool {
        self.group_id.is_some()
    }

    pub fn serialize(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn deserialize(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn serialize_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn deserialize_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// 一次未确认的消息投递
///
/// delivery_tag由具体传输实现分配，用于ack/nack定位。
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message: TaskMessage,
    pub queue: String,
    pub delivery_tag: u64,
}
