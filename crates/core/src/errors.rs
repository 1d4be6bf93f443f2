use thiserror::Error;

/// 任务队列系统错误类型定义
#[derive(Debug, Error)]
pub enum TaskQueueError {
    #[error("消息中间件不可达: {0}")]
    TransportUnavailable(String),

    #[error("消息队列错误: {0}")]
    MessageQueue(String),

    #[error("结果存储错误: {0}")]
    ResultStore(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("未注册的任务: {name}")]
    UnknownTask { name: String },

    #[error("任务结果未找到: {id}")]
    ResultNotFound { id: String },

    #[error("等待任务结果超时: {id}")]
    WaitTimeout { id: String },

    #[error("任务执行超时")]
    ExecutionTimeout,

    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },

    #[error("任务执行错误: {0}")]
    TaskExecution(String),

    #[error("无效的任务参数: {0}")]
    InvalidTaskParams(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 统一的Result类型
pub type TaskQueueResult<T> = Result<T, TaskQueueError>;

impl TaskQueueError {
    pub fn transport_error<S: Into<String>>(msg: S) -> Self {
        Self::TransportUnavailable(msg.into())
    }

    pub fn store_error<S: Into<String>>(msg: S) -> Self {
        Self::ResultStore(msg.into())
    }

    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn unknown_task<S: Into<String>>(name: S) -> Self {
        Self::UnknownTask { name: name.into() }
    }

    /// 判断错误是否可以通过重试恢复（基础设施层面的暂时性故障）
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TaskQueueError::TransportUnavailable(_)
                | TaskQueueError::MessageQueue(_)
                | TaskQueueError::ResultStore(_)
        )
    }
}

impl From<serde_json::Error> for TaskQueueError {
    fn from(e: serde_json::Error) -> Self {
        TaskQueueError::Serialization(e.to_string())
    }
}

/// 任务处理函数报告的业务错误
///
/// 区别于`TaskQueueError`（基础设施错误），`TaskError`由任务处理函数返回，
/// 重试控制器根据其分类决定是否重试。
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// 临时性失败（如网络抖动），按重试策略重试
    #[error("临时性错误: {0}")]
    Transient(String),

    /// 永久性失败，立即标记FAILURE，不重试
    #[error("永久性错误: {0}")]
    Permanent(String),
}

impl TaskError {
    pub fn transient<S: Into<String>>(msg: S) -> Self {
        Self::Transient(msg.into())
    }

    pub fn permanent<S: Into<String>>(msg: S) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, TaskError::Transient(_))
    }
}
