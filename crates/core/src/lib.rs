//! taskflow核心：数据模型、端口定义、任务注册表与配置。
//!
//! 本crate不依赖任何具体的消息中间件或存储实现，
//! 传输与结果后端通过`traits`中的端口接入。

pub mod config;
pub mod errors;
pub mod models;
pub mod registry;
pub mod traits;

pub use config::{
    AppConfig, BackendKind, BeatConfig, ResultBackendConfig, ScheduleEntryConfig, TransportConfig,
    TransportKind, WorkerConfig,
};
pub use errors::{TaskError, TaskQueueError, TaskQueueResult};
pub use models::{
    CronFields, Delivery, GroupBarrier, RateLimit, ResultPayload, RetryPolicy, ScheduleEntry,
    Signature, TaskDefinition, TaskMessage, TaskResultRecord, TaskState, Trigger,
};
pub use registry::{RegisteredTask, TaskRegistry, TaskRegistryBuilder};
pub use traits::{MessageTransport, QueueDeclaration, ResultStore, TaskContext, TaskHandler};
