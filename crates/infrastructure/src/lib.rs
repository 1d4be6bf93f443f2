//! taskflow基础设施：消息传输与结果存储的具体实现。
//!
//! - 传输：`InMemoryTransport`（单进程/测试）与`RabbitMqTransport`（lapin）
//! - 结果后端：`InMemoryResultStore`与`RedisResultStore`
//!
//! 两类实现各自满足core中端口的同一契约，可互相替换。

pub mod in_memory_queue;
pub mod memory_store;
pub mod rabbitmq;
pub mod redis_store;

pub use in_memory_queue::InMemoryTransport;
pub use memory_store::InMemoryResultStore;
pub use rabbitmq::RabbitMqTransport;
pub use redis_store::RedisResultStore;
