pub mod message_transport;
pub mod result_store;
pub mod task_handler;

pub use message_transport::{MessageTransport, QueueDeclaration};
pub use result_store::ResultStore;
pub use task_handler::{TaskContext, TaskHandler};
