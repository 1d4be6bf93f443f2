pub mod message;
pub mod result;
pub mod schedule;
pub mod task;

pub use message::{Delivery, Signature, TaskMessage};
pub use result::{GroupBarrier, ResultPayload, TaskResultRecord, TaskState};
pub use schedule::{CronFields, ScheduleEntry, Trigger};
pub use task::{RateLimit, RetryPolicy, TaskDefinition};
