//! taskflow定时调度器（Beat）：按固定间隔或CRON表达式周期性发布任务。

pub mod scheduler;

pub use scheduler::BeatScheduler;
