//! taskflow客户端：任务提交、撤销、结果查询与工作流组合。
//!
//! `TaskQueueClient`负责单任务提交与撤销；`chain`/`group`/`chord`
//! 组合原语在客户端构图，执行引擎在worker侧推进。

pub mod client;
pub mod workflow;

pub use client::{AsyncResult, SubmitOptions, TaskQueueClient};
pub use workflow::{
    chain, chord, group, Chain, ChainResult, Chord, ChordResult, Group, GroupResult,
};
