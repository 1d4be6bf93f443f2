use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::models::TaskDefinition;
use crate::traits::TaskHandler;

/// 注册表中的一项：任务定义加处理能力
#[derive(Clone)]
pub struct RegisteredTask {
    pub definition: TaskDefinition,
    pub handler: Arc<dyn TaskHandler>,
}

/// 任务注册表
///
/// 进程启动时构建一次，此后只读；不支持运行时动态注册。
pub struct TaskRegistry {
    tasks: HashMap<String, RegisteredTask>,
}

impl TaskRegistry {
    pub fn builder() -> TaskRegistryBuilder {
        TaskRegistryBuilder::new()
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTask> {
        self.tasks.get(name)
    }

    pub fn definition(&self, name: &str) -> Option<&TaskDefinition> {
        self.tasks.get(name).map(|t| &t.definition)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(|s| s.as_str())
    }

    /// 注册任务涉及的全部队列名（去重）
    pub fn queues(&self) -> Vec<String> {
        let mut queues: Vec<String> = self
            .tasks
            .values()
            .map(|t| t.definition.queue.clone())
            .collect();
        queues.sort();
        queues.dedup();
        queues
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// 注册表构建器，引擎启动前完成全部注册
pub struct TaskRegistryBuilder {
    tasks: HashMap<String, RegisteredTask>,
}

impl TaskRegistryBuilder {
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
        }
    }

    pub fn register(mut self, definition: TaskDefinition, handler: Arc<dyn TaskHandler>) -> Self {
        let name = definition.name.clone();
        if self
            .tasks
            .insert(name.clone(), RegisteredTask { definition, handler })
            .is_some()
        {
            warn!("任务 {} 被重复注册，后者覆盖前者", name);
        } else {
            info!("注册任务: {}", name);
        }
        self
    }

    pub fn build(self) -> Arc<TaskRegistry> {
        Arc::new(TaskRegistry { tasks: self.tasks })
    }
}

impl Default for TaskRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}
