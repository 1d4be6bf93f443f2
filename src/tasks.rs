//! 内置演示任务集：数学计算、进度上报、限流、工作流节点。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::info;

use taskflow_core::errors::TaskError;
use taskflow_core::models::{RateLimit, TaskDefinition};
use taskflow_core::registry::TaskRegistry;
use taskflow_core::traits::{TaskContext, TaskHandler};

fn number_arg(args: &[Value], index: usize, name: &str) -> Result<f64, TaskError> {
    args.get(index)
        .and_then(Value::as_f64)
        .ok_or_else(|| TaskError::permanent(format!("参数 {name} 必须是数字")))
}

/// 加法任务
struct Add;

#[async_trait]
impl TaskHandler for Add {
    async fn run(
        &self,
        _ctx: TaskContext,
        args: Vec<Value>,
        _kwargs: Map<String, Value>,
    ) -> Result<Value, TaskError> {
        let x = number_arg(&args, 0, "x")?;
        let y = number_arg(&args, 1, "y")?;
        info!("正在计算 {} + {}", x, y);
        Ok(json!(x + y))
    }
}

/// 乘法任务
struct Multiply;

#[async_trait]
impl TaskHandler for Multiply {
    async fn run(
        &self,
        _ctx: TaskContext,
        args: Vec<Value>,
        _kwargs: Map<String, Value>,
    ) -> Result<Value, TaskError> {
        let x = number_arg(&args, 0, "x")?;
        let y = number_arg(&args, 1, "y")?;
        info!("正在计算 {} * {}", x, y);
        Ok(json!(x * y))
    }
}

/// 耗时任务，每秒上报一次进度
struct SlowTask;

#[async_trait]
impl TaskHandler for SlowTask {
    async fn run(
        &self,
        ctx: TaskContext,
        args: Vec<Value>,
        _kwargs: Map<String, Value>,
    ) -> Result<Value, TaskError> {
        let duration = number_arg(&args, 0, "duration")? as u64;
        info!("开始执行耗时任务，预计耗时{}秒", duration);
        for i in 0..duration {
            tokio::time::sleep(Duration::from_secs(1)).await;
            ctx.report_progress(json!({
                "current": i + 1,
                "total": duration,
                "status": format!("处理中... {}/{}", i + 1, duration),
            }))
            .await
            .map_err(|e| TaskError::transient(e.to_string()))?;
        }
        Ok(json!({"current": duration, "total": duration, "status": "任务完成！"}))
    }
}

/// 快速任务
struct FastTask;

#[async_trait]
impl TaskHandler for FastTask {
    async fn run(
        &self,
        _ctx: TaskContext,
        args: Vec<Value>,
        _kwargs: Map<String, Value>,
    ) -> Result<Value, TaskError> {
        let message = args
            .first()
            .and_then(Value::as_str)
            .unwrap_or("(空消息)")
            .to_string();
        info!("快速处理消息: {}", message);
        Ok(json!(format!("已处理: {message}")))
    }
}

/// 速率受限的任务（每分钟最多10个）
struct LimitedTask;

#[async_trait]
impl TaskHandler for LimitedTask {
    async fn run(
        &self,
        _ctx: TaskContext,
        args: Vec<Value>,
        _kwargs: Map<String, Value>,
    ) -> Result<Value, TaskError> {
        let data = args.first().cloned().unwrap_or(Value::Null);
        info!("处理受限任务: {}", data);
        tokio::time::sleep(Duration::from_secs(1)).await;
        Ok(json!(format!("已处理受限任务: {data}")))
    }
}

/// 可能失败的任务（错误处理演示）
struct FailingTask;

#[async_trait]
impl TaskHandler for FailingTask {
    async fn run(
        &self,
        _ctx: TaskContext,
        args: Vec<Value>,
        _kwargs: Map<String, Value>,
    ) -> Result<Value, TaskError> {
        let should_fail = args.first().and_then(Value::as_bool).unwrap_or(true);
        if should_fail {
            return Err(TaskError::transient("这是一个模拟的错误！"));
        }
        Ok(json!("任务成功完成"))
    }
}

/// 数据处理任务（链的第一节点）
struct ProcessData;

#[async_trait]
impl TaskHandler for ProcessData {
    async fn run(
        &self,
        _ctx: TaskContext,
        args: Vec<Value>,
        _kwargs: Map<String, Value>,
    ) -> Result<Value, TaskError> {
        let data = args
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| TaskError::permanent("参数 data 必须是字符串"))?;
        info!("处理数据: {}", data);
        Ok(json!(data.to_uppercase()))
    }
}

/// 保存结果任务（链的第二节点，接收前驱结果）
struct SaveResult;

#[async_trait]
impl TaskHandler for SaveResult {
    async fn run(
        &self,
        _ctx: TaskContext,
        args: Vec<Value>,
        _kwargs: Map<String, Value>,
    ) -> Result<Value, TaskError> {
        let processed = args.first().cloned().unwrap_or(Value::Null);
        info!("保存结果: {}", processed);
        Ok(json!(format!("已保存: {processed}")))
    }
}

/// 定期任务（Beat触发）
struct PeriodicTask;

#[async_trait]
impl TaskHandler for PeriodicTask {
    async fn run(
        &self,
        _ctx: TaskContext,
        _args: Vec<Value>,
        _kwargs: Map<String, Value>,
    ) -> Result<Value, TaskError> {
        let now = chrono::Utc::now();
        info!("定期任务执行时间: {}", now);
        Ok(json!(format!("定期任务在 {now} 执行")))
    }
}

/// 构建内置任务注册表
///
/// 路由：slow_task走slow_queue、fast_task走fast_queue，其余default。
pub fn build_registry() -> Arc<TaskRegistry> {
    TaskRegistry::builder()
        .register(TaskDefinition::new("tasks.add"), Arc::new(Add))
        .register(TaskDefinition::new("tasks.multiply"), Arc::new(Multiply))
        .register(
            TaskDefinition::new("tasks.slow_task")
                .queue("slow_queue")
                .time_limit(Duration::from_secs(300)),
            Arc::new(SlowTask),
        )
        .register(
            TaskDefinition::new("tasks.fast_task").queue("fast_queue"),
            Arc::new(FastTask),
        )
        .register(
            TaskDefinition::new("tasks.limited_task").rate_limit(RateLimit::per_minute(10)),
            Arc::new(LimitedTask),
        )
        .register(
            TaskDefinition::new("tasks.failing_task"),
            Arc::new(FailingTask),
        )
        .register(
            TaskDefinition::new("tasks.process_data"),
            Arc::new(ProcessData),
        )
        .register(
            TaskDefinition::new("tasks.save_result"),
            Arc::new(SaveResult),
        )
        .register(
            TaskDefinition::new("tasks.periodic_task"),
            Arc::new(PeriodicTask),
        )
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_contains_demo_tasks() {
        let registry = build_registry();
        assert!(registry.contains("tasks.add"));
        assert!(registry.contains("tasks.slow_task"));
        assert_eq!(
            registry.definition("tasks.slow_task").unwrap().queue,
            "slow_queue"
        );
        assert_eq!(
            registry.definition("tasks.limited_task").unwrap().rate_limit,
            Some(RateLimit::per_minute(10))
        );
    }
}
