use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{TaskQueueError, TaskQueueResult};

/// 日历触发字段（分/时/星期），编译为CRON表达式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronFields {
    pub minute: u32,
    pub hour: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<String>,
}

impl CronFields {
    /// 生成cron crate接受的表达式（含秒字段）
    pub fn to_expression(&self) -> String {
        let dow = self.day_of_week.as_deref().unwrap_or("*");
        format!("0 {} {} * * {}", self.minute, self.hour, dow)
    }
}

/// 调度触发器：固定间隔或日历时刻
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Trigger {
    /// 固定间隔（毫秒）
    Interval { every_ms: u64 },
    /// CRON表达式
    Cron { expr: String },
}

impl Trigger {
    pub fn interval(every: Duration) -> Self {
        Self::Interval {
            every_ms: every.as_millis() as u64,
        }
    }

    /// 校验并包装CRON表达式
    pub fn cron(expr: &str) -> TaskQueueResult<Self> {
        Schedule::from_str(expr).map_err(|e| TaskQueueError::InvalidCron {
            expr: expr.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self::Cron {
            expr: expr.to_string(),
        })
    }

    pub fn calendar(fields: &CronFields) -> TaskQueueResult<Self> {
        Self::cron(&fields.to_expression())
    }

    /// 计算from之后的下一次触发时间
    pub fn next_after(&self, from: DateTime<Utc>) -> TaskQueueResult<DateTime<Utc>> {
        match self {
            Trigger::Interval { every_ms } => {
                Ok(from + chrono::Duration::milliseconds(*every_ms as i64))
            }
            Trigger::Cron { expr } => {
                let schedule =
                    Schedule::from_str(expr).map_err(|e| TaskQueueError::InvalidCron {
                        expr: expr.clone(),
                        message: e.to_string(),
                    })?;
                schedule.after(&from).next().ok_or_else(|| {
                    TaskQueueError::InvalidCron {
                        expr: expr.clone(),
                        message: "无法计算下一次触发时间".to_string(),
                    }
                })
            }
        }
    }
}

/// 调度条目，仅由Beat调度器持有和修改
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntry {
    /// 条目名（用于日志与next_run快照）
    pub name: String,
    pub task_name: String,
    #[serde(default)]
    pub args: Vec<Value>,
    /// 覆盖任务定义中的目标队列
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    pub trigger: Trigger,
    /// 下一次触发时间，启动时初始化
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run: Option<DateTime<Utc>>,
}

impl ScheduleEntry {
    pub fn new<S: Into<String>>(name: S, task_name: S, trigger: Trigger) -> Self {
        Self {
            name: name.into(),
            task_name: task_name.into(),
            args: Vec::new(),
            queue: None,
            trigger,
            next_run: None,
        }
    }

    pub fn args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn queue<S: Into<String>>(mut self, queue: S) -> Self {
        self.queue = Some(queue.into());
        self
    }

    /// 初始化下一次触发时间（未恢复快照时调用）
    pub fn initialize_next_run(&mut self, now: DateTime<Utc>) -> TaskQueueResult<()> {
        if self.next_run.is_none() {
            self.next_run = Some(self.trigger.next_after(now)?);
        }
        Ok(())
    }

    /// 触发后推进到下一次时间
    ///
    /// 间隔触发以计划时刻为基准步进；落后超过一个周期时从当前时间
    /// 重新对齐，避免重启后的补发风暴（至少一次语义已由本次触发满足）。
    pub fn advance(&mut self, now: DateTime<Utc>) -> TaskQueueResult<()> {
        let scheduled = self.next_run.unwrap_or(now);
        let mut next = self.trigger.next_after(scheduled)?;
        if next <= now {
            next = self.trigger.next_after(now)?;
        }
        self.next_run = Some(next);
        Ok(())
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_run.is_some_and(|t| t <= now)
    }
}
