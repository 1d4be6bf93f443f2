use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info};

use taskflow_core::config::ResultBackendConfig;
use taskflow_core::errors::{TaskQueueError, TaskQueueResult};
use taskflow_core::models::{ResultPayload, TaskResultRecord, TaskState};
use taskflow_core::traits::ResultStore;

const RESULT_KEY_PREFIX: &str = "taskflow:result:";
const GROUP_KEY_PREFIX: &str = "taskflow:group:";

/// 终态CAS：已进入终态的记录拒绝任何覆盖
const TERMINAL_CAS_SCRIPT: &str = r#"
local cur = redis.call('GET', KEYS[1])
if cur then
  local state = cjson.decode(cur)['state']
  if state == 'SUCCESS' or state == 'FAILURE' or state == 'REVOKED' then
    return 0
  end
end
redis.call('SET', KEYS[1], ARGV[1], 'EX', tonumber(ARGV[2]))
return 1
"#;

/// 成员结果写入与完成计数递增的原子组合
///
/// HSETNX保证同一成员重复投递不重复计数；只有首次写入才递增，
/// 因此计数恰好一次到达total。
const GROUP_MEMBER_SCRIPT: &str = r#"
local added = redis.call('HSETNX', KEYS[1], ARGV[1], ARGV[2])
redis.call('EXPIRE', KEYS[1], tonumber(ARGV[3]))
if added == 1 then
  return redis.call('HINCRBY', KEYS[2], 'completed', 1)
end
return tonumber(redis.call('HGET', KEYS[2], 'completed') or '0')
"#;

/// Redis结果存储实现
///
/// 记录以JSON存于`taskflow:result:<id>`，终态写入由Lua脚本CAS保护；
/// 组屏障使用HINCRBY，这是跨worker同步的唯一原子点。
/// 终态记录依赖TTL（result_expires）过期清理。
pub struct RedisResultStore {
    conn: ConnectionManager,
    result_expires: u64,
    poll_interval: Duration,
    terminal_cas: Script,
    group_member: Script,
}

impl RedisResultStore {
    pub async fn new(config: &ResultBackendConfig) -> TaskQueueResult<Self> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| TaskQueueError::store_error(format!("无效的Redis地址: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| TaskQueueError::store_error(format!("连接Redis失败: {e}")))?;
        info!("成功连接到Redis结果后端: {}", config.url);
        Ok(Self {
            conn,
            result_expires: config.result_expires_seconds.max(1),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            terminal_cas: Script::new(TERMINAL_CAS_SCRIPT),
            group_member: Script::new(GROUP_MEMBER_SCRIPT),
        })
    }

    fn result_key(task_id: &str) -> String {
        format!("{RESULT_KEY_PREFIX}{task_id}")
    }

    fn group_key(group_id: &str) -> String {
        format!("{GROUP_KEY_PREFIX}{group_id}")
    }

    fn group_results_key(group_id: &str) -> String {
        format!("{GROUP_KEY_PREFIX}{group_id}:results")
    }

    fn store_err(e: redis::RedisError) -> TaskQueueError {
        TaskQueueError::store_error(format!("Redis操作失败: {e}"))
    }

    async fn fetch(&self, task_id: &str) -> TaskQueueResult<Option<TaskResultRecord>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(Self::result_key(task_id))
            .await
            .map_err(Self::store_err)?;
        match raw {
            Some(json) => {
                let record: TaskResultRecord = serde_json::from_str(&json)
                    .map_err(|e| TaskQueueError::Serialization(format!("解析结果记录失败: {e}")))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ResultStore for RedisResultStore {
    async fn put_pending(&self, task_id: &str) -> TaskQueueResult<()> {
        let record = TaskResultRecord::pending(task_id);
        let json = serde_json::to_string(&record)?;
        let mut conn = self.conn.clone();
        // NX：已存在的记录不被覆盖
        let _: Option<String> = redis::cmd("SET")
            .arg(Self::result_key(task_id))
            .arg(json)
            .arg("NX")
            .arg("EX")
            .arg(self.result_expires)
            .query_async(&mut conn)
            .await
            .map_err(Self::store_err)?;
        Ok(())
    }

    async fn update(
        &self,
        task_id: &str,
        state: TaskState,
        payload: ResultPayload,
    ) -> TaskQueueResult<bool> {
        // 读-改-写：非终态更新接受最后写入者胜出，
        // 终态写入由脚本以"未处于终态"为条件CAS保护。
        let mut record = self
            .fetch(task_id)
            .await?
            .unwrap_or_else(|| TaskResultRecord::pending(task_id));
        if !record.state.can_transition_to(state) {
            debug!(
                "拒绝状态转移 {} -> {}: 任务 {}",
                record.state, state, task_id
            );
            return Ok(false);
        }
        record.apply(state, payload);
        let json = serde_json::to_string(&record)?;

        let mut conn = self.conn.clone();
        let updated: i64 = self
            .terminal_cas
            .key(Self::result_key(task_id))
            .arg(json)
            .arg(self.result_expires)
            .invoke_async(&mut conn)
            .await
            .map_err(Self::store_err)?;
        Ok(updated == 1)
    }

    async fn get(&self, task_id: &str) -> TaskQueueResult<Option<TaskResultRecord>> {
        self.fetch(task_id).await
    }

    async fn wait(&self, task_id: &str, timeout: Duration) -> TaskQueueResult<TaskResultRecord> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(record) = self.fetch(task_id).await? {
                if record.is_ready() {
                    return Ok(record);
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(TaskQueueError::WaitTimeout {
                    id: task_id.to_string(),
                });
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn init_group(&self, group_id: &str, total: usize) -> TaskQueueResult<()> {
        let mut conn = self.conn.clone();
        let key = Self::group_key(group_id);
        redis::pipe()
            .hset_nx(&key, "total", total)
            .ignore()
            .hset_nx(&key, "completed", 0)
            .ignore()
            .hset_nx(&key, "failed", 0)
            .ignore()
            .expire(&key, self.result_expires as i64)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(Self::store_err)?;
        Ok(())
    }

    async fn record_group_member(
        &self,
        group_id: &str,
        index: usize,
        value: Value,
    ) -> TaskQueueResult<usize> {
        let mut conn = self.conn.clone();
        let count: i64 = self
            .group_member
            .key(Self::group_results_key(group_id))
            .key(Self::group_key(group_id))
            .arg(index)
            .arg(serde_json::to_string(&value)?)
            .arg(self.result_expires)
            .invoke_async(&mut conn)
            .await
            .map_err(Self::store_err)?;
        Ok(count as usize)
    }

    async fn group_results(&self, group_id: &str) -> TaskQueueResult<Vec<Value>> {
        let mut conn = self.conn.clone();
        let raw: Vec<(String, String)> = conn
            .hgetall(Self::group_results_key(group_id))
            .await
            .map_err(Self::store_err)?;
        if raw.is_empty() {
            return Err(TaskQueueError::store_error(format!(
                "组屏障不存在: {group_id}"
            )));
        }
        let mut indexed: Vec<(usize, Value)> = Vec::with_capacity(raw.len());
        for (field, json) in raw {
            let index: usize = field.parse().map_err(|_| {
                TaskQueueError::store_error(format!("非法的成员索引: {field}"))
            })?;
            indexed.push((index, serde_json::from_str(&json)?));
        }
        indexed.sort_by_key(|(index, _)| *index);
        Ok(indexed.into_iter().map(|(_, value)| value).collect())
    }

    async fn fail_group(&self, group_id: &str) -> TaskQueueResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .hset(Self::group_key(group_id), "failed", 1)
            .await
            .map_err(Self::store_err)?;
        Ok(())
    }

    async fn is_group_failed(&self, group_id: &str) -> TaskQueueResult<bool> {
        let mut conn = self.conn.clone();
        let failed: Option<String> = conn
            .hget(Self::group_key(group_id), "failed")
            .await
            .map_err(Self::store_err)?;
        Ok(failed.as_deref() == Some("1"))
    }

    async fn remove_group(&self, group_id: &str) -> TaskQueueResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .del(&[
                Self::group_key(group_id),
                Self::group_results_key(group_id),
            ])
            .await
            .map_err(Self::store_err)?;
        Ok(())
    }
}
