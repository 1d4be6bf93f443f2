use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use taskflow_core::errors::{TaskQueueError, TaskQueueResult};
use taskflow_core::models::{Signature, TaskMessage, TaskResultRecord};
use taskflow_core::traits::ResultStore;

use crate::client::{AsyncResult, TaskQueueClient};

/// 工作流组合原语
///
/// - `Chain`: 顺序执行，前驱结果作为后继的第一个位置参数
/// - `Group`: 并行执行，各成员独立
/// - `Chord`: Group加回调，全部成员成功后回调收到按序结果列表
#[derive(Debug, Clone)]
pub struct Chain {
    signatures: Vec<Signature>,
}

impl Chain {
    pub fn new(signatures: Vec<Signature>) -> Self {
        Self { signatures }
    }

    pub fn then(mut self, signature: Signature) -> Self {
        self.signatures.push(signature);
        self
    }

    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }
}

pub fn chain(signatures: Vec<Signature>) -> Chain {
    Chain::new(signatures)
}

#[derive(Debug, Clone)]
pub struct Group {
    signatures: Vec<Signature>,
}

impl Group {
    pub fn new(signatures: Vec<Signature>) -> Self {
        Self { signatures }
    }

    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }

    /// 附加回调升级为和弦
    pub fn with_callback(self, callback: Signature) -> Chord {
        Chord {
            group: self,
            callback,
        }
    }
}

pub fn group(signatures: Vec<Signature>) -> Group {
    Group::new(signatures)
}

#[derive(Debug, Clone)]
pub struct Chord {
    group: Group,
    callback: Signature,
}

impl Chord {
    pub fn new(group: Group, callback: Signature) -> Self {
        Self { group, callback }
    }
}

pub fn chord(signatures: Vec<Signature>, callback: Signature) -> Chord {
    Chord::new(Group::new(signatures), callback)
}

/// 链提交结果：每个节点都可独立等待，last为末端节点
#[derive(Debug, Clone)]
pub struct ChainResult {
    pub task_ids: Vec<String>,
    pub last: AsyncResult,
}

/// 组提交结果句柄
#[derive(Clone)]
pub struct GroupResult {
    group_id: String,
    member_ids: Vec<String>,
    store: Arc<dyn ResultStore>,
}

impl GroupResult {
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn member_ids(&self) -> &[String] {
        &self.member_ids
    }

    /// 等待全部成员进入终态，按提交顺序返回记录
    pub async fn join(&self, timeout: Duration) -> TaskQueueResult<Vec<TaskResultRecord>> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut records = Vec::with_capacity(self.member_ids.len());
        for id in &self.member_ids {
            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .ok_or_else(|| TaskQueueError::WaitTimeout { id: id.clone() })?;
            records.push(self.store.wait(id, remaining).await?);
        }
        Ok(records)
    }

    /// 等待全部成员成功并收集值；任一成员失败时返回其错误
    pub async fn join_values(&self, timeout: Duration) -> TaskQueueResult<Vec<Value>> {
        let records = self.join(timeout).await?;
        let mut values = Vec::with_capacity(records.len());
        for record in records {
            match record.value {
                Some(value) => values.push(value),
                None => {
                    let error = record
                        .error
                        .unwrap_or_else(|| format!("任务 {} 未产生结果", record.id));
                    return Err(TaskQueueError::TaskExecution(error));
                }
            }
        }
        Ok(values)
    }
}

impl std::fmt::Debug for GroupResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupResult")
            .field("group_id", &self.group_id)
            .field("member_ids", &self.member_ids)
            .finish()
    }
}

/// 和弦提交结果：组句柄加回调句柄
#[derive(Debug, Clone)]
pub struct ChordResult {
    pub group: GroupResult,
    pub callback: AsyncResult,
}

impl TaskQueueClient {
    /// 提交链：只发布首节点，剩余节点随消息携带，由执行引擎推进
    ///
    /// 所有节点id在提交时即写入PENDING，调用方可立即等待任意节点。
    pub async fn submit_chain(&self, chain: Chain) -> TaskQueueResult<ChainResult> {
        let mut signatures = chain.signatures;
        if signatures.is_empty() {
            return Err(TaskQueueError::InvalidTaskParams(
                "链至少需要一个节点".to_string(),
            ));
        }
        self.validate_signatures(&signatures)?;

        let task_ids: Vec<String> = signatures.iter().map(|s| s.id.clone()).collect();
        for id in &task_ids {
            self.store().put_pending(id).await?;
        }

        let head = signatures.remove(0);
        let queue = self.signature_queue(&head)?;
        let mut message = TaskMessage::from_signature(&head, &queue);
        message.chain = signatures;

        let delay = head
            .countdown_ms
            .map(Duration::from_millis)
            .unwrap_or(Duration::ZERO);
        self.transport().publish(&queue, &message, delay).await?;
        info!("提交链 {} (共{}个节点)", message.id, task_ids.len());

        let last_id = task_ids
            .last()
            .cloned()
            .unwrap_or_else(|| message.id.clone());
        Ok(ChainResult {
            task_ids,
            last: AsyncResult::new(last_id, self.store()),
        })
    }

    /// 提交组：初始化屏障后并行发布全部成员
    pub async fn submit_group(&self, group: Group) -> TaskQueueResult<GroupResult> {
        self.submit_group_inner(group, None).await
    }

    /// 提交和弦：每个成员消息携带回调签名，最后完成者发布回调
    pub async fn submit_chord(&self, chord: Chord) -> TaskQueueResult<ChordResult> {
        self.validate_signatures(std::slice::from_ref(&chord.callback))?;
        let callback_id = chord.callback.id.clone();
        // 回调id先写PENDING，提交后即可等待
        self.store().put_pending(&callback_id).await?;
        let group = self
            .submit_group_inner(chord.group, Some(chord.callback))
            .await?;
        Ok(ChordResult {
            group,
            callback: AsyncResult::new(callback_id, self.store()),
        })
    }

    async fn submit_group_inner(
        &self,
        group: Group,
        callback: Option<Signature>,
    ) -> TaskQueueResult<GroupResult> {
        let signatures = group.signatures;
        if signatures.is_empty() {
            return Err(TaskQueueError::InvalidTaskParams(
                "组至少需要一个成员".to_string(),
            ));
        }
        self.validate_signatures(&signatures)?;

        let group_id = format!("group-{}", Uuid::new_v4());
        let size = signatures.len();
        self.store().init_group(&group_id, size).await?;

        let mut member_ids = Vec::with_capacity(size);
        for (index, signature) in signatures.into_iter().enumerate() {
            let queue = self.signature_queue(&signature)?;
            let mut message = TaskMessage::from_signature(&signature, &queue);
            message.group_id = Some(group_id.clone());
            message.group_index = Some(index);
            message.group_size = Some(size);
            message.chord = callback.clone().map(Box::new);

            let delay = signature
                .countdown_ms
                .map(Duration::from_millis)
                .unwrap_or(Duration::ZERO);
            member_ids.push(message.id.clone());
            self.publish_pending(&queue, &message, delay).await?;
        }
        info!("提交组 {} (共{}个成员)", group_id, size);
        Ok(GroupResult {
            group_id,
            member_ids,
            store: self.store(),
        })
    }

    fn validate_signatures(&self, signatures: &[Signature]) -> TaskQueueResult<()> {
        for signature in signatures {
            if !self.registry().contains(&signature.task_name) {
                return Err(TaskQueueError::unknown_task(&signature.task_name));
            }
        }
        Ok(())
    }

    fn signature_queue(&self, signature: &Signature) -> TaskQueueResult<String> {
        if let Some(queue) = &signature.queue {
            return Ok(queue.clone());
        }
        match self.registry().definition(&signature.task_name) {
            Some(definition) => Ok(definition.queue.clone()),
            None => Ok(self.default_queue_name().to_string()),
        }
    }
}
