use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use lapin::{
    options::*,
    types::{AMQPValue, FieldTable},
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use tokio::sync::Mutex;
use tracing::{debug, info};

use taskflow_core::config::TransportConfig;
use taskflow_core::errors::{TaskQueueError, TaskQueueResult};
use taskflow_core::models::{Delivery, TaskMessage};
use taskflow_core::traits::{MessageTransport, QueueDeclaration};

/// RabbitMQ消息传输实现
///
/// 延迟投递通过"每队列一个延迟队列"实现：消息带per-message TTL
/// 发布到`<queue>.delayed`，过期后经死信路由回到目标队列。
pub struct RabbitMqTransport {
    connection: Connection,
    channel: Mutex<Channel>,
}

impl RabbitMqTransport {
    /// 连接RabbitMQ并开启发布确认
    pub async fn new(config: &TransportConfig) -> TaskQueueResult<Self> {
        let connection = Connection::connect(&config.url, ConnectionProperties::default())
            .await
            .map_err(|e| TaskQueueError::transport_error(format!("连接RabbitMQ失败: {e}")))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| TaskQueueError::transport_error(format!("创建通道失败: {e}")))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| TaskQueueError::MessageQueue(format!("开启发布确认失败: {e}")))?;

        info!("成功连接到RabbitMQ: {}", config.url);

        Ok(Self {
            connection,
            channel: Mutex::new(channel),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }

    pub async fn close(&self) -> TaskQueueResult<()> {
        self.connection
            .close(200, "正常关闭")
            .await
            .map_err(|e| TaskQueueError::MessageQueue(format!("关闭连接失败: {e}")))?;
        info!("RabbitMQ连接已关闭");
        Ok(())
    }

    fn delayed_queue_name(queue: &str) -> String {
        format!("{queue}.delayed")
    }

    fn serialize_message(message: &TaskMessage) -> TaskQueueResult<Vec<u8>> {
        message
            .serialize_bytes()
            .map_err(|e| TaskQueueError::Serialization(format!("序列化消息失败: {e}")))
    }

    fn deserialize_message(data: &[u8]) -> TaskQueueResult<TaskMessage> {
        TaskMessage::deserialize_bytes(data)
            .map_err(|e| TaskQueueError::Serialization(format!("反序列化消息失败: {e}")))
    }

    async fn declare_work_queue(
        &self,
        channel: &Channel,
        queue: &str,
        durable: bool,
    ) -> TaskQueueResult<()> {
        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable,
                    exclusive: false,
                    auto_delete: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| TaskQueueError::MessageQueue(format!("声明队列 {queue} 失败: {e}")))?;
        debug!("队列 {} 声明成功", queue);
        Ok(())
    }

    /// 声明延迟队列：过期消息经默认exchange死信回目标队列
    async fn declare_delayed_queue(
        &self,
        channel: &Channel,
        queue: &str,
        durable: bool,
    ) -> TaskQueueResult<()> {
        let delayed = Self::delayed_queue_name(queue);
        let mut args = FieldTable::default();
        args.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString("".into()),
        );
        args.insert(
            "x-dead-letter-routing-key".into(),
            AMQPValue::LongString(queue.into()),
        );
        channel
            .queue_declare(
                &delayed,
                QueueDeclareOptions {
                    durable,
                    exclusive: false,
                    auto_delete: false,
                    ..Default::default()
                },
                args,
            )
            .await
            .map_err(|e| {
                TaskQueueError::MessageQueue(format!("声明延迟队列 {delayed} 失败: {e}"))
            })?;
        Ok(())
    }
}

#[async_trait]
impl MessageTransport for RabbitMqTransport {
    async fn publish(
        &self,
        queue: &str,
        message: &TaskMessage,
        delay: Duration,
    ) -> TaskQueueResult<()> {
        if !self.is_connected() {
            return Err(TaskQueueError::transport_error("RabbitMQ连接已断开"));
        }
        let channel = self.channel.lock().await;

        let (routing_key, properties, payload) = if delay.is_zero() {
            (
                queue.to_string(),
                BasicProperties::default().with_delivery_mode(2), // 2 = persistent
                Self::serialize_message(message)?,
            )
        } else {
            let mut delayed_message = message.clone();
            delayed_message.not_before =
                Some(Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64));
            (
                Self::delayed_queue_name(queue),
                BasicProperties::default()
                    .with_delivery_mode(2)
                    .with_expiration(delay.as_millis().to_string().into()),
                Self::serialize_message(&delayed_message)?,
            )
        };

        let confirm = channel
            .basic_publish(
                "",
                &routing_key,
                BasicPublishOptions::default(),
                &payload,
                properties,
            )
            .await
            .map_err(|e| {
                TaskQueueError::transport_error(format!("发布消息到队列 {queue} 失败: {e}"))
            })?;

        confirm
            .await
            .map_err(|e| TaskQueueError::MessageQueue(format!("消息发布确认失败: {e}")))?;

        debug!("消息 {} 已发布到队列 {}", message.id, routing_key);
        Ok(())
    }

    async fn consume(&self, queue: &str, prefetch: u16) -> TaskQueueResult<Vec<Delivery>> {
        if !self.is_connected() {
            return Err(TaskQueueError::transport_error("RabbitMQ连接已断开"));
        }
        let channel = self.channel.lock().await;
        let mut deliveries = Vec::new();

        for _ in 0..prefetch {
            let get_result = channel
                .basic_get(queue, BasicGetOptions { no_ack: false })
                .await;
            match get_result {
                Ok(Some(delivery)) => {
                    let message = Self::deserialize_message(&delivery.data)?;
                    deliveries.push(Delivery {
                        message,
                        queue: queue.to_string(),
                        delivery_tag: delivery.delivery_tag,
                    });
                }
                Ok(None) => break,
                Err(e) => {
                    let error_msg = e.to_string();
                    // 队列不存在视为空，不作为错误抛出
                    if error_msg.contains("NOT_FOUND") || error_msg.contains("404") {
                        debug!("队列 {} 不存在，返回空结果", queue);
                        break;
                    }
                    return Err(TaskQueueError::transport_error(format!(
                        "从队列 {queue} 获取消息失败: {e}"
                    )));
                }
            }
        }
        Ok(deliveries)
    }

    async fn ack(&self, delivery: &Delivery) -> TaskQueueResult<()> {
        let channel = self.channel.lock().await;
        channel
            .basic_ack(delivery.delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| TaskQueueError::MessageQueue(format!("确认消息失败: {e}")))?;
        debug!("确认投递: tag={}", delivery.delivery_tag);
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> TaskQueueResult<()> {
        let channel = self.channel.lock().await;
        channel
            .basic_nack(
                delivery.delivery_tag,
                BasicNackOptions {
                    requeue,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| TaskQueueError::MessageQueue(format!("拒绝消息失败: {e}")))?;
        debug!("拒绝投递: tag={}, 重新入队: {}", delivery.delivery_tag, requeue);
        Ok(())
    }

    async fn declare_queue(&self, declaration: &QueueDeclaration) -> TaskQueueResult<()> {
        let channel = self.channel.lock().await;
        self.declare_work_queue(&channel, &declaration.name, declaration.durable)
            .await?;
        self.declare_delayed_queue(&channel, &declaration.name, declaration.durable)
            .await?;
        channel
            .basic_qos(declaration.prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| TaskQueueError::MessageQueue(format!("设置预取数量失败: {e}")))?;
        Ok(())
    }

    async fn purge_queue(&self, queue: &str) -> TaskQueueResult<()> {
        let channel = self.channel.lock().await;
        channel
            .queue_purge(queue, QueuePurgeOptions::default())
            .await
            .map_err(|e| TaskQueueError::MessageQueue(format!("清空队列 {queue} 失败: {e}")))?;
        debug!("队列 {} 已清空", queue);
        Ok(())
    }

    async fn queue_size(&self, queue: &str) -> TaskQueueResult<u32> {
        let channel = self.channel.lock().await;
        let queue_info = channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    passive: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await;
        match queue_info {
            Ok(info) => Ok(info.message_count()),
            Err(e) => {
                let error_msg = e.to_string();
                if error_msg.contains("NOT_FOUND") || error_msg.contains("404") {
                    debug!("队列 {} 不存在，返回大小为0", queue);
                    Ok(0)
                } else {
                    Err(TaskQueueError::MessageQueue(format!(
                        "获取队列 {queue} 信息失败: {e}"
                    )))
                }
            }
        }
    }
}
