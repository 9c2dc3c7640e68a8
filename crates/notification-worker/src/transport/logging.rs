//! 模拟推送通道
//!
//! 未配置推送网关时使用：只记录日志并返回生成的消息 ID，
//! 便于在无外部依赖的情况下验证整条分发管道。

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use super::{PushMessage, PushTransport, TransportError};

#[derive(Debug, Default, Clone)]
pub struct LoggingPushTransport;

#[async_trait]
impl PushTransport for LoggingPushTransport {
    fn name(&self) -> &str {
        "logging"
    }

    async fn send(&self, message: &PushMessage) -> Result<String, TransportError> {
        let message_id = format!("push_{}", Uuid::now_v7());

        info!(
            channel = "APP_PUSH",
            message_id = %message_id,
            title = %message.title,
            has_image = message.image_url.is_some(),
            "模拟发送 APP 推送通知"
        );

        Ok(message_id)
    }
}
