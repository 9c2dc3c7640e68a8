//! 推送通道
//!
//! 通过 `PushTransport` trait 抽象单条推送的发送行为。通道本身不做重试，
//! 需要重试时由上层对整个活动重新分发，依赖目标状态保证幂等。

mod http;
mod logging;

pub use http::HttpPushTransport;
pub use logging::LoggingPushTransport;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::NotificationContent;

/// 单条推送消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushMessage {
    pub token: String,
    pub title: String,
    pub body: String,
    pub image_url: Option<String>,
    pub deep_link: Option<String>,
}

impl PushMessage {
    pub fn new(token: impl Into<String>, content: &NotificationContent) -> Self {
        Self {
            token: token.into(),
            title: content.title.clone(),
            body: content.body.clone(),
            image_url: content.image_url.clone(),
            deep_link: content.deep_link.clone(),
        }
    }
}

/// 推送通道错误
///
/// Display 文本会原样写入目标的 error 字段。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("timeout")]
    Timeout,

    #[error("推送通道不可达: {0}")]
    Unreachable(String),

    #[error("推送被拒绝: HTTP {code}: {message}")]
    Rejected { code: u16, message: String },

    #[error("设备 token 无效: {0}")]
    InvalidToken(String),

    #[error("推送响应无法解析: {0}")]
    Protocol(String),
}

/// 推送通道 trait
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// 通道名称，用于日志
    fn name(&self) -> &str;

    /// 分发开始前的可达性检查
    ///
    /// 默认认为可达；返回错误意味着一条都还没发之前就失败了。
    async fn probe(&self) -> Result<(), TransportError> {
        Ok(())
    }

    /// 发送单条推送，成功返回通道侧的消息 ID
    async fn send(&self, message: &PushMessage) -> Result<String, TransportError>;
}
