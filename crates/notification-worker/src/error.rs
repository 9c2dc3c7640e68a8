//! 推送活动服务错误类型
//!
//! 活动级别的错误在这里分类；单个目标的推送失败不是错误，
//! 而是写进 `NotificationTarget.error` 的数据，见 `transport::TransportError`。

use thiserror::Error;

use crate::models::CampaignStatus;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("推送活动不存在: {0}")]
    NotFound(String),

    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("未授权: {0}")]
    Unauthorized(String),

    #[error("权限不足: {0}")]
    Forbidden(String),

    #[error("活动状态不允许此操作: log_id={log_id}, status={status}, operation={operation}")]
    InvalidState {
        log_id: String,
        status: CampaignStatus,
        operation: String,
    },

    /// 定时登记没能持久化，必须同步返回给创建方
    #[error("定时登记失败: {0}")]
    SchedulingFailed(String),

    #[error("推送通道不可用: {0}")]
    TransportUnavailable(String),

    #[error("用户目录错误: {0}")]
    Directory(String),

    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Shared(#[from] push_shared::error::SharedError),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 推送活动服务 Result 类型别名
pub type Result<T> = std::result::Result<T, NotificationError>;

impl NotificationError {
    pub fn invalid_state(
        log_id: impl Into<String>,
        status: CampaignStatus,
        operation: impl Into<String>,
    ) -> Self {
        Self::InvalidState {
            log_id: log_id.into(),
            status,
            operation: operation.into(),
        }
    }

    /// 获取错误码（用于 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOTIFICATION_NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::InvalidState { .. } => "INVALID_STATE",
            Self::SchedulingFailed(_) => "SCHEDULING_FAILED",
            Self::TransportUnavailable(_) => "TRANSPORT_UNAVAILABLE",
            Self::Directory(_) => "DIRECTORY_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Shared(e) => e.code(),
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 检查是否为可重试的错误
    ///
    /// 用于结果回写：连接池耗尽、IO 抖动可以重试，约束冲突和业务错误不行。
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed
            ),
            Self::Shared(e) => e.is_retryable(),
            Self::TransportUnavailable(_) | Self::Directory(_) => true,
            _ => false,
        }
    }
}
