//! 投递目标
//!
//! 一个目标是活动内的一个 (用户, 设备 token) 投递单元。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TargetStatus;
use super::user::UserRef;

/// 投递目标
///
/// user_email / user_name 是展开时的快照，之后不再刷新。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationTarget {
    pub user_id: String,
    pub user_email: Option<String>,
    pub user_name: Option<String>,
    pub token: String,
    pub status: TargetStatus,
    /// 仅在 status=failed 时有值
    pub error: Option<String>,
    /// 仅在 status=success 时有值
    pub message_id: Option<String>,
    /// 首次尝试时写入，之后不可变
    pub attempted_at: Option<DateTime<Utc>>,
}

impl NotificationTarget {
    pub fn pending(user: &UserRef, token: impl Into<String>) -> Self {
        Self {
            user_id: user.id.clone(),
            user_email: user.email.clone(),
            user_name: user.display_name.clone(),
            token: token.into(),
            status: TargetStatus::Pending,
            error: None,
            message_id: None,
            attempted_at: None,
        }
    }

    pub fn key(&self) -> TargetKey {
        TargetKey {
            user_id: self.user_id.clone(),
            token: self.token.clone(),
        }
    }

    pub fn matches(&self, user_id: &str, token: &str) -> bool {
        self.user_id == user_id && self.token == token
    }

    /// 应用一次投递结果
    ///
    /// 只对 pending 目标生效，返回是否发生了修改。
    pub fn apply(&mut self, patch: &TargetPatch) -> bool {
        if self.status.is_terminal() || !patch.status.is_terminal() {
            return false;
        }
        self.status = patch.status;
        self.error = patch.error.clone();
        self.message_id = patch.message_id.clone();
        if self.attempted_at.is_none() {
            self.attempted_at = Some(patch.attempted_at);
        }
        true
    }
}

/// 目标身份
///
/// 回写结果按 (user_id, token) 定位，从不按数组下标。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetKey {
    pub user_id: String,
    pub token: String,
}

/// 单个目标的结果补丁
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetPatch {
    pub status: TargetStatus,
    pub error: Option<String>,
    pub message_id: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

impl TargetPatch {
    pub fn success(message_id: impl Into<String>, attempted_at: DateTime<Utc>) -> Self {
        Self {
            status: TargetStatus::Success,
            error: None,
            message_id: Some(message_id.into()),
            attempted_at,
        }
    }

    pub fn failure(error: impl Into<String>, attempted_at: DateTime<Utc>) -> Self {
        Self {
            status: TargetStatus::Failed,
            error: Some(error.into()),
            message_id: None,
            attempted_at,
        }
    }
}
