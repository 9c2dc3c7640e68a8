//! 推送活动（NotificationLog）
//!
//! 一次推送活动对应一条日志及其全部投递目标。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{CampaignStatus, NotificationTarget, TargetStatus};

/// 推送内容
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationContent {
    pub title: String,
    pub body: String,
    pub image_url: Option<String>,
    pub deep_link: Option<String>,
}

/// 目标人群选择器
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AudienceSelector {
    /// 目录中的全部用户
    #[default]
    AllUsers,
    /// 指定用户列表
    #[serde(rename_all = "camelCase")]
    Users { user_ids: Vec<String> },
}

/// 活动创建者，设置后不可变
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminCreator {
    pub uid: String,
    pub name: String,
    pub email: String,
}

/// 推送活动日志
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationLog {
    pub id: Uuid,
    #[serde(flatten)]
    pub content: NotificationContent,
    pub schedule_at: Option<DateTime<Utc>>,
    pub audience: AudienceSelector,
    pub admin_creator: AdminCreator,
    pub created_at: DateTime<Utc>,
    pub processing_status: CampaignStatus,
    /// 进入终态时写入一次，之前为空
    pub processed_at: Option<DateTime<Utc>>,
    pub targets: Vec<NotificationTarget>,
}

impl NotificationLog {
    pub fn new(
        content: NotificationContent,
        audience: AudienceSelector,
        schedule_at: Option<DateTime<Utc>>,
        admin_creator: AdminCreator,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            content,
            schedule_at,
            audience,
            admin_creator,
            created_at: Utc::now(),
            processing_status: CampaignStatus::Pending,
            processed_at: None,
            targets: Vec::new(),
        }
    }

    /// 没有 schedule_at 或已到期
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.schedule_at.is_none_or(|at| at <= now)
    }

    pub fn find_target(&self, user_id: &str, token: &str) -> Option<&NotificationTarget> {
        self.targets.iter().find(|t| t.matches(user_id, token))
    }

    pub fn summary(&self) -> DeliverySummary {
        DeliverySummary::from_targets(&self.targets)
    }
}

/// 投递统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverySummary {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub pending: usize,
}

impl DeliverySummary {
    pub fn from_targets(targets: &[NotificationTarget]) -> Self {
        targets.iter().fold(
            Self {
                total: targets.len(),
                ..Default::default()
            },
            |mut acc, t| {
                match t.status {
                    TargetStatus::Success => acc.success += 1,
                    TargetStatus::Failed => acc.failed += 1,
                    TargetStatus::Pending => acc.pending += 1,
                }
                acc
            },
        )
    }
}
