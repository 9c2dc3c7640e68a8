//! 活动与目标状态枚举
//!
//! 所有枚举都支持数据库（sqlx）和 JSON（serde）序列化，
//! 持久化值与管理后台使用的字符串一致。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 活动处理状态
///
/// 终态只能由聚合器写入；流转规则见 [`CampaignStatus::can_transition_to`]。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum CampaignStatus {
    /// 待处理 - 已创建，等待展开或分发
    #[default]
    Pending,
    /// 已定时 - 等待 schedule_at 到期
    Scheduled,
    /// 处理中 - 分发已开始
    Processing,
    /// 全部成功
    Completed,
    /// 部分成功
    PartiallyCompleted,
    /// 全部失败，或启动时推送通道不可用
    Error,
    /// 没有任何可投递的 token
    CompletedNoTargets,
    /// 定时活动在触发前被取消
    Cancelled,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Scheduled => "scheduled",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::PartiallyCompleted => "partially_completed",
            Self::Error => "error",
            Self::CompletedNoTargets => "completed_no_targets",
            Self::Cancelled => "cancelled",
        }
    }

    /// 终态不再发生任何自动流转
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed
                | Self::PartiallyCompleted
                | Self::Error
                | Self::CompletedNoTargets
                | Self::Cancelled
        )
    }

    /// 状态流转表
    ///
    /// 存储层的状态交换只接受表内的流转，其余一律拒绝。
    /// processing -> processing 允许，用于崩溃后重新分发时再次领取。
    pub fn can_transition_to(&self, next: CampaignStatus) -> bool {
        use CampaignStatus::*;
        matches!(
            (self, next),
            (Scheduled, Pending)
                | (Scheduled, Cancelled)
                | (Pending, Processing)
                | (Pending, CompletedNoTargets)
                | (Processing, Processing)
                | (Processing, Completed)
                | (Processing, PartiallyCompleted)
                | (Processing, Error)
        )
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单个目标的投递状态
///
/// 单调：一旦 success 或 failed，就不会再回到 pending。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum TargetStatus {
    #[default]
    Pending,
    Success,
    Failed,
}

impl TargetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}
