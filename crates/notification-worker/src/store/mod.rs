//! 活动存储
//!
//! 活动日志（含目标列表）的唯一事实来源。目标结果按 (user_id, token)
//! 做原子字段更新，并发分发的 worker 各自写不相交的目标，不会互相覆盖。

mod memory;
mod postgres;

pub use memory::MemoryCampaignStore;
pub use postgres::{MIGRATOR, PgCampaignStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{CampaignStatus, NotificationLog, NotificationTarget, TargetPatch};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CampaignStore: Send + Sync {
    /// 读取活动，不存在时返回 NotFound
    async fn load(&self, id: Uuid) -> Result<NotificationLog>;

    /// 整体替换写入（不存在则插入），活动粒度上后写者胜
    async fn save(&self, log: &NotificationLog) -> Result<()>;

    /// 一次性挂载展开结果
    ///
    /// 仅当活动处于 pending 且尚无目标时生效，返回是否写入。
    async fn attach_targets(&self, id: Uuid, targets: &[NotificationTarget]) -> Result<bool>;

    /// 回写单个目标的投递结果
    ///
    /// 只更新仍为 pending 的目标；attempted_at 只在为空时写入。返回是否发生更新。
    async fn update_target(
        &self,
        log_id: Uuid,
        user_id: &str,
        token: &str,
        patch: &TargetPatch,
    ) -> Result<bool>;

    /// 比较并交换活动状态
    ///
    /// 当前状态在 `from` 中才切换到 `to`；processed_at 只在为空时写入。
    /// 流转表不允许到达 `to` 的来源状态会被忽略，见 [`allowed_sources`]。
    async fn transition_status(
        &self,
        id: Uuid,
        from: &[CampaignStatus],
        to: CampaignStatus,
        processed_at: Option<DateTime<Utc>>,
    ) -> Result<bool>;

    /// 已到期的定时活动，按 schedule_at 升序
    async fn list_due_scheduled(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Uuid>>;

    /// 按状态列出活动，按创建时间升序
    async fn list_by_status(&self, statuses: &[CampaignStatus], limit: i64) -> Result<Vec<Uuid>>;
}

/// `from` 中按流转表可以切换到 `to` 的状态
pub fn allowed_sources(from: &[CampaignStatus], to: CampaignStatus) -> Vec<CampaignStatus> {
    from.iter()
        .copied()
        .filter(|status| status.can_transition_to(to))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_sources_filters_illegal_transitions() {
        use CampaignStatus::*;
        assert_eq!(allowed_sources(&[Pending, Processing], Processing), vec![Pending, Processing]);
        assert_eq!(allowed_sources(&[Pending, Processing], Error), vec![Processing]);
        assert_eq!(allowed_sources(&[Pending], Completed), Vec::<CampaignStatus>::new());
        assert!(allowed_sources(&[Completed, Cancelled], Processing).is_empty());
    }
}
