//! 活动状态聚合
//!
//! 活动终态的唯一写入方。根据目标结果推导终态，并在写入终态的同一次
//! 状态交换里设置 processed_at。

use std::sync::Arc;

use chrono::Utc;
use push_shared::observability::metrics;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{NotificationError, Result};
use crate::models::{CampaignStatus, NotificationTarget, TargetStatus};
use crate::store::CampaignStore;

/// 由目标结果推导活动终态
///
/// 仍有 pending 目标时返回 None，此时不能给出终态。
pub fn derive_status(targets: &[NotificationTarget]) -> Option<CampaignStatus> {
    if targets.is_empty() {
        return Some(CampaignStatus::CompletedNoTargets);
    }

    let mut success = 0usize;
    let mut failed = 0usize;
    for target in targets {
        match target.status {
            TargetStatus::Pending => return None,
            TargetStatus::Success => success += 1,
            TargetStatus::Failed => failed += 1,
        }
    }

    Some(match (success, failed) {
        (_, 0) => CampaignStatus::Completed,
        (0, _) => CampaignStatus::Error,
        _ => CampaignStatus::PartiallyCompleted,
    })
}

pub struct StatusAggregator {
    store: Arc<dyn CampaignStore>,
}

impl StatusAggregator {
    pub fn new(store: Arc<dyn CampaignStore>) -> Self {
        Self { store }
    }

    /// 所有目标进入终态后写入活动终态
    ///
    /// 已是终态时直接返回当前状态；仍有 pending 目标时返回 InvalidState。
    pub async fn finalize(&self, log_id: Uuid) -> Result<CampaignStatus> {
        let log = self.store.load(log_id).await?;
        if log.processing_status.is_terminal() {
            return Ok(log.processing_status);
        }

        let Some(status) = derive_status(&log.targets) else {
            let summary = log.summary();
            warn!(
                log_id = %log_id,
                pending = summary.pending,
                "仍有未完成的目标，暂不聚合终态"
            );
            return Err(NotificationError::invalid_state(
                log_id.to_string(),
                log.processing_status,
                "finalize",
            ));
        };

        if status == CampaignStatus::CompletedNoTargets {
            return self.mark_no_targets(log_id).await;
        }

        self.commit(log_id, &[CampaignStatus::Processing], status).await
    }

    /// 展开结果为空，直接进入 completed_no_targets
    pub async fn mark_no_targets(&self, log_id: Uuid) -> Result<CampaignStatus> {
        self.commit(
            log_id,
            &[CampaignStatus::Pending],
            CampaignStatus::CompletedNoTargets,
        )
        .await
    }

    /// 一条都没发出前推送通道不可用，强制 error，目标保持 pending
    ///
    /// 分发器在探测通道前已把活动领取为 processing。
    pub async fn mark_startup_failure(&self, log_id: Uuid) -> Result<CampaignStatus> {
        self.commit(log_id, &[CampaignStatus::Processing], CampaignStatus::Error)
            .await
    }

    async fn commit(
        &self,
        log_id: Uuid,
        from: &[CampaignStatus],
        status: CampaignStatus,
    ) -> Result<CampaignStatus> {
        let swapped = self
            .store
            .transition_status(log_id, from, status, Some(Utc::now()))
            .await?;

        if swapped {
            metrics::record_campaign_finalized(status.as_str());
            info!(log_id = %log_id, status = %status, "活动进入终态");
            return Ok(status);
        }

        // 被并发的另一次聚合抢先
        let current = self.store.load(log_id).await?.processing_status;
        if current.is_terminal() {
            Ok(current)
        } else {
            Err(NotificationError::invalid_state(
                log_id.to_string(),
                current,
                status.as_str(),
            ))
        }
    }
}
