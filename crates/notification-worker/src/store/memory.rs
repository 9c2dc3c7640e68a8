//! 内存活动存储
//!
//! 基于 DashMap，单个活动的修改在分片锁内完成，等价于一次原子字段更新。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use super::{CampaignStore, allowed_sources};
use crate::error::{NotificationError, Result};
use crate::models::{CampaignStatus, NotificationLog, NotificationTarget, TargetPatch};

#[derive(Debug, Default)]
pub struct MemoryCampaignStore {
    logs: DashMap<Uuid, NotificationLog>,
}

impl MemoryCampaignStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }
}

#[async_trait]
impl CampaignStore for MemoryCampaignStore {
    async fn load(&self, id: Uuid) -> Result<NotificationLog> {
        self.logs
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| NotificationError::NotFound(id.to_string()))
    }

    async fn save(&self, log: &NotificationLog) -> Result<()> {
        self.logs.insert(log.id, log.clone());
        Ok(())
    }

    async fn attach_targets(&self, id: Uuid, targets: &[NotificationTarget]) -> Result<bool> {
        let mut entry = self
            .logs
            .get_mut(&id)
            .ok_or_else(|| NotificationError::NotFound(id.to_string()))?;

        if entry.processing_status != CampaignStatus::Pending || !entry.targets.is_empty() {
            return Ok(false);
        }
        entry.targets = targets.to_vec();
        Ok(true)
    }

    async fn update_target(
        &self,
        log_id: Uuid,
        user_id: &str,
        token: &str,
        patch: &TargetPatch,
    ) -> Result<bool> {
        let mut entry = self
            .logs
            .get_mut(&log_id)
            .ok_or_else(|| NotificationError::NotFound(log_id.to_string()))?;

        Ok(entry
            .targets
            .iter_mut()
            .find(|t| t.matches(user_id, token))
            .is_some_and(|t| t.apply(patch)))
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: &[CampaignStatus],
        to: CampaignStatus,
        processed_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let mut entry = self
            .logs
            .get_mut(&id)
            .ok_or_else(|| NotificationError::NotFound(id.to_string()))?;

        if !allowed_sources(from, to).contains(&entry.processing_status) {
            return Ok(false);
        }
        entry.processing_status = to;
        if entry.processed_at.is_none() {
            entry.processed_at = processed_at;
        }
        Ok(true)
    }

    async fn list_due_scheduled(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Uuid>> {
        let mut due: Vec<(DateTime<Utc>, Uuid)> = self
            .logs
            .iter()
            .filter(|e| e.processing_status == CampaignStatus::Scheduled)
            .filter_map(|e| e.schedule_at.filter(|at| *at <= now).map(|at| (at, e.id)))
            .collect();
        due.sort();
        Ok(due
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|(_, id)| id)
            .collect())
    }

    async fn list_by_status(&self, statuses: &[CampaignStatus], limit: i64) -> Result<Vec<Uuid>> {
        let mut matched: Vec<(DateTime<Utc>, Uuid)> = self
            .logs
            .iter()
            .filter(|e| statuses.contains(&e.processing_status))
            .map(|e| (e.created_at, e.id))
            .collect();
        matched.sort();
        Ok(matched
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|(_, id)| id)
            .collect())
    }
}
