//! 活动执行管道
//!
//! 选人 -> 展开 -> 分发 -> 聚合。每一步都以存储中的状态为准，
//! 同一活动重复执行不会产生重复目标，也不会重发已完成的目标。
//! 进程内同一活动同时只有一次执行，重叠的执行直接返回当前状态。

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::aggregator::StatusAggregator;
use crate::directory::UserDirectory;
use crate::dispatcher::Dispatcher;
use crate::error::{NotificationError, Result};
use crate::expander::TargetExpander;
use crate::models::CampaignStatus;
use crate::store::CampaignStore;

pub struct CampaignPipeline {
    store: Arc<dyn CampaignStore>,
    directory: Arc<dyn UserDirectory>,
    expander: TargetExpander,
    aggregator: Arc<StatusAggregator>,
    dispatcher: Arc<Dispatcher>,
    running: Arc<DashMap<Uuid, ()>>,
}

/// 执行期间占住活动，drop 时释放
struct RunGuard {
    running: Arc<DashMap<Uuid, ()>>,
    log_id: Uuid,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.running.remove(&self.log_id);
    }
}

impl CampaignPipeline {
    pub fn new(
        store: Arc<dyn CampaignStore>,
        directory: Arc<dyn UserDirectory>,
        expander: TargetExpander,
        aggregator: Arc<StatusAggregator>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            store,
            directory,
            expander,
            aggregator,
            dispatcher,
            running: Arc::new(DashMap::new()),
        }
    }

    fn try_acquire(&self, log_id: Uuid) -> Option<RunGuard> {
        match self.running.entry(log_id) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(RunGuard {
                    running: self.running.clone(),
                    log_id,
                })
            }
        }
    }

    /// 执行一个已放行的活动，返回执行结束时的状态
    ///
    /// 目录查询失败时活动保持 pending，错误向上返回。
    #[instrument(skip(self), fields(log_id = %log_id))]
    pub async fn run(&self, log_id: Uuid) -> Result<CampaignStatus> {
        let Some(_guard) = self.try_acquire(log_id) else {
            let current = self.store.load(log_id).await?.processing_status;
            debug!(status = %current, "活动已在执行中，跳过重复执行");
            return Ok(current);
        };

        let log = self.store.load(log_id).await?;

        match log.processing_status {
            status if status.is_terminal() => return Ok(status),
            CampaignStatus::Scheduled => {
                return Err(NotificationError::invalid_state(
                    log_id.to_string(),
                    CampaignStatus::Scheduled,
                    "run",
                ));
            }
            _ => {}
        }

        if log.processing_status == CampaignStatus::Pending && log.targets.is_empty() {
            let users = self.directory.select_users(&log.audience).await?;
            let targets = self.expander.expand(&users).await;

            if targets.is_empty() {
                info!(users = users.len(), "没有可投递的 token，跳过分发");
                return self.aggregator.mark_no_targets(log_id).await;
            }

            if !self.store.attach_targets(log_id, &targets).await? {
                debug!("目标已由其他执行挂载");
            }
        }

        let report = self.dispatcher.dispatch(log_id).await?;
        Ok(report.status)
    }
}
