//! 推送活动服务
//!
//! 面向管理后台的入口：创建活动、查询状态、取消定时活动，以及启动时的恢复。
//! 管理员身份以 `AdminContext` 显式传入。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use push_shared::config::{DispatchConfig, SchedulerConfig};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::aggregator::StatusAggregator;
use crate::directory::{TokenResolver, UserDirectory};
use crate::dispatcher::Dispatcher;
use crate::error::{NotificationError, Result};
use crate::expander::TargetExpander;
use crate::models::{
    AdminContext, AudienceSelector, CampaignStatus, NotificationContent, NotificationLog,
};
use crate::pipeline::CampaignPipeline;
use crate::scheduler::{GateDecision, SchedulerGate};
use crate::store::CampaignStore;
use crate::transport::PushTransport;

/// 启动恢复时单次最多重新执行的活动数
const RECOVERY_BATCH: i64 = 500;

/// 创建活动请求
#[derive(Debug, Clone)]
pub struct CreateCampaign {
    pub content: NotificationContent,
    pub audience: AudienceSelector,
    pub schedule_at: Option<DateTime<Utc>>,
}

/// 创建结果
#[derive(Debug)]
pub struct CreatedCampaign {
    pub log_id: Uuid,
    pub decision: GateDecision,
}

pub struct NotificationService {
    store: Arc<dyn CampaignStore>,
    gate: Arc<SchedulerGate>,
}

impl NotificationService {
    pub fn new(store: Arc<dyn CampaignStore>, gate: Arc<SchedulerGate>) -> Self {
        Self { store, gate }
    }

    /// 组装完整的执行链路
    pub fn build(
        store: Arc<dyn CampaignStore>,
        directory: Arc<dyn UserDirectory>,
        resolver: Arc<dyn TokenResolver>,
        transport: Arc<dyn PushTransport>,
        dispatch: &DispatchConfig,
        scheduler: &SchedulerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let aggregator = Arc::new(StatusAggregator::new(store.clone()));
        let dispatcher = Arc::new(
            Dispatcher::new(store.clone(), transport, aggregator.clone(), dispatch)
                .with_shutdown(shutdown),
        );
        let pipeline = Arc::new(CampaignPipeline::new(
            store.clone(),
            directory,
            TargetExpander::new(resolver, dispatch.resolve_concurrency),
            aggregator,
            dispatcher,
        ));
        let gate = Arc::new(SchedulerGate::new(store.clone(), pipeline, scheduler));
        Self::new(store, gate)
    }

    pub fn gate(&self) -> Arc<SchedulerGate> {
        self.gate.clone()
    }

    /// 创建推送活动
    ///
    /// 定时活动返回 Scheduled；立即活动已在后台开始执行。
    #[instrument(skip(self, ctx, request), fields(admin = %ctx.uid))]
    pub async fn create(
        &self,
        ctx: &AdminContext,
        request: CreateCampaign,
    ) -> Result<CreatedCampaign> {
        validate(&request)?;

        let log = NotificationLog::new(
            request.content,
            request.audience,
            request.schedule_at,
            ctx.creator(),
        );
        let log_id = log.id;
        let decision = self.gate.submit(log).await?;

        info!(
            log_id = %log_id,
            scheduled = matches!(decision, GateDecision::Scheduled { .. }),
            "推送活动已创建"
        );
        Ok(CreatedCampaign { log_id, decision })
    }

    /// 查询活动，供管理后台轮询状态
    pub async fn get(&self, ctx: &AdminContext, log_id: Uuid) -> Result<NotificationLog> {
        debug!(admin = %ctx.uid, log_id = %log_id, "查询推送活动");
        self.store.load(log_id).await
    }

    /// 取消定时活动
    pub async fn cancel_scheduled(&self, ctx: &AdminContext, log_id: Uuid) -> Result<bool> {
        self.gate.cancel(ctx, log_id).await
    }

    /// 重新执行单个未完成的活动
    ///
    /// 依赖目标状态保证幂等，已完成的目标不会重发。
    pub async fn resume(&self, log_id: Uuid) -> Result<JoinHandle<Result<CampaignStatus>>> {
        let log = self.store.load(log_id).await?;
        if !matches!(
            log.processing_status,
            CampaignStatus::Pending | CampaignStatus::Processing
        ) {
            return Err(NotificationError::invalid_state(
                log_id.to_string(),
                log.processing_status,
                "resume",
            ));
        }
        Ok(self.gate.forward(log_id))
    }

    /// 启动恢复：重新执行上次进程退出时未完成的活动
    pub async fn recover(&self) -> Result<Vec<JoinHandle<Result<CampaignStatus>>>> {
        let ids = self
            .store
            .list_by_status(
                &[CampaignStatus::Pending, CampaignStatus::Processing],
                RECOVERY_BATCH,
            )
            .await?;

        if ids.is_empty() {
            return Ok(Vec::new());
        }
        if ids.len() as i64 == RECOVERY_BATCH {
            warn!(limit = RECOVERY_BATCH, "待恢复活动达到单次上限，其余活动需下次启动恢复");
        }
        info!(count = ids.len(), "恢复未完成的推送活动");

        Ok(ids.into_iter().map(|id| self.gate.forward(id)).collect())
    }
}

fn validate(request: &CreateCampaign) -> Result<()> {
    if request.content.title.trim().is_empty() {
        return Err(NotificationError::Validation("标题不能为空".to_string()));
    }
    if request.content.body.trim().is_empty() {
        return Err(NotificationError::Validation("内容不能为空".to_string()));
    }
    if let AudienceSelector::Users { user_ids } = &request.audience {
        if user_ids.iter().all(|id| id.trim().is_empty()) {
            return Err(NotificationError::Validation(
                "目标用户列表不能为空".to_string(),
            ));
        }
    }
    Ok(())
}
