//! 定时闸门
//!
//! 没有 schedule_at 或已到期的活动直接放行；未到期的活动以 scheduled 状态
//! 持久化，由轮询循环在到期后领取。领取是 scheduled -> pending 的状态交换，
//! 同一活动最多放行一次，且不会早于 schedule_at。重启后从存储中继续。
//! 放行的执行任务都登记在 TaskTracker 中，停机时先等它们跑完。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use push_shared::config::SchedulerConfig;
use push_shared::observability::metrics;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{NotificationError, Result};
use crate::models::{AdminContext, CampaignStatus, NotificationLog};
use crate::pipeline::CampaignPipeline;
use crate::store::CampaignStore;

/// 提交结果
#[derive(Debug)]
pub enum GateDecision {
    /// 已登记，到期后放行
    Scheduled { due_at: DateTime<Utc> },
    /// 已放行，句柄在活动执行结束时完成
    Forwarded(JoinHandle<Result<CampaignStatus>>),
}

pub struct SchedulerGate {
    store: Arc<dyn CampaignStore>,
    pipeline: Arc<CampaignPipeline>,
    poll_interval: Duration,
    batch_size: i64,
    tasks: TaskTracker,
}

impl SchedulerGate {
    pub fn new(
        store: Arc<dyn CampaignStore>,
        pipeline: Arc<CampaignPipeline>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            store,
            pipeline,
            poll_interval: Duration::from_secs(config.poll_interval_secs.max(1)),
            batch_size: config.batch_size.max(1),
            tasks: TaskTracker::new(),
        }
    }

    /// 提交新活动
    ///
    /// 定时登记写入失败时返回 SchedulingFailed，调用方必须让创建失败。
    pub async fn submit(&self, mut log: NotificationLog) -> Result<GateDecision> {
        let now = Utc::now();

        if let Some(due_at) = log.schedule_at.filter(|_| !log.is_due(now)) {
            log.processing_status = CampaignStatus::Scheduled;
            self.store.save(&log).await.map_err(|e| {
                error!(log_id = %log.id, error = %e, "定时登记持久化失败");
                NotificationError::SchedulingFailed(e.to_string())
            })?;
            info!(log_id = %log.id, due_at = %due_at, "活动已登记定时");
            return Ok(GateDecision::Scheduled { due_at });
        }

        log.processing_status = CampaignStatus::Pending;
        self.store.save(&log).await?;
        Ok(GateDecision::Forwarded(self.forward(log.id)))
    }

    /// 取消尚未触发的定时活动
    ///
    /// 只有 scheduled 状态可以取消；已触发的活动返回 false。
    pub async fn cancel(&self, ctx: &AdminContext, log_id: Uuid) -> Result<bool> {
        let log = self.store.load(log_id).await?;
        if !ctx.can_cancel(&log.admin_creator) {
            return Err(NotificationError::Forbidden(format!(
                "只能取消自己创建的推送活动: {log_id}"
            )));
        }
        if log.processing_status != CampaignStatus::Scheduled {
            return Ok(false);
        }

        let cancelled = self
            .store
            .transition_status(
                log_id,
                &[CampaignStatus::Scheduled],
                CampaignStatus::Cancelled,
                None,
            )
            .await?;
        if cancelled {
            info!(log_id = %log_id, admin = %ctx.uid, "定时活动已取消");
        }
        Ok(cancelled)
    }

    /// 领取并放行所有到期的定时活动
    pub async fn fire_due(&self, now: DateTime<Utc>) -> Result<Vec<JoinHandle<Result<CampaignStatus>>>> {
        let due = self.store.list_due_scheduled(now, self.batch_size).await?;
        if due.is_empty() {
            return Ok(Vec::new());
        }

        info!(count = due.len(), "发现到期的定时活动");

        let mut handles = Vec::with_capacity(due.len());
        for log_id in due {
            let claimed = self
                .store
                .transition_status(
                    log_id,
                    &[CampaignStatus::Scheduled],
                    CampaignStatus::Pending,
                    None,
                )
                .await?;
            if claimed {
                info!(log_id = %log_id, "定时活动已触发");
                handles.push(self.forward(log_id));
            } else {
                warn!(log_id = %log_id, "定时活动状态已被修改，跳过");
            }
        }

        metrics::record_scheduler_fired(handles.len() as u64);
        Ok(handles)
    }

    /// 在后台执行活动管道
    pub fn forward(&self, log_id: Uuid) -> JoinHandle<Result<CampaignStatus>> {
        let pipeline = self.pipeline.clone();
        self.tasks.spawn(async move {
            let result = pipeline.run(log_id).await;
            if let Err(e) = &result {
                error!(log_id = %log_id, error = %e, "活动执行失败");
            }
            result
        })
    }

    /// 等待所有已放行的执行结束
    ///
    /// 停机信号置位后分发器不再发起新推送，这里只等已发出的推送完成并回写。
    pub async fn drain(&self) {
        self.tasks.close();
        if !self.tasks.is_empty() {
            info!(running = self.tasks.len(), "等待进行中的活动执行结束");
        }
        self.tasks.wait().await;
    }

    /// 轮询主循环，收到停机信号后退出
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(poll_interval = ?self.poll_interval, "SchedulerGate 已启动");

        loop {
            if let Err(e) = self.fire_due(Utc::now()).await {
                error!(error = %e, "定时活动处理出错");
            }

            // 记录 Worker 健康状态，供 Prometheus 告警判断 Worker 是否存活
            metrics::set_worker_last_run("scheduler_gate");

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("SchedulerGate 收到停机信号，退出");
                        break;
                    }
                }
            }
        }
    }
}
