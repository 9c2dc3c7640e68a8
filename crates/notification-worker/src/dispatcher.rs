//! 推送分发器
//!
//! 对活动中每个 pending 目标发起一次推送，单次分发用 `buffer_unordered`
//! 限制并行度，跨活动共享一个信号量限制在途调用总数。单个目标的失败只写进
//! 目标自身，不会中断其他目标。全部完成后交给聚合器决定终态。
//!
//! 已经 success / failed 的目标不会被重发，崩溃后对同一活动重新分发是安全的。

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::stream::{self, StreamExt};
use push_shared::config::DispatchConfig;
use push_shared::observability::metrics;
use push_shared::retry::{RetryPolicy, retry_with_policy};
use serde::Serialize;
use tokio::sync::{Semaphore, watch};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::aggregator::StatusAggregator;
use crate::error::{NotificationError, Result};
use crate::models::{
    CampaignStatus, NotificationContent, NotificationTarget, TargetPatch, TargetStatus,
};
use crate::store::CampaignStore;
use crate::transport::{PushMessage, PushTransport, TransportError};

/// 单个目标的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendOutcome {
    Succeeded,
    Failed,
    /// 结果回写时目标已不是 pending（并发分发抢先）
    Stale,
    /// 观察到停机信号，未发送
    Skipped,
    /// 已发送但结果回写失败，目标仍为 pending
    WriteFailed,
}

/// 一次分发的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReport {
    pub log_id: Uuid,
    /// 分发结束时的活动状态，未能聚合时仍为 processing
    pub status: CampaignStatus,
    /// 实际发起的推送调用数
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl DispatchReport {
    fn untouched(log_id: Uuid, status: CampaignStatus) -> Self {
        Self {
            log_id,
            status,
            attempted: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
        }
    }
}

pub struct Dispatcher {
    store: Arc<dyn CampaignStore>,
    transport: Arc<dyn PushTransport>,
    aggregator: Arc<StatusAggregator>,
    in_flight: Arc<Semaphore>,
    max_concurrency: usize,
    send_timeout: Duration,
    write_retry: RetryPolicy,
    shutdown: Option<watch::Receiver<bool>>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn CampaignStore>,
        transport: Arc<dyn PushTransport>,
        aggregator: Arc<StatusAggregator>,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            store,
            transport,
            aggregator,
            in_flight: Arc::new(Semaphore::new(config.global_max_in_flight.max(1))),
            max_concurrency: config.max_concurrency.max(1),
            send_timeout: Duration::from_millis(config.send_timeout_ms),
            write_retry: RetryPolicy::fast(),
            shutdown: None,
        }
    }

    /// 关联停机信号：信号置为 true 后不再发起新的推送，已发出的继续完成
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    #[instrument(skip(self), fields(log_id = %log_id))]
    pub async fn dispatch(&self, log_id: Uuid) -> Result<DispatchReport> {
        let log = self.store.load(log_id).await?;

        if log.processing_status.is_terminal() {
            debug!(status = %log.processing_status, "活动已是终态，跳过分发");
            return Ok(DispatchReport::untouched(log_id, log.processing_status));
        }
        if log.targets.is_empty() {
            return Err(NotificationError::invalid_state(
                log_id.to_string(),
                log.processing_status,
                "dispatch",
            ));
        }

        let claimed = self
            .store
            .transition_status(
                log_id,
                &[CampaignStatus::Pending, CampaignStatus::Processing],
                CampaignStatus::Processing,
                None,
            )
            .await?;
        if !claimed {
            let current = self.store.load(log_id).await?.processing_status;
            if current.is_terminal() {
                return Ok(DispatchReport::untouched(log_id, current));
            }
            return Err(NotificationError::invalid_state(
                log_id.to_string(),
                current,
                "dispatch",
            ));
        }

        if let Err(e) = self.transport.probe().await {
            let ever_attempted = log.targets.iter().any(|t| t.attempted_at.is_some());
            if ever_attempted {
                // 已有目标发出过，不能再把整个活动判为启动失败
                warn!(transport = self.transport.name(), error = %e, "推送通道不可用，活动保持 processing 等待重新分发");
                return Err(NotificationError::TransportUnavailable(e.to_string()));
            }
            error!(transport = self.transport.name(), error = %e, "推送通道在分发开始前不可用");
            let status = self.aggregator.mark_startup_failure(log_id).await?;
            return Ok(DispatchReport::untouched(log_id, status));
        }

        let pending: Vec<NotificationTarget> = log
            .targets
            .into_iter()
            .filter(|t| t.status == TargetStatus::Pending)
            .collect();
        let content = log.content;

        info!(
            pending = pending.len(),
            max_concurrency = self.max_concurrency,
            "开始分发推送"
        );

        // collect 即汇合点：所有已发起的推送完成后才进入聚合
        let outcomes: Vec<(SendOutcome, bool)> = stream::iter(pending)
            .map(|target| self.send_one(log_id, &content, target))
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        let mut report = DispatchReport::untouched(log_id, CampaignStatus::Processing);
        let mut write_failures = 0usize;
        for (outcome, called) in &outcomes {
            if *called {
                report.attempted += 1;
            }
            match outcome {
                SendOutcome::Succeeded => report.succeeded += 1,
                SendOutcome::Failed => report.failed += 1,
                SendOutcome::Skipped => report.skipped += 1,
                SendOutcome::WriteFailed => write_failures += 1,
                SendOutcome::Stale => {}
            }
        }

        if report.skipped > 0 || write_failures > 0 {
            warn!(
                skipped = report.skipped,
                write_failures,
                "仍有目标未完成，活动保持 processing"
            );
            return Ok(report);
        }

        report.status = match self.aggregator.finalize(log_id).await {
            Ok(status) => status,
            Err(NotificationError::InvalidState { .. }) => {
                // 另一个分发仍在处理部分目标，由它完成聚合
                CampaignStatus::Processing
            }
            Err(e) => return Err(e),
        };

        info!(
            status = %report.status,
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            "分发完成"
        );
        Ok(report)
    }

    /// 发送单个目标并回写结果，返回 (结果, 是否调用了推送通道)
    async fn send_one(
        &self,
        log_id: Uuid,
        content: &NotificationContent,
        target: NotificationTarget,
    ) -> (SendOutcome, bool) {
        if self.shutdown_requested() {
            return (SendOutcome::Skipped, false);
        }

        let Ok(permit) = self.in_flight.acquire().await else {
            return (SendOutcome::Skipped, false);
        };

        let message = PushMessage::new(&target.token, content);
        let started = Instant::now();
        let result = match tokio::time::timeout(self.send_timeout, self.transport.send(&message))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        };
        drop(permit);

        let now = Utc::now();
        let (patch, label) = match result {
            Ok(message_id) => (TargetPatch::success(message_id, now), "success"),
            Err(TransportError::Timeout) => (
                TargetPatch::failure(TransportError::Timeout.to_string(), now),
                "timeout",
            ),
            Err(e) => (TargetPatch::failure(e.to_string(), now), "failed"),
        };
        metrics::record_push_send(label, started.elapsed().as_secs_f64());

        let written = retry_with_policy(
            &self.write_retry,
            "update_target",
            NotificationError::is_retryable,
            || {
                self.store
                    .update_target(log_id, &target.user_id, &target.token, &patch)
            },
        )
        .await;

        let outcome = match written {
            Ok(true) if patch.status == TargetStatus::Success => SendOutcome::Succeeded,
            Ok(true) => {
                debug!(
                    user_id = %target.user_id,
                    error = patch.error.as_deref().unwrap_or_default(),
                    "目标推送失败"
                );
                SendOutcome::Failed
            }
            Ok(false) => {
                debug!(user_id = %target.user_id, "目标已被其他分发写入");
                SendOutcome::Stale
            }
            Err(e) => {
                error!(user_id = %target.user_id, error = %e, "回写目标结果失败");
                SendOutcome::WriteFailed
            }
        };
        (outcome, true)
    }
}
