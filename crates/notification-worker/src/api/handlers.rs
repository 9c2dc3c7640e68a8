//! 推送活动 API 处理器

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use super::AppState;
use super::dto::{
    ApiResponse, CancelResponse, CreateNotificationRequest, CreateNotificationResponse,
    NotificationDetail,
};
use crate::error::NotificationError;
use crate::models::{AdminContext, CampaignStatus};
use crate::scheduler::GateDecision;

/// 创建推送活动
///
/// POST /api/admin/notifications
pub async fn create_notification(
    State(state): State<AppState>,
    ctx: AdminContext,
    Json(req): Json<CreateNotificationRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CreateNotificationResponse>>), NotificationError> {
    req.validate()?;

    let schedule_at = req.schedule_at;
    let created = state.service.create(&ctx, req.into()).await?;

    // 立即发送的活动在后台执行，这里不等待
    let (processing_status, schedule_at) = match created.decision {
        GateDecision::Scheduled { due_at } => (CampaignStatus::Scheduled, Some(due_at)),
        GateDecision::Forwarded(_) => (CampaignStatus::Pending, schedule_at),
    };

    info!(log_id = %created.log_id, admin = %ctx.uid, "创建推送活动");

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(CreateNotificationResponse {
            log_id: created.log_id,
            processing_status,
            schedule_at,
        })),
    ))
}

/// 查询推送活动
///
/// GET /api/admin/notifications/{id}
pub async fn get_notification(
    State(state): State<AppState>,
    ctx: AdminContext,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<NotificationDetail>>, NotificationError> {
    let log = state.service.get(&ctx, id).await?;
    Ok(Json(ApiResponse::success(log.into())))
}

/// 取消定时推送
///
/// POST /api/admin/notifications/{id}/cancel
pub async fn cancel_notification(
    State(state): State<AppState>,
    ctx: AdminContext,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<CancelResponse>>, NotificationError> {
    let cancelled = state.service.cancel_scheduled(&ctx, id).await?;
    Ok(Json(ApiResponse::success(CancelResponse { cancelled })))
}

/// 存活探针
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "notification-worker"
    }))
}
