//! 管理后台 API 请求与响应结构

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::{
    AudienceSelector, CampaignStatus, DeliverySummary, NotificationContent, NotificationLog,
};
use crate::service::CreateCampaign;

/// API 统一响应
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            code: "SUCCESS".to_string(),
            message: "操作成功".to_string(),
            data: Some(data),
        }
    }
}

/// 创建推送活动请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateNotificationRequest {
    #[validate(length(min = 1, max = 200, message = "标题长度必须在1-200个字符之间"))]
    pub title: String,
    #[validate(length(min = 1, max = 4000, message = "内容长度必须在1-4000个字符之间"))]
    pub body: String,
    #[validate(url(message = "图片地址格式不正确"))]
    pub image_url: Option<String>,
    #[validate(length(max = 2048, message = "深链长度不能超过2048个字符"))]
    pub deep_link: Option<String>,
    /// 为空时立即发送
    pub schedule_at: Option<DateTime<Utc>>,
    /// 缺省为全部用户
    #[serde(default)]
    pub audience: AudienceSelector,
}

impl From<CreateNotificationRequest> for CreateCampaign {
    fn from(req: CreateNotificationRequest) -> Self {
        Self {
            content: NotificationContent {
                title: req.title,
                body: req.body,
                image_url: req.image_url.filter(|s| !s.trim().is_empty()),
                deep_link: req.deep_link.filter(|s| !s.trim().is_empty()),
            },
            audience: req.audience,
            schedule_at: req.schedule_at,
        }
    }
}

/// 创建结果
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNotificationResponse {
    pub log_id: Uuid,
    pub processing_status: CampaignStatus,
    pub schedule_at: Option<DateTime<Utc>>,
}

/// 活动详情，附带投递统计
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationDetail {
    #[serde(flatten)]
    pub log: NotificationLog,
    pub summary: DeliverySummary,
}

impl From<NotificationLog> for NotificationDetail {
    fn from(log: NotificationLog) -> Self {
        let summary = log.summary();
        Self { log, summary }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub cancelled: bool,
}
