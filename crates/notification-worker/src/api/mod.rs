//! 管理后台 HTTP 接口

pub mod auth;
pub mod dto;
mod error;
pub mod handlers;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::service::NotificationService;

/// Axum 应用共享状态
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<NotificationService>,
}

impl AppState {
    pub fn new(service: Arc<NotificationService>) -> Self {
        Self { service }
    }
}

/// 推送活动路由
fn notification_routes() -> Router<AppState> {
    Router::new()
        .route("/notifications", post(handlers::create_notification))
        .route("/notifications/{id}", get(handlers::get_notification))
        .route(
            "/notifications/{id}/cancel",
            post(handlers::cancel_notification),
        )
}

/// 构建完整路由
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/api/admin", notification_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
