//! 推送通知扇出服务
//!
//! 提供推送活动的创建、查询、取消接口，并在后台执行定时闸门与分发。

use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderValue;
use notification_worker::{
    NotificationService,
    api::{self, AppState},
    directory::{InMemoryUserDirectory, PgUserDirectory, TokenResolver, UserDirectory},
    store::{CampaignStore, MIGRATOR, MemoryCampaignStore, PgCampaignStore},
    transport::{HttpPushTransport, LoggingPushTransport, PushTransport},
};
use push_shared::{
    config::{AppConfig, StoreBackend},
    database::Database,
    observability,
};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

const SERVICE_NAME: &str = "notification-worker";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 统一加载配置：从 config/{service_name}.toml 加载，包含可观测性配置
    let config = AppConfig::load(SERVICE_NAME).unwrap_or_default();

    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!("Starting {} on {}", SERVICE_NAME, config.server_addr());

    let (store, directory, resolver, db): (
        Arc<dyn CampaignStore>,
        Arc<dyn UserDirectory>,
        Arc<dyn TokenResolver>,
        Option<Database>,
    ) = match config.store.backend {
        StoreBackend::Postgres => {
            let db = Database::connect(&config.database, &MIGRATOR).await?;
            let store = PgCampaignStore::new(db.pool().clone());
            let users = Arc::new(PgUserDirectory::new(db.pool().clone()));
            info!("使用 PostgreSQL 存储");
            let store: Arc<dyn CampaignStore> = Arc::new(store);
            let directory: Arc<dyn UserDirectory> = users.clone();
            let resolver: Arc<dyn TokenResolver> = users;
            (store, directory, resolver, Some(db))
        }
        StoreBackend::Memory => {
            if config.is_production() {
                warn!("生产环境使用内存存储，重启后活动数据将丢失");
            }
            let users = Arc::new(match &config.store.seed_users_path {
                Some(path) => InMemoryUserDirectory::from_json_file(path)?,
                None => InMemoryUserDirectory::default(),
            });
            info!(users = users.len(), "使用内存存储");
            let store: Arc<dyn CampaignStore> = Arc::new(MemoryCampaignStore::new());
            let directory: Arc<dyn UserDirectory> = users.clone();
            let resolver: Arc<dyn TokenResolver> = users;
            (store, directory, resolver, None)
        }
    };

    let transport: Arc<dyn PushTransport> = match &config.push.endpoint {
        Some(endpoint) => Arc::new(HttpPushTransport::new(
            endpoint.clone(),
            config.push.api_key.clone(),
            Duration::from_millis(config.push.connect_timeout_ms),
        )?),
        None => {
            warn!("未配置推送网关（push.endpoint），使用模拟发送器");
            Arc::new(LoggingPushTransport)
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let service = Arc::new(NotificationService::build(
        store,
        directory,
        resolver,
        transport,
        &config.dispatch,
        &config.scheduler,
        shutdown_rx.clone(),
    ));

    // 恢复上次退出时未完成的活动
    match service.recover().await {
        Ok(handles) if !handles.is_empty() => info!(count = handles.len(), "已提交恢复任务"),
        Ok(_) => {}
        Err(e) => error!(error = %e, "恢复未完成活动失败"),
    }

    let gate = service.gate();
    let scheduler = tokio::spawn(gate.clone().run(shutdown_rx));

    let app = api::router(AppState::new(service)).layer(cors_layer(&config));

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    // 优雅关闭：停止接收新连接，通知定时闸门和分发器不再发起新的推送
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = scheduler.await {
        error!(error = %e, "定时闸门退出异常");
    }
    // 已发出的推送跑完并回写后再关闭连接池
    gate.drain().await;
    if let Some(db) = db {
        db.close().await;
    }

    info!("Server shutdown complete");

    Ok(())
}

/// CORS 配置：通过 PUSH_CORS_ORIGINS 环境变量控制允许的来源
fn cors_layer(config: &AppConfig) -> CorsLayer {
    let allowed_origins = std::env::var("PUSH_CORS_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:3001,http://localhost:5173".to_string());

    if allowed_origins == "*" {
        if config.is_production() {
            warn!("PUSH_CORS_ORIGINS=\"*\" 在生产环境中不安全，请设置为具体域名");
        }
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let origins: Vec<_> = allowed_origins
        .split(',')
        .filter_map(|s| s.trim().parse::<HeaderValue>().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// 监听关闭信号
///
/// K8s 通过 SIGTERM 通知 Pod 停止；本地开发通过 Ctrl+C。
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "注册 Ctrl+C 处理器失败");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "注册 SIGTERM 处理器失败");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}
