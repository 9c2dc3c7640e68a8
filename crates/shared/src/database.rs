//! PostgreSQL 连接池
//!
//! 只有 store.backend = "postgres" 时才会建立连接。连接建立后立即执行
//! 调用方内嵌的迁移，迁移失败则启动失败。

use std::time::Duration;

use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{info, instrument};

use crate::config::DatabaseConfig;
use crate::error::Result;

/// 已完成迁移的连接池
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// 建立连接池并执行迁移
    #[instrument(skip_all, fields(max_connections = config.max_connections))]
    pub async fn connect(config: &DatabaseConfig, migrator: &Migrator) -> Result<Self> {
        let pool = pool_options(config).connect(&config.url).await?;
        migrator.run(&pool).await?;

        info!(migrations = migrator.iter().count(), "数据库已连接，迁移完成");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 关闭连接池，等待借出的连接归还
    pub async fn close(self) {
        self.pool.close().await;
        info!("数据库连接池已关闭");
    }
}

/// acquire 超时沿用 connect_timeout_seconds：推送回写拿不到连接时尽快失败并重试
fn pool_options(config: &DatabaseConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections.min(config.max_connections))
        .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
        .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
}
